use std::time::Duration;

use tracing::trace;

use crate::session::{now_ms, Frame, Session};

/// Transport-level keep-alive responder. Built once at startup from the
/// configured request/response texts; a recognized request frame is answered
/// on the session's outbound channel and recorded as a liveness timestamp
/// without ever reaching the relay path.
pub struct HeartbeatResponder {
    request: String,
    response: String,
}

impl HeartbeatResponder {
    pub fn new(request: String, response: String) -> Self {
        Self { request, response }
    }

    /// Returns `true` when the frame was a heartbeat request and has been
    /// consumed here.
    pub fn try_respond(&self, session: &Session, frame: &Frame) -> bool {
        let Frame::Text(text) = frame else {
            return false;
        };
        if text != &self.request {
            return false;
        }

        session.record_heartbeat(now_ms());
        if !session.send_frame(Frame::Text(self.response.clone())) {
            trace!(session = %session.id(), "heartbeat response undeliverable");
        }
        true
    }
}

/// A session is alive while the last observed heartbeat response (or the
/// connection time, if none has been observed) is younger than `timeout`.
pub fn is_alive(session: &Session, timeout: Duration) -> bool {
    is_alive_at(session, timeout, now_ms())
}

pub fn is_alive_at(session: &Session, timeout: Duration, now_ms: u64) -> bool {
    let last = session
        .last_heartbeat_ms()
        .unwrap_or_else(|| session.connected_at_ms());
    now_ms.saturating_sub(last) < timeout.as_millis() as u64
}
