use std::collections::HashSet;
use std::sync::Arc;

use crate::session::{Frame, Session, SessionId};

/// Recipient selection for one broadcast call.
///
/// The exclude set is applied before the uid allow-list: an excluded session
/// is skipped even when its uid is allowed.
#[derive(Debug, Default)]
pub struct BroadcastFilter {
    pub uid_allow: Vec<String>,
    pub exclude: HashSet<SessionId>,
}

impl BroadcastFilter {
    pub fn excluding(id: SessionId) -> Self {
        Self {
            exclude: HashSet::from([id]),
            ..Self::default()
        }
    }

    pub fn for_uids(uids: Vec<String>) -> Self {
        Self {
            uid_allow: uids,
            ..Self::default()
        }
    }

    fn admits(&self, session: &Session) -> bool {
        if self.exclude.contains(&session.id()) {
            return false;
        }
        if !self.uid_allow.is_empty() && !self.uid_allow.iter().any(|u| u == &session.meta().uid) {
            return false;
        }
        true
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fan a frame out over a registry snapshot. Fire-and-forget per session: a
/// failed send (client end already gone) is counted and skipped without
/// affecting the remaining recipients.
pub fn dispatch(snapshot: &[Arc<Session>], frame: &Frame, filter: &BroadcastFilter) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    for session in snapshot {
        if !filter.admits(session) {
            continue;
        }
        if session.send_frame(frame.clone()) {
            report.delivered += 1;
        } else {
            report.failed += 1;
        }
    }
    report
}
