//! Pending automatic warns.

use crate::{Level, PrescribedWarn};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// An automatic warn waiting to be issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedWarn {
    /// Guild id
    pub guild_id: u64,
    /// Member to warn
    pub member_id: u64,
    /// Warning level
    pub level: Level,
    /// Reason shown in the modlog
    pub reason: String,
    /// Temporary action length (seconds)
    pub duration: Option<u64>,
}

impl QueuedWarn {
    /// Queue entry for a configured warn.
    pub fn prescribed(guild_id: u64, member_id: u64, warn: &PrescribedWarn) -> Self {
        Self {
            guild_id,
            member_id,
            level: warn.level,
            reason: warn.reason.clone(),
            duration: warn.duration,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueuedWarn>,
    pending: HashSet<(u64, u64)>,
}

/// FIFO of automatic warns holding at most one entry per member.
///
/// Concurrent message handlers can detect the same infraction several times;
/// only the first push for a member is kept until the queue is drained.
#[derive(Debug, Clone)]
pub struct WarnQueue {
    state: Arc<Mutex<QueueState>>,
    limit: usize,
}

impl WarnQueue {
    /// Create a queue holding at most `limit` warns.
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            limit,
        }
    }

    /// Enqueue a warn. Returns `false` when the member already has one
    /// pending or the queue is full.
    pub fn push(&self, warn: QueuedWarn) -> bool {
        let mut state = self.state.lock();
        if state.items.len() >= self.limit {
            tracing::warn!(limit = self.limit, "Automod warn queue is full, dropping warn");
            return false;
        }
        if !state.pending.insert((warn.guild_id, warn.member_id)) {
            return false;
        }
        state.items.push_back(warn);
        true
    }

    /// Take every queued warn, oldest first. Members stay pending until
    /// [`WarnQueue::finish`] is called for them.
    pub fn drain(&self) -> Vec<QueuedWarn> {
        self.state.lock().items.drain(..).collect()
    }

    /// Release a member once their warn was issued or abandoned.
    pub fn finish(&self, guild_id: u64, member_id: u64) {
        self.state.lock().pending.remove(&(guild_id, member_id));
    }

    /// Whether a member has a warn pending.
    pub fn is_pending(&self, guild_id: u64, member_id: u64) -> bool {
        self.state.lock().pending.contains(&(guild_id, member_id))
    }

    /// Number of pending warns.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warn(guild_id: u64, member_id: u64) -> QueuedWarn {
        QueuedWarn {
            guild_id,
            member_id,
            level: Level::Warn,
            reason: "spam".into(),
            duration: None,
        }
    }

    #[test]
    fn test_one_pending_warn_per_member() {
        let queue = WarnQueue::new(10);
        assert!(queue.push(warn(1, 10)));
        assert!(!queue.push(warn(1, 10)));
        assert!(queue.push(warn(2, 10)));
        assert!(queue.is_pending(1, 10));
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
        assert!(!queue.push(warn(1, 10)));
        queue.finish(1, 10);
        assert!(queue.push(warn(1, 10)));
    }

    #[test]
    fn test_limit_drops_overflow() {
        let queue = WarnQueue::new(1);
        assert!(queue.push(warn(1, 10)));
        assert!(!queue.push(warn(1, 11)));
        assert!(!queue.is_pending(1, 11));
    }
}
