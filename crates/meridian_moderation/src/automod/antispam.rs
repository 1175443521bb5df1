//! Message rate tracking.

use crate::AntispamSettings;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// What antispam decided about one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamVerdict {
    /// Under the threshold
    Clean,
    /// First trigger: tell the member to slow down
    TextWarning,
    /// Re-trigger inside `delay_before_action`: issue the configured warn
    Escalate,
}

#[derive(Debug, Default)]
struct SpamRecord {
    messages: VecDeque<DateTime<Utc>>,
    warned: Option<DateTime<Utc>>,
}

impl SpamRecord {
    /// Nothing left in the window and no escalation pending.
    fn is_stale(&self, now: DateTime<Utc>, window: TimeDelta, escalation_window: TimeDelta) -> bool {
        let quiet = self.messages.back().is_none_or(|last| now - *last > window);
        let settled = self.warned.is_none_or(|warned| now - warned > escalation_window);
        quiet && settled
    }
}

#[derive(Debug, Default)]
struct Tracked {
    records: HashMap<(u64, u64, u64), SpamRecord>,
    swept: HashMap<u64, DateTime<Utc>>,
}

/// Recent message timestamps per (guild, channel, member).
///
/// Records of a guild that fell silent are evicted at most once per
/// `delay` seconds, on the next message seen in that guild.
#[derive(Debug, Default)]
pub struct AntispamTracker {
    tracked: Mutex<Tracked>,
}

impl AntispamTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message sent at `at` and judge it against the settings.
    pub fn record(
        &self,
        guild_id: u64,
        channel_id: u64,
        member_id: u64,
        at: DateTime<Utc>,
        settings: &AntispamSettings,
    ) -> SpamVerdict {
        let window = TimeDelta::seconds(settings.delay as i64);
        let escalation_window = TimeDelta::seconds(settings.delay_before_action as i64);
        let mut tracked = self.tracked.lock();
        Self::sweep(&mut tracked, guild_id, at, window, escalation_window);

        let record = tracked
            .records
            .entry((guild_id, channel_id, member_id))
            .or_default();
        record.messages.push_back(at);

        while record
            .messages
            .front()
            .is_some_and(|first| at - *first > window)
        {
            record.messages.pop_front();
        }
        if record.messages.len() <= settings.max_messages {
            return SpamVerdict::Clean;
        }

        record.messages.clear();
        let verdict = match record.warned {
            _ if settings.delay_before_action == 0 => SpamVerdict::Escalate,
            Some(warned) if at - warned <= escalation_window => SpamVerdict::Escalate,
            _ => SpamVerdict::TextWarning,
        };
        record.warned = Some(at);
        verdict
    }

    fn sweep(
        tracked: &mut Tracked,
        guild_id: u64,
        now: DateTime<Utc>,
        window: TimeDelta,
        escalation_window: TimeDelta,
    ) {
        if tracked
            .swept
            .get(&guild_id)
            .is_some_and(|last| now - *last <= window)
        {
            return;
        }
        tracked.swept.insert(guild_id, now);
        let before = tracked.records.len();
        tracked.records.retain(|(guild, _, _), record| {
            *guild != guild_id || !record.is_stale(now, window, escalation_window)
        });
        let evicted = before - tracked.records.len();
        if evicted > 0 {
            tracing::trace!(guild_id, evicted, "Evicted idle antispam records");
        }
    }

    /// Number of tracked (guild, channel, member) triples.
    pub fn len(&self) -> usize {
        self.tracked.lock().records.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(delay_before_action: u64) -> AntispamSettings {
        AntispamSettings {
            enabled: true,
            max_messages: 5,
            delay: 2,
            delay_before_action,
            ..Default::default()
        }
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + millis).unwrap()
    }

    #[test]
    fn test_burst_gives_one_text_warning() {
        let tracker = AntispamTracker::new();
        let settings = settings(60);
        let verdicts: Vec<_> = (0..6)
            .map(|i| tracker.record(1, 2, 3, at(i * 100), &settings))
            .collect();
        assert_eq!(&verdicts[..5], &[SpamVerdict::Clean; 5]);
        assert_eq!(verdicts[5], SpamVerdict::TextWarning);
        assert_eq!(
            tracker.record(1, 2, 3, at(700), &settings),
            SpamVerdict::Clean
        );
    }

    #[test]
    fn test_second_burst_escalates() {
        let tracker = AntispamTracker::new();
        let settings = settings(60);
        for i in 0..6 {
            tracker.record(1, 2, 3, at(i * 100), &settings);
        }
        let second: Vec<_> = (0..6)
            .map(|i| tracker.record(1, 2, 3, at(10_000 + i * 100), &settings))
            .collect();
        assert_eq!(second[5], SpamVerdict::Escalate);
    }

    #[test]
    fn test_late_burst_is_a_fresh_warning() {
        let tracker = AntispamTracker::new();
        let settings = settings(60);
        for i in 0..6 {
            tracker.record(1, 2, 3, at(i * 100), &settings);
        }
        let verdict = (0..6)
            .map(|i| tracker.record(1, 2, 3, at(120_000 + i * 100), &settings))
            .last();
        assert_eq!(verdict, Some(SpamVerdict::TextWarning));
    }

    #[test]
    fn test_spread_messages_stay_clean() {
        let tracker = AntispamTracker::new();
        let settings = settings(60);
        for i in 0..20 {
            assert_eq!(
                tracker.record(1, 2, 3, at(i * 1_000), &settings),
                SpamVerdict::Clean
            );
        }
    }

    #[test]
    fn test_zero_delay_escalates_immediately() {
        let tracker = AntispamTracker::new();
        let settings = settings(0);
        let verdict = (0..6)
            .map(|i| tracker.record(1, 2, 3, at(i * 100), &settings))
            .last();
        assert_eq!(verdict, Some(SpamVerdict::Escalate));
    }

    #[test]
    fn test_channels_tracked_separately() {
        let tracker = AntispamTracker::new();
        let settings = settings(60);
        for i in 0..6 {
            let channel = if i % 2 == 0 { 2 } else { 4 };
            assert_eq!(
                tracker.record(1, channel, 3, at(i * 100), &settings),
                SpamVerdict::Clean
            );
        }
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_idle_records_are_evicted() {
        let tracker = AntispamTracker::new();
        let settings = settings(60);
        for member in 3..8 {
            tracker.record(1, 2, member, at(0), &settings);
        }
        for i in 0..6 {
            tracker.record(1, 4, 9, at(i * 100), &settings);
        }
        tracker.record(5, 2, 3, at(0), &settings);
        assert_eq!(tracker.len(), 7);

        // Quiet members go after `delay`; the warned one waits out `delay_before_action`.
        tracker.record(1, 2, 10, at(10_000), &settings);
        assert_eq!(tracker.len(), 3);
        tracker.record(1, 2, 10, at(70_000), &settings);
        assert_eq!(tracker.len(), 2);
        assert_eq!(
            tracker.record(1, 4, 9, at(70_100), &settings),
            SpamVerdict::Clean
        );
    }
}
