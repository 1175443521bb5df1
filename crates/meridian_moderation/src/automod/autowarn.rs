//! Modlog-driven automatic warns.

use crate::{AutowarnRule, Case, Level};

/// Rules that fire after a warn of `trigger_level` was added to `cases`.
///
/// `cases` is the member's log oldest first, including the new warn. A rule
/// fires when exactly `number` cases fall inside its window, so the warn it
/// issues pushes the count past `number` and cannot fire it again.
pub fn triggered_rules<'a>(
    rules: &'a [AutowarnRule],
    cases: &[Case],
    trigger_level: Level,
    issued_by_bot: bool,
    now: i64,
) -> Vec<&'a AutowarnRule> {
    if cases.len() < 2 {
        return Vec::new();
    }
    let mut candidates: Vec<(&AutowarnRule, usize)> = rules
        .iter()
        .filter(|rule| issued_by_bot || !rule.automod_only)
        .filter(|rule| rule.level == 0 || rule.level == trigger_level.as_u8())
        .map(|rule| (rule, 0))
        .collect();
    let mut found: Vec<&AutowarnRule> = Vec::new();

    for case in cases.iter().rev() {
        candidates.retain_mut(|(rule, count)| {
            if rule.time.is_some_and(|window| now - window as i64 >= case.time) {
                return false;
            }
            *count += 1;
            if *count == rule.number {
                found.push(*rule);
            }
            if *count > rule.number {
                found.retain(|f| !std::ptr::eq(*f, *rule));
                return false;
            }
            true
        });
        if candidates.is_empty() {
            break;
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaseAuthor, PrescribedWarn};

    fn case(time: i64, level: Level) -> Case {
        Case {
            level,
            author: CaseAuthor::Id(1),
            reason: None,
            time,
            duration: None,
            roles: Vec::new(),
            modlog_message: None,
        }
    }

    fn rule(number: usize, time: Option<u64>, level: u8, automod_only: bool) -> AutowarnRule {
        AutowarnRule {
            number,
            time,
            level,
            automod_only,
            warn: PrescribedWarn {
                level: Level::Mute,
                reason: "Too many warnings".into(),
                duration: Some(3_600),
            },
        }
    }

    #[test]
    fn test_fires_at_exact_count() {
        let rules = [rule(3, None, 0, false)];
        let two = [case(1, Level::Warn), case(2, Level::Warn)];
        assert!(triggered_rules(&rules, &two, Level::Warn, false, 10).is_empty());

        let three = [case(1, Level::Warn), case(2, Level::Warn), case(3, Level::Warn)];
        assert_eq!(triggered_rules(&rules, &three, Level::Warn, false, 10).len(), 1);

        let four = [
            case(1, Level::Warn),
            case(2, Level::Warn),
            case(3, Level::Warn),
            case(4, Level::Mute),
        ];
        assert!(triggered_rules(&rules, &four, Level::Mute, false, 10).is_empty());
    }

    #[test]
    fn test_window_retires_old_cases() {
        let rules = [rule(2, Some(60), 0, false)];
        let cases = [case(0, Level::Warn), case(1_000, Level::Warn)];
        assert!(triggered_rules(&rules, &cases, Level::Warn, false, 1_010).is_empty());

        let recent = [case(980, Level::Warn), case(1_000, Level::Warn)];
        assert_eq!(triggered_rules(&rules, &recent, Level::Warn, false, 1_010).len(), 1);
    }

    #[test]
    fn test_level_and_author_filters() {
        let rules = [rule(2, None, 2, false), rule(2, None, 0, true)];
        let cases = [case(1, Level::Mute), case(2, Level::Mute)];

        let fired = triggered_rules(&rules, &cases, Level::Mute, false, 10);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].level, 2);

        assert_eq!(triggered_rules(&rules, &cases, Level::Mute, true, 10).len(), 2);
        assert!(triggered_rules(&rules, &cases, Level::Kick, false, 10).is_empty());
    }

    #[test]
    fn test_single_case_never_fires() {
        let rules = [rule(1, None, 0, false)];
        assert!(triggered_rules(&rules, &[case(1, Level::Warn)], Level::Warn, false, 10).is_empty());
    }
}
