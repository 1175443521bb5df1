//! Warning levels and the case records stored per member.

use meridian_error::{ModerationError, ModerationErrorKind};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Severity of a warning.
///
/// Only [`Level::Mute`] and [`Level::Ban`] can be temporary.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumIter,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Level {
    /// Logged warning, no action
    Warn = 1,
    /// Mute role added, reversible
    Mute = 2,
    /// Kick
    Kick = 3,
    /// Ban followed by an immediate unban
    Softban = 4,
    /// Ban, reversible when a duration is set
    Ban = 5,
}

impl Level {
    /// Numeric level, 1 to 5.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Verb used in audit reasons and embeds.
    pub fn action(self) -> &'static str {
        match self {
            Level::Warn => "warn",
            Level::Mute => "mute",
            Level::Kick => "kick",
            Level::Softban => "softban",
            Level::Ban => "ban",
        }
    }

    /// Plural form of [`Level::action`].
    pub fn actions(self) -> &'static str {
        match self {
            Level::Warn => "warns",
            Level::Mute => "mutes",
            Level::Kick => "kicks",
            Level::Softban => "softbans",
            Level::Ban => "bans",
        }
    }

    /// Whether a duration makes this level a pending temporary action.
    pub fn is_reversible(self) -> bool {
        matches!(self, Level::Mute | Level::Ban)
    }
}

impl TryFrom<u8> for Level {
    type Error = ModerationError;

    #[track_caller]
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Level::Warn),
            2 => Ok(Level::Mute),
            3 => Ok(Level::Kick),
            4 => Ok(Level::Softban),
            5 => Ok(Level::Ban),
            other => Err(ModerationError::new(ModerationErrorKind::InvalidLevel(other))),
        }
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> Self {
        level.as_u8()
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.action())
    }
}

/// Who issued a case.
///
/// Older logs name non-Discord authors (`"Automod"`) with a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(untagged)]
pub enum CaseAuthor {
    /// A Discord user id
    Id(u64),
    /// A free-form author name
    Name(String),
}

impl CaseAuthor {
    /// The author's user id, when it is a Discord user.
    pub fn id(&self) -> Option<u64> {
        match self {
            CaseAuthor::Id(id) => Some(*id),
            CaseAuthor::Name(_) => None,
        }
    }
}

/// Where the modlog embed of a case was posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModlogMessageRef {
    /// Modlog channel id
    pub channel_id: u64,
    /// Posted message id
    pub message_id: u64,
}

/// One entry in a member's modlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    /// Warning level
    pub level: Level,
    /// Who issued it
    pub author: CaseAuthor,
    /// Reason, if one was given
    #[serde(default)]
    pub reason: Option<String>,
    /// Unix timestamp (seconds) of the warning
    pub time: i64,
    /// Temporary action length in seconds
    #[serde(default, deserialize_with = "seconds")]
    pub duration: Option<u64>,
    /// Roles stripped when muting, restored on unmute
    #[serde(default)]
    pub roles: Vec<u64>,
    /// Modlog embed of this case
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modlog_message: Option<ModlogMessageRef>,
}

impl Case {
    /// Duration of a temporary action.
    pub fn duration(&self) -> Option<Duration> {
        self.duration.map(Duration::from_secs)
    }

    /// Unix timestamp at which a temporary action ends.
    pub fn ends_at(&self) -> Option<i64> {
        self.duration.map(|d| self.time + d as i64)
    }
}

/// Older logs stored durations as float seconds.
fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw.filter(|secs| *secs > 0.0).map(|secs| secs.round() as u64))
}

/// A case together with the member it belongs to, as listed for a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildCase {
    /// Warned member
    pub user_id: u64,
    /// The case
    #[serde(flatten)]
    pub case: Case,
}

/// Sort cases oldest first. Stable, so cases sharing a timestamp keep their
/// insertion order.
pub fn sort_cases(cases: &mut [Case]) {
    cases.sort_by_key(|case| case.time);
}
