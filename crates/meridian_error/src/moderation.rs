//! Moderation core error types.

/// Moderation failure conditions.
///
/// Most variants are shown to the invoking moderator, so their display text is
/// written for humans rather than logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum ModerationErrorKind {
    /// Warning level outside 1..=5
    #[display("The level must be between 1 and 5 (got {}).", _0)]
    InvalidLevel(u8),
    /// A mute was requested but no mute role is configured
    #[display("No mute role is configured for this server.")]
    MissingMuteRole,
    /// The bot can no longer manage the mute role
    #[display("The mute role is above my top role: {}", _0)]
    LostPermissions(String),
    /// The bot lacks a Discord permission for the action
    #[display("Missing permission: {}", _0)]
    MissingPermissions(String),
    /// The member's top role is not below the bot's
    #[display("Member {} has a role equal to or above mine.", _0)]
    MemberTooHigh(u64),
    /// The member's top role is not below the moderator's
    #[display("You cannot warn member {}: their top role is not below yours.", _0)]
    NotAllowedByHierarchy(u64),
    /// A moderator tried to warn the bot
    #[display("Why would you warn me? I did nothing wrong :c")]
    SuicidePrevention,
    /// The target is not a member of the server
    #[display("User {} is not a member of this server.", _0)]
    MemberNotFound(u64),
    /// Case index out of range
    #[display("Case not found: {}", _0)]
    CaseNotFound(String),
    /// Reason exceeds the embed field limit
    #[display("The reason is {} characters long; the limit is 1024.", _0)]
    ReasonTooLong(usize),
    /// No modlog channel is configured for the level
    #[display("No modlog channel configured: {}", _0)]
    ModlogChannelNotFound(String),
    /// Discord rejected the request
    #[display("Discord API error: {}", _0)]
    Discord(String),
    /// The case store failed
    #[display("Case store error: {}", _0)]
    Store(String),
}

/// Moderation error with source location tracking.
///
/// # Examples
///
/// ```
/// use meridian_error::{ModerationError, ModerationErrorKind};
///
/// let err = ModerationError::new(ModerationErrorKind::InvalidLevel(9));
/// assert!(format!("{}", err).contains("between 1 and 5"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Moderation Error: {} at line {} in {}", kind, line, file)]
pub struct ModerationError {
    /// The kind of error that occurred
    pub kind: ModerationErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl ModerationError {
    /// Create a new ModerationError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ModerationErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Message suitable for an embed shown to the moderator.
    pub fn user_message(&self) -> String {
        self.kind.to_string()
    }
}

#[cfg(feature = "discord")]
impl From<serenity::Error> for ModerationError {
    #[track_caller]
    fn from(err: serenity::Error) -> Self {
        ModerationError::new(ModerationErrorKind::Discord(err.to_string()))
    }
}
