//! Text and embeds produced by moderation actions.

use crate::{Embed, EmbedField, Level, mention};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Discord limit on an embed field, and so on a case reason.
pub const MAX_REASON_LEN: usize = 1024;

/// Audit log reasons longer than this drop the warn reason.
pub const AUDIT_REASON_LIMIT: usize = 490;

const NO_REASON: &str = "No reason was provided.";
const DM_FAILED: &str = "***The message could not be delivered to the user. They may have DMs disabled, blocked the bot, or may not have a mutual server.***";
const SOFTBAN_FOOTER: &str = "softbans are temporary. you may immediately rejoin.";

static IMAGE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(https?://)\S+\.(jpg|jpeg|png|gif|webm)").expect("Valid image link regex")
});

const UNITS: [(u64, &str, &str); 7] = [
    (31_622_400, "year", "years"),
    (2_635_200, "month", "months"),
    (604_800, "week", "weeks"),
    (86_400, "day", "days"),
    (3_600, "hour", "hours"),
    (60, "minute", "minutes"),
    (1, "second", "seconds"),
];

/// Human duration: `"1 week, 2 days and 3 hours"`.
pub fn format_duration(duration: Duration) -> String {
    let mut remaining = duration.as_secs();
    let mut parts = Vec::new();
    for (size, one, many) in UNITS {
        let amount = remaining / size;
        remaining %= size;
        if amount > 0 {
            parts.push(format!("{} {}", amount, if amount > 1 { many } else { one }));
        }
    }
    match parts.split_last() {
        None => "0 seconds".to_string(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} and {}", rest.join(", "), last),
    }
}

/// Reason written to the guild audit log for a warn.
pub fn audit_reason(
    level: Level,
    author_name: &str,
    author_id: u64,
    member_name: &str,
    duration: Option<Duration>,
    reason: Option<&str>,
) -> String {
    let mut text = format!(
        "{} requested by {} (ID: {}) against {}.",
        level.action(),
        author_name,
        author_id,
        member_name
    );
    if let Some(duration) = duration {
        text.push_str(&format!("\n\nDuration: {}", format_duration(duration)));
    }
    if let Some(reason) = reason {
        let with_reason = format!(" Reason: {}", reason);
        if text.chars().count() + with_reason.chars().count() < AUDIT_REASON_LIMIT {
            text.push_str(&with_reason);
        } else {
            text.push_str(" Reason too long to be shown.");
        }
    }
    text
}

/// Status line: `"The member now has 3 warnings (2 mutes)"`.
pub fn status_line(total: usize, of_level: usize, level: Level, third_person: bool) -> String {
    format!(
        "{} now {} {} {} ({} {})",
        if third_person { "The member" } else { "You" },
        if third_person { "has" } else { "have" },
        total,
        if total > 1 { "warnings" } else { "warning" },
        of_level,
        if of_level > 1 { level.actions() } else { level.action() },
    )
}

/// Title of a case embed.
pub fn case_title(level: Level) -> &'static str {
    match level {
        Level::Warn => "You were warned!",
        Level::Mute => "You were muted!",
        Level::Kick => "You were kicked!",
        Level::Softban => "You were softbanned!",
        Level::Ban => "You were banned!",
    }
}

/// Everything a pair of case embeds shows.
#[derive(Debug, Clone)]
pub struct CaseEmbedInput<'a> {
    /// Guild name
    pub guild_name: &'a str,
    /// Warned member id
    pub member_id: u64,
    /// Warned member name
    pub member_name: &'a str,
    /// Warned member avatar
    pub member_avatar: Option<&'a str>,
    /// Moderator id
    pub author_id: u64,
    /// Warning level
    pub level: Level,
    /// Reason, after substitutions
    pub reason: Option<&'a str>,
    /// Temporary action length
    pub duration: Option<Duration>,
    /// Unix timestamp of the warn
    pub timestamp: i64,
    /// Cases of the member including this one
    pub total: usize,
    /// Cases of this level including this one
    pub of_level: usize,
    /// Embed colour
    pub colour: u32,
    /// Name the moderator in the DM
    pub show_mod: bool,
}

/// Build the modlog embed and the member DM embed of a warn.
pub fn case_embeds(input: &CaseEmbedInput<'_>) -> (Embed, Embed) {
    let reason = input.reason.filter(|r| !r.is_empty());
    let image = reason
        .and_then(|r| IMAGE_LINK.find(r))
        .map(|m| m.as_str().to_string());
    let duration = input.duration.map(format_duration);
    let footer = (input.level == Level::Softban).then(|| SOFTBAN_FOOTER.to_string());

    let mut log_fields = vec![
        EmbedField::new("Member", mention(input.member_id), true),
        EmbedField::new("Moderator", mention(input.author_id), true),
    ];
    if let Some(duration) = &duration {
        log_fields.push(EmbedField::new("Duration", duration.clone(), true));
    }
    log_fields.push(EmbedField::new(
        "Reason",
        match reason {
            Some(reason) => reason.to_string(),
            None => format!(
                "{}\nEdit this with `;warnings {}`",
                NO_REASON, input.member_id
            ),
        },
        false,
    ));
    log_fields.push(EmbedField::new(
        "Status",
        status_line(input.total, input.of_level, input.level, true),
        false,
    ));

    let modlog = Embed {
        author: Some(format!("{} | {}", input.member_name, input.member_id)),
        author_icon: input.member_avatar.map(str::to_string),
        title: Some(case_title(input.level).to_string()),
        description: String::new(),
        fields: log_fields,
        colour: Some(input.colour),
        footer: footer.clone(),
        timestamp: Some(input.timestamp),
        image: image.clone(),
    };

    let mut user_fields = Vec::new();
    if input.show_mod {
        user_fields.push(EmbedField::new("Moderator", mention(input.author_id), true));
    }
    if let Some(duration) = duration {
        user_fields.push(EmbedField::new("Duration", duration, true));
    }
    user_fields.push(EmbedField::new("Reason", reason.unwrap_or(NO_REASON), false));
    user_fields.push(EmbedField::new("Server", input.guild_name, true));
    user_fields.push(EmbedField::new(
        "Status",
        status_line(input.total, input.of_level, input.level, false),
        false,
    ));

    let user = Embed {
        author: None,
        author_icon: None,
        title: Some(case_title(input.level).to_string()),
        description: String::new(),
        fields: user_fields,
        colour: Some(input.colour),
        footer,
        timestamp: Some(input.timestamp),
        image,
    };

    (modlog, user)
}

/// Note appended to a modlog embed when the member DM failed.
pub fn mark_dm_failed(embed: &mut Embed) {
    embed.description.push_str("\n\n");
    embed.description.push_str(DM_FAILED);
}

/// DM sent when a temporary ban ends.
pub fn reinvite_text(guild_name: &str, reason: &str, duration: &str, invite: &str) -> String {
    format!(
        "You were unbanned from {}, your temporary ban (reason: {}) just ended after {}.\nYou can join back using this invite: {}",
        guild_name, reason, duration, invite
    )
}

/// Audit reason of a timer-driven unmute or unban.
pub fn timed_end_reason(
    level: Level,
    member_name: &str,
    author: &str,
    duration: Duration,
    reason: Option<&str>,
) -> String {
    format!(
        "End of timed {action} of {} requested by {} that lasted for {}. Reason of the {action}: {}",
        member_name,
        author,
        format_duration(duration),
        reason.unwrap_or("None"),
        action = level.action(),
    )
}

/// Fill `{member}`, `{channel}` and `{guild}` in an automod reason template.
pub fn fill_reason_template(template: &str, member_id: u64, channel_id: u64, guild_name: &str) -> String {
    template
        .replace("{member}", &mention(member_id))
        .replace("{channel}", &format!("<#{}>", channel_id))
        .replace("{guild}", guild_name)
}
