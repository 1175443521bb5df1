//! Regex triggers, antispam escalation and autowarn rules.

use chrono::{DateTime, TimeDelta, Utc};
use meridian_kv::MemoryKv;
use meridian_moderation::{
    AutomodMessage, AutowarnRule, BotPermissions, GuildModSettings, Level, MemoryCaseStore,
    ModerationConfig, ModerationService, PrescribedWarn, RegexRule, ScriptedDiscord, WarnRequest,
};
use std::sync::Arc;

const GUILD: u64 = 100;
const BOT: u64 = 1;
const OWNER: u64 = 2;
const MEMBER: u64 = 42;
const TRUSTED: u64 = 43;
const CHANNEL: u64 = 700;
const T: i64 = 1_700_000_000;

async fn setup(
    configure: impl FnOnce(&mut GuildModSettings),
) -> (ModerationService, Arc<ScriptedDiscord>) {
    let discord = Arc::new(
        ScriptedDiscord::new(BOT)
            .with_guild(GUILD, "Lounge", OWNER, 50, BotPermissions::all())
            .with_member(GUILD, OWNER, "owner", &[])
            .with_member(GUILD, MEMBER, "kat", &[])
            .with_member(GUILD, TRUSTED, "helper", &[])
            .with_immune(GUILD, TRUSTED)
            .with_channel(GUILD, CHANNEL, "general"),
    );
    let service = ModerationService::new(
        discord.clone(),
        Arc::new(MemoryCaseStore::new()),
        Arc::new(MemoryKv::new()),
        ModerationConfig::default(),
    );
    let mut settings = service.settings().get(GUILD).await.unwrap();
    settings.automod.enabled = true;
    configure(&mut settings);
    service.settings().save(GUILD, &settings).await.unwrap();
    (service, discord)
}

fn message(author_id: u64, content: &str, at: DateTime<Utc>) -> AutomodMessage {
    AutomodMessage {
        guild_id: GUILD,
        channel_id: CHANNEL,
        author_id,
        author_bot: false,
        content: content.to_string(),
        created_at: at,
    }
}

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(T, 0).unwrap()
}

#[tokio::test]
async fn test_regex_match_warns_member() {
    let (service, _) = setup(|settings| {
        settings.automod.regex.insert(
            "invites".to_string(),
            RegexRule {
                regex: r"discord\.gg/\w+".to_string(),
                level: Level::Warn,
                time: None,
                reason: "Invite posted in {channel}".to_string(),
            },
        );
    })
    .await;

    service
        .on_message(&message(MEMBER, "hello there", start()))
        .await;
    assert!(service.get_all_cases(GUILD, Some(MEMBER)).await.unwrap().is_empty());

    service
        .on_message(&message(MEMBER, "join discord.gg/abc", start()))
        .await;
    let case = service.get_case(GUILD, MEMBER, 1).await.unwrap();
    assert_eq!(case.level, Level::Warn);
    assert_eq!(case.reason.as_deref(), Some("Invite posted in <#700>"));
    assert_eq!(case.author.id(), Some(BOT));

    // Immune members and the owner are never checked.
    service
        .on_message(&message(TRUSTED, "discord.gg/abc", start()))
        .await;
    service
        .on_message(&message(OWNER, "discord.gg/abc", start()))
        .await;
    assert!(service.get_all_cases(GUILD, Some(TRUSTED)).await.unwrap().is_empty());
    assert!(service.get_all_cases(GUILD, Some(OWNER)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_pattern_is_ignored() {
    let (service, _) = setup(|settings| {
        settings.automod.regex.insert(
            "broken".to_string(),
            RegexRule {
                regex: "(unclosed".to_string(),
                level: Level::Warn,
                time: None,
                reason: "never".to_string(),
            },
        );
    })
    .await;
    service
        .on_message(&message(MEMBER, "(unclosed", start()))
        .await;
    assert!(service.get_all_cases(GUILD, Some(MEMBER)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_antispam_warns_then_escalates() {
    let (service, discord) = setup(|settings| {
        let antispam = &mut settings.automod.antispam;
        antispam.enabled = true;
        antispam.max_messages = 5;
        antispam.delay = 2;
        antispam.delay_before_action = 60;
    })
    .await;

    let mut at = start();
    for _ in 0..6 {
        service.on_message(&message(MEMBER, "spam", at)).await;
        at += TimeDelta::milliseconds(100);
    }
    let posted = discord.messages_in(CHANNEL);
    assert_eq!(posted.len(), 1);
    assert_eq!(
        posted[0].text.as_deref(),
        Some("<@42> you're sending messages too fast!")
    );
    assert!(service.queue().is_empty());

    at += TimeDelta::seconds(10);
    for _ in 0..6 {
        service.on_message(&message(MEMBER, "spam", at)).await;
        at += TimeDelta::milliseconds(100);
    }
    assert_eq!(service.queue().len(), 1);
    assert!(service.queue().is_pending(GUILD, MEMBER));

    assert_eq!(service.drain_warn_queue().await.unwrap(), 1);
    assert!(!service.queue().is_pending(GUILD, MEMBER));
    let case = service.get_case(GUILD, MEMBER, 1).await.unwrap();
    assert_eq!(case.level, Level::Warn);
    assert_eq!(case.reason.as_deref(), Some("Sending messages too fast!"));
}

#[tokio::test]
async fn test_slow_messages_are_clean() {
    let (service, discord) = setup(|settings| {
        settings.automod.antispam.enabled = true;
    })
    .await;
    let mut at = start();
    for _ in 0..20 {
        service.on_message(&message(MEMBER, "chatting", at)).await;
        at += TimeDelta::seconds(3);
    }
    assert!(discord.messages_in(CHANNEL).is_empty());
    assert!(service.queue().is_empty());
}

#[tokio::test]
async fn test_autowarn_rule_fires_through_queue() {
    let (service, discord) = setup(|settings| {
        settings.automod.warnings.push(AutowarnRule {
            number: 2,
            time: Some(3_600),
            level: 1,
            automod_only: false,
            warn: PrescribedWarn {
                level: Level::Kick,
                reason: "Two warnings within an hour".to_string(),
                duration: None,
            },
        });
    })
    .await;

    for offset in [0, 600] {
        let request = WarnRequest::new(GUILD, vec![MEMBER], OWNER, 1)
            .with_timestamp(T + offset)
            .with_automod(false);
        assert!(service.warn(request).await.unwrap().is_empty());
    }

    let queued = service
        .check_autowarn(GUILD, MEMBER, Level::Warn, false)
        .await
        .unwrap();
    assert_eq!(queued, 1);
    // Detected twice, queued once.
    let again = service
        .check_autowarn(GUILD, MEMBER, Level::Warn, false)
        .await
        .unwrap();
    assert_eq!(again, 0);

    assert_eq!(service.drain_warn_queue().await.unwrap(), 1);
    assert!(!discord.is_member(GUILD, MEMBER));
    let cases = service.get_all_cases(GUILD, Some(MEMBER)).await.unwrap();
    assert_eq!(cases.len(), 3);
    assert!(cases.iter().any(|entry| entry.case.level == Level::Kick));
}

#[tokio::test]
async fn test_autowarn_ignores_old_warnings() {
    let (service, _) = setup(|settings| {
        settings.automod.warnings.push(AutowarnRule {
            number: 2,
            time: Some(3_600),
            level: 0,
            automod_only: false,
            warn: PrescribedWarn {
                level: Level::Kick,
                reason: "Repeat offender".to_string(),
                duration: None,
            },
        });
    })
    .await;
    for offset in [0, 7_200] {
        let request = WarnRequest::new(GUILD, vec![MEMBER], OWNER, 1)
            .with_timestamp(T + offset)
            .with_automod(false);
        service.warn(request).await.unwrap();
    }
    let queued = service
        .check_autowarn(GUILD, MEMBER, Level::Warn, false)
        .await
        .unwrap();
    assert_eq!(queued, 0);
}

#[tokio::test]
async fn test_failed_drain_releases_members() {
    let (service, discord) = setup(|_| {}).await;
    discord.fail("guild");
    assert!(service.queue().push(meridian_moderation::QueuedWarn {
        guild_id: GUILD,
        member_id: MEMBER,
        level: Level::Warn,
        reason: "spam".to_string(),
        duration: None,
    }));
    assert_eq!(service.drain_warn_queue().await.unwrap(), 0);
    assert!(!service.queue().is_pending(GUILD, MEMBER));
    assert!(service.get_all_cases(GUILD, Some(MEMBER)).await.unwrap().is_empty());
}
