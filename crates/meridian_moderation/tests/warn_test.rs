//! Warn flow, case log and Discord event handling against the scripted guild.

use meridian_error::ModerationErrorKind;
use meridian_kv::{KvStore, MemoryKv};
use meridian_moderation::{
    BotPermissions, Case, CaseAuthor, DirectMessage, DiscordCall, Level, MemoryCaseStore,
    ModerationConfig, ModerationService, MuteRoleSetup, ScriptedDiscord, WarnRequest, ban_key,
};
use std::sync::Arc;
use std::time::Duration;

const GUILD: u64 = 100;
const BOT: u64 = 1;
const OWNER: u64 = 2;
const MODERATOR: u64 = 5;
const MEMBER: u64 = 42;
const PEER: u64 = 43;
const ADMIN: u64 = 44;
const STRANGER: u64 = 77;
const MUTE_ROLE: u64 = 30;
const HELPER_ROLE: u64 = 31;
const MOD_ROLE: u64 = 40;
const ADMIN_ROLE: u64 = 41;
const MODLOG: u64 = 700;
const T: i64 = 1_700_000_000;

struct Fixture {
    service: ModerationService,
    discord: Arc<ScriptedDiscord>,
    kv: Arc<MemoryKv>,
}

fn scripted_guild() -> ScriptedDiscord {
    ScriptedDiscord::new(BOT)
        .with_guild(GUILD, "Lounge", OWNER, 50, BotPermissions::all())
        .with_role(GUILD, MUTE_ROLE, "Muted", 10)
        .with_role(GUILD, HELPER_ROLE, "Helper", 5)
        .with_role(GUILD, MOD_ROLE, "Moderator", 20)
        .with_role(GUILD, ADMIN_ROLE, "Admin", 60)
        .with_member(GUILD, OWNER, "owner", &[])
        .with_member(GUILD, MODERATOR, "mod", &[MOD_ROLE])
        .with_member(GUILD, MEMBER, "kat", &[HELPER_ROLE])
        .with_member(GUILD, PEER, "peer", &[MOD_ROLE])
        .with_member(GUILD, ADMIN, "admin", &[ADMIN_ROLE])
        .with_user(STRANGER, "ghost")
        .with_channel(GUILD, MODLOG, "modlog")
}

async fn fixture_with(discord: ScriptedDiscord, mute_role: Option<u64>) -> Fixture {
    let discord = Arc::new(discord);
    let kv = Arc::new(MemoryKv::new());
    let service = ModerationService::new(
        discord.clone(),
        Arc::new(MemoryCaseStore::new()),
        kv.clone(),
        ModerationConfig::default(),
    );
    let mut settings = service.settings().get(GUILD).await.unwrap();
    settings.mute_role = mute_role;
    settings.remove_roles = true;
    settings.channels.main = Some(MODLOG);
    service.settings().save(GUILD, &settings).await.unwrap();
    Fixture {
        service,
        discord,
        kv,
    }
}

async fn fixture() -> Fixture {
    fixture_with(scripted_guild(), Some(MUTE_ROLE)).await
}

fn request(members: Vec<u64>, author: u64, level: u8) -> WarnRequest {
    WarnRequest::new(GUILD, members, author, level)
        .with_timestamp(T)
        .with_automod(false)
}

fn manual_case(time: i64, reason: &str) -> Case {
    Case {
        level: Level::Warn,
        author: CaseAuthor::Id(MODERATOR),
        reason: Some(reason.to_string()),
        time,
        duration: None,
        roles: Vec::new(),
        modlog_message: None,
    }
}

#[tokio::test]
async fn test_timed_mute_strips_and_restores_roles() {
    let f = fixture().await;
    let failures = f
        .service
        .warn(
            request(vec![MEMBER], MODERATOR, 2)
                .with_reason("spam".to_string())
                .with_duration(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert!(failures.is_empty());
    assert_eq!(f.discord.member_roles(GUILD, MEMBER), vec![MUTE_ROLE]);
    assert!(matches!(
        f.discord.dms(MEMBER).as_slice(),
        [DirectMessage::Embed(_)]
    ));
    assert_eq!(f.discord.messages_in(MODLOG).len(), 1);

    let pending = f.service.temp_actions().get(GUILD, MEMBER).await.unwrap();
    assert_eq!(pending.unwrap().roles, vec![HELPER_ROLE]);

    let report = f.service.check_expired_at(T + 6).await.unwrap();
    assert_eq!(report.unmuted, 1);
    assert_eq!(f.discord.member_roles(GUILD, MEMBER), vec![HELPER_ROLE]);
    assert!(f.service.temp_actions().get(GUILD, MEMBER).await.unwrap().is_none());

    let cases = f.service.get_all_cases(GUILD, Some(MEMBER)).await.unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].case.level, Level::Mute);
    assert_eq!(cases[0].case.duration, Some(5));
    assert_eq!(f.service.latest_case_user(GUILD).await.unwrap(), Some(MEMBER));
}

#[tokio::test]
async fn test_permanent_action_replaces_timed_one() {
    let f = fixture().await;
    f.service
        .warn(request(vec![MEMBER], MODERATOR, 2).with_duration(Duration::from_secs(5)))
        .await
        .unwrap();
    f.service
        .warn(request(vec![STRANGER], MODERATOR, 5).with_duration(Duration::from_secs(5)))
        .await
        .unwrap();
    f.service
        .warn(request(vec![MEMBER], MODERATOR, 2))
        .await
        .unwrap();
    f.service
        .warn(request(vec![STRANGER], MODERATOR, 5))
        .await
        .unwrap();
    assert!(f.service.temp_actions().get(GUILD, MEMBER).await.unwrap().is_none());
    assert!(f.service.temp_actions().get(GUILD, STRANGER).await.unwrap().is_none());

    let report = f.service.check_expired_at(T + 6).await.unwrap();
    assert_eq!(report.unmuted, 0);
    assert_eq!(report.unbanned, 0);
    assert_eq!(f.discord.member_roles(GUILD, MEMBER), vec![MUTE_ROLE]);
    assert!(f.discord.is_banned(GUILD, STRANGER));
}

#[tokio::test]
async fn test_hackban_of_non_member_sets_ban_key() {
    let f = fixture().await;
    let failures = f
        .service
        .warn(request(vec![STRANGER], MODERATOR, 5).with_reason("raid".to_string()))
        .await
        .unwrap();
    assert!(failures.is_empty());
    assert!(f.discord.is_banned(GUILD, STRANGER));
    assert!(f.discord.dms(STRANGER).is_empty());

    let ttl = f.kv.ttl(&ban_key(STRANGER)).await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(15));

    // The gateway echo of our own ban is not recorded twice.
    let recorded = f
        .service
        .on_member_ban(GUILD, STRANGER, MODERATOR, None)
        .await
        .unwrap();
    assert!(!recorded);
    assert_eq!(
        f.service.get_all_cases(GUILD, Some(STRANGER)).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_manual_ban_is_recorded_without_action() {
    let f = fixture_with(scripted_guild().with_user(78, "raider"), Some(MUTE_ROLE)).await;
    let recorded = f
        .service
        .on_member_ban(GUILD, 78, MODERATOR, Some("alt account".to_string()))
        .await
        .unwrap();
    assert!(recorded);
    assert!(f.discord.calls().is_empty());
    let case = f.service.get_case(GUILD, 78, 1).await.unwrap();
    assert_eq!(case.level, Level::Ban);
    assert_eq!(case.reason.as_deref(), Some("alt account"));

    let skipped = f.service.on_member_ban(GUILD, 78, BOT, None).await.unwrap();
    assert!(!skipped);
}

#[tokio::test]
async fn test_softban_bans_then_unbans() {
    let f = fixture().await;
    let failures = f
        .service
        .warn(request(vec![MEMBER], MODERATOR, 4))
        .await
        .unwrap();
    assert!(failures.is_empty());
    let calls = f.discord.calls();
    assert!(matches!(
        calls.as_slice(),
        [
            DiscordCall::Ban { user_id: MEMBER, delete_message_days: 7, .. },
            DiscordCall::Unban { user_id: MEMBER, .. }
        ]
    ));
    assert!(!f.discord.is_banned(GUILD, MEMBER));
    assert!(!f.discord.is_member(GUILD, MEMBER));
}

#[tokio::test]
async fn test_cases_are_indexed_by_time() {
    let f = fixture().await;
    for (time, reason) in [(T + 300, "third"), (T + 100, "first"), (T + 200, "second")] {
        f.service
            .create_case(GUILD, MEMBER, manual_case(time, reason))
            .await
            .unwrap();
    }
    let first = f.service.get_case(GUILD, MEMBER, 1).await.unwrap();
    assert_eq!(first.reason.as_deref(), Some("first"));
    let last = f.service.get_case(GUILD, MEMBER, 3).await.unwrap();
    assert_eq!(last.reason.as_deref(), Some("third"));

    for index in [0, 4] {
        let err = f.service.get_case(GUILD, MEMBER, index).await.unwrap_err();
        assert!(matches!(
            err.moderation_kind(),
            Some(ModerationErrorKind::CaseNotFound(_))
        ));
    }

    f.service
        .create_case(GUILD, PEER, manual_case(T + 150, "peer"))
        .await
        .unwrap();
    let all = f.service.get_all_cases(GUILD, None).await.unwrap();
    let order: Vec<u64> = all.iter().map(|entry| entry.user_id).collect();
    assert_eq!(order, vec![MEMBER, PEER, MEMBER, MEMBER]);

    assert!(f.service.clear_cases(GUILD, MEMBER).await.unwrap());
    assert!(f.service.get_all_cases(GUILD, Some(MEMBER)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_edit_case_patches_modlog_reason() {
    let f = fixture().await;
    f.service
        .warn(request(vec![MEMBER], MODERATOR, 1).with_reason("rude".to_string()))
        .await
        .unwrap();
    let case = f.service.get_case(GUILD, MEMBER, 1).await.unwrap();
    let modlog = case.modlog_message.unwrap();
    assert_eq!(modlog.channel_id, MODLOG);

    let edited = f
        .service
        .edit_case(GUILD, MEMBER, 1, "very rude")
        .await
        .unwrap();
    assert_eq!(edited.reason.as_deref(), Some("very rude"));
    let embed = f.discord.message(modlog.message_id).unwrap().embed.unwrap();
    assert_eq!(embed.field("Reason").unwrap().value, "very rude");

    let err = f
        .service
        .edit_case(GUILD, MEMBER, 1, &"x".repeat(1025))
        .await
        .unwrap_err();
    assert_eq!(
        err.moderation_kind(),
        Some(&ModerationErrorKind::ReasonTooLong(1025))
    );
}

#[tokio::test]
async fn test_delete_mute_case_lifts_mute() {
    let f = fixture().await;
    f.service
        .warn(request(vec![MEMBER], MODERATOR, 2).with_duration(Duration::from_secs(600)))
        .await
        .unwrap();
    let modlog = f
        .service
        .get_case(GUILD, MEMBER, 1)
        .await
        .unwrap()
        .modlog_message
        .unwrap();

    let removed = f.service.delete_case(GUILD, MEMBER, 1).await.unwrap();
    assert_eq!(removed.level, Level::Mute);
    assert_eq!(f.discord.member_roles(GUILD, MEMBER), vec![HELPER_ROLE]);
    assert!(f.discord.message(modlog.message_id).is_none());
    assert!(f.service.temp_actions().get(GUILD, MEMBER).await.unwrap().is_none());
    assert!(f.service.get_all_cases(GUILD, Some(MEMBER)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_member_checks() {
    let f = fixture().await;

    let failures = f.service.warn(request(vec![BOT], MODERATOR, 1)).await.unwrap();
    assert_eq!(
        failures[0].error.moderation_kind(),
        Some(&ModerationErrorKind::SuicidePrevention)
    );

    let failures = f.service.warn(request(vec![ADMIN], OWNER, 3)).await.unwrap();
    assert_eq!(
        failures[0].error.moderation_kind(),
        Some(&ModerationErrorKind::MemberTooHigh(ADMIN))
    );

    let failures = f.service.warn(request(vec![PEER], MODERATOR, 1)).await.unwrap();
    assert_eq!(
        failures[0].error.moderation_kind(),
        Some(&ModerationErrorKind::NotAllowedByHierarchy(PEER))
    );

    let failures = f.service.warn(request(vec![STRANGER], MODERATOR, 3)).await.unwrap();
    assert_eq!(
        failures[0].error.moderation_kind(),
        Some(&ModerationErrorKind::MemberNotFound(STRANGER))
    );

    // One bad member does not stop the others.
    let failures = f
        .service
        .warn(request(vec![BOT, MEMBER], MODERATOR, 1))
        .await
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(f.service.get_all_cases(GUILD, Some(MEMBER)).await.unwrap().len(), 1);
    assert!(f.service.get_all_cases(GUILD, Some(BOT)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_request_level_checks() {
    let f = fixture_with(scripted_guild(), None).await;
    let err = f
        .service
        .warn(request(vec![MEMBER], MODERATOR, 2))
        .await
        .unwrap_err();
    assert_eq!(err.moderation_kind(), Some(&ModerationErrorKind::MissingMuteRole));

    let err = f
        .service
        .warn(request(vec![MEMBER], MODERATOR, 6))
        .await
        .unwrap_err();
    assert_eq!(err.moderation_kind(), Some(&ModerationErrorKind::InvalidLevel(6)));

    let weak = ScriptedDiscord::new(BOT)
        .with_guild(GUILD, "Lounge", OWNER, 50, BotPermissions::default())
        .with_member(GUILD, OWNER, "owner", &[])
        .with_member(GUILD, MEMBER, "kat", &[]);
    let f = fixture_with(weak, None).await;
    let err = f.service.warn(request(vec![MEMBER], OWNER, 3)).await.unwrap_err();
    assert!(matches!(
        err.moderation_kind(),
        Some(ModerationErrorKind::MissingPermissions(_))
    ));
}

#[tokio::test]
async fn test_failed_action_records_no_case() {
    let f = fixture().await;
    f.discord.fail("kick");
    let failures = f.service.warn(request(vec![MEMBER], MODERATOR, 3)).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert!(f.service.get_all_cases(GUILD, Some(MEMBER)).await.unwrap().is_empty());

    f.discord.recover("kick");
    let failures = f.service.warn(request(vec![MEMBER], MODERATOR, 3)).await.unwrap();
    assert!(failures.is_empty());
    assert!(!f.discord.is_member(GUILD, MEMBER));
}

#[tokio::test]
async fn test_closed_dms_are_noted_in_modlog() {
    let f = fixture().await;
    f.discord.close_dms(MEMBER);
    let failures = f.service.warn(request(vec![MEMBER], MODERATOR, 1)).await.unwrap();
    assert!(failures.is_empty());
    let posted = f.discord.messages_in(MODLOG);
    let embed = posted[0].embed.as_ref().unwrap();
    assert!(!embed.description.is_empty());
}

#[tokio::test]
async fn test_ensure_mute_role_creates_and_denies() {
    let discord = scripted_guild().with_channel(GUILD, 701, "general");
    let f = fixture_with(discord, None).await;

    let setup = f.service.ensure_mute_role(GUILD).await.unwrap();
    let MuteRoleSetup::Created {
        role_id,
        channel_errors,
    } = setup
    else {
        panic!("expected a new role, got {:?}", setup);
    };
    assert!(channel_errors.is_empty());
    assert_eq!(f.discord.denied_channels(GUILD, role_id), vec![MODLOG, 701]);
    let settings = f.service.settings().get(GUILD).await.unwrap();
    assert_eq!(settings.mute_role, Some(role_id));

    let again = f.service.ensure_mute_role(GUILD).await.unwrap();
    assert_eq!(again, MuteRoleSetup::Existing(role_id));

    f.discord.add_channel(GUILD, 702, "announcements");
    f.service.on_channel_create(GUILD, 702).await.unwrap();
    assert_eq!(
        f.discord.denied_channels(GUILD, role_id),
        vec![MODLOG, 701, 702]
    );
}

#[tokio::test]
async fn test_manual_unmute_and_unban_cancel_timers() {
    let f = fixture().await;
    f.service
        .warn(request(vec![MEMBER], MODERATOR, 2).with_duration(Duration::from_secs(600)))
        .await
        .unwrap();
    f.service
        .warn(request(vec![STRANGER], MODERATOR, 5).with_duration(Duration::from_secs(600)))
        .await
        .unwrap();

    f.service
        .on_member_update(GUILD, MEMBER, &[MUTE_ROLE])
        .await
        .unwrap();
    assert!(f.service.temp_actions().get(GUILD, MEMBER).await.unwrap().is_some());
    f.service.on_member_update(GUILD, MEMBER, &[]).await.unwrap();
    assert!(f.service.temp_actions().get(GUILD, MEMBER).await.unwrap().is_none());

    f.service.on_member_unban(GUILD, STRANGER).await.unwrap();
    assert!(f.service.temp_actions().get(GUILD, STRANGER).await.unwrap().is_none());
}
