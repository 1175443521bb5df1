//! Expiry of temporary actions.

use meridian_kv::{KvStore, MemoryKv};
use meridian_moderation::{
    BotPermissions, DirectMessage, MemoryCaseStore, ModerationConfig, ModerationService,
    ScriptedDiscord, TimerReport, WarnRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const GUILD: u64 = 100;
const BOT: u64 = 1;
const OWNER: u64 = 2;
const MEMBER: u64 = 42;
const STRANGER: u64 = 77;
const MUTE_ROLE: u64 = 30;
const T: i64 = 1_700_000_000;

async fn setup() -> (ModerationService, Arc<ScriptedDiscord>, Arc<MemoryKv>) {
    let discord = Arc::new(
        ScriptedDiscord::new(BOT)
            .with_guild(GUILD, "Lounge", OWNER, 50, BotPermissions::all())
            .with_role(GUILD, MUTE_ROLE, "Muted", 10)
            .with_member(GUILD, OWNER, "owner", &[])
            .with_member(GUILD, MEMBER, "kat", &[])
            .with_user(STRANGER, "ghost")
            .with_channel(GUILD, 700, "general"),
    );
    let kv = Arc::new(MemoryKv::new());
    let service = ModerationService::new(
        discord.clone(),
        Arc::new(MemoryCaseStore::new()),
        kv.clone(),
        ModerationConfig::default(),
    );
    let mut settings = service.settings().get(GUILD).await.unwrap();
    settings.mute_role = Some(MUTE_ROLE);
    service.settings().save(GUILD, &settings).await.unwrap();
    (service, discord, kv)
}

fn timed(user_id: u64, level: u8, secs: u64) -> WarnRequest {
    WarnRequest::new(GUILD, vec![user_id], OWNER, level)
        .with_reason("cooling off".to_string())
        .with_duration(Duration::from_secs(secs))
        .with_timestamp(T)
        .with_automod(false)
}

#[tokio::test]
async fn test_timed_ban_ends_with_reinvite() {
    let (service, discord, _) = setup().await;
    assert!(service.warn(timed(STRANGER, 5, 60)).await.unwrap().is_empty());

    let early = service.check_expired_at(T + 30).await.unwrap();
    assert_eq!(early, TimerReport::default());
    assert!(discord.is_banned(GUILD, STRANGER));

    let report = service.check_expired_at(T + 61).await.unwrap();
    assert_eq!(report.unbanned, 1);
    assert!(!discord.is_banned(GUILD, STRANGER));
    let dms = discord.dms(STRANGER);
    let [DirectMessage::Text(text)] = dms.as_slice() else {
        panic!("expected one reinvite, got {:?}", dms);
    };
    assert!(text.contains("https://discord.gg/"));
    assert!(text.contains("cooling off"));
    assert!(service.temp_actions().guilds().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mute_of_departed_member_is_dropped() {
    let (service, discord, _) = setup().await;
    assert!(service.warn(timed(MEMBER, 2, 10)).await.unwrap().is_empty());
    discord.remove_member(GUILD, MEMBER);

    let report = service.check_expired_at(T + 11).await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.unmuted, 0);
    assert!(service.temp_actions().get(GUILD, MEMBER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_refused_reversal_still_removes_entry() {
    let (service, discord, _) = setup().await;
    assert!(service.warn(timed(STRANGER, 5, 10)).await.unwrap().is_empty());
    discord.fail("unban");

    let report = service.check_expired_at(T + 11).await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(discord.is_banned(GUILD, STRANGER));
    assert!(service.temp_actions().get(GUILD, STRANGER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_member_lookup_does_not_stall_the_pass() {
    let (service, discord, _) = setup().await;
    assert!(service.warn(timed(STRANGER, 5, 60)).await.unwrap().is_empty());
    assert!(service.warn(timed(MEMBER, 2, 60)).await.unwrap().is_empty());
    discord.fail("member");

    let report = service.check_expired_at(T + 61).await.unwrap();
    assert_eq!(report.unbanned, 1);
    assert_eq!(report.failed, 1);
    assert!(!discord.is_banned(GUILD, STRANGER));
    assert!(service.temp_actions().get(GUILD, STRANGER).await.unwrap().is_none());
    assert!(service.temp_actions().get(GUILD, MEMBER).await.unwrap().is_none());

    let next = service.check_expired_at(T + 62).await.unwrap();
    assert_eq!(next, TimerReport::default());
}

#[tokio::test]
async fn test_undecodable_entry_is_dropped() {
    let (service, _, kv) = setup().await;
    kv.hset("modsystem:temp:100", "42", "not json").await.unwrap();
    kv.sadd("modsystem:temp_guilds", "100").await.unwrap();

    let report = service.check_expired_at(T).await.unwrap();
    assert_eq!(report.dropped, 1);
    assert!(kv.hget("modsystem:temp:100", "42").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timer_stops_on_cancel() {
    let (service, _, _) = setup().await;
    let cancel = CancellationToken::new();
    let handle = service.spawn_timer(cancel.clone());
    tokio::time::sleep(Duration::from_secs(12)).await;
    cancel.cancel();
    handle.await.unwrap();
}
