use meridian_error::{ErrorClass, MeridianResult};
use meridian_kv::{MemoryKv, SharedKv};
use meridian_quota::{
    ApiAccount, AuditRecord, AuditSink, QuotaConfig, QuotaGate, QuotaPermit, RequestAudit,
    hash_token,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn gate_with(accounts: Vec<ApiAccount>, limited: HashMap<String, Vec<String>>) -> QuotaGate {
    let kv: SharedKv = Arc::new(MemoryKv::new());
    let config = QuotaConfig::default()
        .with_accounts(accounts)
        .with_limited_users(limited)
        .with_active_requests(3);
    QuotaGate::new(kv, config)
}

#[tokio::test]
async fn test_authenticate_configured_account() {
    let gate = gate_with(vec![ApiAccount::new("melanie", "s3cret")], HashMap::new());

    let account = gate.authenticate(Some("Bearer s3cret")).await.unwrap();
    assert_eq!(account.name(), "melanie");
    assert!(gate.is_admin(&account));

    for header in [None, Some("Bearer wrong"), Some("s3cret"), Some("Bearer ")] {
        let err = gate.authenticate(header).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unauthorized);
    }
}

#[tokio::test]
async fn test_authenticate_registered_account() {
    let gate = gate_with(Vec::new(), HashMap::new());
    let account = ApiAccount::new("bot", "runtime-token");
    assert_eq!(account.token_sha256(), &hash_token("runtime-token"));

    gate.register_account(&account).await.unwrap();
    let found = gate.authenticate(Some("Bearer runtime-token")).await.unwrap();
    assert_eq!(found, account);
    assert!(!gate.is_admin(&found));
}

#[tokio::test]
async fn test_scope_is_forbidden() {
    let account = ApiAccount::new("bot", "t").with_scopes(vec!["tiktok".into()]);
    let gate = gate_with(vec![account.clone()], HashMap::new());

    assert!(gate.admit(&account, Some("tiktok")).await.is_ok());
    let err = gate.admit(&account, Some("instagram")).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::PermissionDenied);
}

#[tokio::test]
async fn test_disabled_platform_is_quota_exceeded() {
    let account = ApiAccount::new("bot", "t");
    let gate = gate_with(vec![account.clone()], HashMap::new());

    gate.disable_platform("bot", "Instagram", None).await.unwrap();
    let err = gate.admit(&account, Some("instagram")).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::QuotaExceeded);

    assert!(gate.enable_platform("bot", "instagram").await.unwrap());
    assert!(gate.admit(&account, Some("instagram")).await.is_ok());
}

#[tokio::test]
async fn test_rpm_limit() {
    let account = ApiAccount::new("bot", "t").with_rpm(Some(1));
    let gate = gate_with(vec![account.clone()], HashMap::new());

    let first = gate.admit(&account, None).await.unwrap();
    drop(first);
    let err = gate.admit(&account, None).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::QuotaExceeded);
}

#[tokio::test(start_paused = true)]
async fn test_limited_user_runs_one_at_a_time() {
    let account = ApiAccount::new("freeloader", "t");
    let mut limited = HashMap::new();
    limited.insert("freeloader".to_string(), vec!["instagram".to_string()]);
    let gate = Arc::new(gate_with(vec![account.clone()], limited));

    let held = gate.admit(&account, Some("instagram")).await.unwrap();
    assert_eq!(held.platform(), Some("instagram"));

    let waiter = {
        let gate = gate.clone();
        let account = account.clone();
        tokio::spawn(async move { gate.admit(&account, Some("instagram")).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(held);
    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_global_slots_released_on_drop() {
    let account = ApiAccount::new("bot", "t");
    let gate = gate_with(vec![account.clone()], HashMap::new());

    let permits: Vec<_> = admit_many(&gate, &account, 3).await;
    assert_eq!(gate.available(), 0);
    drop(permits);
    assert_eq!(gate.available(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_saturated_platform_does_not_block_others() {
    let account = ApiAccount::new("bot", "t");
    let gate = Arc::new(gate_with(vec![account.clone()], HashMap::new()));

    let first = gate.admit(&account, Some("instagram")).await.unwrap();
    let second = gate.admit(&account, Some("instagram")).await.unwrap();
    let queued = {
        let gate = gate.clone();
        let account = account.clone();
        tokio::spawn(async move { gate.admit(&account, Some("instagram")).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!queued.is_finished());
    assert_eq!(gate.available(), 1);

    let tiktok = tokio::time::timeout(Duration::from_secs(1), gate.admit(&account, Some("tiktok")))
        .await
        .expect("tiktok admit must not wait on instagram")
        .unwrap();
    assert_eq!(tiktok.platform(), Some("tiktok"));

    drop((first, second, tiktok));
    queued.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_slot_wait_is_bounded() {
    let account = ApiAccount::new("bot", "t");
    let gate = Arc::new(gate_with(vec![account.clone()], HashMap::new()));

    let _held = (
        gate.admit(&account, Some("instagram")).await.unwrap(),
        gate.admit(&account, Some("instagram")).await.unwrap(),
    );
    let started = tokio::time::Instant::now();
    let err = gate.admit(&account, Some("instagram")).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::QuotaExceeded);
    assert!(started.elapsed() >= gate.config().admit_timeout());

    let _others = admit_many(&gate, &account, 1).await;
    let err = gate.admit(&account, None).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::QuotaExceeded);
}

async fn admit_many(
    gate: &QuotaGate,
    account: &ApiAccount,
    n: usize,
) -> Vec<QuotaPermit> {
    let mut out = Vec::new();
    for _ in 0..n {
        out.push(gate.admit(account, Some("pinterest")).await.unwrap());
    }
    out
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<AuditRecord>>);

#[async_trait::async_trait]
impl AuditSink for RecordingSink {
    async fn record(&self, record: &AuditRecord) -> MeridianResult<()> {
        self.0.lock().push(record.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_only_slow_requests_reach_sink() {
    let sink = RecordingSink::default();

    let fast = RequestAudit::start("fast", None, serde_json::Value::Null, serde_json::Value::Null, None);
    fast.finish_into(None, &sink).await;
    assert!(sink.0.lock().is_empty());

    let slow = RequestAudit::start(
        "slow",
        Some("melanie".into()),
        serde_json::json!({"username": "nasa"}),
        serde_json::Value::Null,
        Some("127.0.0.1".into()),
    );
    std::thread::sleep(Duration::from_millis(120));
    let record = slow.finish_into(Some("boom".into()), &sink).await;
    assert!(record.failed);
    assert_eq!(sink.0.lock().len(), 1);
    assert_eq!(sink.0.lock()[0].route_name, "slow");
}
