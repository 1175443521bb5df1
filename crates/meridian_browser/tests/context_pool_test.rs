use meridian_browser::{
    BrowserAccount, BrowserConfig, ContextPool, DISABLED_KEY, SESSIONS_KEY, ScriptedFactory,
    ScriptedRoute, StorageState,
};
use meridian_error::ErrorClass;
use meridian_kv::{KvStore, MemoryKv, SharedKv};
use std::sync::Arc;
use std::time::Duration;

fn pool_with(factory: &ScriptedFactory, kv: Arc<MemoryKv>, config: BrowserConfig) -> Arc<ContextPool> {
    let shared: SharedKv = kv;
    Arc::new(ContextPool::new(
        Arc::new(factory.clone()),
        shared,
        config,
        Some(Arc::new(factory.login_flow())),
    ))
}

fn accounts() -> Vec<BrowserAccount> {
    vec![
        BrowserAccount::new("ig1", "first", "pw"),
        BrowserAccount::new("ig2", "second", "pw"),
    ]
}

#[tokio::test]
async fn test_borrow_navigates_scripted_page() {
    let factory = ScriptedFactory::new();
    factory.route(
        "https://www.instagram.com/nasa/",
        ScriptedRoute::html("<html>nasa</html>")
            .with_response("https://www.instagram.com/api/v1/users/web_profile_info/?username=nasa", "{\"ok\":1}"),
    );
    let pool = pool_with(&factory, Arc::new(MemoryKv::new()), BrowserConfig::default());

    let lease = pool.borrow(None, false).await.unwrap();
    let mut interceptor = lease.intercept("web_profile_info").await.unwrap();
    lease.navigate("https://www.instagram.com/nasa/").await.unwrap();

    let response = interceptor.next(Duration::from_secs(1)).await.unwrap();
    assert_eq!(response.json().unwrap()["ok"], 1);
    assert_eq!(lease.content().await.unwrap(), "<html>nasa</html>");
}

#[tokio::test(start_paused = true)]
async fn test_per_account_limit() {
    let factory = ScriptedFactory::new();
    let config = BrowserConfig::default()
        .with_accounts(accounts())
        .with_per_account(2)
        .with_borrow_timeout_secs(5);
    let pool = pool_with(&factory, Arc::new(MemoryKv::new()), config);

    let a = pool.borrow(Some("ig1"), false).await.unwrap();
    let _b = pool.borrow(Some("ig1"), false).await.unwrap();

    let err = pool.borrow(Some("ig1"), false).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::UpstreamTimeout);

    assert!(pool.borrow(Some("ig2"), false).await.is_ok());
    drop(a);
    assert!(pool.borrow(Some("ig1"), false).await.is_ok());
}

#[tokio::test]
async fn test_login_once_then_session_persisted() {
    let factory = ScriptedFactory::new();
    let kv = Arc::new(MemoryKv::new());
    let config = BrowserConfig::default().with_accounts(accounts());
    let pool = pool_with(&factory, kv.clone(), config);

    let first = pool.borrow(Some("ig1"), false).await.unwrap();
    let second = pool.borrow(Some("ig1"), false).await.unwrap();
    assert_eq!(factory.logins(), 1);
    assert_eq!(factory.contexts_created(), 1);
    drop((first, second));

    let raw = kv.hget(SESSIONS_KEY, "ig1").await.unwrap().unwrap();
    let state: StorageState = serde_json::from_str(&raw).unwrap();
    assert_eq!(state.cookie("sessionid"), Some("first"));
}

#[tokio::test]
async fn test_stored_session_skips_login() {
    let factory = ScriptedFactory::new();
    let kv = Arc::new(MemoryKv::new());
    kv.hset(
        SESSIONS_KEY,
        "ig1",
        r#"{"cookies":[{"name":"sessionid","value":"restored","domain":".scripted"}]}"#,
    )
    .await
    .unwrap();
    let pool = pool_with(&factory, kv, BrowserConfig::default().with_accounts(accounts()));

    pool.borrow(Some("ig1"), false).await.unwrap();
    assert_eq!(factory.logins(), 0);
    assert_eq!(pool.save_states().await.unwrap(), 1);
}

#[tokio::test]
async fn test_relogin_once_per_generation() {
    let factory = ScriptedFactory::new();
    let kv = Arc::new(MemoryKv::new());
    let pool = pool_with(&factory, kv, BrowserConfig::default().with_accounts(accounts()));

    let a = pool.borrow(Some("ig1"), false).await.unwrap();
    let b = pool.borrow(Some("ig1"), false).await.unwrap();
    assert_eq!(factory.logins(), 1);

    let (ra, rb) = tokio::join!(pool.report_auth_failure(&a), pool.report_auth_failure(&b));
    ra.unwrap();
    rb.unwrap();
    assert_eq!(factory.logins(), 2);
    assert_eq!(factory.contexts_created(), 2);
}

#[tokio::test]
async fn test_flagged_and_disabled_accounts_skipped() {
    let factory = ScriptedFactory::new();
    let kv = Arc::new(MemoryKv::new());
    kv.set("api_flagged_context:ig1", "1", None).await.unwrap();
    let pool = pool_with(&factory, kv.clone(), BrowserConfig::default().with_accounts(accounts()));

    let err = pool.borrow(Some("ig1"), false).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::UpstreamTimeout);

    let lease = pool.borrow_any_account().await.unwrap();
    assert_eq!(lease.account(), Some("ig2"));
    drop(lease);

    kv.sadd(DISABLED_KEY, "ig2").await.unwrap();
    assert!(pool.borrow_any_account().await.is_err());
}
