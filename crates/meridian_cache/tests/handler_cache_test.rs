use meridian_cache::{CachePolicy, FetchOutcome, HandlerCache, Ttl};
use meridian_error::{ErrorClass, FetchError, FetchErrorKind, MeridianResult};
use meridian_kv::{KvStore, MemoryKv, SharedKv};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    username: String,
    followers: u64,
}

fn setup() -> (HandlerCache, Arc<MemoryKv>) {
    let kv = Arc::new(MemoryKv::new());
    let shared: SharedKv = kv.clone();
    (HandlerCache::new(shared), kv)
}

#[tokio::test]
async fn test_single_flight_hundred_callers_one_fetch() {
    let (cache, _kv) = setup();
    let fetches = Arc::new(AtomicUsize::new(0));
    let policy = CachePolicy::new(Ttl::secs(7200));

    let mut handles = Vec::new();
    for _ in 0..100 {
        let cache = cache.clone();
        let fetches = fetches.clone();
        let policy = policy.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_fetch("instaprofile:nasa", &policy, false, || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(FetchOutcome::Found(Profile {
                        username: "nasa".into(),
                        followers: 97_000_000,
                    }))
                })
                .await
                .unwrap()
        }));
    }

    let mut from_cache = 0;
    for handle in handles {
        let lookup = handle.await.unwrap();
        assert_eq!(lookup.value.username, "nasa");
        if lookup.from_cache {
            from_cache += 1;
        }
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(from_cache, 99);
}

#[tokio::test(start_paused = true)]
async fn test_negative_entry_served_for_ttl() {
    let (cache, _kv) = setup();
    let fetches = Arc::new(AtomicUsize::new(0));
    let policy = CachePolicy::new(Ttl::secs(7200)).with_negative_ttl(Some(Ttl::secs(3600)));

    let lookup = |fetches: Arc<AtomicUsize>| {
        let cache = cache.clone();
        let policy = policy.clone();
        async move {
            cache
                .get_or_fetch::<Profile, _, _>("instaprofile:ghost", &policy, false, || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(FetchOutcome::NotFound)
                })
                .await
        }
    };

    let err = lookup(fetches.clone()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
    tokio::time::advance(Duration::from_secs(1800)).await;
    let err = lookup(fetches.clone()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(1801)).await;
    let _ = lookup(fetches.clone()).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_negative_cached() {
    let (cache, kv) = setup();
    let policy = CachePolicy::new(Ttl::secs(60)).with_timeout(Duration::from_secs(20));

    let err = cache
        .get_or_fetch::<Profile, _, _>("instastory:slow", &policy, false, || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(FetchOutcome::NotFound)
        })
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::UpstreamTimeout);
    assert_eq!(kv.get("instastory:slow").await.unwrap().as_deref(), Some("null"));
}

#[tokio::test]
async fn test_transient_errors_not_cached() {
    let (cache, kv) = setup();
    let policy = CachePolicy::new(Ttl::secs(60));

    let result: MeridianResult<_> = cache
        .get_or_fetch::<Profile, _, _>("pinpost:x", &policy, false, || async {
            Err(FetchError::new(FetchErrorKind::Upstream("502 from origin".into())).into())
        })
        .await;
    assert_eq!(result.unwrap_err().class(), ErrorClass::BadGateway);
    assert!(!kv.exists("pinpost:x").await.unwrap());
}

#[tokio::test]
async fn test_force_refreshes() {
    let (cache, _kv) = setup();
    let policy = CachePolicy::new(Ttl::between(1200, 1800));
    let fetches = Arc::new(AtomicUsize::new(0));

    for force in [false, false, true] {
        let fetches = fetches.clone();
        cache
            .get_or_fetch("instahl:18000000", &policy, force, || async move {
                let n = fetches.fetch_add(1, Ordering::SeqCst) as u64;
                Ok(FetchOutcome::Found(Profile {
                    username: "hl".into(),
                    followers: n,
                }))
            })
            .await
            .unwrap();
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}
