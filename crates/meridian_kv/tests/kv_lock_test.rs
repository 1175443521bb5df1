use meridian_kv::{KeyedLocks, KvJsonExt, KvLock, KvStore, MemoryKv, SharedKv};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_keyed_locks_serialise_same_key() {
    let locks = KeyedLocks::new();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let locks = locks.clone();
        let active = active.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            let _guard = locks.lock("render_Instagram1234.jpg").await;
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            active.fetch_sub(1, Ordering::SeqCst);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_kv_lock_excludes_and_expires() {
    let kv: SharedKv = Arc::new(MemoryKv::new());
    let first = KvLock::try_acquire(kv.clone(), "relogin:alice", Duration::from_secs(30))
        .await
        .unwrap()
        .expect("first acquire");
    assert!(
        KvLock::try_acquire(kv.clone(), "relogin:alice", Duration::from_secs(30))
            .await
            .unwrap()
            .is_none()
    );

    // Crashed holder: never released, lock lapses with its TTL.
    std::mem::forget(first);
    tokio::time::advance(Duration::from_secs(31)).await;
    let again = KvLock::acquire(
        kv.clone(),
        "relogin:alice",
        Duration::from_secs(30),
        Duration::from_secs(1),
    )
    .await
    .unwrap();
    assert!(again.is_some());
}

#[tokio::test]
async fn test_release_keeps_foreign_lock() {
    let kv: SharedKv = Arc::new(MemoryKv::new());
    let lock = KvLock::try_acquire(kv.clone(), "snipe:1", Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    // Someone else took over after expiry.
    kv.set("snipe:1", "other", None).await.unwrap();
    lock.release().await.unwrap();
    assert_eq!(kv.get("snipe:1").await.unwrap().as_deref(), Some("other"));
}

#[tokio::test]
async fn test_json_helpers_and_keys() {
    let kv = MemoryKv::new();
    kv.set_json("objcache:TikTokabcd.jpg", &"image/jpeg", None)
        .await
        .unwrap();
    kv.set_json("objcache:Instagramabcd.mp4", &"video/mp4", None)
        .await
        .unwrap();
    kv.set("unrelated", "1", None).await.unwrap();

    let keys = kv.keys("*abcd*").await.unwrap();
    assert_eq!(keys.len(), 2);
    let mime: Option<String> = kv.get_json("objcache:TikTokabcd.jpg").await.unwrap();
    assert_eq!(mime.as_deref(), Some("image/jpeg"));
}

#[tokio::test]
async fn test_publish_reaches_subscribers() {
    let kv = MemoryKv::new();
    let mut rx = kv.subscribe();
    kv.publish("tessabio", "{\"user_id\":1}").await.unwrap();
    let (channel, message) = rx.recv().await.unwrap();
    assert_eq!(channel, "tessabio");
    assert!(message.contains("user_id"));
    assert_eq!(kv.published().len(), 1);
}
