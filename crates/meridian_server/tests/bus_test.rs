//! Realtime bus acknowledgements and bio lookups.

use meridian_error::ErrorClass;
use meridian_fetch::{HttpResponse, ScriptedHttp};
use meridian_kv::{KvStore, MemoryKv, SharedKv};
use meridian_server::{
    BIO_CHANNEL, BioLookup, BioRequest, BusConnection, BusPayload, DeletionConfirmation,
    RealtimeBus, SnipeAck, WebsocketMessage, ack_key, response_key,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

fn bus() -> (Arc<MemoryKv>, Arc<RealtimeBus>) {
    let kv = Arc::new(MemoryKv::new());
    let shared: SharedKv = kv.clone();
    (kv, Arc::new(RealtimeBus::new(shared)))
}

fn clear(bus: &Arc<RealtimeBus>, channel_id: u64, requester: &str) -> JoinHandle<DeletionConfirmation> {
    let bus = bus.clone();
    let requester = requester.to_string();
    tokio::spawn(async move { bus.clear_snipe(channel_id, &requester).await.unwrap() })
}

async fn next_sig(connection: &mut BusConnection) -> String {
    let frame: WebsocketMessage = serde_json::from_str(&connection.recv().await.unwrap()).unwrap();
    match frame.data {
        Some(BusPayload::Delete(request)) => request.sig,
        other => panic!("expected a delete request, got {:?}", other),
    }
}

async fn ack(bus: &RealtimeBus, account: &str, sig: &str, deleted: i64) {
    bus.acknowledge(
        account,
        &SnipeAck {
            sig: sig.to_string(),
            deleted_items: Some(deleted),
        },
    )
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_every_other_account_acknowledges() {
    let (kv, bus) = bus();
    let mut alice = bus.connect("alice");
    let mut bob = bus.connect("bob");
    let mut requester = bus.connect("melanie");

    let task = clear(&bus, 42, "melanie");
    let sig = next_sig(&mut alice).await;
    assert_eq!(next_sig(&mut bob).await, sig);
    ack(&bus, "bob", &sig, 1).await;
    ack(&bus, "alice", &sig, 2).await;

    let confirmation = task.await.unwrap();
    assert!(confirmation.confirmed);
    let mut confirmed_by = confirmation.confirmed_by.clone();
    confirmed_by.sort();
    assert_eq!(confirmed_by, vec!["alice".to_string(), "bob".to_string()]);
    assert_eq!(confirmation.deleted_items, 3);
    assert!(!kv.exists(&ack_key(&sig)).await.unwrap());

    let silent = tokio::time::timeout(Duration::from_millis(50), requester.recv()).await;
    assert!(silent.is_err(), "requester must not receive its own request");
}

#[tokio::test(start_paused = true)]
async fn test_no_other_accounts_returns_unconfirmed() {
    let (_kv, bus) = bus();
    let _requester = bus.connect("melanie");

    let started = tokio::time::Instant::now();
    let confirmation = clear(&bus, 1, "melanie").await.unwrap();
    assert!(!confirmation.confirmed);
    assert!(confirmation.confirmed_by.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_loopback_account_receives_its_own_request() {
    let (_kv, bus) = bus();
    let mut loopback = bus.connect("test");

    let confirmation = clear(&bus, 7, "test").await.unwrap();
    let sig = next_sig(&mut loopback).await;
    assert_eq!(sig, confirmation.sig);
    assert!(!confirmation.confirmed);
}

#[tokio::test(start_paused = true)]
async fn test_missing_acknowledgement_times_out() {
    let (kv, bus) = bus();
    let mut alice = bus.connect("alice");
    let mut bob = bus.connect("bob");

    let started = tokio::time::Instant::now();
    let task = clear(&bus, 42, "melanie");
    let sig = next_sig(&mut alice).await;
    next_sig(&mut bob).await;
    ack(&bus, "alice", &sig, 5).await;

    let confirmation = task.await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(confirmation.confirmed);
    assert_eq!(confirmation.confirmed_by, vec!["alice".to_string()]);
    assert_eq!(confirmation.deleted_items, 5);
    assert!(!kv.exists(&ack_key(&sig)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_acknowledgement_counts_once() {
    let (_kv, bus) = bus();
    let mut alice = bus.connect("alice");
    let mut bob = bus.connect("bob");

    let task = clear(&bus, 42, "melanie");
    let sig = next_sig(&mut alice).await;
    next_sig(&mut bob).await;
    ack(&bus, "alice", &sig, 3).await;
    ack(&bus, "alice", &sig, 3).await;
    ack(&bus, "bob", &sig, 1).await;

    let confirmation = task.await.unwrap();
    assert_eq!(confirmation.confirmed_by.len(), 2);
    assert_eq!(confirmation.deleted_items, 4);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_duplicate_acknowledgements_count_once() {
    let (_kv, bus) = bus();
    let mut alice = bus.connect("alice");

    let task = clear(&bus, 42, "melanie");
    let sig = next_sig(&mut alice).await;
    let acks: Vec<_> = (0..8)
        .map(|_| {
            let bus = bus.clone();
            let sig = sig.clone();
            tokio::spawn(async move { ack(&bus, "alice", &sig, 2).await })
        })
        .collect();
    for handle in futures::future::join_all(acks).await {
        handle.unwrap();
    }

    let confirmation = task.await.unwrap();
    assert_eq!(confirmation.confirmed_by, vec!["alice".to_string()]);
    assert_eq!(confirmation.deleted_items, 2);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledgement_for_finished_request_is_dropped() {
    let (kv, bus) = bus();
    let mut alice = bus.connect("alice");

    ack(&bus, "alice", "unknown", 4).await;
    assert!(!kv.exists(&ack_key("unknown")).await.unwrap());

    let task = clear(&bus, 42, "melanie");
    let sig = next_sig(&mut alice).await;
    ack(&bus, "alice", &sig, 1).await;
    task.await.unwrap();

    ack(&bus, "alice", &sig, 1).await;
    assert!(!kv.exists(&ack_key(&sig)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_closed_connection_is_dropped() {
    let (_kv, bus) = bus();
    let alice = bus.connect("alice");
    let _bob = bus.connect("bob");
    drop(alice);

    let frame = WebsocketMessage {
        op: meridian_server::OpCode::SnipeDelete,
        data: None,
    };
    assert_eq!(bus.broadcast(&frame, None).unwrap(), 1);
    assert_eq!(bus.accounts(), vec!["bob".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_bio_answered_by_responder() {
    let kv = Arc::new(MemoryKv::new());
    let shared: SharedKv = kv.clone();
    let http = Arc::new(ScriptedHttp::new());
    let lookup = BioLookup::new(shared.clone(), http.clone(), Some("token".into()));

    let mut requests = kv.subscribe();
    let responder_kv = shared.clone();
    tokio::spawn(async move {
        while let Ok((channel, message)) = requests.recv().await {
            if channel != BIO_CHANNEL {
                continue;
            }
            let request: BioRequest = serde_json::from_str(&message).unwrap();
            let answer = json!({ "user": { "id": request.user_id.to_string(), "bio": "hi" } });
            responder_kv
                .set(&response_key(&request.sig), &answer.to_string(), None)
                .await
                .unwrap();
        }
    });

    let value = lookup.lookup(5, Some(9)).await.unwrap();
    assert_eq!(value["user"]["bio"], "hi");
    let again = lookup.lookup(5, Some(9)).await.unwrap();
    assert_eq!(again, value);
    assert_eq!(kv.published().len(), 1);
    assert!(http.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bio_falls_back_to_users_api() {
    let kv: SharedKv = Arc::new(MemoryKv::new());
    let http = Arc::new(ScriptedHttp::new());
    http.route(
        "https://discord.com/api/v10/users/5",
        HttpResponse::new(200, json!({ "id": "5", "banner": "a_abc" }).to_string()),
    );
    let lookup = BioLookup::new(kv, http.clone(), Some("token".into()))
        .with_responder_wait(Duration::from_millis(300));

    let value = lookup.lookup(5, None).await.unwrap();
    assert_eq!(value["user"]["id"], "5");
    assert_eq!(value["user"]["banner"]["hash"], "a_abc");
    assert_eq!(value["user"]["banner"]["format"], "gif");
    assert!(
        value["user"]["banner"]["url"]
            .as_str()
            .unwrap()
            .ends_with("/5/a_abc.gif?size=1024")
    );
    assert_eq!(http.count("https://discord.com/api/v10/users/5"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bio_without_token_is_not_found() {
    let kv: SharedKv = Arc::new(MemoryKv::new());
    let http = Arc::new(ScriptedHttp::new());
    let lookup = BioLookup::new(kv, http, None).with_responder_wait(Duration::from_millis(300));

    let err = lookup.lookup(5, None).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
}
