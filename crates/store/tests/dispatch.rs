mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;

use murmur_core::event::{EventBus, EventPayload};
use murmur_store::{SocketCommand, StoreError};

use common::{connected, disconnected, now_ms, push, Harness};

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn spawned_store_applies_bus_events_until_stopped() {
    let h = Harness::new();
    let handle = h.store.spawn().unwrap();

    h.bus.publish(connected("me")).unwrap();
    h.wait_for(|s| s.connected).await;

    h.bus
        .publish(push(
            "message",
            json!({ "_id": "m1", "chat": "c1", "sender": "u2", "content": "hi", "createdAt": now_ms() }),
        ))
        .unwrap();
    h.wait_for(|s| s.conversations.get("c1").is_some()).await;
    assert_eq!(h.store.snapshot().conversations.get("c1").unwrap().unread, 1);
    assert_eq!(
        h.transport.sent(),
        [SocketCommand::MarkDelivered { chat_id: "c1".into() }]
    );

    handle.stop().await;
    h.bus.publish(disconnected()).unwrap();
    settle().await;
    assert!(h.store.snapshot().connected);
}

#[tokio::test]
async fn dropping_the_handle_stops_dispatch() {
    let h = Harness::new();
    let handle = h.store.spawn().unwrap();
    assert!(!handle.is_finished());
    drop(handle);
    settle().await;

    h.bus.publish(connected("me")).unwrap();
    settle().await;
    assert!(!h.store.snapshot().connected);
}

#[tokio::test]
async fn opening_and_closing_are_announced_on_the_ui_channel() {
    let h = Harness::connected();
    h.api.with_detail("c1", json!({ "_id": "c1", "to": "u2" }));
    let mut ui = h.bus.subscribe("ui.conversation.*").unwrap();

    h.store.open_conversation("c1").await.unwrap();
    h.store.close_conversation().unwrap();

    let opened = tokio::time::timeout(Duration::from_secs(1), ui.recv())
        .await
        .unwrap()
        .unwrap();
    assert_matches!(opened.payload, EventPayload::ConversationOpened { chat_id } if chat_id == "c1");
    let closed = tokio::time::timeout(Duration::from_secs(1), ui.recv())
        .await
        .unwrap()
        .unwrap();
    assert_matches!(closed.payload, EventPayload::ConversationClosed { chat_id } if chat_id == "c1");
}

#[tokio::test]
async fn store_ignores_its_own_ui_announcements() {
    let h = Harness::connected();
    h.api.with_detail("c1", json!({ "_id": "c1", "to": "u2" }));
    let _handle = h.store.spawn().unwrap();

    h.store.open_conversation("c1").await.unwrap();
    settle().await;
    assert_eq!(h.transport.names(), ["join", "mark-read"]);
}

#[tokio::test]
async fn reconnect_rejoins_the_active_room() {
    let h = Harness::connected();
    h.api.with_detail("c1", json!({ "_id": "c1", "to": "u2" }));
    h.store.open_conversation("c1").await.unwrap();
    h.transport.clear();

    h.store.handle_event(&disconnected()).unwrap();
    assert!(!h.store.snapshot().connected);
    assert_matches!(h.store.send_text("hi"), Err(StoreError::Disconnected));

    h.store.handle_event(&connected("me")).unwrap();
    assert!(h.store.snapshot().connected);
    assert_eq!(
        h.transport.sent(),
        [SocketCommand::Join { chat_id: "c1".into() }]
    );
    h.store.send_text("hi").unwrap();
}

#[tokio::test]
async fn disconnect_clears_typing_and_drops_local_typing_silently() {
    let h = Harness::connected();
    h.api.with_detail("c1", json!({ "_id": "c1", "to": "u2" }));
    h.store.open_conversation("c1").await.unwrap();
    h.store
        .handle_event(&push("typing", json!({ "chatId": "c1", "userId": "u2" })))
        .unwrap();
    h.store.notify_typing(chrono::Utc::now()).unwrap();
    h.transport.clear();

    h.store.handle_event(&disconnected()).unwrap();
    assert!(h.store.snapshot().typing.indicators().is_empty());
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn snapshot_subscribers_see_every_published_change() {
    let h = Harness::new();
    let mut updates = h.store.subscribe();
    let before = h.store.snapshot();

    h.store.handle_event(&connected("me")).unwrap();
    assert!(updates.has_changed().unwrap());
    assert!(updates.borrow_and_update().connected);
    assert!(!before.connected, "earlier snapshots never change");
}
