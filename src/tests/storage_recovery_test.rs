use std::rc::Rc;

use serde_json::json;

use crate::models::{Entity, SyncWarning};
use crate::tests::support::{fields, open_feed, post, seed_mirror, test_config, FakeServer};
use crate::utils::storage::{KeyValueStore, MemoryStore};
use crate::utils::{MIRROR_KEY, QUEUE_KEY};

fn post_with_image(id: &str, text: &str) -> Entity {
    Entity::new(
        id.into(),
        fields(json!({ "text": text, "date": "2024-05-01", "img": "x".repeat(300) })),
    )
}

#[tokio::test]
async fn full_storage_keeps_minimal_fields_and_warns() {
    let config = test_config();
    let store = MemoryStore::with_quota(600);
    let server = Rc::new(FakeServer::with_entities(vec![
        post_with_image("p1", "one"),
        post_with_image("p2", "two"),
        post_with_image("p3", "three"),
    ]));

    let feed = open_feed(config.clone(), &store, &server, false);
    feed.monitor().set_link_up(true);
    assert_eq!(feed.initial_load().await, 3);

    assert!(feed.is_degraded());
    assert!(feed.warnings().contains(&SyncWarning::StorageDegraded {
        kept_fields: vec!["text".to_string(), "date".to_string()]
    }));
    // En memoria el feed sigue completo
    assert!(feed.get(&"p1".into()).unwrap().field("img").is_some());

    let reopened = open_feed(config, &store, &server, false);
    assert!(reopened.is_degraded());
    let p1 = reopened.get(&"p1".into()).unwrap();
    assert_eq!(p1.text("text"), "one");
    assert!(p1.field("img").is_none());
}

#[tokio::test]
async fn degraded_copies_are_not_pushed_over_the_server() {
    let config = test_config();
    let store = MemoryStore::with_quota(300);
    let server = Rc::new(FakeServer::with_entities(vec![post_with_image("p1", "one")]));

    let feed = open_feed(config.clone(), &store, &server, false);
    feed.monitor().set_link_up(true);
    feed.initial_load().await;
    drop(feed);

    // Otro cliente edita p1. La copia local solo tiene text/date y difiere,
    // pero subirla borraría la imagen del servidor
    server.put(post_with_image("p1", "edited elsewhere"));
    let feed = open_feed(config, &store, &server, true);
    assert!(feed.is_degraded());
    let reports = feed.handle_reconnected().await;

    assert!(matches!(reports, crate::models::ReconnectOutcome::Completed(_)));
    assert!(server.mutations().is_empty());
    assert!(server.entity("p1").unwrap().field("img").is_some());
}

#[tokio::test]
async fn corrupt_queue_is_dropped_and_recovered_by_the_sweep() {
    let config = test_config();
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::new());
    seed_mirror(&config, &store, vec![post("p9", "made offline")]);
    store.set(&config.storage_key(QUEUE_KEY), "{\"version\":1,\"operations\":[{").unwrap();

    let feed = open_feed(config.clone(), &store, &server, false);
    assert_eq!(feed.pending_count(), 0);
    assert!(feed.needs_recovery());
    assert!(feed
        .warnings()
        .iter()
        .any(|w| matches!(w, SyncWarning::QueueDropped { .. })));

    feed.monitor().set_link_up(true);
    feed.monitor().record_probe(true);
    feed.handle_reconnected().await;

    assert_eq!(server.mutations(), vec!["POST p9"]);
    assert!(!feed.needs_recovery());
    assert!(store.raw(&config.storage_key(MIRROR_KEY)).is_some());
}

#[tokio::test]
async fn unreadable_mirror_starts_empty() {
    let config = test_config();
    let store = MemoryStore::new();
    store.set(&config.storage_key(MIRROR_KEY), "[[[").unwrap();
    let server = Rc::new(FakeServer::new());

    let feed = open_feed(config, &store, &server, false);
    assert!(feed.entities().is_empty());
    assert!(feed.warnings().is_empty());
}

#[tokio::test]
async fn degraded_save_in_this_session_still_lets_local_copies_win() {
    let config = test_config();
    let store = MemoryStore::with_quota(300);
    let server = Rc::new(FakeServer::with_entities(vec![post_with_image("p1", "one")]));

    let feed = open_feed(config, &store, &server, false);
    feed.monitor().set_link_up(true);
    feed.initial_load().await;
    assert!(feed.is_degraded());

    // La copia en memoria está completa: gana frente al cambio remoto
    server.put(post_with_image("p1", "edited elsewhere"));
    feed.handle_reconnected().await;

    assert_eq!(server.mutations(), vec!["PUT p1"]);
    assert_eq!(server.entity("p1").unwrap().text("text"), "one");
    assert!(server.entity("p1").unwrap().field("img").is_some());
}
