use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::json;
use tokio::task::LocalSet;

use crate::error::{ApiError, SyncError};
use crate::models::{
    ConnectivityState, Entity, EntityId, FeedEvent, Fields, OperationKind, SyncStatus, SyncWarning,
};
use crate::services::api_client::EntityApi;
use crate::tests::support::{
    fields, open_feed, open_feed_with_api, post, seed_mirror, test_config, FakeServer,
};
use crate::utils::storage::MemoryStore;
use crate::viewmodels::{FeedQuery, SortOrder};

#[tokio::test]
async fn online_create_is_sent_directly() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::new());
    let feed = open_feed(test_config(), &store, &server, true);

    let created = feed.create(fields(json!({ "text": "hi" }))).await.unwrap();

    assert_eq!(server.mutations(), vec![format!("POST {}", created.id)]);
    assert_eq!(feed.pending_count(), 0);
    assert_eq!(feed.status(), SyncStatus::Synced);
    assert!(created.field("createdAt").is_some());
}

#[tokio::test]
async fn create_stamps_the_timestamp_field() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::new());
    let feed = open_feed(test_config(), &store, &server, false);

    let created = feed.create(fields(json!({ "text": "hi" }))).await.unwrap();
    let stamp = created.text("date");
    assert!(DateTime::parse_from_rfc3339(stamp).is_ok(), "not RFC 3339: {}", stamp);

    let kept = feed
        .create(fields(json!({ "text": "dated", "date": "2020-01-01" })))
        .await
        .unwrap();
    assert_eq!(kept.text("date"), "2020-01-01");
    assert_ne!(created.id, kept.id);
}

#[tokio::test]
async fn transient_direct_failure_enqueues_and_marks_server_down() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::new());
    let feed = open_feed(test_config(), &store, &server, true);
    server.set_down(true);

    let created = feed.create(fields(json!({ "text": "hi" }))).await.unwrap();

    assert_eq!(feed.pending_count(), 1);
    assert_eq!(feed.pending_operations()[0].kind, OperationKind::Create);
    assert_eq!(feed.connectivity(), ConnectivityState::ServerDown);
    assert!(feed.get(&created.id).is_some());
}

#[tokio::test]
async fn permanent_direct_failure_rolls_back() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::with_entities(vec![post("p1", "original")]));
    seed_mirror(&test_config(), &store, vec![post("p1", "original")]);
    let feed = open_feed(test_config(), &store, &server, true);
    server.fail(
        "PUT p1",
        ApiError::Rejected {
            status: 422,
            message: "Text is required".to_string(),
        },
    );

    let result = feed.update(&"p1".into(), fields(json!({ "text": "" }))).await;

    match result {
        Err(SyncError::PermanentRemote { op_id, .. }) => assert_eq!(op_id.to_string(), "update:p1"),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(feed.get(&"p1".into()).unwrap().text("text"), "original");
    assert_eq!(feed.pending_count(), 0);
}

#[tokio::test]
async fn rejected_delete_restores_the_entity() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::with_entities(vec![post("p1", "keep me")]));
    seed_mirror(&test_config(), &store, vec![post("p1", "keep me")]);
    let feed = open_feed(test_config(), &store, &server, true);
    server.fail(
        "DELETE p1",
        ApiError::Rejected {
            status: 403,
            message: "Forbidden".to_string(),
        },
    );

    assert!(feed.delete(&"p1".into()).await.is_err());
    assert_eq!(feed.get(&"p1".into()).unwrap().text("text"), "keep me");
}

#[tokio::test]
async fn unauthorized_direct_send_keeps_the_intent() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::with_entities(vec![post("p1", "a")]));
    seed_mirror(&test_config(), &store, vec![post("p1", "a")]);
    let feed = open_feed(test_config(), &store, &server, true);
    server.fail("PUT p1", ApiError::Unauthorized);

    let edited = feed.update(&"p1".into(), fields(json!({ "text": "b" }))).await.unwrap();

    assert_eq!(edited.text("text"), "b");
    assert_eq!(feed.pending_count(), 1);
    assert_eq!(feed.take_warnings(), vec![SyncWarning::SessionExpired]);
    assert!(feed.warnings().is_empty());
}

#[tokio::test]
async fn intents_on_unknown_entities_are_rejected() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::new());
    let feed = open_feed(test_config(), &store, &server, true);

    assert_eq!(
        feed.update(&"nope".into(), fields(json!({ "text": "x" }))).await,
        Err(SyncError::UnknownEntity("nope".into()))
    );
    assert_eq!(
        feed.delete(&"nope".into()).await,
        Err(SyncError::UnknownEntity("nope".into()))
    );
    assert!(server.requests().iter().all(|r| r == "HEALTH" || r.starts_with("GET")));
}

#[tokio::test]
async fn pending_entity_edits_go_through_the_queue_even_online() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::with_entities(vec![post("p1", "a")]));
    seed_mirror(&test_config(), &store, vec![post("p1", "a")]);
    let feed = open_feed(test_config(), &store, &server, false);
    feed.update(&"p1".into(), fields(json!({ "text": "offline" }))).await.unwrap();

    feed.monitor().set_link_up(true);
    feed.monitor().record_probe(true);
    feed.update(&"p1".into(), fields(json!({ "text": "online" }))).await.unwrap();

    // No adelanta a la operación que ya estaba en la queue
    assert!(server.mutations().is_empty());
    assert_eq!(feed.pending_count(), 1);
    assert_eq!(feed.status(), SyncStatus::Pending { count: 1 });
}

#[tokio::test]
async fn purge_discards_pending_changes() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::with_entities(vec![post("p1", "server")]));
    seed_mirror(&test_config(), &store, vec![post("p1", "server")]);
    let feed = open_feed(test_config(), &store, &server, false);
    feed.update(&"p1".into(), fields(json!({ "text": "unwanted" }))).await.unwrap();
    feed.create(fields(json!({ "text": "also unwanted" }))).await.unwrap();

    feed.monitor().set_link_up(true);
    feed.monitor().record_probe(true);
    assert_eq!(feed.purge_queue().await.unwrap(), 2);

    assert_eq!(feed.pending_count(), 0);
    assert_eq!(feed.entities().len(), 1);
    assert_eq!(feed.get(&"p1".into()).unwrap().text("text"), "server");
    assert!(server.mutations().is_empty());
}

#[tokio::test]
async fn initial_load_prefers_server_when_nothing_is_pending() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::with_entities(vec![post("p1", "fresh"), post("p2", "new")]));
    seed_mirror(&test_config(), &store, vec![post("p1", "stale")]);

    let offline = open_feed(test_config(), &store, &server, false);
    assert_eq!(offline.initial_load().await, 1);
    drop(offline);

    let feed = open_feed(test_config(), &store, &server, false);
    feed.monitor().set_link_up(true);
    assert_eq!(feed.initial_load().await, 2);
    assert_eq!(feed.connectivity(), ConnectivityState::Online);
    assert_eq!(feed.get(&"p1".into()).unwrap().text("text"), "fresh");
}

#[tokio::test]
async fn subscribers_see_connectivity_status_and_mirror_events() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::new());
    let feed = open_feed(test_config(), &store, &server, false);

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    feed.subscribe(move |event| sink.borrow_mut().push(event.clone()));

    feed.create(fields(json!({ "text": "hi" }))).await.unwrap();
    feed.monitor().set_link_up(true);

    let events = events.borrow();
    assert!(events.contains(&FeedEvent::MirrorUpdated { entities: 1 }));
    assert!(events.contains(&FeedEvent::ConnectivityChanged {
        from: ConnectivityState::NetworkDown,
        to: ConnectivityState::ServerDown
    }));
    assert!(events.iter().any(|e| matches!(e, FeedEvent::StatusChanged(SyncStatus::Offline { pending_count: 1, .. }))));
}

#[tokio::test]
async fn query_and_statistics_read_the_mirror() {
    let store = MemoryStore::new();
    let server = Rc::new(FakeServer::new());
    seed_mirror(
        &test_config(),
        &store,
        vec![
            post("p1", "banana bread recipe"),
            post("p2", "Apple pie with a lot of cinnamon on top"),
            post("p3", "cherry"),
        ],
    );
    let feed = open_feed(test_config(), &store, &server, false);

    let found = feed.query(&FeedQuery::new("text").with_search("PIE"));
    assert_eq!(found.len(), 1);

    let sorted = feed.query(&FeedQuery::new("text").with_order(SortOrder::Ascending));
    assert_eq!(sorted[0].id.as_str(), "p2");

    let stats = feed.statistics();
    assert_eq!((stats.total, stats.short, stats.medium, stats.long), (3, 2, 1, 0));
}

/// Backend cuyos PUT tardan un segundo en llegar al servidor
struct SlowUpdates(Rc<FakeServer>);

#[async_trait(?Send)]
impl EntityApi for SlowUpdates {
    async fn list(&self) -> Result<Vec<Entity>, ApiError> {
        self.0.list().await
    }

    async fn fetch(&self, id: &EntityId) -> Result<Option<Entity>, ApiError> {
        self.0.fetch(id).await
    }

    async fn create(&self, entity: &Entity) -> Result<Entity, ApiError> {
        self.0.create(entity).await
    }

    async fn update(&self, id: &EntityId, fields: &Fields) -> Result<Entity, ApiError> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.0.update(id, fields).await
    }

    async fn delete(&self, id: &EntityId) -> Result<(), ApiError> {
        self.0.delete(id).await
    }

    async fn health(&self) -> Result<(), ApiError> {
        self.0.health().await
    }
}

fn slow_feed(store: &MemoryStore, server: &Rc<FakeServer>) -> Rc<crate::viewmodels::OfflineFeed> {
    seed_mirror(&test_config(), store, vec![post("p1", "a")]);
    let api: Rc<dyn EntityApi> = Rc::new(SlowUpdates(server.clone()));
    open_feed_with_api(test_config(), store, api, true)
}

#[tokio::test(start_paused = true)]
async fn delete_waits_for_the_update_already_in_flight() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let store = MemoryStore::new();
            let server = Rc::new(FakeServer::with_entities(vec![post("p1", "a")]));
            let feed = slow_feed(&store, &server);
            feed.start();

            let p1: EntityId = "p1".into();
            let (edited, deleted) = futures::join!(
                feed.update(&p1, fields(json!({ "text": "b" }))),
                feed.delete(&p1)
            );
            edited.unwrap();
            deleted.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;

            assert_eq!(server.mutations(), vec!["PUT p1", "DELETE p1"]);
            assert!(server.entity("p1").is_none());
            assert!(feed.get(&p1).is_none());
            assert_eq!(feed.pending_count(), 0);
            feed.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn rejected_update_does_not_undo_a_later_delete() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let store = MemoryStore::new();
            let server = Rc::new(FakeServer::with_entities(vec![post("p1", "a")]));
            server.fail(
                "PUT p1",
                ApiError::Rejected {
                    status: 422,
                    message: "Text is too long".to_string(),
                },
            );
            let feed = slow_feed(&store, &server);
            feed.start();

            let p1: EntityId = "p1".into();
            let (edited, deleted) = futures::join!(
                feed.update(&p1, fields(json!({ "text": "b" }))),
                feed.delete(&p1)
            );
            assert!(matches!(edited, Err(SyncError::PermanentRemote { .. })));
            deleted.unwrap();
            // El rechazo no resucita la entidad en local
            assert!(feed.get(&p1).is_none());

            tokio::time::sleep(Duration::from_secs(2)).await;
            assert_eq!(server.mutations(), vec!["PUT p1", "DELETE p1"]);
            assert!(server.entity("p1").is_none());
            assert!(feed.get(&p1).is_none());
            assert_eq!(feed.pending_count(), 0);
            feed.shutdown();
        })
        .await;
}
