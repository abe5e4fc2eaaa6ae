mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::{memory_notify, NOTIFY};
use conduit_node::{Error, NotifyRequest};
use futures::StreamExt;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn watch_yields_values_until_gone() {
    let (notify, _, mut accepted) = memory_notify();
    let values = tokio::spawn(notify.watch("v2/app/a/object/b").collect::<Vec<_>>());

    let mut server = accepted.recv().await.unwrap();
    let (uuid, frame) = server.request("WATCH").await;
    assert_eq!(frame["request"], json!({"url": "v2/app/a/object/b"}));

    // Updates for other requests are not ours
    server.update(Uuid::new_v4(), 200, json!({"body": "other"}));
    server.update(uuid, 200, json!({"body": "A"}));
    server.update(uuid, 200, json!({"body": "B"}));
    server.update(uuid, 410, json!({}));

    let values: Vec<Option<Value>> = values
        .await
        .unwrap()
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(values, vec![Some(json!("A")), Some(json!("B"))]);
    server.closed(uuid).await;
}

#[tokio::test]
async fn watch_maps_missing_resources_to_none() {
    let (notify, _, mut accepted) = memory_notify();
    let mut values = notify.watch("v2/app/a/object/b");
    let first = tokio::spawn(async move {
        let first = values.next().await;
        (first, values)
    });

    let mut server = accepted.recv().await.unwrap();
    let (uuid, _) = server.request("WATCH").await;
    server.update(uuid, 201, json!({"response": {"status": 404}}));

    let (first, mut values) = first.await.unwrap();
    assert_eq!(first.unwrap().unwrap(), None);

    server.update(uuid, 200, json!({"response": {"status": 403}}));
    let err = values.next().await.unwrap().unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(err.service(), Some(NOTIFY));
    assert!(values.next().await.is_none());
}

#[tokio::test]
async fn search_materializes_the_child_map() {
    let (notify, _, mut accepted) = memory_notify();
    let maps = tokio::spawn(notify.search("v1/app/a/object").take(3).collect::<Vec<_>>());

    let mut server = accepted.recv().await.unwrap();
    let (uuid, frame) = server.request("SEARCH").await;
    assert_eq!(frame["parent"], "v1/app/a/object/");

    server.update(
        uuid,
        200,
        json!({"children": {"x": {"status": 200, "body": 1}}}),
    );
    server.update(
        uuid,
        200,
        json!({"child": "y", "response": {"status": 200, "body": 2}}),
    );
    server.update(
        uuid,
        200,
        json!({"child": "x", "response": {"status": 404}}),
    );

    let maps: Vec<BTreeMap<String, Value>> = maps
        .await
        .unwrap()
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(
        maps,
        vec![
            BTreeMap::from([("x".to_string(), json!(1))]),
            BTreeMap::from([("x".to_string(), json!(1)), ("y".to_string(), json!(2))]),
            BTreeMap::from([("y".to_string(), json!(2))]),
        ]
    );
}

#[tokio::test]
async fn search_filters_are_sent() {
    let (notify, _, mut accepted) = memory_notify();
    let mut maps = notify.search_filtered("v1/app/a/object/", json!({"k": "v"}));
    let _pending = tokio::spawn(async move { maps.next().await.map(|_| ()) });

    let mut server = accepted.recv().await.unwrap();
    let (_, frame) = server.request("SEARCH").await;
    assert_eq!(frame["parent"], "v1/app/a/object/");
    assert_eq!(frame["filter"], json!({"k": "v"}));
}

#[tokio::test]
async fn error_statuses_end_the_request_with_an_error() {
    let (notify, _, mut accepted) = memory_notify();
    let request = NotifyRequest::watch("v2/secret");
    let updates = tokio::spawn(notify.request(request.clone()).collect::<Vec<_>>());

    let mut server = accepted.recv().await.unwrap();
    let (uuid, _) = server.request("WATCH").await;
    server.update(uuid, 403, json!({}));

    let updates = updates.await.unwrap();
    assert_eq!(updates.len(), 1);
    match &updates[0] {
        Err(Error::Notify {
            service,
            status,
            request: failed,
        }) => {
            assert_eq!(*service, NOTIFY);
            assert_eq!(*status, 403);
            assert_eq!(failed, &request);
        }
        other => panic!("unexpected {other:?}"),
    }
    server.closed(uuid).await;
}

#[tokio::test]
async fn dropping_a_request_sends_close() {
    let (notify, _, mut accepted) = memory_notify();
    let mut updates = notify.request(NotifyRequest::watch("v2/a"));
    let first = tokio::spawn(async move {
        let first = updates.next().await;
        drop(updates);
        first
    });

    let mut server = accepted.recv().await.unwrap();
    let (uuid, _) = server.request("WATCH").await;
    server.update(uuid, 201, json!({"response": {"status": 200, "body": 1}}));

    let first = first.await.unwrap().unwrap().unwrap();
    assert_eq!(first.uuid, uuid);
    assert_eq!(first.status, 201);
    server.closed(uuid).await;
}

#[tokio::test]
async fn requests_share_one_connection() {
    let (notify, dialer, mut accepted) = memory_notify();
    let first = tokio::spawn(notify.watch("v2/a").take(1).collect::<Vec<_>>());
    let second = tokio::spawn(notify.watch("v2/b").take(1).collect::<Vec<_>>());

    let mut server = accepted.recv().await.unwrap();
    let mut ids = BTreeMap::new();
    for _ in 0..2 {
        let (uuid, frame) = server.request("WATCH").await;
        ids.insert(frame["request"]["url"].as_str().unwrap().to_string(), uuid);
    }
    assert_ne!(ids["v2/a"], ids["v2/b"]);

    server.update(ids["v2/b"], 200, json!({"body": "b"}));
    server.update(ids["v2/a"], 200, json!({"body": "a"}));

    assert_eq!(first.await.unwrap()[0].as_ref().unwrap(), &Some(json!("a")));
    assert_eq!(second.await.unwrap()[0].as_ref().unwrap(), &Some(json!("b")));
    assert_eq!(dialer.dials(), 1);
}

#[tokio::test]
async fn requests_are_reissued_after_reconnecting() {
    let (notify, dialer, mut accepted) = memory_notify();
    let values = tokio::spawn(notify.watch("v2/a").take(2).collect::<Vec<_>>());

    let mut server = accepted.recv().await.unwrap();
    let (first_id, _) = server.request("WATCH").await;
    server.update(first_id, 200, json!({"body": 1}));

    // Lose the connection; the request comes back under a new id
    drop(server);
    let mut server = accepted.recv().await.unwrap();
    let (second_id, frame) = server.request("WATCH").await;
    assert_ne!(first_id, second_id);
    assert_eq!(frame["request"]["url"], "v2/a");
    server.update(second_id, 201, json!({"body": 2}));

    let values: Vec<Option<Value>> = values
        .await
        .unwrap()
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(values, vec![Some(json!(1)), Some(json!(2))]);
    assert_eq!(dialer.dials(), 2);
}

#[tokio::test(start_paused = true)]
async fn lagging_search_starts_over_from_a_snapshot() {
    let (notify, _, mut accepted) = memory_notify();
    let mut maps = notify.search("v1/app/a/object");
    let first = tokio::spawn(async move {
        let first = maps.next().await;
        (first, maps)
    });

    let mut server = accepted.recv().await.unwrap();
    let (uuid, _) = server.request("SEARCH").await;
    server.update(
        uuid,
        200,
        json!({"children": {"x": {"status": 200, "body": 1}}}),
    );
    let (first, mut maps) = first.await.unwrap();
    assert_eq!(
        first.unwrap().unwrap(),
        BTreeMap::from([("x".to_string(), json!(1))])
    );

    // Other requests flood the connection while this one is not read
    server.update(
        uuid,
        200,
        json!({"child": "y", "response": {"status": 200, "body": 2}}),
    );
    for _ in 0..300 {
        server.update(Uuid::new_v4(), 200, json!({"body": "other"}));
    }
    server.update(
        uuid,
        200,
        json!({"child": "z", "response": {"status": 200, "body": 3}}),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let next = tokio::spawn(async move {
        let next = maps.next().await;
        (next, maps)
    });
    server.closed(uuid).await;
    let (again, frame) = server.request("SEARCH").await;
    assert_ne!(again, uuid);
    assert_eq!(frame["parent"], "v1/app/a/object/");
    server.update(
        again,
        200,
        json!({"children": {
            "x": {"status": 200, "body": 1},
            "y": {"status": 200, "body": 2},
            "z": {"status": 200, "body": 3},
        }}),
    );

    let (next, _maps) = next.await.unwrap();
    assert_eq!(
        next.unwrap().unwrap(),
        BTreeMap::from([
            ("x".to_string(), json!(1)),
            ("y".to_string(), json!(2)),
            ("z".to_string(), json!(3)),
        ])
    );
}
