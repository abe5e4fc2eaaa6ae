mod common;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use common::{url, FakeBackend, FakeConnector, ServerEnd};
use conduit_core::services;
use conduit_fabric::{HttpResponse, Method};
use conduit_node::{ClientConfig, Grant, Identity, ServiceClient};
use conduit_shields::testing::FakeMechanism;
use conduit_shields::IdentitySource;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

fn config() -> ClientConfig {
    ClientConfig {
        directory_url: Some(url("http://directory.local/")),
        authn_url: Some(url("http://auth.local/")),
        configdb_url: Some(url("http://configdb.local/")),
        ..ClientConfig::default()
    }
}

fn client(backend: Arc<FakeBackend>) -> (ServiceClient, UnboundedReceiver<ServerEnd>) {
    let (connector, accepted) = FakeConnector::new();
    let client = ServiceClient::builder()
        .config(config())
        .mechanism(Arc::new(FakeMechanism::default()))
        .backend(backend)
        .connector(connector)
        .build()
        .unwrap();
    (client, accepted)
}

#[tokio::test]
async fn configured_urls_are_preset() {
    let backend = FakeBackend::new(|_| HttpResponse::new(500));
    let (client, _) = client(Arc::clone(&backend));

    assert_eq!(
        client.service_url(services::CONFIGDB).await.unwrap(),
        url("http://configdb.local/")
    );
    assert_eq!(
        client.service_url(services::DIRECTORY).await.unwrap(),
        url("http://directory.local/")
    );
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn directory_lists_and_registers_urls() {
    let widgets = Uuid::new_v4();
    let lookup = format!("/v1/service/{widgets}");
    let advert = format!("/v1/service/{widgets}/advertisment");
    let backend = FakeBackend::new(move |req| {
        if req.url.path() == lookup {
            HttpResponse::new(200).with_json(&json!([
                {"url": "http://a.local/"},
                {"url": "http://b.local/"},
            ]))
        } else if req.url.path() == advert {
            HttpResponse::new(204)
        } else {
            HttpResponse::new(404)
        }
    });
    let (client, _) = client(Arc::clone(&backend));
    let service = widgets.into();

    let urls = client.directory().service_urls(service).await.unwrap();
    assert_eq!(urls, vec![url("http://a.local/"), url("http://b.local/")]);

    // Discovery asks the same endpoint once, then keeps the first URL
    for _ in 0..2 {
        assert_eq!(
            client.service_url(service).await.unwrap(),
            url("http://a.local/")
        );
    }
    let lookups = backend
        .requests()
        .iter()
        .filter(|r| r.url.path() == format!("/v1/service/{widgets}"))
        .count();
    assert_eq!(lookups, 2);

    client
        .directory()
        .register_service_url(service, &url("http://c.local/"))
        .await
        .unwrap();
    let put = backend
        .requests()
        .into_iter()
        .find(|r| r.method == Method::PUT)
        .unwrap();
    assert_eq!(put.body, Some(json!({"url": "http://c.local/"})));

    let unknown = client
        .directory()
        .service_urls(Uuid::new_v4().into())
        .await
        .unwrap();
    assert!(unknown.is_empty());
}

#[tokio::test]
async fn config_entries_must_be_objects() {
    let app = Uuid::new_v4();
    let (good, bad) = (Uuid::new_v4(), Uuid::new_v4());
    let good_path = format!("/v1/app/{app}/object/{good}");
    let bad_path = format!("/v1/app/{app}/object/{bad}");
    let backend = FakeBackend::new(move |req| {
        let path = req.url.path();
        if path == good_path {
            HttpResponse::new(200).with_json(&json!({"name": "x"}))
        } else if path == bad_path {
            HttpResponse::new(200).with_json(&json!([1, 2]))
        } else {
            HttpResponse::new(404)
        }
    });
    let (client, _) = client(backend);

    let entry = client.configdb().get_config(app, good).await.unwrap();
    assert_eq!(entry.get("name"), Some(&json!("x")));

    let err = client.configdb().get_config(app, bad).await.unwrap_err();
    assert_eq!(err.service(), Some(services::CONFIGDB));
    assert_eq!(err.status(), Some(200));

    let err = client
        .configdb()
        .get_config(app, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn set_watches_are_shared_and_deduplicated() {
    let backend = FakeBackend::new(|_| HttpResponse::new(404));
    let (client, mut accepted) = client(backend);
    let app = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let mut first = client.configdb().watch_list(app);
    let seen = tokio::spawn(async move {
        let one = first.next().await.unwrap().unwrap();
        let two = first.next().await.unwrap().unwrap();
        (one, two, first)
    });

    let mut server = accepted.recv().await.unwrap();
    let (uuid, frame) = server.request("WATCH").await;
    assert_eq!(
        frame["request"]["url"],
        format!("v1/app/{app}/object/")
    );

    let set_a = json!({"response": {"status": 200, "body": [a.to_string(), "junk"]}});
    server.update(uuid, 201, set_a.clone());
    server.update(uuid, 200, set_a);
    server.update(
        uuid,
        200,
        json!({"response": {"status": 200, "body": [a.to_string(), b.to_string()]}}),
    );

    let (one, two, _first) = seen.await.unwrap();
    assert_eq!(one, BTreeSet::from([a]));
    assert_eq!(two, BTreeSet::from([a, b]));

    // A late subscriber gets the latest set without a new request
    let mut late = client.configdb().watch_list(app);
    assert_eq!(late.next().await.unwrap().unwrap(), BTreeSet::from([a, b]));
    assert!(server.from_client.try_recv().is_err());
}

#[tokio::test]
async fn acl_is_fetched_over_http() {
    let backend = FakeBackend::new(|req| match req.url.path() {
        "/authz/acl" => HttpResponse::new(200).with_json(&json!([
            {"permission": "p", "target": "t"},
            "junk",
        ])),
        _ => HttpResponse::new(404),
    });
    let (client, _) = client(Arc::clone(&backend));
    let group = Uuid::new_v4();

    let acl = client.auth().get_acl("svc@REALM", group).await.unwrap();
    assert_eq!(acl.len(), 1);
    assert_eq!(acl[0].get("target"), Some(&json!("t")));

    let request = backend
        .requests()
        .into_iter()
        .find(|r| r.url.path() == "/authz/acl")
        .unwrap();
    let query: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
    assert_eq!(
        query,
        vec![
            ("principal".to_string(), "svc@REALM".to_string()),
            ("permission".to_string(), group.to_string()),
        ]
    );
}

#[tokio::test]
async fn acl_is_fetched_through_the_shared_watch() {
    let backend = FakeBackend::new(|_| HttpResponse::new(404));
    let (client, mut accepted) = client(backend);
    let grant = Grant {
        permission: Uuid::new_v4(),
        target: Uuid::new_v4(),
    };

    let auth = client.auth().clone();
    let fetched = tokio::spawn(async move { auth.fetch_acl("svc/host@REALM").await });

    let mut server = accepted.recv().await.unwrap();
    let (uuid, frame) = server.request("WATCH").await;
    assert_eq!(
        frame["request"]["url"],
        "v2/acl/kerberos/svc%2Fhost%40REALM"
    );
    server.update(
        uuid,
        201,
        json!({"response": {"status": 200, "body": [grant]}}),
    );

    let acl = fetched.await.unwrap().unwrap();
    assert_eq!(acl, Some(BTreeSet::from([grant])));

    // Still cached after the caller went away
    let again = client.auth().fetch_acl("svc/host@REALM").await.unwrap();
    assert_eq!(again, Some(BTreeSet::from([grant])));
}

#[test]
fn config_reads_the_environment() {
    let env = |name: &str| match name {
        "DIRECTORY_URL" => Some("http://directory.local/".to_string()),
        "SERVICE_PRINCIPAL" => Some("svc@REALM".to_string()),
        "CLIENT_KEYTAB" => Some("/etc/svc.keytab".to_string()),
        "HTTP_TIMEOUT" => Some("5".to_string()),
        "SERVICE_USERNAME" => Some(String::new()),
        _ => None,
    };
    let config = ClientConfig::from_lookup(env).unwrap();

    assert_eq!(config.directory_url, Some(url("http://directory.local/")));
    assert_eq!(config.username, None);
    assert_eq!(config.timeout().as_secs(), 5);
    assert_eq!(
        config.identity(),
        Identity::Negotiate(IdentitySource::Keytab {
            principal: "svc@REALM".to_string(),
            keytab: PathBuf::from("/etc/svc.keytab"),
        })
    );

    let err = ClientConfig::from_lookup(|name: &str| {
        (name == "DIRECTORY_URL").then(|| "not a url".to_string())
    })
    .unwrap_err();
    assert!(err.to_string().contains("DIRECTORY_URL"));
}

#[test]
fn config_deserializes_with_defaults() {
    let config: ClientConfig = serde_json::from_value(json!({
        "username": "svc",
        "password": "secret",
    }))
    .unwrap();

    assert_eq!(config.timeout(), ClientConfig::DEFAULT_TIMEOUT);
    assert_eq!(
        config.identity(),
        Identity::Basic {
            username: "svc".to_string(),
            password: "secret".to_string(),
        }
    );
    assert!(!format!("{config:?}").contains("secret"));
    assert_eq!(
        ClientConfig::default().identity(),
        Identity::Negotiate(IdentitySource::Ccache)
    );
}

#[cfg(not(feature = "gssapi"))]
#[test]
fn ticket_cache_needs_a_mechanism() {
    let err = ServiceClient::builder()
        .config(config())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, conduit_node::Error::Config(_)));
}

#[tokio::test]
async fn basic_identity_needs_no_mechanism() {
    let backend = FakeBackend::new(|_| HttpResponse::new(200).with_json(&json!(true)));
    let client = ServiceClient::builder()
        .config(ClientConfig {
            username: Some("svc".to_string()),
            password: Some("secret".to_string()),
            ..config()
        })
        .backend(backend)
        .build()
        .unwrap();

    assert!(client.http().token(&url("http://directory.local/")).await.is_ok());
}
