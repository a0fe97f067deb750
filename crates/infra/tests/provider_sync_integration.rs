//! Provider catalog sync against a mocked provider API.
//!
//! Covers pagination, the dry-run preview annotation, sticky-field import
//! semantics, and credential-push failure mapping.

use std::sync::Arc;
use std::time::Duration;

use portbroker_core::InventoryService;
use portbroker_domain::{BrokerError, PortFilter, PortTier, ProxyCredential, UpstreamAddr};
use portbroker_infra::provider::{ImportSpec, ProviderClient, ProviderClientConfig};
use portbroker_infra::{DbManager, ProviderSyncService, SqlitePortRepository};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct SyncHarness {
    #[allow(dead_code)]
    temp_dir: TempDir,
    inventory: Arc<InventoryService>,
    sync: ProviderSyncService,
}

fn client_for(server: &MockServer) -> ProviderClient {
    ProviderClient::new(ProviderClientConfig {
        base_url: server.uri(),
        api_key: "test-key".to_string(),
        timeout: Duration::from_secs(5),
        page_size: 2,
    })
    .expect("client should build")
}

fn harness(server: &MockServer) -> SyncHarness {
    let temp_dir = TempDir::new().expect("tempdir created");
    let db_path = temp_dir.path().join("sync.db");

    let manager = Arc::new(DbManager::new(&db_path, 4).expect("db manager created"));
    manager.run_migrations().expect("migrations run");

    let inventory = Arc::new(InventoryService::new(Arc::new(SqlitePortRepository::new(manager))));
    let sync = ProviderSyncService::new(Arc::new(client_for(server)), inventory.clone());

    SyncHarness { temp_dir, inventory, sync }
}

fn catalog_entry(id: &str, host: &str, region: &str) -> serde_json::Value {
    json!({
        "id": id,
        "host": host,
        "port": 8000,
        "username": "up-user",
        "password": "up-pass",
        "region": region,
    })
}

async fn mount_two_page_catalog(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/proxies"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                catalog_entry("prov-a", "10.0.0.1", "eu-west"),
                catalog_entry("prov-b", "10.0.0.2", "eu-west"),
            ],
            "total": 3,
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/proxies"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [catalog_entry("prov-c", "10.0.0.3", "us-east")],
            "total": 3,
        })))
        .mount(server)
        .await;
}

fn import_spec() -> ImportSpec {
    ImportSpec {
        tier: PortTier::SharedStandard,
        bind_host: "relay.example.net".to_string(),
        first_bind_port: 3128,
    }
}

#[tokio::test]
async fn preview_walks_pages_and_flags_imported_entries() {
    let server = MockServer::start().await;
    mount_two_page_catalog(&server).await;
    let h = harness(&server);

    h.sync
        .import(&["prov-b".to_string()], &import_spec())
        .await
        .expect("initial import should succeed");

    let preview = h.sync.preview().await.expect("preview should succeed");
    assert_eq!(preview.len(), 3);

    let flagged: Vec<_> =
        preview.iter().filter(|p| p.already_imported).map(|p| p.entry.id.as_str()).collect();
    assert_eq!(flagged, vec!["prov-b"]);
}

#[tokio::test]
async fn import_assigns_distinct_bind_ports_and_keeps_them_sticky() {
    let server = MockServer::start().await;
    mount_two_page_catalog(&server).await;
    let h = harness(&server);

    let report = h
        .sync
        .import(&["prov-a".to_string(), "prov-c".to_string()], &import_spec())
        .await
        .expect("import should succeed");
    assert_eq!(report.imported, 2);
    assert_eq!(report.refreshed, 0);

    let ports = h.inventory.list(&PortFilter::default()).await.expect("list");
    let mut bind_ports: Vec<u16> = ports.iter().map(|p| p.public_port).collect();
    bind_ports.sort_unstable();
    assert_eq!(bind_ports, vec![3128, 3129]);
    assert!(ports.iter().all(|p| p.tier == PortTier::SharedStandard));
    assert!(ports.iter().all(|p| p.capacity == PortTier::SharedStandard.capacity()));

    // A second import of the same entries refreshes connectivity without
    // touching the sticky routing assignment.
    let second = h
        .sync
        .import(&["prov-a".to_string(), "prov-c".to_string()], &import_spec())
        .await
        .expect("re-import should succeed");
    assert_eq!(second.imported, 0);
    assert_eq!(second.refreshed, 2);

    let ports = h.inventory.list(&PortFilter::default()).await.expect("list");
    let mut bind_ports: Vec<u16> = ports.iter().map(|p| p.public_port).collect();
    bind_ports.sort_unstable();
    assert_eq!(bind_ports, vec![3128, 3129]);
}

#[tokio::test]
async fn import_reports_entries_missing_from_catalog() {
    let server = MockServer::start().await;
    mount_two_page_catalog(&server).await;
    let h = harness(&server);

    let report = h
        .sync
        .import(&["prov-a".to_string(), "prov-gone".to_string()], &import_spec())
        .await
        .expect("import should succeed");
    assert_eq!(report.imported, 1);
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn credential_push_maps_upstream_failures() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/proxies/credentials"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let upstream = UpstreamAddr {
        host: "10.0.0.1".to_string(),
        port: 8000,
        username: "up-user".to_string(),
        password: "up-pass".to_string(),
    };
    let credential =
        ProxyCredential { username: "ufresh".to_string(), password: "secret".to_string() };

    let err = client
        .update_credential(&upstream, &credential)
        .await
        .expect_err("502 should surface as upstream sync failure");
    assert!(matches!(err, BrokerError::UpstreamSync(_)));
}

#[tokio::test]
async fn credential_push_succeeds_against_healthy_provider() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/proxies/credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"updated": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let upstream = UpstreamAddr {
        host: "10.0.0.1".to_string(),
        port: 8000,
        username: "up-user".to_string(),
        password: "up-pass".to_string(),
    };
    let credential =
        ProxyCredential { username: "ufresh".to_string(), password: "secret".to_string() };

    client.update_credential(&upstream, &credential).await.expect("push should succeed");
}
