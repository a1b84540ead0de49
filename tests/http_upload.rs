mod common;

use common::http::spawn_server;
use ova_pusher::PusherError;
use ova_pusher::config::{AuthConfig, EndpointConfig};
use ova_pusher::hypervisor::{DatastoreClient, HypervisorClient};
use ova_pusher::upload::{ChunkReader, ChunkTransport, HttpChunkTransport, build_http_client};
use std::time::Duration;
use url::Url;

fn endpoint(address: &str) -> EndpointConfig {
    EndpointConfig {
        host: address.to_string(),
        datastore: "datastore1".to_string(),
        skip_tls: true,
    }
}

fn auth() -> AuthConfig {
    AuthConfig {
        username: "root".to_string(),
        password: Some("secret".to_string()),
    }
}

fn body(bytes: &'static [u8]) -> ChunkReader {
    Box::new(bytes)
}

#[tokio::test]
async fn test_chunk_put_is_accepted() {
    let (address, log) = spawn_server(|_, _| 201).await;
    let client = build_http_client(&endpoint(&address), Duration::from_secs(10)).unwrap();
    let transport = HttpChunkTransport::new(client, auth(), Duration::from_secs(10));

    let url = Url::parse(&format!("{}/folder/web01/disk.vmdk?dsName=datastore1", address)).unwrap();
    transport.put_chunk(&url, body(b"0123456789"), 10).await.unwrap();

    let requests = log.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].target, "/folder/web01/disk.vmdk?dsName=datastore1");
    assert!(requests[0].authorized);
    assert_eq!(requests[0].body, b"0123456789");
}

#[tokio::test]
async fn test_chunk_put_reports_status_in_error() {
    let (address, _log) = spawn_server(|_, _| 503).await;
    let client = build_http_client(&endpoint(&address), Duration::from_secs(10)).unwrap();
    let transport = HttpChunkTransport::new(client, auth(), Duration::from_secs(10));

    let url = Url::parse(&format!("{}/folder/web01/disk.vmdk", address)).unwrap();
    let err = transport.put_chunk(&url, body(b"abc"), 3).await.unwrap_err();

    assert!(matches!(err, PusherError::Upload(_)));
    let message = err.to_string();
    assert!(message.contains("503"), "{}", message);
    assert!(message.contains("datastore busy"), "{}", message);
}

#[tokio::test]
async fn test_datastore_client_flow() {
    let (address, log) = spawn_server(|method, target| match (method, target) {
        ("GET", t) if t.contains("dsName=missing") => 404,
        ("GET", _) => 200,
        ("PUT", _) => 201,
        _ => 400,
    })
    .await;

    let endpoint = endpoint(&address);
    let client = build_http_client(&endpoint, Duration::from_secs(10)).unwrap();
    let datastore = DatastoreClient::new(client, &endpoint, auth()).unwrap();

    datastore.connect().await.unwrap();
    let destination = datastore.lookup_destination("datastore1").await.unwrap();
    assert_eq!(destination.datastore, "datastore1");
    assert!(datastore.lookup_destination("missing").await.is_err());

    let descriptor = "<Envelope><rasd:Connection>nat</rasd:Connection></Envelope>";
    datastore
        .create_item_from_descriptor(descriptor, "web01", &destination, "VM Network")
        .await
        .unwrap();

    let requests = log.lock().unwrap().clone();
    let put = requests.iter().find(|r| r.method == "PUT").unwrap();
    assert!(put.target.starts_with("/folder/web01/web01.ovf?"));
    assert_eq!(
        String::from_utf8(put.body.clone()).unwrap(),
        "<Envelope><rasd:Connection>VM Network</rasd:Connection></Envelope>"
    );
}
