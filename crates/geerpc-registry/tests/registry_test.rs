// Registry lifecycle tests over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use geerpc_registry::{heartbeat, Registry};
use tokio::net::TcpListener;

async fn start_registry(timeout: Duration) -> (Arc<Registry>, String) {
    let registry = Arc::new(Registry::new(timeout));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(registry.clone().serve(listener));
    let url = format!("http://{}/_geerpc_/registry", addr);
    (registry, url)
}

async fn get_servers(url: &str) -> Vec<String> {
    let response = reqwest::get(url).await.unwrap();
    assert!(response.status().is_success());
    response
        .headers()
        .get("X-Geerpc-Servers")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

async fn post_server(url: &str, addr: &str) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(url)
        .header("X-Geerpc-Server", addr)
        .send()
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_post_then_get_round_trip() {
    let (_registry, url) = start_registry(Duration::from_secs(60)).await;

    assert!(post_server(&url, "tcp@127.0.0.1:9002").await.is_success());
    assert!(post_server(&url, "tcp@127.0.0.1:9001").await.is_success());

    // Sorted and comma-joined.
    assert_eq!(
        get_servers(&url).await,
        vec!["tcp@127.0.0.1:9001", "tcp@127.0.0.1:9002"]
    );
}

#[tokio::test]
async fn test_post_without_header_is_a_server_error() {
    let (_registry, url) = start_registry(Duration::from_secs(60)).await;
    let status = reqwest::Client::new().post(&url).send().await.unwrap().status();
    assert_eq!(status.as_u16(), 500);
}

#[tokio::test]
async fn test_other_methods_are_rejected() {
    let (_registry, url) = start_registry(Duration::from_secs(60)).await;
    let status = reqwest::Client::new().delete(&url).send().await.unwrap().status();
    assert_eq!(status.as_u16(), 405);
}

#[tokio::test]
async fn test_stale_server_disappears_from_get() {
    let (_registry, url) = start_registry(Duration::from_millis(400)).await;

    assert!(post_server(&url, "tcp@127.0.0.1:9001").await.is_success());
    assert_eq!(get_servers(&url).await.len(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(get_servers(&url).await.is_empty());
}

#[tokio::test]
async fn test_heartbeat_keeps_server_alive_past_the_timeout() {
    let (_registry, url) = start_registry(Duration::from_secs(1)).await;

    heartbeat(&url, "tcp@127.0.0.1:9001", Some(Duration::from_millis(250)))
        .await
        .unwrap();

    // Well past the eviction timeout, the beats have kept it registered.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(get_servers(&url).await, vec!["tcp@127.0.0.1:9001"]);
}

#[tokio::test]
async fn test_without_further_beats_the_server_is_evicted() {
    let (_registry, url) = start_registry(Duration::from_millis(500)).await;

    // One synchronous beat, then a period so long the helper never beats
    // again within the test.
    heartbeat(&url, "tcp@127.0.0.1:9001", Some(Duration::from_secs(600)))
        .await
        .unwrap();
    assert_eq!(get_servers(&url).await.len(), 1);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(get_servers(&url).await.is_empty());
}

#[tokio::test]
async fn test_heartbeat_against_dead_registry_fails_synchronously() {
    let result = heartbeat(
        "http://127.0.0.1:1/_geerpc_/registry",
        "tcp@127.0.0.1:9001",
        Some(Duration::from_secs(1)),
    )
    .await;
    assert!(result.is_err());
}
