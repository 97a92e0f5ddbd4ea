// End-to-end tests: a real TCP server with registered services, exercised
// through the geerpc client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use geerpc_client::{dial, dial_http, Client};
use geerpc_common::rate_limit::TokenBucketConfig;
use geerpc_common::{CodecType, Options, RpcError};
use geerpc_server::{Server, Service};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn arith_service() -> Service {
    Service::new("Arith")
        .method("Add", |(a, b): (i32, i32)| async move {
            Ok::<i32, String>(a + b)
        })
        .method("Echo", |n: i32| async move { Ok::<i32, String>(n) })
        .method("Boom", |_: i32| async move { Err::<i32, String>("boom".to_string()) })
        .method("Sleep", |ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<u64, String>(ms)
        })
}

async fn start_server(server: Arc<Server>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.accept(listener));
    addr
}

async fn start_default_server() -> (Arc<Server>, String) {
    let server = Arc::new(Server::new());
    server.register(arith_service()).unwrap();
    let addr = start_server(server.clone()).await;
    (server, addr)
}

#[tokio::test]
async fn test_echo() {
    let (_server, addr) = start_default_server().await;
    let client = dial(&addr, Options::default()).await.unwrap();

    let reply: i32 = client.call("Arith.Echo", &7i32).await.unwrap();
    assert_eq!(reply, 7);

    let sum: i32 = client.call("Arith.Add", &(20i32, 22i32)).await.unwrap();
    assert_eq!(sum, 42);
}

#[tokio::test]
async fn test_method_error_reaches_caller() {
    let (_server, addr) = start_default_server().await;
    let client = dial(&addr, Options::default()).await.unwrap();

    let result: Result<i32, _> = client.call("Arith.Boom", &1i32).await;
    match result {
        Err(RpcError::Server(message)) => assert_eq!(message, "boom"),
        other => panic!("expected server error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_method_leaves_connection_usable() {
    let (_server, addr) = start_default_server().await;
    let client = dial(&addr, Options::default()).await.unwrap();

    let result: Result<i32, _> = client.call("Arith.Nope", &1i32).await;
    let message = result.unwrap_err().to_string();
    assert!(message.contains("can't find method Nope"), "got: {}", message);

    // The server consumed the rejected request's body, so the stream is
    // still aligned and the next call goes through.
    let reply: i32 = client.call("Arith.Echo", &9i32).await.unwrap();
    assert_eq!(reply, 9);
}

#[tokio::test]
async fn test_unknown_service_and_ill_formed_names() {
    let (_server, addr) = start_default_server().await;
    let client = dial(&addr, Options::default()).await.unwrap();

    let result: Result<i32, _> = client.call("Ghost.Echo", &1i32).await;
    assert!(result.unwrap_err().to_string().contains("can't find service Ghost"));

    let result: Result<i32, _> = client.call("NoDot", &1i32).await;
    assert!(result.unwrap_err().to_string().contains("ill-formed"));
}

#[tokio::test]
async fn test_handle_timeout_expires_slow_method() {
    let (_server, addr) = start_default_server().await;
    let opt = Options::default().with_handle_timeout(Duration::from_millis(100));
    let client = dial(&addr, opt).await.unwrap();

    let started = Instant::now();
    let result: Result<u64, _> = client.call("Arith.Sleep", &1000u64).await;
    let elapsed = started.elapsed();

    let message = result.unwrap_err().to_string();
    assert!(message.contains("timeout"), "got: {}", message);
    assert!(elapsed < Duration::from_millis(800), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_responses_arrive_out_of_request_order() {
    let (_server, addr) = start_default_server().await;
    let client = dial(&addr, Options::default()).await.unwrap();

    let slow = client.go::<u64, u64>("Arith.Sleep", &200u64).await.unwrap();
    let fast = client.go::<i32, i32>("Arith.Echo", &5i32).await.unwrap();
    assert!(fast.seq() > slow.seq());

    // The fast call completes while the slow one is still being handled.
    let started = Instant::now();
    assert_eq!(fast.await.unwrap(), 5);
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(slow.await.unwrap(), 200);
}

#[tokio::test]
async fn test_concurrent_calls_correlate_by_seq() {
    let server = Arc::new(Server::with_admission(TokenBucketConfig {
        capacity: 1000,
        refill_amount: 1000,
        refill_interval: Duration::from_secs(1),
    }));
    server.register(arith_service()).unwrap();
    let addr = start_server(server).await;

    let client = Arc::new(dial(&addr, Options::default()).await.unwrap());
    let mut handles = Vec::new();
    for n in 0..32i32 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let reply: i32 = client.call("Arith.Echo", &n).await.unwrap();
            assert_eq!(reply, n);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_rate_limit_rejects_then_recovers() {
    let server = Arc::new(Server::with_admission(TokenBucketConfig {
        capacity: 2,
        refill_amount: 2,
        refill_interval: Duration::from_millis(150),
    }));
    server.register(arith_service()).unwrap();
    let addr = start_server(server).await;
    let client = dial(&addr, Options::default()).await.unwrap();

    let a: i32 = client.call("Arith.Echo", &1i32).await.unwrap();
    let b: i32 = client.call("Arith.Echo", &2i32).await.unwrap();
    assert_eq!((a, b), (1, 2));

    let rejected: Result<i32, _> = client.call("Arith.Echo", &3i32).await;
    let message = rejected.unwrap_err().to_string();
    assert!(message.contains("rate limit exceeded"), "got: {}", message);

    // The bucket refills and the same connection keeps working.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let again: i32 = client.call("Arith.Echo", &4i32).await.unwrap();
    assert_eq!(again, 4);
}

#[tokio::test]
async fn test_postcard_codec_end_to_end() {
    let (_server, addr) = start_default_server().await;
    let opt = Options::default().with_codec(CodecType::Postcard);
    let client = dial(&addr, opt).await.unwrap();

    let sum: i32 = client.call("Arith.Add", &(3i32, 4i32)).await.unwrap();
    assert_eq!(sum, 7);
}

#[tokio::test]
async fn test_num_calls_visible_through_server() {
    let (server, addr) = start_default_server().await;
    let client = dial(&addr, Options::default()).await.unwrap();

    let _: i32 = client.call("Arith.Echo", &1i32).await.unwrap();
    let _: i32 = client.call("Arith.Echo", &2i32).await.unwrap();
    let _: Result<i32, _> = client.call("Arith.Boom", &1i32).await;

    let (_, echo) = server.find_service("Arith.Echo").unwrap();
    assert_eq!(echo.num_calls(), 2);
    let (_, boom) = server.find_service("Arith.Boom").unwrap();
    assert_eq!(boom.num_calls(), 0);
}

#[tokio::test]
async fn test_http_connect_upgrade() {
    let server = Arc::new(Server::new());
    server.register(arith_service()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.serve_http(listener));

    let client: Client = dial_http(&addr, Options::default()).await.unwrap();
    let reply: i32 = client.call("Arith.Echo", &11i32).await.unwrap();
    assert_eq!(reply, 11);
}

#[tokio::test]
async fn test_http_endpoint_rejects_non_connect() {
    let server = Arc::new(Server::new());
    server.register(arith_service()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve_http(listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /_geerpc_ HTTP/1.0\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.0 405"), "got: {}", response);
    assert!(response.contains("405 must CONNECT"), "got: {}", response);
}

#[tokio::test]
async fn test_bad_magic_closes_connection() {
    let (_server, addr) = start_default_server().await;

    // Speak the framing but with a corrupted magic number; the server must
    // hang up without answering.
    let mut stream = TcpStream::connect(&addr).await.unwrap();
    let options = serde_json::json!({
        "MagicNumber": 0xbad,
        "CodecType": "application/json",
        "ConnectTimeout": 0,
        "HandleTimeout": 0,
    });
    let payload = serde_json::to_vec(&options).unwrap();
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(&payload).await.unwrap();

    let mut buf = Vec::new();
    let n = stream.read_to_end(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}
