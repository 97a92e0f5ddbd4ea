//! Connection serving: handshake, request loop, admission, worker fan-out.
//!
//! Each accepted connection is driven by a single reader task. The reader
//! validates the handshake, then loops: admit the request through the
//! connection's token bucket, resolve the service method, decode the
//! argument body, and hand the invocation to a spawned worker. Workers run
//! concurrently, so responses may leave in any order; the per-connection
//! write mutex keeps each `(header, body)` pair atomic on the wire.
//!
//! Failure policy per request: dispatch errors, invocation errors, handle
//! timeouts and admission rejections are reported on the response header and
//! the connection continues. Framing errors (a truncated frame, an
//! undecodable header or argument body) terminate the connection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use geerpc_common::codec::{recv_options, CodecReader, CodecWriter, FrameReader, FrameWriter};
use geerpc_common::rate_limit::{TokenBucket, TokenBucketConfig};
use geerpc_common::{CodecType, Header, Options, Result, RpcError};

use crate::service::{ArgvBox, MethodType, Service};

type ConnWriter = Arc<Mutex<CodecWriter<Box<dyn AsyncWrite + Send + Unpin>>>>;

/// A GeeRPC server: an append-only map of registered services plus the
/// admission parameters applied to every connection.
///
/// The server itself is cheap shared state; wrap it in an [`Arc`] and hand
/// clones to [`accept`](Server::accept), [`serve_conn`](Server::serve_conn)
/// or [`serve_http`](Server::serve_http).
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
    admission: TokenBucketConfig,
}

impl Server {
    pub fn new() -> Self {
        Self::with_admission(TokenBucketConfig::default())
    }

    /// Creates a server with custom per-connection admission parameters.
    pub fn with_admission(admission: TokenBucketConfig) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            admission,
        }
    }

    /// Registers a service. Services are never removed; re-registering a
    /// name is an error.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        if services.contains_key(service.name()) {
            return Err(RpcError::ServiceAlreadyDefined(service.name().to_string()));
        }
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Resolves a dotted `Service.Method` name. The split is at the last
    /// dot, so service names may themselves be dotted paths.
    pub fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, Arc<MethodType>)> {
        let dot = service_method
            .rfind('.')
            .ok_or_else(|| RpcError::IllFormedServiceMethod(service_method.to_string()))?;
        let (service_name, method_name) = (&service_method[..dot], &service_method[dot + 1..]);

        let service = {
            let services = self.services.read().unwrap();
            services
                .get(service_name)
                .cloned()
                .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?
        };
        let mtype = service
            .get(method_name)
            .ok_or_else(|| RpcError::MethodNotFound(method_name.to_string()))?;
        Ok((service, mtype))
    }

    /// Accepts connections in a loop, spawning [`serve_conn`](Self::serve_conn)
    /// for each.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "rpc server: connection established");
            tokio::spawn(self.clone().serve_conn(stream));
        }
    }

    /// Serves one connected stream until the peer hangs up, then waits for
    /// in-flight workers before releasing the stream.
    pub async fn serve_conn<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut frames = FrameReader::new(read_half);

        let opt = match recv_options(&mut frames).await {
            Ok(opt) => opt,
            Err(e) => {
                warn!(error = %e, "rpc server: options error");
                return;
            }
        };

        let reader = CodecReader::new(frames, opt.codec_type);
        let writer: ConnWriter = Arc::new(Mutex::new(CodecWriter::new(
            FrameWriter::new(Box::new(write_half) as Box<dyn AsyncWrite + Send + Unpin>),
            opt.codec_type,
        )));
        self.serve_codec(reader, writer, opt).await;
    }

    async fn serve_codec<R>(
        self: Arc<Self>,
        mut reader: CodecReader<R>,
        writer: ConnWriter,
        opt: Options,
    ) where
        R: AsyncRead + Unpin,
    {
        let codec = opt.codec_type;
        let placeholder = codec.encode(&()).unwrap_or_default();
        let mut bucket = TokenBucket::new(self.admission.clone());
        let mut workers = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "rpc server: read header error");
                    break;
                }
            };

            // Admission runs after the header so the body frame can be
            // consumed; rejecting without consuming it would desynchronize
            // the stream.
            if !bucket.allow() {
                warn!(seq = header.seq, "rpc server: rate limit exceeded");
                if reader.discard_body().await.is_err() {
                    break;
                }
                let rejection = Header {
                    service_method: String::new(),
                    seq: header.seq,
                    error: RpcError::RateLimited.to_string(),
                };
                send_response(&writer, &rejection, &placeholder).await;
                continue;
            }

            let mtype = match self.find_service(&header.service_method) {
                Ok((_, mtype)) => mtype,
                Err(e) => {
                    debug!(service_method = %header.service_method, error = %e, "rpc server: dispatch error");
                    if reader.discard_body().await.is_err() {
                        break;
                    }
                    let mut rejected = header;
                    rejected.error = e.to_string();
                    send_response(&writer, &rejected, &placeholder).await;
                    continue;
                }
            };

            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "rpc server: read body error");
                    break;
                }
            };
            let argv = match mtype.new_argv(codec, &body) {
                Ok(argv) => argv,
                Err(e) => {
                    // An argument that fails to decode means client and
                    // server disagree about the method's types; nothing sent
                    // after it can be trusted.
                    warn!(service_method = %header.service_method, error = %e, "rpc server: read body err");
                    break;
                }
            };

            let writer = writer.clone();
            let placeholder = placeholder.clone();
            let handle_timeout = opt.handle_timeout;
            workers.spawn(handle_request(
                writer,
                codec,
                header,
                mtype,
                argv,
                placeholder,
                handle_timeout,
            ));
        }

        while workers.join_next().await.is_some() {}
        let _ = writer.lock().await.close().await;
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one invocation and writes its response. With a handle timeout the
/// invocation races a timer; the timer winning abandons the invocation, and
/// only the race winner writes.
async fn handle_request(
    writer: ConnWriter,
    codec: CodecType,
    mut header: Header,
    mtype: Arc<MethodType>,
    argv: ArgvBox,
    placeholder: Vec<u8>,
    handle_timeout: Duration,
) {
    let invocation = mtype.call(codec, argv);
    let outcome = if handle_timeout.is_zero() {
        Some(invocation.await)
    } else {
        tokio::select! {
            result = invocation => Some(result),
            _ = tokio::time::sleep(handle_timeout) => None,
        }
    };

    match outcome {
        Some(Ok(reply)) => send_response(&writer, &header, &reply).await,
        Some(Err(message)) => {
            header.error = message;
            send_response(&writer, &header, &placeholder).await;
        }
        None => {
            header.error = RpcError::HandleTimeout(handle_timeout).to_string();
            send_response(&writer, &header, &placeholder).await;
        }
    }
}

async fn send_response(writer: &ConnWriter, header: &Header, body: &[u8]) {
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write_raw(header, body).await {
        error!(error = %e, "rpc server: write response error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arith() -> Service {
        Service::new("Arith").method("Add", |(a, b): (i32, i32)| async move {
            Ok::<i32, String>(a + b)
        })
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let server = Server::new();
        server.register(arith()).unwrap();
        match server.register(arith()) {
            Err(RpcError::ServiceAlreadyDefined(name)) => assert_eq!(name, "Arith"),
            other => panic!("expected ServiceAlreadyDefined, got {:?}", other),
        }
    }

    #[test]
    fn test_find_service_resolves() {
        let server = Server::new();
        server.register(arith()).unwrap();
        let (service, mtype) = server.find_service("Arith.Add").unwrap();
        assert_eq!(service.name(), "Arith");
        assert_eq!(mtype.name(), "Add");
    }

    #[test]
    fn test_find_service_errors() {
        let server = Server::new();
        server.register(arith()).unwrap();

        assert!(matches!(
            server.find_service("NoDot"),
            Err(RpcError::IllFormedServiceMethod(_))
        ));
        assert!(matches!(
            server.find_service("Ghost.Add"),
            Err(RpcError::ServiceNotFound(_))
        ));
        assert!(matches!(
            server.find_service("Arith.Nope"),
            Err(RpcError::MethodNotFound(_))
        ));
    }

    #[test]
    fn test_find_service_splits_at_last_dot() {
        let server = Server::new();
        server
            .register(Service::new("pkg.Arith").method("Add", |n: i32| async move {
                Ok::<i32, String>(n)
            }))
            .unwrap();
        let (service, mtype) = server.find_service("pkg.Arith.Add").unwrap();
        assert_eq!(service.name(), "pkg.Arith");
        assert_eq!(mtype.name(), "Add");
    }
}
