//! Single-connection call multiplexer.
//!
//! A [`Client`] owns one connection. Callers issue requests concurrently;
//! each is assigned the next sequence number, parked in the pending table,
//! and written to the wire under the send mutex. A background receive task
//! reads response headers, looks up the matching pending call by sequence
//! number, and completes it through a oneshot channel, so completions are
//! delivered exactly once, in whatever order the server answers.
//!
//! Cancellation is by drop: a [`PendingCall`] that is dropped before it
//! resolves removes its own pending entry, and the response, if it arrives
//! later, is read and discarded. Wrapping a call in `tokio::time::timeout`
//! therefore composes correctly with the pending table.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use geerpc_common::codec::{send_options, CodecReader, CodecWriter, FrameReader, FrameWriter};
use geerpc_common::{CodecType, Header, Options, Result, RpcError};

type CallResult = std::result::Result<Vec<u8>, RpcError>;
type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct State {
    seq: u64,
    pending: HashMap<u64, oneshot::Sender<CallResult>>,
    closing: bool,
    shutdown: bool,
}

struct Shared {
    codec: CodecType,
    writer: Mutex<CodecWriter<BoxWriter>>,
    state: StdMutex<State>,
}

/// A GeeRPC client over one connection.
///
/// Safe to share across tasks; any number of calls may be in flight at once.
/// `closing` (local [`close`](Client::close)) and `shutdown` (peer hung up)
/// both make further calls fail with [`RpcError::Shutdown`].
pub struct Client {
    shared: Arc<Shared>,
    receiver: JoinHandle<()>,
}

impl Client {
    /// Sends the handshake over a connected stream and starts the receive
    /// task.
    pub async fn new<S>(stream: S, opt: Options) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut frames = FrameWriter::new(Box::new(write_half) as BoxWriter);
        send_options(&mut frames, &opt).await?;

        let reader = CodecReader::new(
            FrameReader::new(Box::new(read_half) as BoxReader),
            opt.codec_type,
        );
        let shared = Arc::new(Shared {
            codec: opt.codec_type,
            writer: Mutex::new(CodecWriter::new(frames, opt.codec_type)),
            state: StdMutex::new(State {
                seq: 0,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        });

        let receiver = tokio::spawn(receive_loop(shared.clone(), reader));
        Ok(Self { shared, receiver })
    }

    /// Issues an asynchronous call; the returned [`PendingCall`] resolves to
    /// the typed reply.
    pub async fn go<A, R>(&self, service_method: &str, args: &A) -> Result<PendingCall<R>>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let payload = self.shared.codec.encode(args)?;
        let raw = self.go_raw(service_method, payload).await?;
        Ok(PendingCall {
            raw,
            codec: self.shared.codec,
            _reply: PhantomData,
        })
    }

    /// Issues a call and waits for its reply.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.go(service_method, args).await?.await
    }

    /// Issues a call bounded by a deadline. On expiry the pending entry is
    /// removed and a late response is silently dropped.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        match tokio::time::timeout(timeout, self.call(service_method, args)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::CallTimeout(timeout)),
        }
    }

    /// Issues a call with a pre-encoded argument payload, returning the raw
    /// reply payload. The load balancer uses this to encode fan-out
    /// arguments once.
    pub async fn call_raw(&self, service_method: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.go_raw(service_method, payload).await?.await
    }

    async fn go_raw(&self, service_method: &str, payload: Vec<u8>) -> Result<RawCall> {
        let (seq, rx) = self.register_call()?;
        let header = Header {
            service_method: service_method.to_string(),
            seq,
            error: String::new(),
        };

        let mut writer = self.shared.writer.lock().await;
        if let Err(e) = writer.write_raw(&header, &payload).await {
            drop(writer);
            self.shared.state.lock().unwrap().pending.remove(&seq);
            return Err(e);
        }

        Ok(RawCall {
            shared: self.shared.clone(),
            seq,
            rx,
            completed: false,
        })
    }

    fn register_call(&self) -> Result<(u64, oneshot::Receiver<CallResult>)> {
        let mut state = self.shared.state.lock().unwrap();
        if state.closing || state.shutdown {
            return Err(RpcError::Shutdown);
        }
        state.seq += 1;
        let seq = state.seq;
        let (tx, rx) = oneshot::channel();
        state.pending.insert(seq, tx);
        Ok((seq, rx))
    }

    /// True while neither side has terminated the connection.
    pub fn is_available(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        !state.closing && !state.shutdown
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.state.lock().unwrap().pending.len()
    }

    /// Closes the connection. A second close returns [`RpcError::Shutdown`].
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        self.shared.writer.lock().await.close().await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // The receive task would otherwise keep the connection half-open
        // until the peer hangs up.
        self.receiver.abort();
    }
}

/// An in-flight call awaiting its raw reply payload. Removes its pending
/// entry when dropped unresolved.
struct RawCall {
    shared: Arc<Shared>,
    seq: u64,
    rx: oneshot::Receiver<CallResult>,
    completed: bool,
}

impl Future for RawCall {
    type Output = Result<Vec<u8>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.completed = true;
                Poll::Ready(match result {
                    Ok(Ok(payload)) => Ok(payload),
                    Ok(Err(e)) => Err(e),
                    // Sender dropped without completing: the receive task is
                    // gone and the connection with it.
                    Err(_) => Err(RpcError::Shutdown),
                })
            }
        }
    }
}

impl Drop for RawCall {
    fn drop(&mut self) {
        if !self.completed {
            if let Ok(mut state) = self.shared.state.lock() {
                state.pending.remove(&self.seq);
            }
        }
    }
}

/// A typed in-flight call; resolves to the decoded reply.
pub struct PendingCall<R> {
    raw: RawCall,
    codec: CodecType,
    _reply: PhantomData<fn() -> R>,
}

impl<R> PendingCall<R> {
    /// Sequence number this call was issued under.
    pub fn seq(&self) -> u64 {
        self.raw.seq
    }
}

impl<R: DeserializeOwned> Future for PendingCall<R> {
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.raw).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(payload)) => Poll::Ready(this.codec.decode(&payload)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
        }
    }
}

/// Reads responses and completes pending calls until the connection dies,
/// then fails whatever is still pending.
async fn receive_loop(shared: Arc<Shared>, mut reader: CodecReader<BoxReader>) {
    let terminal: Option<RpcError> = loop {
        let header = match reader.read_header().await {
            Ok(Some(header)) => header,
            Ok(None) => break None,
            Err(e) => break Some(e),
        };

        let pending = shared.state.lock().unwrap().pending.remove(&header.seq);
        let Some(tx) = pending else {
            // Cancelled or unknown seq; the body frame still has to go.
            match reader.discard_body().await {
                Ok(()) => continue,
                Err(e) => break Some(e),
            }
        };

        if !header.error.is_empty() {
            let disposed = reader.discard_body().await;
            let _ = tx.send(Err(RpcError::Server(header.error)));
            match disposed {
                Ok(()) => continue,
                Err(e) => break Some(e),
            }
        }

        match reader.read_body().await {
            Ok(payload) => {
                // Receiver may have been dropped (cancelled); that is fine.
                let _ = tx.send(Ok(payload));
            }
            Err(e) => {
                let _ = tx.send(Err(RpcError::Codec(e.to_string())));
                break Some(e);
            }
        }
    };

    let mut state = shared.state.lock().unwrap();
    state.shutdown = true;
    let message = terminal.map(|e| e.to_string());
    if !state.pending.is_empty() {
        debug!(
            pending = state.pending.len(),
            "rpc client: connection terminated with calls in flight"
        );
    }
    for (_, tx) in state.pending.drain() {
        let err = match &message {
            Some(m) => RpcError::Codec(m.clone()),
            None => RpcError::Shutdown,
        };
        let _ = tx.send(Err(err));
    }
}
