//! Service registration and method dispatch.
//!
//! Rust has no runtime reflection, so a service is assembled explicitly: each
//! method is registered with a typed async handler, and registration erases
//! the types into two callables kept on the [`MethodType`]: a decode
//! constructor that builds a fresh, typed argument container from a body
//! frame, and an invoker that runs the handler and encodes its reply. The
//! dispatch path works entirely in terms of those erased callables.
//!
//! A handler takes its argument by value and returns `Result<Reply, E>` for
//! any displayable `E`; a returned error becomes the response header's error
//! string. State is carried by capture:
//!
//! ```
//! use std::sync::Arc;
//! use geerpc_server::Service;
//!
//! struct Arith;
//!
//! impl Arith {
//!     fn add(&self, (a, b): (i32, i32)) -> i32 {
//!         a + b
//!     }
//! }
//!
//! let arith = Arc::new(Arith);
//! let service = Service::new("Arith").method("Add", move |args: (i32, i32)| {
//!     let arith = arith.clone();
//!     async move { Ok::<i32, String>(arith.add(args)) }
//! });
//! assert_eq!(service.name(), "Arith");
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use geerpc_common::codec::CodecType;
use geerpc_common::Result;

/// Freshly decoded argument container, typed behind `Any` until the invoker
/// downcasts it back.
pub(crate) type ArgvBox = Box<dyn Any + Send>;

type DecodeFn = Box<dyn Fn(CodecType, &[u8]) -> Result<ArgvBox> + Send + Sync>;
type InvokeFuture = Pin<Box<dyn Future<Output = std::result::Result<Vec<u8>, String>> + Send>>;
type InvokeFn = Box<dyn Fn(CodecType, ArgvBox) -> InvokeFuture + Send + Sync>;

/// One registered method: its name, call counter, and the erased decode and
/// invoke callables captured at registration time.
pub struct MethodType {
    name: String,
    num_calls: AtomicU64,
    decode_argv: DecodeFn,
    invoke: InvokeFn,
}

impl MethodType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of successful invocations of this method.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }

    /// Builds a fresh argument container by decoding the body payload.
    pub(crate) fn new_argv(&self, codec: CodecType, payload: &[u8]) -> Result<ArgvBox> {
        (self.decode_argv)(codec, payload)
    }

    /// Invokes the handler. `Ok` carries the encoded reply; `Err` carries the
    /// message destined for the response header.
    pub(crate) async fn call(
        &self,
        codec: CodecType,
        argv: ArgvBox,
    ) -> std::result::Result<Vec<u8>, String> {
        let result = (self.invoke)(codec, argv).await;
        if result.is_ok() {
            self.num_calls.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

/// A named collection of methods, frozen once registered with a server.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Registers a method under `name`.
    ///
    /// # Panics
    ///
    /// Panics if the service already has a method with this name; duplicate
    /// registration is a programming error caught at startup.
    pub fn method<A, R, E, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let name = name.into();
        if self.methods.contains_key(&name) {
            panic!(
                "rpc: method {} already defined on service {}",
                name, self.name
            );
        }

        let decode_argv: DecodeFn = Box::new(|codec, payload| {
            let argv: A = codec.decode(payload)?;
            Ok(Box::new(argv) as ArgvBox)
        });

        let handler = Arc::new(handler);
        let invoke: InvokeFn = Box::new(move |codec, argv| {
            let handler = handler.clone();
            Box::pin(async move {
                let argv = match argv.downcast::<A>() {
                    Ok(argv) => *argv,
                    Err(_) => return Err("rpc server: argument container type mismatch".to_string()),
                };
                match handler(argv).await {
                    Ok(reply) => codec.encode(&reply).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                }
            })
        });

        let mtype = MethodType {
            name: name.clone(),
            num_calls: AtomicU64::new(0),
            decode_argv,
            invoke,
        };
        self.methods.insert(name, Arc::new(mtype));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Successful-call count for one method, if it exists.
    pub fn num_calls(&self, method: &str) -> Option<u64> {
        self.methods.get(method).map(|m| m.num_calls())
    }

    pub(crate) fn get(&self, method: &str) -> Option<Arc<MethodType>> {
        self.methods.get(method).cloned()
    }
}
