//! Bidirectional JSON-RPC channel over a [`Link`](crate::transport::Link)
//!
//! Both ends of a link may issue calls. Outbound calls are correlated by a
//! per-channel increasing integer id; inbound calls are decoded into the
//! service's tagged request type and handled on their own task.

mod channel;

pub use channel::RpcChannel;

use crate::protocol::{DecodeRequest, ErrorObject, NoRequest};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

/// Handler for the calls and notifications a channel receives
#[async_trait]
pub trait RpcService: Send + Sync + 'static {
    /// Tagged request type decoded from `(method, params)`
    type Request: DecodeRequest;

    /// Handle a call; the returned value or error object is the reply
    async fn handle_call(&self, request: Self::Request) -> Result<Value, ErrorObject>;

    /// Handle a notification; defaults to running the call handler and
    /// discarding its result
    async fn handle_notification(&self, request: Self::Request) {
        if let Err(e) = self.handle_call(request).await {
            warn!(code = e.code, "Notification handler failed: {}", e.message);
        }
    }
}

/// Service for channels that expose no methods
#[derive(Debug, Default, Clone, Copy)]
pub struct NoService;

#[async_trait]
impl RpcService for NoService {
    type Request = NoRequest;

    async fn handle_call(&self, request: NoRequest) -> Result<Value, ErrorObject> {
        match request {}
    }
}

/// Object-safe view of an [`RpcService`] keyed by method name
#[async_trait]
pub(crate) trait Dispatch: Send + Sync {
    async fn dispatch_call(&self, method: &str, params: Value) -> Result<Value, ErrorObject>;

    async fn dispatch_notification(&self, method: &str, params: Value) -> Result<(), ErrorObject>;
}

#[async_trait]
impl<S: RpcService> Dispatch for S {
    async fn dispatch_call(&self, method: &str, params: Value) -> Result<Value, ErrorObject> {
        let request = S::Request::decode(method, params)?;
        self.handle_call(request).await
    }

    async fn dispatch_notification(&self, method: &str, params: Value) -> Result<(), ErrorObject> {
        let request = S::Request::decode(method, params)?;
        self.handle_notification(request).await;
        Ok(())
    }
}
