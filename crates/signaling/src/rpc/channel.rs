use super::{Dispatch, NoService, RpcService};
use crate::protocol::Envelope;
use crate::transport::LinkSender;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type Waiter = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct CallTable {
    pending: HashMap<u64, Waiter>,
    terminated: Option<String>,
}

struct ChannelInner {
    label: String,
    sender: LinkSender,
    next_id: AtomicU64,
    calls: Mutex<CallTable>,
    service: Arc<dyn Dispatch>,
}

/// One end of a JSON-RPC conversation; cheap to clone
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("label", &self.inner.label)
            .field("pending", &self.pending_calls())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl RpcChannel {
    /// Create a channel sending on `sender` and serving inbound requests
    /// with `service`
    pub fn new<S: RpcService>(label: impl Into<String>, sender: LinkSender, service: S) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                label: label.into(),
                sender,
                next_id: AtomicU64::new(1),
                calls: Mutex::new(CallTable::default()),
                service: Arc::new(service),
            }),
        }
    }

    /// Create a channel that only issues calls; inbound calls get a
    /// method-not-found reply
    pub fn client(label: impl Into<String>, sender: LinkSender) -> Self {
        Self::new(label, sender, NoService)
    }

    /// Label used in log records
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Sender this channel writes to
    pub fn link_sender(&self) -> &LinkSender {
        &self.inner.sender
    }

    /// Number of outbound calls awaiting a reply
    pub fn pending_calls(&self) -> usize {
        self.inner.calls.lock().pending.len()
    }

    /// True once [`terminate`](Self::terminate) has run
    pub fn is_terminated(&self) -> bool {
        self.inner.calls.lock().terminated.is_some()
    }

    /// Issue a call and wait for its reply
    ///
    /// # Errors
    ///
    /// [`Error::Remote`] for an error reply, [`Error::Terminated`] if the
    /// channel terminates first (or already has), [`Error::Transport`] if the
    /// link refuses the frame.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let text = Envelope::call(id, method, params).to_json()?;

        let rx = {
            let mut calls = self.inner.calls.lock();
            if let Some(reason) = &calls.terminated {
                return Err(Error::Terminated(reason.clone()));
            }
            let (tx, rx) = oneshot::channel();
            calls.pending.insert(id, tx);
            rx
        };

        // Dropping the call future (e.g. on timeout) releases its slot
        let _slot = PendingSlot {
            inner: &self.inner,
            id,
        };

        debug!(channel = %self.inner.label, call_id = id, method, "Sending call");
        self.inner.sender.send(text)?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Terminated("terminated".to_string())),
        }
    }

    /// Issue a call with typed params and result
    pub async fn call_typed<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call(method, params).await?;
        serde_json::from_value(result).map_err(|e| {
            Error::Protocol(format!("Unexpected result for {}: {}", method, e))
        })
    }

    /// Send a notification; never waits for a reply
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        if let Some(reason) = &self.inner.calls.lock().terminated {
            return Err(Error::Terminated(reason.clone()));
        }
        let text = Envelope::notification(method, params).to_json()?;
        debug!(channel = %self.inner.label, method, "Sending notification");
        self.inner.sender.send(text)
    }

    /// Send a notification with typed params
    pub fn notify_typed<P: Serialize + ?Sized>(&self, method: &str, params: &P) -> Result<()> {
        self.notify(method, serde_json::to_value(params)?)
    }

    /// Parse and dispatch one inbound text frame
    ///
    /// Malformed frames are logged and dropped; the channel stays usable.
    pub async fn receive(&self, text: &str) {
        match Envelope::parse(text) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => warn!(channel = %self.inner.label, "Dropping malformed envelope: {}", e),
        }
    }

    /// Dispatch one inbound envelope
    ///
    /// Calls run on their own task so a slow handler never blocks other
    /// traffic. Notifications complete before this returns, which keeps them
    /// in arrival order.
    pub async fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::Call { id, method, params } => {
                debug!(channel = %self.inner.label, method = %method, "Received call");
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let reply = match inner.service.dispatch_call(&method, params).await {
                        Ok(result) => Envelope::Response { id, result },
                        Err(error) => {
                            debug!(
                                channel = %inner.label,
                                method = %method,
                                code = error.code,
                                "Replying with error: {}",
                                error.message
                            );
                            Envelope::Error { id, error }
                        }
                    };
                    send_reply(&inner, reply);
                });
            }
            Envelope::Notification { method, params } => {
                debug!(channel = %self.inner.label, method = %method, "Received notification");
                if let Err(e) = self.inner.service.dispatch_notification(&method, params).await {
                    warn!(
                        channel = %self.inner.label,
                        method = %method,
                        "Dropping notification: {}",
                        e.message
                    );
                }
            }
            Envelope::Response { id, result } => self.resolve(&id, Ok(result)),
            Envelope::Error { id, error } => self.resolve(&id, Err(Error::from(error))),
        }
    }

    /// Fail every outstanding call with `reason` and refuse new ones
    ///
    /// Idempotent: only the first reason is kept.
    pub fn terminate(&self, reason: &str) {
        let waiters: Vec<Waiter> = {
            let mut calls = self.inner.calls.lock();
            if calls.terminated.is_some() {
                return;
            }
            calls.terminated = Some(reason.to_string());
            calls.pending.drain().map(|(_, waiter)| waiter).collect()
        };

        info!(
            channel = %self.inner.label,
            reason,
            pending = waiters.len(),
            "Terminating RPC channel"
        );

        for waiter in waiters {
            let _ = waiter.send(Err(Error::Terminated(reason.to_string())));
        }
    }

    fn resolve(&self, id: &Value, result: Result<Value>) {
        let waiter = id
            .as_u64()
            .and_then(|id| self.inner.calls.lock().pending.remove(&id));

        match waiter {
            Some(waiter) => {
                debug!(channel = %self.inner.label, call_id = %id, "Resolving call");
                let _ = waiter.send(result);
            }
            None => warn!(
                channel = %self.inner.label,
                call_id = %id,
                "Dropping reply that matches no pending call"
            ),
        }
    }
}

struct PendingSlot<'a> {
    inner: &'a ChannelInner,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.inner.calls.lock().pending.remove(&self.id);
    }
}

fn send_reply(inner: &ChannelInner, reply: Envelope) {
    let text = match reply.to_json() {
        Ok(text) => text,
        Err(e) => {
            warn!(channel = %inner.label, "Failed to serialize reply: {}", e);
            return;
        }
    };

    if let Err(e) = inner.sender.send(text) {
        debug!(channel = %inner.label, "Reply not delivered: {}", e);
    }
}
