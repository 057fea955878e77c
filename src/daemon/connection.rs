use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ahash::RandomState;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use aria2::rpc::{ADD_URI, GET_VERSION, PURGE_DOWNLOAD_RESULT, REMOVE, TELL_STATUS};
use aria2::{AddUriOptions, Incoming, NotificationKind, Request, Status, Version};

use crate::config::DaemonConfig;
use crate::daemon::{Daemon, NotificationHandler};
use crate::errors::{Error, Result};

type Pending = HashMap<u64, oneshot::Sender<aria2::Result<Value>>, RandomState>;
type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Owns the single RPC session to the daemon and keeps it alive.
///
/// Requests issued while no session is open fail fast with
/// [`Error::Disconnected`]; requests in flight when the session drops fail the
/// same way.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: DaemonConfig,
    next_id: AtomicU64,
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<Pending>,
    shutdown: CancellationToken,
}

/// Notification kinds registered on one connection.
#[derive(Debug, Default)]
struct Subscriptions(HashSet<NotificationKind, RandomState>);

impl Subscriptions {
    fn register_all() -> Self {
        let mut subscriptions = Self::default();
        for kind in NotificationKind::ALL {
            if subscriptions.0.insert(kind) {
                trace!(method = kind.method(), "subscribed");
            }
        }
        subscriptions
    }

    fn contains(&self, kind: NotificationKind) -> bool {
        self.0.contains(&kind)
    }
}

impl ConnectionManager {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                next_id: AtomicU64::new(1),
                writer: Mutex::new(None),
                pending: Mutex::new(Pending::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Spawns the supervisor that connects, serves and reconnects until
    /// [`ConnectionManager::shutdown`] is called.
    pub fn start(&self, handler: Arc<dyn NotificationHandler>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move { manager.supervise(handler).await })
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.writer().is_some()
    }

    async fn supervise(&self, handler: Arc<dyn NotificationHandler>) {
        let delay = self.inner.config.reconnect_delay();
        let url = match self.inner.config.websocket_url() {
            Ok(url) => url,
            Err(err) => {
                error!("invalid aria2 rpc address: {err}");
                return;
            }
        };

        while !self.inner.shutdown.is_cancelled() {
            match connect_async(url.as_str()).await {
                Ok((socket, _)) => {
                    debug!(%url, "connected to aria2");
                    self.serve(socket, &handler).await;
                    if self.inner.shutdown.is_cancelled() {
                        break;
                    }
                    warn!(
                        "aria2 connection closed, reconnect in {} seconds",
                        delay.as_secs_f32()
                    );
                }
                Err(err) => {
                    error!(
                        "failed to connect to aria2 at {url}: {err}, reconnect in {} seconds",
                        delay.as_secs_f32()
                    );
                }
            }
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.inner.shutdown.cancelled() => break,
            }
        }
        debug!("aria2 connection supervisor stopped");
    }

    async fn serve(&self, socket: Socket, handler: &Arc<dyn NotificationHandler>) {
        let (mut sink, mut stream) = socket.split();
        let (sender, mut outgoing) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                if let Err(err) = sink.send(message).await {
                    warn!("failed to write to aria2: {err}");
                    break;
                }
            }
            let _ = sink.close().await;
        });
        *self.inner.writer() = Some(sender);

        let subscriptions = Subscriptions::register_all();
        self.announce();

        loop {
            let message = tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                message = stream.next() => message,
            };
            match message {
                Some(Ok(Message::Text(text))) => {
                    self.receive(text.as_str(), &subscriptions, handler);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("aria2 connection failed: {err}");
                    break;
                }
            }
        }

        self.inner.writer().take();
        let pending = std::mem::take(&mut *self.inner.pending());
        if !pending.is_empty() {
            debug!(count = pending.len(), "failing requests of closed connection");
        }
        drop(pending);
        let _ = writer.await;
    }

    /// Queries the daemon version once the reader is running.
    fn announce(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            match manager.get_version().await {
                Ok(version) => info!(version = %version.version, "Download service is running"),
                Err(err) => warn!("aria2 did not answer the version query: {err}"),
            }
        });
    }

    fn receive(
        &self,
        text: &str,
        subscriptions: &Subscriptions,
        handler: &Arc<dyn NotificationHandler>,
    ) {
        match Incoming::decode(text) {
            Ok(Incoming::Response(response)) => {
                match self.inner.pending().remove(&response.id) {
                    Some(sender) => {
                        let _ = sender.send(response.result);
                    }
                    None => trace!(id = response.id, "dropping response without a caller"),
                }
            }
            Ok(Incoming::Notification(notification)) => {
                if !subscriptions.contains(notification.kind) {
                    return;
                }
                trace!(?notification, "received notification");
                let handler = handler.clone();
                tokio::spawn(async move { handler.handle(notification).await });
            }
            Ok(Incoming::Ignored(_)) => {}
            Err(err) => warn!("failed to decode aria2 message: {err}"),
        }
    }

    async fn call(&self, method: &'static str, params: Vec<Value>) -> Result<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(id, method, self.inner.config.rpc_secret.as_deref(), params);
        let text = request.encode()?;

        let (sender, receiver) = oneshot::channel();
        self.inner.pending().insert(id, sender);
        let queued = self
            .inner
            .writer()
            .as_ref()
            .is_some_and(|writer| writer.send(Message::text(text)).is_ok());
        if !queued {
            self.inner.pending().remove(&id);
            return Err(Error::Disconnected);
        }

        match tokio::time::timeout(self.inner.config.request_timeout(), receiver).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.inner.pending().remove(&id);
                Err(Error::Timeout(method))
            }
        }
    }

    async fn call_as<T>(&self, method: &'static str, params: Vec<Value>) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Inner {
    fn writer(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Message>>> {
        self.writer.lock().expect("Mutex should never be poisoned")
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().expect("Mutex should never be poisoned")
    }
}

#[async_trait]
impl Daemon for ConnectionManager {
    async fn add_uri(&self, uris: &[String], options: &AddUriOptions) -> Result<String> {
        self.call_as(ADD_URI, vec![json!(uris), serde_json::to_value(options)?])
            .await
    }

    async fn tell_status(&self, gid: &str) -> Result<Status> {
        self.call_as(TELL_STATUS, vec![json!(gid)]).await
    }

    async fn remove(&self, gid: &str) -> Result<String> {
        self.call_as(REMOVE, vec![json!(gid)]).await
    }

    async fn get_version(&self) -> Result<Version> {
        self.call_as(GET_VERSION, vec![]).await
    }

    async fn purge_download_result(&self) -> Result<()> {
        self.call(PURGE_DOWNLOAD_RESULT, vec![]).await?;
        Ok(())
    }
}
