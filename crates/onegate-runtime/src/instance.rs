//! Protocol instances.
//!
//! A [`ProtocolInstance`] is one protocol dialect served for one account:
//! its own action table, filter, transports and heartbeat. Events reach the
//! consumer through a single path: filter, encode once, push the same
//! payload to every transport.
//!
//! ```text
//!                        ┌──────── forward WS sockets
//! CommonEvent ─▶ filter ─▶ encode ─┼──────── reverse WS clients
//!                        └──────── webhooks ──▶ reply ─▶ quick operation
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use onegate_core::{
    ActionEndpoint, ActionError, ActionRequest, ActionResponse, BoxedProtocol, BoxedSink,
    ClientIdentity, CommonEvent, Filter, InstanceConfig, ProtocolContext,
};
use onegate_transport::{Generation, spawn_heartbeat};

#[cfg(any(feature = "http-server", feature = "ws-server"))]
use onegate_transport::{GatewayServer, MountHandle, MountOptions};
#[cfg(feature = "ws-client")]
use onegate_transport::ReverseWsClient;
#[cfg(feature = "http-client")]
use {
    onegate_transport::{WebhookOptions, WebhookPusher},
    std::time::Duration,
};

use crate::account::{AccountStatus, SharedStatus};
use crate::dispatcher::ActionDispatcher;
use crate::error::{RuntimeError, RuntimeResult};

/// Shared resources instances attach their transports to.
#[derive(Clone, Default)]
pub struct InstanceResources {
    /// Listener for HTTP and forward WebSocket mounts.
    #[cfg(any(feature = "http-server", feature = "ws-server"))]
    pub server: Option<Arc<GatewayServer>>,
    /// Root of per-instance data directories.
    pub data_root: Option<PathBuf>,
}

#[derive(Default)]
struct Transports {
    sinks: Vec<BoxedSink>,
    #[cfg(any(feature = "http-server", feature = "ws-server"))]
    mount: Option<MountHandle>,
    #[cfg(feature = "ws-client")]
    clients: Vec<ReverseWsClient>,
}

struct InstanceInner {
    key: String,
    path: String,
    label: String,
    protocol: BoxedProtocol,
    ctx: ProtocolContext,
    filter: Filter,
    dispatcher: ActionDispatcher,
    generation: Generation,
    status: SharedStatus,
    running: AtomicBool,
    attached: Mutex<Vec<BoxedSink>>,
    transports: Mutex<Transports>,
    data_dir: Mutex<Option<PathBuf>>,
    /// Serializes deliveries so events never interleave within an instance.
    delivery: tokio::sync::Mutex<()>,
}

/// One protocol served for one account.
#[derive(Clone)]
pub struct ProtocolInstance {
    inner: Arc<InstanceInner>,
}

impl ProtocolInstance {
    /// Builds the instance: compiles the filter, builds the action table and
    /// spawns the rate-limit worker. Nothing is exposed until [`start`](Self::start).
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        protocol: BoxedProtocol,
        ctx: ProtocolContext,
        status: SharedStatus,
    ) -> RuntimeResult<Self> {
        let key = protocol.key();
        let filter = match &ctx.config.filter {
            Some(expr) => Filter::compile(expr).map_err(|source| RuntimeError::InvalidFilter {
                key: key.clone(),
                source,
            })?,
            None => Filter::accept_all(),
        };

        let path = format!(
            "/{}/{}/{}/{}",
            ctx.platform,
            ctx.account_id,
            protocol.name(),
            protocol.version()
        );
        let label = format!("{}/{}/{key}", ctx.platform, ctx.account_id);
        let table = protocol.build_actions(&ctx);
        let dispatcher = ActionDispatcher::new(
            label.clone(),
            Arc::clone(&protocol),
            table,
            ctx.config.rate_limit_interval(),
        );

        Ok(Self {
            inner: Arc::new(InstanceInner {
                key,
                path,
                label,
                protocol,
                ctx,
                filter,
                dispatcher,
                generation: Generation::new(),
                status,
                running: AtomicBool::new(false),
                attached: Mutex::new(Vec::new()),
                transports: Mutex::new(Transports::default()),
                data_dir: Mutex::new(None),
                delivery: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// `name.version` of the protocol.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Mount path on the shared server: `/<platform>/<account>/<name>/<version>`.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn protocol(&self) -> &BoxedProtocol {
        &self.inner.protocol
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.inner.ctx.config
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.inner.dispatcher
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// The instance's data directory while one exists.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.inner.data_dir.lock().clone()
    }

    /// Adds a sink that receives every delivered payload, independent of
    /// the configured transports.
    pub fn add_sink(&self, sink: BoxedSink) {
        self.inner.attached.lock().push(sink);
    }

    /// The endpoint transports hand inbound calls to.
    pub fn endpoint(&self) -> Arc<dyn ActionEndpoint> {
        Arc::new(InstanceEndpoint {
            inner: Arc::downgrade(&self.inner),
            protocol: Arc::clone(&self.inner.protocol),
        })
    }

    /// Executes an action call.
    pub async fn handle_action(&self, request: ActionRequest) -> ActionResponse {
        self.inner.dispatcher.dispatch(request).await
    }

    /// Delivers an event; returns the number of transports it was pushed to.
    pub async fn deliver(&self, event: &CommonEvent) -> usize {
        self.inner.deliver(event).await
    }

    /// Starts every configured transport and the heartbeat.
    ///
    /// Fails only when the HTTP / forward WebSocket mount cannot be created;
    /// other transports log their failures and are skipped.
    pub fn start(&self, resources: &InstanceResources) -> RuntimeResult<()> {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::SeqCst) {
            debug!(instance = %inner.label, "Instance already running");
            return Ok(());
        }
        inner.generation.advance();

        let endpoint = self.endpoint();
        let identity = inner.protocol.client_identity(&inner.ctx);
        let mut transports = Transports::default();

        if let Err(e) = self.attach_server(resources, &endpoint, &mut transports) {
            inner.running.store(false, Ordering::SeqCst);
            inner.generation.advance();
            return Err(e);
        }
        self.attach_reverse_ws(&identity, &endpoint, &mut transports);
        self.attach_webhooks(&identity, &mut transports);

        if let Some(root) = &resources.data_root {
            let dir = root.join(inner.path.trim_start_matches('/'));
            match std::fs::create_dir_all(&dir) {
                Ok(()) => *inner.data_dir.lock() = Some(dir),
                Err(e) => {
                    warn!(instance = %inner.label, dir = %dir.display(), error = %e, "Cannot create data directory");
                }
            }
        }

        if let Some(period) = inner.ctx.config.heartbeat() {
            let weak = Arc::downgrade(inner);
            let interval = inner.ctx.config.heartbeat_interval;
            spawn_heartbeat(period, inner.generation.clone(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let event = CommonEvent::heartbeat(
                            &inner.ctx.platform,
                            &inner.ctx.account_id,
                            interval,
                            inner.ctx.connector.is_online(),
                        );
                        inner.deliver(&event).await;
                    }
                }
            });
        }

        let transport_count = transports.sinks.len();
        *inner.transports.lock() = transports;
        info!(
            instance = %inner.label,
            path = %inner.path,
            transports = transport_count,
            "Protocol instance started"
        );
        Ok(())
    }

    /// Stops all transports. Pending reconnects and heartbeats become no-ops.
    ///
    /// `force` also removes the instance's data directory.
    pub fn stop(&self, force: bool) {
        let inner = &self.inner;
        if inner.running.swap(false, Ordering::SeqCst) {
            inner.generation.advance();
            let transports = std::mem::take(&mut *inner.transports.lock());
            #[cfg(feature = "ws-client")]
            for client in &transports.clients {
                client.stop();
            }
            drop(transports);
            info!(instance = %inner.label, "Protocol instance stopped");
        }

        if force && let Some(dir) = inner.data_dir.lock().take() {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!(instance = %inner.label, dir = %dir.display(), "Removed data directory"),
                Err(e) => {
                    warn!(instance = %inner.label, dir = %dir.display(), error = %e, "Cannot remove data directory");
                }
            }
        }
    }

    #[cfg(any(feature = "http-server", feature = "ws-server"))]
    fn attach_server(
        &self,
        resources: &InstanceResources,
        endpoint: &Arc<dyn ActionEndpoint>,
        transports: &mut Transports,
    ) -> RuntimeResult<()> {
        let config = &self.inner.ctx.config;
        if !config.use_http && !config.use_ws {
            return Ok(());
        }
        let Some(server) = &resources.server else {
            warn!(instance = %self.inner.label, "No shared server, HTTP and forward WebSocket are off");
            return Ok(());
        };

        let mount = server.mount(
            &self.inner.path,
            MountOptions {
                endpoint: Arc::clone(endpoint),
                access_token: config.token().map(str::to_string),
                http: config.use_http,
                ws: config.use_ws,
                call_timeout: config.post_timeout(),
            },
        )?;
        if config.use_ws {
            transports.sinks.push(mount.sockets());
        }
        transports.mount = Some(mount);
        Ok(())
    }

    #[cfg(not(any(feature = "http-server", feature = "ws-server")))]
    fn attach_server(
        &self,
        _resources: &InstanceResources,
        _endpoint: &Arc<dyn ActionEndpoint>,
        _transports: &mut Transports,
    ) -> RuntimeResult<()> {
        let config = &self.inner.ctx.config;
        if config.use_http || config.use_ws {
            warn!(instance = %self.inner.label, "Built without server transports, HTTP and forward WebSocket are off");
        }
        Ok(())
    }

    #[cfg(feature = "ws-client")]
    fn attach_reverse_ws(
        &self,
        identity: &ClientIdentity,
        endpoint: &Arc<dyn ActionEndpoint>,
        transports: &mut Transports,
    ) {
        let config = &self.inner.ctx.config;
        for url in &config.ws_reverse {
            let client = ReverseWsClient::new(
                url.clone(),
                identity.clone(),
                config.reconnect_interval(),
                Arc::clone(endpoint),
            );
            client.start();
            transports.sinks.push(Arc::new(client.clone()));
            transports.clients.push(client);
        }
    }

    #[cfg(not(feature = "ws-client"))]
    fn attach_reverse_ws(
        &self,
        _identity: &ClientIdentity,
        _endpoint: &Arc<dyn ActionEndpoint>,
        _transports: &mut Transports,
    ) {
        if !self.inner.ctx.config.ws_reverse.is_empty() {
            warn!(instance = %self.inner.label, "Built without ws-client, reverse WebSocket targets ignored");
        }
    }

    #[cfg(feature = "http-client")]
    fn attach_webhooks(&self, identity: &ClientIdentity, transports: &mut Transports) {
        let config = &self.inner.ctx.config;
        for url in config.webhook_targets() {
            let options = WebhookOptions {
                url: url.to_string(),
                identity: identity.clone(),
                secret: config.signing_secret().map(str::to_string),
                timeout: config.post_timeout(),
                failure_threshold: config.webhook_failure_threshold,
                suspend_for: Duration::from_secs(config.webhook_suspend_secs),
            };
            match WebhookPusher::new(options) {
                Ok(pusher) => transports.sinks.push(Arc::new(pusher)),
                Err(e) => {
                    warn!(instance = %self.inner.label, url = %url, error = %e, "Skipping webhook target");
                }
            }
        }
    }

    #[cfg(not(feature = "http-client"))]
    fn attach_webhooks(&self, _identity: &ClientIdentity, _transports: &mut Transports) {
        if self.inner.ctx.config.webhook_targets().next().is_some() {
            warn!(instance = %self.inner.label, "Built without http-client, webhook targets ignored");
        }
    }
}

impl InstanceInner {
    fn is_live(&self) -> bool {
        self.running.load(Ordering::SeqCst) && *self.status.read() == AccountStatus::Online
    }

    fn encode(&self, event: &CommonEvent) -> Option<(Value, Arc<str>)> {
        let payload = self.protocol.encode_event(event, &self.ctx)?;
        match serde_json::to_string(&payload) {
            Ok(text) => Some((payload, Arc::from(text))),
            Err(e) => {
                warn!(instance = %self.label, error = %e, "Cannot serialize event");
                None
            }
        }
    }

    async fn deliver(&self, event: &CommonEvent) -> usize {
        if !self.is_live() {
            trace!(instance = %self.label, event = %event.id, "Instance not live, event dropped");
            return 0;
        }
        if !self.filter.matches(&event.to_filter_view()) {
            trace!(instance = %self.label, event = %event.id, "Event filtered out");
            return 0;
        }

        let (payload, delivered, operation) = {
            let _guard = self.delivery.lock().await;
            let Some((payload, text)) = self.encode(event) else {
                return 0;
            };

            let mut sinks = self.transports.lock().sinks.clone();
            sinks.extend(self.attached.lock().iter().cloned());
            let replies = join_all(sinks.iter().map(|sink| sink.push(Arc::clone(&text)))).await;
            trace!(instance = %self.label, event = %event.id, sinks = sinks.len(), "Event delivered");

            let operation = replies
                .into_iter()
                .flatten()
                .find(|r| r.as_object().is_some_and(|op| !op.is_empty()));
            (payload, sinks.len(), operation)
        };

        if let Some(operation) = operation.filter(|_| !event.is_meta()) {
            self.dispatcher.apply_quick_operation(&payload, &operation).await;
        }
        delivered
    }

    fn greeting_frames(&self) -> Vec<String> {
        ["connect", "enable"]
            .into_iter()
            .map(|sub_type| CommonEvent::lifecycle(&self.ctx.platform, &self.ctx.account_id, sub_type))
            .filter_map(|event| self.encode(&event))
            .map(|(_, text)| text.to_string())
            .collect()
    }
}

/// Transport-facing side of an instance.
///
/// Holds the instance weakly so open sockets never keep a stopped
/// instance alive.
struct InstanceEndpoint {
    inner: Weak<InstanceInner>,
    protocol: BoxedProtocol,
}

#[async_trait]
impl ActionEndpoint for InstanceEndpoint {
    async fn call(&self, request: ActionRequest) -> ActionResponse {
        match self.inner.upgrade() {
            Some(inner) => inner.dispatcher.dispatch(request).await,
            None => {
                let error = ActionError::Handler("instance is gone".into());
                self.reject(&error, request.echo)
            }
        }
    }

    fn reject(&self, error: &ActionError, echo: Option<Value>) -> ActionResponse {
        ActionResponse::failed(self.protocol.retcode(error), error.to_string()).with_echo(echo)
    }

    fn greeting_frames(&self) -> Vec<String> {
        self.inner
            .upgrade()
            .map(|inner| inner.greeting_frames())
            .unwrap_or_default()
    }
}
