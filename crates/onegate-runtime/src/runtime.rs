//! Gateway runtime.
//!
//! The [`Gateway`] owns the account table, the protocol registry, the
//! process-wide identifier map and the shared HTTP/WebSocket listener.
//! Platform connectors are registered with [`Gateway::add_account`] and
//! feed events through [`Gateway::dispatch`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use onegate_runtime::Gateway;
//!
//! // Loads onegate.toml from the current directory
//! let gateway = Gateway::builder()
//!     .protocol("onebot", "v11", OneBotV11::factory())
//!     .build()?;
//!
//! gateway.add_account(Arc::new(MyConnector::new())).await?;
//! gateway.run().await?;
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use onegate_core::{BoxedConnector, CommonEvent, IdentityMap, ProtocolFactory};

#[cfg(any(feature = "http-server", feature = "ws-server"))]
use onegate_transport::GatewayServer;

use crate::account::Account;
use crate::config::{ConfigLoader, ConfigResult, GatewayConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::instance::InstanceResources;
use crate::logging;
use crate::registry::ProtocolRegistry;

type AccountKey = (String, String);

/// The gateway: accounts, protocols and shared transports.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<ProtocolRegistry>,
    identities: Arc<IdentityMap>,
    accounts: RwLock<BTreeMap<AccountKey, Arc<Account>>>,
    #[cfg(any(feature = "http-server", feature = "ws-server"))]
    server: RwLock<Option<Arc<GatewayServer>>>,
    running: RwLock<bool>,
}

impl Gateway {
    /// Creates a gateway from configuration.
    ///
    /// Initializes logging from `config.logging` unless a subscriber is
    /// already installed.
    pub fn from_config(config: GatewayConfig, registry: ProtocolRegistry) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            protocols = ?registry.keys(),
            accounts = config.accounts.len(),
            "Gateway initialized from configuration"
        );

        Self {
            config,
            registry: Arc::new(registry),
            identities: Arc::new(IdentityMap::new()),
            accounts: RwLock::new(BTreeMap::new()),
            #[cfg(any(feature = "http-server", feature = "ws-server"))]
            server: RwLock::new(None),
            running: RwLock::new(false),
        }
    }

    /// Creates a gateway builder.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// The identifier map shared by every account.
    pub fn identities(&self) -> &Arc<IdentityMap> {
        &self.identities
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Address of the shared listener, once bound.
    #[cfg(any(feature = "http-server", feature = "ws-server"))]
    pub async fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.read().await.as_ref().map(|s| s.local_addr())
    }

    // =========================================================================
    // Account Management
    // =========================================================================

    /// Registers the account behind `connector`.
    ///
    /// Instances come from the account's configuration entry, or from every
    /// `general` protocol when the account is not listed. The account is
    /// started immediately when the gateway is running and the account is
    /// enabled.
    pub async fn add_account(&self, connector: BoxedConnector) -> RuntimeResult<Arc<Account>> {
        let platform = connector.platform().to_string();
        let account_id = connector.self_id().to_string();
        let key = (platform.clone(), account_id.clone());

        if self.accounts.read().await.contains_key(&key) {
            return Err(RuntimeError::AccountExists(format!("{platform}/{account_id}")));
        }

        let configs = self.config.instance_configs(&platform, &account_id)?;
        let account = Arc::new(Account::new(
            platform,
            account_id,
            connector,
            &configs,
            &self.registry,
            Arc::clone(&self.identities),
        ));

        if *self.running.read().await && self.is_enabled(&account) {
            self.ensure_server(std::slice::from_ref(&account)).await?;
            account.set_resources(self.resources().await);
            account.start()?;
        }

        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&key) {
            account.stop(false);
            return Err(RuntimeError::AccountExists(account.label()));
        }
        accounts.insert(key, Arc::clone(&account));
        info!(account = %account.label(), instances = account.instances().len(), "Registered account");
        Ok(account)
    }

    /// Stops and removes an account.
    pub async fn remove_account(
        &self,
        platform: &str,
        account_id: &str,
        force: bool,
    ) -> RuntimeResult<()> {
        let key = (platform.to_string(), account_id.to_string());
        let account = self
            .accounts
            .write()
            .await
            .remove(&key)
            .ok_or_else(|| RuntimeError::AccountNotFound(format!("{platform}/{account_id}")))?;
        account.stop(force);
        info!(account = %account.label(), "Removed account");
        Ok(())
    }

    pub async fn account(&self, platform: &str, account_id: &str) -> Option<Arc<Account>> {
        let key = (platform.to_string(), account_id.to_string());
        self.accounts.read().await.get(&key).cloned()
    }

    pub async fn accounts(&self) -> Vec<Arc<Account>> {
        self.accounts.read().await.values().cloned().collect()
    }

    pub async fn account_count(&self) -> usize {
        self.accounts.read().await.len()
    }

    /// Routes an event to the account that observed it.
    ///
    /// Returns the number of transports the event was pushed to.
    pub async fn dispatch(&self, event: CommonEvent) -> RuntimeResult<usize> {
        let account = self
            .account(&event.platform, &event.bot_id)
            .await
            .ok_or_else(|| {
                RuntimeError::AccountNotFound(format!("{}/{}", event.platform, event.bot_id))
            })?;
        Ok(account.dispatch(&event).await)
    }

    fn is_enabled(&self, account: &Account) -> bool {
        self.config
            .account(account.platform(), account.account_id())
            .is_none_or(|c| c.enabled)
    }

    async fn resources(&self) -> InstanceResources {
        InstanceResources {
            #[cfg(any(feature = "http-server", feature = "ws-server"))]
            server: self.server.read().await.clone(),
            data_root: self.config.server.data_dir.clone(),
        }
    }

    /// Binds the shared listener if one of `accounts` serves HTTP or
    /// forward WebSocket and none is bound yet.
    #[cfg(any(feature = "http-server", feature = "ws-server"))]
    async fn ensure_server(&self, accounts: &[Arc<Account>]) -> RuntimeResult<()> {
        let needed = accounts.iter().any(|a| {
            a.instances()
                .iter()
                .any(|i| i.config().use_http || i.config().use_ws)
        });
        if !needed {
            return Ok(());
        }

        let mut server = self.server.write().await;
        if server.is_none() {
            let bound = GatewayServer::bind(&self.config.server.addr()).await?;
            info!(addr = %bound.local_addr(), "Shared listener bound");
            *server = Some(Arc::new(bound));
        }
        Ok(())
    }

    #[cfg(not(any(feature = "http-server", feature = "ws-server")))]
    async fn ensure_server(&self, _accounts: &[Arc<Account>]) -> RuntimeResult<()> {
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts every enabled account.
    ///
    /// A failing account is logged and does not stop the others.
    pub async fn start_all(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Gateway is already running");
                return Ok(());
            }
            *running = true;
        }

        info!("Starting onegate gateway");

        let accounts: Vec<_> = self
            .accounts()
            .await
            .into_iter()
            .filter(|a| {
                let enabled = self.is_enabled(a);
                if !enabled {
                    debug!(account = %a.label(), "Account disabled, not starting");
                }
                enabled
            })
            .collect();

        if let Err(e) = self.ensure_server(&accounts).await {
            *self.running.write().await = false;
            return Err(e);
        }
        let resources = self.resources().await;

        for account in &accounts {
            account.set_resources(resources.clone());
            if let Err(e) = account.start() {
                error!(account = %account.label(), error = %e, "Failed to start account");
            }
        }

        info!(accounts = accounts.len(), "Gateway started");
        Ok(())
    }

    /// Stops every account and releases the shared listener.
    pub async fn stop_all(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.write().await;
            if !*running {
                warn!("Gateway is not running");
                return Ok(());
            }
            *running = false;
        }

        info!("Stopping onegate gateway");

        for account in self.accounts().await {
            account.stop(false);
        }

        #[cfg(any(feature = "http-server", feature = "ws-server"))]
        if let Some(server) = self.server.write().await.take() {
            server.shutdown();
        }

        info!("Gateway stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start_all().await?;

        info!("onegate is now running. Press Ctrl+C to stop.");

        wait_for_shutdown().await;

        self.stop_all().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start_all().await?;

        shutdown.await;

        self.stop_all().await
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Cannot register SIGTERM handler, waiting for Ctrl+C only");
            }
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Cannot listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// GatewayBuilder
// =============================================================================

/// Builder for a [`Gateway`] with custom configuration and protocols.
///
/// ```rust,ignore
/// let gateway = Gateway::builder()
///     .config_file("config/onegate.toml")
///     .profile("production")
///     .protocol("onebot", "v12", OneBotV12::factory())
///     .build()?;
/// ```
pub struct GatewayBuilder {
    config_loader: ConfigLoader,
    config: Option<GatewayConfig>,
    registry: ProtocolRegistry,
}

impl GatewayBuilder {
    /// Searches the current directory for configuration; reads `ONEGATE_*`
    /// environment variables.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            config: None,
            registry: ProtocolRegistry::new(),
        }
    }

    /// Loads this configuration file.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration on top of the loaded files.
    pub fn merge(mut self, config: GatewayConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `config` as is; nothing is loaded.
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the protocol registry.
    pub fn registry(mut self, registry: ProtocolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers one protocol.
    pub fn protocol(self, name: &str, version: &str, factory: ProtocolFactory) -> Self {
        self.registry.register(name, version, factory);
        self
    }

    pub fn build(self) -> ConfigResult<Gateway> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_loader.load()?,
        };
        Ok(Gateway::from_config(config, self.registry))
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::account::AccountStatus;
    use crate::config::AccountConfig;
    use crate::testing::{MockConnector, RecordingSink, TestProtocol, group_message};

    fn config() -> GatewayConfig {
        GatewayConfig {
            general: BTreeMap::from([(
                "test.v1".to_string(),
                json!({ "use_http": false, "use_ws": false, "heartbeat_interval": 0 }),
            )]),
            ..GatewayConfig::default()
        }
    }

    fn build_gateway(config: GatewayConfig) -> Gateway {
        Gateway::builder()
            .config(config)
            .protocol("test", "v1", TestProtocol::factory())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_account() {
        let gateway = build_gateway(config());
        let account = gateway
            .add_account(Arc::new(MockConnector::default()))
            .await
            .unwrap();
        assert_eq!(account.instances().len(), 1);
        let sink = Arc::new(RecordingSink::default());
        account.instances()[0].add_sink(sink.clone());

        gateway.start_all().await.unwrap();
        assert_eq!(gateway.dispatch(group_message("m1")).await.unwrap(), 1);
        assert_eq!(sink.count(), 1);

        let mut stranger = group_message("m2");
        stranger.bot_id = "other".into();
        assert!(matches!(
            gateway.dispatch(stranger).await,
            Err(RuntimeError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_account_is_rejected() {
        let gateway = build_gateway(config());
        gateway
            .add_account(Arc::new(MockConnector::default()))
            .await
            .unwrap();
        let again = gateway.add_account(Arc::new(MockConnector::default())).await;
        assert!(matches!(again, Err(RuntimeError::AccountExists(_))));
        assert_eq!(gateway.account_count().await, 1);
    }

    #[tokio::test]
    async fn test_account_added_while_running_starts() {
        let gateway = build_gateway(config());
        gateway.start_all().await.unwrap();

        let account = gateway
            .add_account(Arc::new(MockConnector::default()))
            .await
            .unwrap();
        assert_eq!(account.status(), AccountStatus::Online);

        gateway.remove_account("qq", "bot", false).await.unwrap();
        assert_eq!(account.status(), AccountStatus::Offline);
        assert!(gateway.account("qq", "bot").await.is_none());
        assert!(matches!(
            gateway.remove_account("qq", "bot", false).await,
            Err(RuntimeError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_account_stays_pending() {
        let mut config = config();
        config.accounts.push(AccountConfig {
            platform: "qq".into(),
            account_id: "bot".into(),
            enabled: false,
            protocols: BTreeMap::from([("test.v1".to_string(), json!({}))]),
        });
        let gateway = build_gateway(config);
        let account = gateway
            .add_account(Arc::new(MockConnector::default()))
            .await
            .unwrap();

        gateway.start_all().await.unwrap();
        assert_eq!(account.status(), AccountStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_until_stops_accounts() {
        let gateway = build_gateway(config());
        let account = gateway
            .add_account(Arc::new(MockConnector::default()))
            .await
            .unwrap();

        gateway.run_until(async {}).await.unwrap();
        assert!(!gateway.is_running().await);
        assert_eq!(account.status(), AccountStatus::Offline);
    }

    #[tokio::test]
    async fn test_bad_instance_config_is_reported() {
        let mut config = config();
        config
            .general
            .insert("test.v1".into(), json!({ "post_timeout": "soon" }));
        let gateway = build_gateway(config);
        let result = gateway.add_account(Arc::new(MockConnector::default())).await;
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[cfg(any(feature = "http-server", feature = "ws-server"))]
    #[tokio::test]
    async fn test_listener_bound_only_when_needed() {
        let mut config = config();
        config.server.port = 0;
        let gateway = build_gateway(config.clone());
        gateway
            .add_account(Arc::new(MockConnector::default()))
            .await
            .unwrap();
        gateway.start_all().await.unwrap();
        assert!(gateway.local_addr().await.is_none());
        gateway.stop_all().await.unwrap();

        config
            .general
            .insert("test.v1".into(), json!({ "use_ws": true, "heartbeat_interval": 0 }));
        let gateway = build_gateway(config);
        let account = gateway
            .add_account(Arc::new(MockConnector::default()))
            .await
            .unwrap();
        gateway.start_all().await.unwrap();
        assert!(gateway.local_addr().await.is_some());
        assert_eq!(account.instances()[0].path(), "/qq/bot/test/v1");

        gateway.stop_all().await.unwrap();
        assert!(gateway.local_addr().await.is_none());
    }
}
