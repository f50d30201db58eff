//! Accounts: one platform login served through any number of protocol
//! instances.
//!
//! Each account owns one [`ProtocolInstance`] per configured protocol key.
//! Events are fanned out to every instance; each instance applies its own
//! filter. An account moves `Pending → Online` on start and `Online →
//! Offline` on stop, and nothing is delivered while it is not online.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use onegate_core::{BoxedConnector, CommonEvent, IdentityMap, InstanceConfig, ProtocolContext};

use crate::error::{RuntimeError, RuntimeResult};
use crate::instance::{InstanceResources, ProtocolInstance};
use crate::registry::ProtocolRegistry;

/// Lifecycle state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    /// Built but not started.
    Pending,
    /// Started; instances deliver events.
    Online,
    /// Stopped; instances drop events.
    Offline,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Online => write!(f, "Online"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}

/// Account status shared with the account's instances.
pub type SharedStatus = Arc<RwLock<AccountStatus>>;

/// A platform account and its protocol instances.
pub struct Account {
    platform: String,
    account_id: String,
    connector: BoxedConnector,
    status: SharedStatus,
    instances: Vec<ProtocolInstance>,
    resources: RwLock<InstanceResources>,
}

impl Account {
    /// Builds one instance per entry of `configs`.
    ///
    /// Keys without a registered protocol and instances whose filter does
    /// not compile are logged and skipped; the rest of the account is kept.
    pub fn new(
        platform: impl Into<String>,
        account_id: impl Into<String>,
        connector: BoxedConnector,
        configs: &BTreeMap<String, InstanceConfig>,
        registry: &ProtocolRegistry,
        identities: Arc<IdentityMap>,
    ) -> Self {
        let platform = platform.into();
        let account_id = account_id.into();
        let status: SharedStatus = Arc::new(RwLock::new(AccountStatus::Pending));
        let label = format!("{platform}/{account_id}");

        let mut instances = Vec::with_capacity(configs.len());
        for (key, config) in configs {
            let protocol = match registry.create_by_key(key) {
                Ok(protocol) => protocol,
                Err(e) => {
                    error!(account = %label, protocol = %key, error = %e, "Skipping protocol instance");
                    continue;
                }
            };
            let ctx = ProtocolContext {
                platform: platform.clone(),
                account_id: account_id.clone(),
                connector: Arc::clone(&connector),
                identities: Arc::clone(&identities),
                config: config.clone(),
            };
            match ProtocolInstance::new(protocol, ctx, Arc::clone(&status)) {
                Ok(instance) => instances.push(instance),
                Err(e) => {
                    error!(account = %label, protocol = %key, error = %e, "Skipping protocol instance");
                }
            }
        }

        debug!(account = %label, instances = instances.len(), "Account created");
        Self {
            platform,
            account_id,
            connector,
            status,
            instances,
            resources: RwLock::new(InstanceResources::default()),
        }
    }

    /// Sets the shared resources instances attach to on start.
    pub fn with_resources(self, resources: InstanceResources) -> Self {
        self.set_resources(resources);
        self
    }

    /// Replaces the shared resources. Applies from the next start.
    pub fn set_resources(&self, resources: InstanceResources) {
        *self.resources.write() = resources;
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// `platform/account_id`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.platform, self.account_id)
    }

    pub fn connector(&self) -> &BoxedConnector {
        &self.connector
    }

    pub fn status(&self) -> AccountStatus {
        *self.status.read()
    }

    pub fn instances(&self) -> &[ProtocolInstance] {
        &self.instances
    }

    /// Looks up an instance by `name.version`.
    pub fn instance(&self, key: &str) -> Option<&ProtocolInstance> {
        self.instances.iter().find(|i| i.key() == key)
    }

    fn set_status(&self, status: AccountStatus) {
        let mut guard = self.status.write();
        let old_status = *guard;
        *guard = status;
        debug!(
            account = %self.label(),
            old_status = %old_status,
            new_status = %status,
            "Account status changed"
        );
    }

    /// Starts every instance.
    ///
    /// A failing instance is logged and does not stop its siblings. The
    /// account goes online unless every instance failed.
    pub fn start(&self) -> RuntimeResult<()> {
        let label = self.label();
        let resources = self.resources.read().clone();
        let mut started = 0usize;
        for instance in &self.instances {
            match instance.start(&resources) {
                Ok(()) => started += 1,
                Err(e) => {
                    error!(account = %label, protocol = %instance.key(), error = %e, "Failed to start protocol instance");
                }
            }
        }

        if started == 0 && !self.instances.is_empty() {
            self.set_status(AccountStatus::Offline);
            return Err(RuntimeError::StartFailed(label));
        }
        if self.instances.is_empty() {
            warn!(account = %label, "Account has no protocol instances");
        }

        self.set_status(AccountStatus::Online);
        info!(account = %label, instances = started, "Account online");
        Ok(())
    }

    /// Stops every instance. The account is offline before any instance
    /// is torn down.
    ///
    /// `force` also removes instance-local data directories.
    pub fn stop(&self, force: bool) {
        self.set_status(AccountStatus::Offline);
        for instance in &self.instances {
            instance.stop(force);
        }
        info!(account = %self.label(), force, "Account offline");
    }

    /// Fans an event out to every instance concurrently.
    ///
    /// Returns the total number of transports the event was pushed to.
    pub async fn dispatch(&self, event: &CommonEvent) -> usize {
        if self.status() != AccountStatus::Online {
            debug!(account = %self.label(), event = %event.id, "Account not online, event dropped");
            return 0;
        }
        join_all(self.instances.iter().map(|i| i.deliver(event)))
            .await
            .into_iter()
            .sum()
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("platform", &self.platform)
            .field("account_id", &self.account_id)
            .field("status", &self.status())
            .field("instances", &self.instances.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{MockConnector, RecordingSink, TestProtocol, group_message};

    fn registry() -> ProtocolRegistry {
        let registry = ProtocolRegistry::new();
        registry
            .register("test", "v1", TestProtocol::factory_for("v1"))
            .register("test", "v2", TestProtocol::factory_for("v2"));
        registry
    }

    fn quiet() -> InstanceConfig {
        InstanceConfig {
            use_http: false,
            use_ws: false,
            heartbeat_interval: 0,
            ..InstanceConfig::default()
        }
    }

    fn account(configs: BTreeMap<String, InstanceConfig>) -> Account {
        Account::new(
            "qq",
            "bot",
            Arc::new(MockConnector::default()),
            &configs,
            &registry(),
            Arc::new(IdentityMap::new()),
        )
    }

    #[tokio::test]
    async fn test_fan_out_respects_each_filter() {
        let configs = BTreeMap::from([
            (
                "test.v1".to_string(),
                InstanceConfig {
                    filter: Some(json!({ "post_type": false })),
                    ..quiet()
                },
            ),
            ("test.v2".to_string(), quiet()),
        ]);
        let account = account(configs);
        let rejecting = Arc::new(RecordingSink::default());
        let accepting = Arc::new(RecordingSink::default());
        account.instance("test.v1").unwrap().add_sink(rejecting.clone());
        account.instance("test.v2").unwrap().add_sink(accepting.clone());
        account.start().unwrap();

        assert_eq!(account.dispatch(&group_message("m1")).await, 1);
        assert_eq!(rejecting.count(), 0);
        assert_eq!(accepting.count(), 1);
    }

    #[tokio::test]
    async fn test_broken_instances_are_skipped() {
        let configs = BTreeMap::from([
            ("test.v1".to_string(), quiet()),
            ("missing.v9".to_string(), quiet()),
            (
                "test.v2".to_string(),
                InstanceConfig {
                    filter: Some(json!({ "$and": 1 })),
                    ..quiet()
                },
            ),
        ]);
        let account = account(configs);
        assert_eq!(account.instances().len(), 1);
        assert_eq!(account.instances()[0].key(), "test.v1");
    }

    #[tokio::test]
    async fn test_status_transitions_gate_dispatch() {
        let account = account(BTreeMap::from([("test.v1".to_string(), quiet())]));
        let sink = Arc::new(RecordingSink::default());
        account.instances()[0].add_sink(sink.clone());

        assert_eq!(account.status(), AccountStatus::Pending);
        assert_eq!(account.dispatch(&group_message("m1")).await, 0);

        account.start().unwrap();
        assert_eq!(account.status(), AccountStatus::Online);
        assert_eq!(account.dispatch(&group_message("m2")).await, 1);

        account.stop(false);
        assert_eq!(account.status(), AccountStatus::Offline);
        assert_eq!(account.dispatch(&group_message("m3")).await, 0);
        assert_eq!(sink.count(), 1);
        assert!(!account.instances()[0].is_running());
    }

    #[test]
    fn test_empty_account_goes_online() {
        let account = account(BTreeMap::new());
        account.start().unwrap();
        assert_eq!(account.status(), AccountStatus::Online);
    }

    #[cfg(any(feature = "http-server", feature = "ws-server"))]
    #[tokio::test]
    async fn test_start_fails_when_every_instance_fails() {
        use onegate_transport::GatewayServer;

        let server = Arc::new(GatewayServer::bind("127.0.0.1:0").await.unwrap());
        let resources = InstanceResources {
            server: Some(server),
            ..InstanceResources::default()
        };
        let served = InstanceConfig {
            use_http: true,
            ..quiet()
        };

        let first = account(BTreeMap::from([("test.v1".to_string(), served.clone())]))
            .with_resources(resources.clone());
        first.start().unwrap();

        // Same platform, account and protocol: the mount path is taken.
        let second = account(BTreeMap::from([("test.v1".to_string(), served)]))
            .with_resources(resources);
        assert!(matches!(second.start(), Err(RuntimeError::StartFailed(_))));
        assert_eq!(second.status(), AccountStatus::Offline);
        assert_eq!(first.status(), AccountStatus::Online);
    }
}
