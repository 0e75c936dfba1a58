//! Kubernetes metastore discovery.
//!
//! Resolves a cluster target spec into the set of metastore peer addresses
//! and re-publishes the full set to the subscriber on every endpoint change.
//! The Kubernetes watch itself is external; callers feed endpoint updates in
//! through [`KubeDiscovery::resolved`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use url::Url;

/// Errors returned while parsing a discovery target.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("target {0:?} does not parse as a URL: {1}")]
    BadUrl(String, url::ParseError),

    #[error("target {0:?} must specify a service")]
    MissingService(String),

    #[error("target {0:?} must specify a namespace")]
    MissingNamespace(String),

    #[error("target {0:?} must specify a port")]
    MissingPort(String),
}

/// The parsed `(service, namespace, port)` of a discovery target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub service: String,
    pub namespace: String,
    pub port: String,
}

/// A resolved metastore peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    /// `ip:port`, for dialing.
    pub resolved_address: String,
    /// Stable peer identity:
    /// `<pod>.<service>.<namespace>.svc.cluster.local.:<port>`.
    pub server_id: String,
}

/// A subset of a Kubernetes `Endpoints` object.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub subsets: Vec<EndpointSubset>,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointSubset {
    pub addresses: Vec<EndpointAddress>,
    pub ports: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct EndpointAddress {
    pub ip: String,
    /// Name of the pod backing this address.
    pub target_ref_name: String,
}

/// Receives the full current server set on every change.
pub trait Updates: Send + Sync {
    fn servers(&self, servers: Vec<Server>);
}

/// Parse a discovery target spec. Three forms are accepted:
///
/// * `scheme:///service.namespace:port`
/// * `scheme://namespace/service:port`
/// * `scheme://service.namespace:port`
pub fn parse_resolver_target(target: &str) -> Result<TargetInfo, DiscoveryError> {
    let url =
        Url::parse(target).map_err(|e| DiscoveryError::BadUrl(target.to_string(), e))?;
    let host = url.host_str().unwrap_or("");
    let endpoint = url.path().trim_start_matches('/');

    let (service, port, namespace) = if host.is_empty() {
        // scheme:///service.namespace:port
        split_service_port_namespace(endpoint)
    } else if url.port().is_none() && !endpoint.is_empty() {
        // scheme://namespace/service:port
        let (service, port, _) = split_service_port_namespace(endpoint);
        (service, port, host.to_string())
    } else {
        // scheme://service.namespace:port
        let authority = match url.port() {
            Some(p) => format!("{host}:{p}"),
            None => host.to_string(),
        };
        split_service_port_namespace(&authority)
    };

    if service.is_empty() {
        return Err(DiscoveryError::MissingService(target.to_string()));
    }
    if namespace.is_empty() {
        return Err(DiscoveryError::MissingNamespace(target.to_string()));
    }
    if port.is_empty() {
        return Err(DiscoveryError::MissingPort(target.to_string()));
    }
    Ok(TargetInfo {
        service,
        namespace,
        port,
    })
}

/// Split `service.namespace[.anything]:port` into its parts. Fully-qualified
/// service names are tolerated; everything past the namespace is ignored.
fn split_service_port_namespace(hpn: &str) -> (String, String, String) {
    let (mut service, port) = match hpn.rsplit_once(':') {
        Some((s, p)) => (s.to_string(), p.to_string()),
        None => (hpn.to_string(), String::new()),
    };
    let mut namespace = String::new();
    let split = service.split_once('.').map(|(svc, rest)| {
        let ns = rest.split('.').next().unwrap_or("");
        (svc.to_string(), ns.to_string())
    });
    if let Some((svc, ns)) = split {
        service = svc;
        namespace = ns;
    }
    (service, port, namespace)
}

#[derive(Debug, Default)]
struct DiscoveryState {
    servers: Vec<Server>,
    subscriber: Option<Arc<dyn Updates>>,
}

impl std::fmt::Debug for dyn Updates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Updates")
    }
}

/// Tracks the resolved metastore peer set for one target.
#[derive(Debug)]
pub struct KubeDiscovery {
    target: TargetInfo,
    state: Mutex<DiscoveryState>,
}

impl KubeDiscovery {
    /// Parse the target and start with an empty peer set.
    pub fn new(target: &str) -> Result<Self, DiscoveryError> {
        let target = parse_resolver_target(target)?;
        info!(
            service = %target.service,
            namespace = %target.namespace,
            port = %target.port,
            "parsed discovery target"
        );
        Ok(Self {
            target,
            state: Mutex::new(DiscoveryState::default()),
        })
    }

    pub fn target(&self) -> &TargetInfo {
        &self.target
    }

    /// Register the subscriber, immediately publishing the current set.
    pub fn subscribe(&self, subscriber: Arc<dyn Updates>) {
        let mut state = self.state.lock();
        subscriber.servers(state.servers.clone());
        state.subscriber = Some(subscriber);
    }

    /// Drop the subscriber.
    pub fn close(&self) {
        self.state.lock().subscriber = None;
    }

    /// Feed an endpoints update from the external watch. Converts it to the
    /// server set and re-publishes to the subscriber.
    pub fn resolved(&self, endpoints: Endpoints) {
        let servers = convert_endpoints(&endpoints, &self.target);
        debug!(count = servers.len(), "resolved metastore endpoints");
        let mut state = self.state.lock();
        state.servers = servers.clone();
        if let Some(subscriber) = &state.subscriber {
            subscriber.servers(servers);
        }
    }
}

/// Filter endpoint ports to the configured one and produce the server set.
fn convert_endpoints(endpoints: &Endpoints, target: &TargetInfo) -> Vec<Server> {
    let mut servers = Vec::new();
    for subset in &endpoints.subsets {
        for addr in &subset.addresses {
            for port in &subset.ports {
                if port.to_string() != target.port {
                    continue;
                }
                let server_id = format!(
                    "{}.{}.{}.svc.cluster.local.:{}",
                    addr.target_ref_name, target.service, target.namespace, port
                );
                servers.push(Server {
                    resolved_address: format!("{}:{}", addr.ip, port),
                    server_id,
                });
            }
        }
    }
    servers
}
