//! Service discovery lookup used to find the next hop of a relay.

use crate::config::RouteConfig;
use crate::error::RelayError;
use std::collections::HashMap;
use std::fmt;

/// Host and port of a relay endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// URI understood by tonic endpoints.
    pub fn uri(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolves a service identity to the endpoint serving it.
pub trait ServiceLocator: Send + Sync {
    fn resolve(&self, service_name: &str, service_version: &str)
        -> Result<ServiceEndpoint, RelayError>;
}

/// Locator backed by a fixed route table.
///
/// Lookups try an exact `(name, version)` route, then a route registered for
/// the name with version `*`, then the fallback endpoint (usually the sidecar).
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    routes: HashMap<(String, String), ServiceEndpoint>,
    fallback: Option<ServiceEndpoint>,
}

const ANY_VERSION: &str = "*";

impl StaticLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, endpoint: ServiceEndpoint) -> Self {
        self.fallback = Some(endpoint);
        self
    }

    pub fn with_route(
        mut self,
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        endpoint: ServiceEndpoint,
    ) -> Self {
        self.routes
            .insert((service_name.into(), service_version.into()), endpoint);
        self
    }

    pub fn from_routes(routes: &[RouteConfig], fallback: Option<ServiceEndpoint>) -> Self {
        let routes = routes
            .iter()
            .map(|r| {
                (
                    (r.service_name.clone(), r.service_version.clone()),
                    ServiceEndpoint::new(r.host.clone(), r.port),
                )
            })
            .collect();
        Self { routes, fallback }
    }
}

impl ServiceLocator for StaticLocator {
    fn resolve(
        &self,
        service_name: &str,
        service_version: &str,
    ) -> Result<ServiceEndpoint, RelayError> {
        let exact = (service_name.to_string(), service_version.to_string());
        let any = (service_name.to_string(), ANY_VERSION.to_string());
        self.routes
            .get(&exact)
            .or_else(|| self.routes.get(&any))
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| {
                RelayError::discovery(format!(
                    "no endpoint for service {}@{}",
                    service_name, service_version
                ))
            })
    }
}
