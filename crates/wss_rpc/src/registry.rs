use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::config::{AdapterConfig, DisconnectCallback, MethodTable, ServiceConfig};
use crate::error::ConfigError;
use crate::router::SubscriptionRouter;

/// Validated, immutable view of one configured service.
pub(crate) struct ServiceEntry {
    pub name: String,
    pub remote: String,
    pub methods: MethodTable,
    pub router: SubscriptionRouter,
    pub on_disconnect: Option<DisconnectCallback>,
}

impl ServiceEntry {
    fn build(name: &str, config: &ServiceConfig) -> Result<Self, ConfigError> {
        Url::parse(&config.remote).map_err(|e| ConfigError::InvalidRemote {
            service: name.to_string(),
            remote: config.remote.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name: name.to_string(),
            remote: config.remote.clone(),
            methods: MethodTable::build(name, config)?,
            router: SubscriptionRouter::new(config.subscriptions.clone()),
            on_disconnect: config.on_disconnect.clone(),
        })
    }
}

impl fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("name", &self.name)
            .field("remote", &self.remote)
            .field("methods", &self.methods)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

/// Every configured service, keyed by name.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    services: HashMap<String, Arc<ServiceEntry>>,
}

impl Registry {
    pub fn build(config: &AdapterConfig) -> Result<Self, ConfigError> {
        let services = config
            .services
            .iter()
            .map(|(name, service)| Ok((name.clone(), Arc::new(ServiceEntry::build(name, service)?))))
            .collect::<Result<_, ConfigError>>()?;
        Ok(Self { services })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ServiceEntry>> {
        self.services.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Name of the method with wire code `code`, preferring `service`'s table.
    pub fn method_name(&self, service: &str, code: i64) -> Option<String> {
        let local = self
            .services
            .get(service)
            .and_then(|entry| entry.methods.by_code(code));
        local
            .or_else(|| {
                self.services
                    .values()
                    .find_map(|entry| entry.methods.by_code(code))
            })
            .map(|spec| spec.name.clone())
    }
}
