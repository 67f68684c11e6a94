use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use serde::Deserialize;
use serde_json::Value;

use crate::catalog::ErrorCatalog;
use crate::error::ConfigError;
use crate::transport::CloseEvent;

/// Method code of the server's "authentication accepted" message.
pub const DEFAULT_HANDSHAKE_METHOD: i64 = 20000;

/// Per-call budget used when the configuration does not set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Side-channel notification for every failure the engine observes.
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Invoked whenever a service's transport closes, cleanly or not.
pub type DisconnectCallback = Arc<dyn Fn(&CloseEvent) + Send + Sync>;

/// Receives the full payload of an unsolicited event.
pub type SubscriptionHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// How failures without a usable sequence number are attributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributionMode {
    /// Only the carried `seq` identifies the failed call.
    #[default]
    Sequence,
    /// Fall back to the service's single outstanding call when `seq` does not
    /// match; refuse to guess when several are outstanding.
    SoleOutstanding,
}

/// Name and positional parameter layout of one remote method.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<String>,
}

impl MethodInfo {
    pub fn new<I, S>(name: impl Into<String>, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            parameters: parameters.into_iter().map(Into::into).collect(),
        }
    }
}

/// Static description of one remote service.
#[derive(Clone, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Address the transport connects to unless overridden at connect time.
    #[builder(into)]
    pub remote: String,

    /// Wire code (string-encoded integer) to method description.
    #[serde(default)]
    #[builder(default)]
    pub methods: HashMap<String, MethodInfo>,

    /// Resource scheme to event handler.
    #[serde(skip)]
    #[builder(default)]
    pub subscriptions: HashMap<String, SubscriptionHandler>,

    #[serde(skip)]
    pub on_disconnect: Option<DisconnectCallback>,
}

impl ServiceConfig {
    /// Add a method under its wire code.
    pub fn with_method(mut self, code: impl Into<String>, method: MethodInfo) -> Self {
        self.methods.insert(code.into(), method);
        self
    }

    /// Route events whose resource scheme is `scheme` to `handler`.
    pub fn with_subscription<F>(mut self, scheme: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscriptions.insert(scheme.into(), Arc::new(handler));
        self
    }

    /// Set the callback invoked when the transport closes.
    pub fn with_on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CloseEvent) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.subscriptions.keys().collect();
        schemes.sort();
        f.debug_struct("ServiceConfig")
            .field("remote", &self.remote)
            .field("methods", &self.methods)
            .field("subscriptions", &schemes)
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

/// Configuration for the adapter, supplied once.
#[derive(Clone, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    /// Per-call timeout budget in milliseconds.
    #[serde(default = "default_timeout_ms")]
    #[builder(default = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    #[builder(default)]
    pub services: HashMap<String, ServiceConfig>,

    #[serde(default)]
    #[builder(default)]
    pub errors: ErrorCatalog,

    /// Method code that marks the handshake acknowledgement.
    #[serde(default = "default_handshake_method")]
    #[builder(default = DEFAULT_HANDSHAKE_METHOD)]
    pub handshake_method: i64,

    #[serde(default)]
    #[builder(default)]
    pub attribution: AttributionMode,

    #[serde(skip)]
    pub on_error: Option<ErrorCallback>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_handshake_method() -> i64 {
    DEFAULT_HANDSHAKE_METHOD
}

impl AdapterConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Add or replace a service.
    pub fn with_service(mut self, name: impl Into<String>, service: ServiceConfig) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    /// Set the global error callback.
    pub fn with_on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Attach a subscription handler to an already configured service.
    pub fn with_subscription<F>(
        mut self,
        service: &str,
        scheme: impl Into<String>,
        handler: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let entry = self
            .services
            .get_mut(service)
            .ok_or_else(|| ConfigError::UnknownService(service.to_string()))?;
        entry.subscriptions.insert(scheme.into(), Arc::new(handler));
        Ok(self)
    }

    /// Attach a disconnect callback to an already configured service.
    pub fn with_on_disconnect<F>(mut self, service: &str, callback: F) -> Result<Self, ConfigError>
    where
        F: Fn(&CloseEvent) + Send + Sync + 'static,
    {
        let entry = self
            .services
            .get_mut(service)
            .ok_or_else(|| ConfigError::UnknownService(service.to_string()))?;
        entry.on_disconnect = Some(Arc::new(callback));
        Ok(self)
    }
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("timeout_ms", &self.timeout_ms)
            .field("services", &self.services)
            .field("errors", &self.errors)
            .field("handshake_method", &self.handshake_method)
            .field("attribution", &self.attribution)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A method resolved from a service's table, ready to build requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    pub code: i64,
    pub name: String,
    pub parameters: Vec<String>,
}

impl MethodSpec {
    /// Project a parameter record into the declared positional order.
    ///
    /// Names missing from the record become `null` so positions stay aligned.
    pub fn project(&self, record: &serde_json::Map<String, Value>) -> Vec<Value> {
        self.parameters
            .iter()
            .map(|name| record.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// Name and code lookups for one service, built once at configuration time.
#[derive(Debug, Default)]
pub(crate) struct MethodTable {
    by_name: HashMap<String, Arc<MethodSpec>>,
    by_code: HashMap<i64, Arc<MethodSpec>>,
}

impl MethodTable {
    pub(crate) fn build(service: &str, config: &ServiceConfig) -> Result<Self, ConfigError> {
        let mut table = MethodTable::default();
        for (code, info) in &config.methods {
            let parsed = code
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidWireCode {
                    service: service.to_string(),
                    code: code.clone(),
                })?;
            let spec = Arc::new(MethodSpec {
                code: parsed,
                name: info.name.clone(),
                parameters: info.parameters.clone(),
            });
            table.by_name.insert(info.name.clone(), Arc::clone(&spec));
            table.by_code.insert(parsed, spec);
        }
        Ok(table)
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<&Arc<MethodSpec>> {
        self.by_name.get(name)
    }

    pub(crate) fn by_code(&self, code: i64) -> Option<&Arc<MethodSpec>> {
        self.by_code.get(&code)
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOC: &str = r#"{
        "timeoutMs": 100,
        "services": {
            "app": {
                "remote": "wss://example.test/ws",
                "methods": {
                    "10001": { "name": "ping", "parameters": [] },
                    "10002": { "name": "order", "parameters": ["symbol", "qty"] }
                }
            }
        },
        "errors": {
            "language": "en",
            "codes": [{ "code": 7, "message": "insufficient funds" }]
        },
        "attribution": "soleOutstanding"
    }"#;

    #[test]
    fn test_parse_document() {
        let config = AdapterConfig::from_json(DOC).unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(100));
        assert_eq!(config.handshake_method, DEFAULT_HANDSHAKE_METHOD);
        assert_eq!(config.attribution, AttributionMode::SoleOutstanding);
        assert_eq!(config.errors.language, "en");

        let app = &config.services["app"];
        assert_eq!(app.remote, "wss://example.test/ws");
        assert_eq!(app.methods["10002"].parameters, vec!["symbol", "qty"]);
        assert!(app.subscriptions.is_empty());
    }

    #[test]
    fn test_defaults_when_fields_missing() {
        let config = AdapterConfig::from_json(r#"{ "services": {} }"#).unwrap();
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.attribution, AttributionMode::Sequence);
        assert!(config.errors.codes.is_empty());
    }

    #[test]
    fn test_malformed_document_is_load_error() {
        let result = AdapterConfig::from_json("{ not json");
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_builder_and_callbacks() {
        let service = ServiceConfig::builder()
            .remote("ws://localhost:9000")
            .build()
            .with_method("10001", MethodInfo::new("ping", Vec::<String>::new()))
            .with_subscription("orders", |_| {});

        let config = AdapterConfig::builder()
            .timeout_ms(250)
            .build()
            .with_service("app", service)
            .with_on_disconnect("app", |_| {})
            .unwrap();

        let app = &config.services["app"];
        assert!(app.on_disconnect.is_some());
        assert!(app.subscriptions.contains_key("orders"));
        assert!(config.with_on_disconnect("missing", |_| {}).is_err());
    }

    #[test]
    fn test_method_table_lookups() {
        let config = AdapterConfig::from_json(DOC).unwrap();
        let table = MethodTable::build("app", &config.services["app"]).unwrap();

        let order = table.by_name("order").unwrap();
        assert_eq!(order.code, 10002);
        assert_eq!(table.by_code(10001).unwrap().name, "ping");
        assert!(table.by_name("missing").is_none());
    }

    #[test]
    fn test_invalid_wire_code_rejected() {
        let service = ServiceConfig::builder()
            .remote("ws://localhost:9000")
            .build()
            .with_method("ping", MethodInfo::new("ping", Vec::<String>::new()));

        let err = MethodTable::build("app", &service).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWireCode { .. }));
    }

    #[test]
    fn test_project_keeps_positions() {
        let spec = MethodSpec {
            code: 10002,
            name: "order".into(),
            parameters: vec!["symbol".into(), "side".into(), "qty".into()],
        };
        let record = json!({ "qty": 3, "symbol": "BTC", "ignored": true });

        let projected = spec.project(record.as_object().unwrap());
        assert_eq!(projected, vec![json!("BTC"), Value::Null, json!(3)]);
    }
}
