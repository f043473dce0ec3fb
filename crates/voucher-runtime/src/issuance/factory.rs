//! Issuer factory pattern for selecting a backend from configuration.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = IssuerRegistry::with_defaults();
//! let issuer = registry.create("http", &serde_json::json!({
//!     "endpoint": "https://mywebsite.com/amt-voucher/post-voucher.php"
//! }))?;
//! ```
//!
//! The registry fills keys missing from the config with the factory's
//! defaults, then validates, then creates.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{IssuanceError, VoucherIssuer};

/// Factory for creating issuance backends from configuration.
pub trait IssuerFactory: Send + Sync {
    /// Unique identifier for this backend, e.g. "http" or "memory".
    fn issuer_type(&self) -> &'static str;

    /// Create a backend from a config that already passed `validate_config`.
    fn create(&self, config: &JsonValue) -> Result<Arc<dyn VoucherIssuer>, IssuanceError>;

    fn validate_config(&self, config: &JsonValue) -> Result<(), IssuanceError>;

    /// Values used for keys the config leaves out.
    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    fn description(&self) -> &'static str;
}

/// One registered backend, as listed by [`IssuerRegistry::catalog`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssuerInfo {
    pub issuer_type: &'static str,
    pub description: &'static str,
    pub defaults: JsonValue,
}

/// Registry of available issuer factories, keyed by type name.
#[derive(Default)]
pub struct IssuerRegistry {
    factories: BTreeMap<String, Arc<dyn IssuerFactory>>,
}

impl IssuerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any with the same type.
    pub fn register(&mut self, factory: Arc<dyn IssuerFactory>) {
        self.factories
            .insert(factory.issuer_type().to_string(), factory);
    }

    pub fn create(
        &self,
        issuer_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn VoucherIssuer>, IssuanceError> {
        let factory = self.factory(issuer_type)?;
        let config = with_defaults(factory.as_ref(), config);
        factory.validate_config(&config)?;
        factory.create(&config)
    }

    /// Check a config without building the backend.
    pub fn validate(&self, issuer_type: &str, config: &JsonValue) -> Result<(), IssuanceError> {
        let factory = self.factory(issuer_type)?;
        factory.validate_config(&with_defaults(factory.as_ref(), config))
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Every registered backend with its description and defaults.
    pub fn catalog(&self) -> Vec<IssuerInfo> {
        self.factories
            .values()
            .map(|f| IssuerInfo {
                issuer_type: f.issuer_type(),
                description: f.description(),
                defaults: f.default_config(),
            })
            .collect()
    }

    fn factory(&self, issuer_type: &str) -> Result<&Arc<dyn IssuerFactory>, IssuanceError> {
        self.factories.get(issuer_type).ok_or_else(|| {
            IssuanceError::NotConfigured(format!(
                "Unknown issuer type: '{}'. Available: {:?}",
                issuer_type,
                self.available_types()
            ))
        })
    }

    /// Registry with every built-in backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::MemoryIssuerFactory));
        #[cfg(feature = "http")]
        registry.register(Arc::new(super::HttpIssuerFactory));
        registry
    }
}

fn with_defaults(factory: &dyn IssuerFactory, config: &JsonValue) -> JsonValue {
    let mut merged = factory.default_config();
    match (merged.as_object_mut(), config.as_object()) {
        (Some(defaults), Some(given)) => {
            for (key, value) in given {
                if !value.is_null() {
                    defaults.insert(key.clone(), value.clone());
                }
            }
            merged
        }
        _ => config.clone(),
    }
}

impl std::fmt::Debug for IssuerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerRegistry")
            .field("issuers", &self.available_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::IssuanceRequest;
    use async_trait::async_trait;

    struct FixedIssuer {
        body: String,
    }

    #[async_trait]
    impl VoucherIssuer for FixedIssuer {
        async fn issue(&self, _request: &IssuanceRequest) -> Result<String, IssuanceError> {
            Ok(self.body.clone())
        }

        fn name(&self) -> &str {
            &self.body
        }
    }

    /// Requires a `body`; defaults it to "FIXED".
    struct FixedIssuerFactory;

    impl IssuerFactory for FixedIssuerFactory {
        fn issuer_type(&self) -> &'static str {
            "fixed"
        }

        fn create(&self, config: &JsonValue) -> Result<Arc<dyn VoucherIssuer>, IssuanceError> {
            let body = config["body"].as_str().unwrap_or_default().to_string();
            Ok(Arc::new(FixedIssuer { body }))
        }

        fn validate_config(&self, config: &JsonValue) -> Result<(), IssuanceError> {
            match config["body"].as_str() {
                Some(_) => Ok(()),
                None => Err(IssuanceError::NotConfigured("body is required".into())),
            }
        }

        fn default_config(&self) -> JsonValue {
            serde_json::json!({ "body": "FIXED" })
        }

        fn description(&self) -> &'static str {
            "Always answers with the same body"
        }
    }

    fn registry() -> IssuerRegistry {
        let mut registry = IssuerRegistry::new();
        registry.register(Arc::new(FixedIssuerFactory));
        registry
    }

    #[test]
    fn test_create_applies_defaults() {
        let registry = registry();
        assert_eq!(registry.create("fixed", &serde_json::json!({})).unwrap().name(), "FIXED");
        assert_eq!(
            registry.create("fixed", &serde_json::json!({ "body": "X" })).unwrap().name(),
            "X"
        );
        assert_eq!(
            registry.create("fixed", &serde_json::json!({ "body": null })).unwrap().name(),
            "FIXED"
        );
    }

    #[test]
    fn test_validate_runs_before_create() {
        let registry = registry();
        let bad = serde_json::json!({ "body": 7 });
        assert!(registry.validate("fixed", &bad).is_err());
        assert!(registry.create("fixed", &bad).is_err());
        assert!(registry.validate("fixed", &serde_json::json!({})).is_ok());
    }

    #[test]
    fn test_unknown_issuer_lists_available() {
        let registry = IssuerRegistry::with_defaults();
        match registry.create("carrier-pigeon", &serde_json::json!({})) {
            Err(IssuanceError::NotConfigured(msg)) => {
                assert!(msg.contains("carrier-pigeon"));
                assert!(msg.contains("memory"));
            }
            _ => panic!("Expected NotConfigured error"),
        }
    }

    #[test]
    fn test_catalog_lists_builtins() {
        let catalog = IssuerRegistry::with_defaults().catalog();
        let memory = catalog.iter().find(|i| i.issuer_type == "memory").unwrap();
        assert!(!memory.description.is_empty());
        assert_eq!(memory.defaults["refuse"], false);

        #[cfg(feature = "http")]
        {
            let http = catalog.iter().find(|i| i.issuer_type == "http").unwrap();
            assert_eq!(http.defaults["timeout"], "15s");
        }
    }

    #[test]
    fn test_debug_lists_types() {
        assert!(format!("{:?}", registry()).contains("fixed"));
    }
}
