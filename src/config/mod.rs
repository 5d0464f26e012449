//! Client and server configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration that accepts no origins at all.
//!
//! ```toml
//! allowed_origins = ["https://wallet.example"]
//! target_origin = "https://wallet.example"
//! preserve_requests = false
//! store_namespace = "wallet:"
//!
//! [handshake]
//! ping_interval_ms = 100
//! connect_timeout_ms = 10000
//! liveness_interval_ms = 300
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::origin::OriginPolicy;
use crate::state::StoreKeys;
use crate::timeout::{TimeoutConfig, TimeoutValidationError};

/// Wildcard origin as written in configuration files.
pub const ANY_ORIGIN: &str = "*";

/// Configuration shared by clients and servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Origins messages are accepted from
    pub allowed_origins: Vec<String>,

    /// Accept every origin. Required to use `"*"` in `allowed_origins`.
    pub allow_any_origin: bool,

    /// Origin the in-process client posts to. Defaults to the single entry
    /// of `allowed_origins`; required when there are several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_origin: Option<String>,

    /// Keep registry entries and handlers after a response is consumed
    pub preserve_requests: bool,

    /// Prefix for every session-store key this instance writes
    pub store_namespace: String,

    pub handshake: TimeoutConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_any_origin: false,
            target_origin: None,
            preserve_requests: false,
            store_namespace: String::new(),
            handshake: TimeoutConfig::default(),
        }
    }
}

impl RpcConfig {
    /// Configuration accepting exactly one origin.
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            allowed_origins: vec![origin.into()],
            ..Self::default()
        }
    }

    /// Configuration accepting every origin. See [`OriginPolicy::UnsafeAny`].
    pub fn unsafe_any_origin() -> Self {
        Self {
            allow_any_origin: true,
            ..Self::default()
        }
    }

    pub fn with_preserve_requests(mut self, preserve: bool) -> Self {
        self.preserve_requests = preserve;
        self
    }

    pub fn with_target_origin(mut self, origin: impl Into<String>) -> Self {
        self.target_origin = Some(origin.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.store_namespace = namespace.into();
        self
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: RpcConfig =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.handshake.validate()?;

        if !self.allow_any_origin && self.allowed_origins.iter().any(|o| o == ANY_ORIGIN) {
            return Err(ConfigError::ValidationError(
                "\"*\" in allowed_origins requires allow_any_origin = true".to_string(),
            ));
        }

        if let Some(empty) = self.allowed_origins.iter().find(|o| o.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "allowed_origins contains an empty entry: {:?}",
                empty
            )));
        }

        if let Some(target) = &self.target_origin {
            self.check_target(target)?;
        }

        Ok(())
    }

    fn check_target(&self, target: &str) -> Result<(), ConfigError> {
        if target == ANY_ORIGIN {
            if self.allow_any_origin {
                return Ok(());
            }
            return Err(ConfigError::ValidationError(
                "target_origin = \"*\" requires allow_any_origin = true".to_string(),
            ));
        }
        if !self.origin_policy().allows(target) {
            return Err(ConfigError::ValidationError(format!(
                "target_origin {:?} is not in allowed_origins",
                target
            )));
        }
        Ok(())
    }

    /// Origin messages to the target context are addressed to.
    ///
    /// Never a wildcard unless `allow_any_origin` is set: a target that has
    /// navigated elsewhere must not receive the traffic.
    pub fn post_target_origin(&self) -> Result<String, ConfigError> {
        if let Some(target) = &self.target_origin {
            self.check_target(target)?;
            return Ok(target.clone());
        }
        match self.origin_policy() {
            OriginPolicy::Exact(origin) => Ok(origin),
            OriginPolicy::UnsafeAny => Ok(ANY_ORIGIN.to_string()),
            OriginPolicy::AllowList(origins) => Err(ConfigError::ValidationError(format!(
                "target_origin is required with {} allowed origins",
                origins.len()
            ))),
        }
    }

    pub fn origin_policy(&self) -> OriginPolicy {
        if self.allow_any_origin {
            return OriginPolicy::unsafe_any();
        }
        match self.allowed_origins.as_slice() {
            [single] => OriginPolicy::exact(single.clone()),
            origins => OriginPolicy::allow_list(origins.iter().cloned()),
        }
    }

    pub fn store_keys(&self) -> StoreKeys {
        StoreKeys::new(self.store_namespace.clone())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Timeout(#[from] TimeoutValidationError),
}
