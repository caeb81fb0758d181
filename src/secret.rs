//! Secret material for signature checks.
//!
//! Filters never read the environment themselves. A [`Secret`] is either the
//! value itself or a name, and names are resolved through a
//! [`SecretProvider`] once, when the filter is built.

use std::collections::HashMap;
use std::fmt;

use crate::error::ConfigError;

/// Looks up secret values by name.
pub trait SecretProvider {
    fn secret(&self, name: &str) -> Option<String>;
}

/// Reads secrets from process environment variables.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvSecrets;

impl SecretProvider for EnvSecrets {
    fn secret(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl SecretProvider for HashMap<String, String> {
    fn secret(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Provider that knows no names. Used when a filter is built without one.
pub(crate) struct NoSecrets;

impl SecretProvider for NoSecrets {
    fn secret(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Secret material as written in configuration.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    /// The secret itself.
    Value(String),
    /// The name to look up in a [`SecretProvider`].
    Named(String),
}

impl Secret {
    pub fn value(secret: impl Into<String>) -> Self {
        Self::Value(secret.into())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// An empty `Value` resolves successfully; the signature check rejects it
    /// per request. An unknown name is a configuration error.
    pub fn resolve(&self, provider: &dyn SecretProvider) -> Result<String, ConfigError> {
        match self {
            Self::Value(v) => Ok(v.clone()),
            Self::Named(name) => provider
                .secret(name)
                .ok_or_else(|| ConfigError::UnresolvedSecret(name.clone())),
        }
    }
}

// Keep secret values out of logs.
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Secret::Value(***)"),
            Self::Named(name) => f.debug_tuple("Secret::Named").field(name).finish(),
        }
    }
}
