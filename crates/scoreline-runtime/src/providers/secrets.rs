//! Secure credential handling for provider API keys.
//!
//! Keys pass through a lot of logging-heavy code (circuit transitions,
//! request failures, config dumps), so they are wrapped the moment they
//! are loaded: `Debug` prints `[REDACTED]`, the value is zeroed on drop,
//! and reading it requires an explicit `expose()` at the call site.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::ProviderError;

/// A securely-stored API key.
pub struct ProviderCredential {
    value: SecretString,
    env_var: String,
}

impl ProviderCredential {
    /// Load a credential from an environment variable.
    ///
    /// Missing keys are a configuration error surfaced at registry build
    /// time, not at the first provider call mid-pipeline.
    pub fn from_env(env_var: &str) -> Result<Self, ProviderError> {
        let value = std::env::var(env_var).map_err(|_| {
            ProviderError::NotConfigured(format!("environment variable '{env_var}' is not set"))
        })?;
        Ok(Self {
            value: SecretString::from(value),
            env_var: env_var.to_string(),
        })
    }

    /// Construct from a raw value (tests, programmatic wiring).
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            env_var: "<programmatic>".to_string(),
        }
    }

    /// Expose the key for an HTTP header. The only way to read the value.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("value", &"[REDACTED]")
            .field("env_var", &self.env_var)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_value() {
        let cred = ProviderCredential::from_value("sk-very-secret");
        let debug = format!("{cred:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_expose_returns_value() {
        let cred = ProviderCredential::from_value("sk-very-secret");
        assert_eq!(cred.expose(), "sk-very-secret");
        assert!(!cred.is_empty());
    }

    #[test]
    fn test_missing_env_is_not_configured() {
        let err = ProviderCredential::from_env("SCORELINE_TEST_NO_SUCH_VAR").unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
