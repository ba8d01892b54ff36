//! Credential handling for HTTP providers.
//!
//! API keys are wrapped in [`secrecy::SecretString`] as soon as they are
//! read, so they never show up in `Debug` or `Display` output, including
//! the run logs.
//!
//! ```ignore
//! let cred = ApiCredential::from_config_or_env(&config, "api_key", "OPENAI_API_KEY", "API key")?;
//! request.bearer_auth(cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Provider configuration block
    Config,
    /// Environment variable
    Environment,
    /// Passed in by code
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// An API key that redacts itself when formatted.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Wrap a raw key.
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Read `config_key` from the provider config, falling back to `env_var`.
    ///
    /// The environment variable name itself can be overridden per model
    /// with an `api_key_env` entry in the config.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = config[config_key].as_str() {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        let env_var = config["api_key_env"].as_str().unwrap_or(env_var);
        if let Ok(value) = std::env::var(env_var) {
            return Ok(Self::new(value, CredentialSource::Environment, name));
        }

        Err(ProviderError::NotConfigured(format!(
            "{} required: set '{}' in config or {} environment variable",
            name, config_key, env_var
        )))
    }

    /// True if either source would yield a credential.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        let env_var = config["api_key_env"].as_str().unwrap_or(env_var);
        config[config_key].as_str().is_some() || std::env::var(env_var).is_ok()
    }

    /// The raw key. Call only where the key is sent.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Check if the credential is empty.
    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    /// Where the key came from.
    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacted() {
        let secret = "sk-local-test-0000";
        let cred = ApiCredential::new(secret, CredentialSource::Programmatic, "Test key");

        assert!(!format!("{:?}", cred).contains(secret));
        let display = format!("{}", cred);
        assert!(!display.contains(secret));
        assert!(display.contains("[REDACTED]"));
        assert_eq!(cred.expose(), secret);
    }

    #[test]
    fn test_config_wins_over_env() {
        std::env::set_var("TANDEM_TEST_KEY_PRIORITY", "env-key");
        let config = serde_json::json!({ "api_key": "config-key" });
        let cred =
            ApiCredential::from_config_or_env(&config, "api_key", "TANDEM_TEST_KEY_PRIORITY", "Test")
                .unwrap();
        assert_eq!(cred.expose(), "config-key");
        assert_eq!(cred.source(), CredentialSource::Config);
        std::env::remove_var("TANDEM_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_env_var_override() {
        std::env::set_var("TANDEM_TEST_KEY_CUSTOM", "custom-key");
        let config = serde_json::json!({ "api_key_env": "TANDEM_TEST_KEY_CUSTOM" });
        let cred =
            ApiCredential::from_config_or_env(&config, "api_key", "TANDEM_TEST_UNSET_1", "Test")
                .unwrap();
        assert_eq!(cred.expose(), "custom-key");
        assert_eq!(cred.source(), CredentialSource::Environment);
        std::env::remove_var("TANDEM_TEST_KEY_CUSTOM");
    }

    #[test]
    fn test_missing_credential_names_sources() {
        let err = ApiCredential::from_config_or_env(
            &serde_json::json!({}),
            "api_key",
            "TANDEM_TEST_UNSET_2",
            "Test key",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("api_key"));
        assert!(message.contains("TANDEM_TEST_UNSET_2"));
        assert!(!ApiCredential::is_available(
            &serde_json::json!({}),
            "api_key",
            "TANDEM_TEST_UNSET_2"
        ));
    }
}
