use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Connection settings for the warehouse Postgres instance.
///
/// This intentionally does not implement `Serialize` to avoid accidentally leaking the
/// password into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectionConfig {
    /// Host of the warehouse.
    pub host: String,
    /// Port of the warehouse.
    pub port: u16,
    /// Database name to connect to.
    pub name: String,
    /// Username used for authentication.
    pub username: String,
    /// Optional password used for authentication.
    pub password: Option<SecretString>,
    /// TLS settings for the connection.
    #[serde(default = "TlsConfig::disabled")]
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    /// Validates the connection settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tls.validate()
    }
}

/// TLS settings for warehouse connections.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    /// Whether TLS is required for the connection.
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    /// Returns a configuration with TLS turned off.
    pub fn disabled() -> Self {
        Self {
            trusted_root_certs: String::new(),
            enabled: false,
        }
    }

    /// Validates that enabled TLS comes with trust anchors.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.trim().is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_disabled_passes_validation() {
        assert!(TlsConfig::disabled().validate().is_ok());
    }

    #[test]
    fn tls_enabled_without_roots_fails_validation() {
        let tls = TlsConfig {
            trusted_root_certs: String::new(),
            enabled: true,
        };
        assert!(matches!(
            tls.validate(),
            Err(ValidationError::MissingTrustedRootCerts)
        ));
    }
}
