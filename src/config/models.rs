use crate::core::error::ConfigError;
use crate::core::types::TOKEN_LIFETIME;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.refresh_margin >= TOKEN_LIFETIME {
            return Err(ConfigError::InvalidValue {
                field: "token.refresh_margin".to_string(),
                message: format!(
                    "must be shorter than the token lifetime of {}s",
                    TOKEN_LIFETIME.as_secs()
                ),
            });
        }
        if self.credentials.chain.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "credentials.chain".to_string(),
                message: "at least one credential source is required".to_string(),
            });
        }
        for (idx, kind) in self.credentials.chain.iter().enumerate() {
            if self.credentials.chain[..idx].contains(kind) {
                return Err(ConfigError::InvalidValue {
                    field: "credentials.chain".to_string(),
                    message: format!("source '{}' is listed more than once", kind.as_str()),
                });
            }
        }
        if self.connection.wrapper_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "connection.wrapper_prefix".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if let Some(region) = &self.connection.default_region {
            if region.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "connection.default_region".to_string(),
                    message: "must not be blank when set".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    /// Tokens closer than this to their expiry are regenerated.
    #[serde(with = "humantime_serde", default = "default_token_refresh_margin")]
    pub refresh_margin: Duration,
}

fn default_token_refresh_margin() -> Duration {
    Duration::from_secs(60)
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_margin: default_token_refresh_margin(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialSourceKind {
    Profile,
    Environment,
    Container,
    Instance,
}

impl CredentialSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSourceKind::Profile => "profile",
            CredentialSourceKind::Environment => "environment",
            CredentialSourceKind::Container => "container-metadata",
            CredentialSourceKind::Instance => "instance-metadata",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CredentialsConfig {
    /// Profile used when a connection does not name one.
    pub profile: Option<String>,
    /// Replaces the default `~/.aws/credentials` file for profile lookups.
    pub credentials_file: Option<PathBuf>,
    #[serde(default = "default_credential_chain")]
    pub chain: Vec<CredentialSourceKind>,
    /// Cached signing credentials are re-resolved this long before they expire.
    #[serde(with = "humantime_serde", default = "default_credential_refresh_margin")]
    pub refresh_margin: Duration,
}

fn default_credential_chain() -> Vec<CredentialSourceKind> {
    vec![
        CredentialSourceKind::Profile,
        CredentialSourceKind::Environment,
        CredentialSourceKind::Container,
        CredentialSourceKind::Instance,
    ]
}

fn default_credential_refresh_margin() -> Duration {
    Duration::from_secs(5 * 60)
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            profile: None,
            credentials_file: None,
            chain: default_credential_chain(),
            refresh_margin: default_credential_refresh_margin(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    #[serde(default = "default_wrapper_prefix")]
    pub wrapper_prefix: String,
    #[serde(default = "default_delegate_prefix")]
    pub delegate_prefix: String,
    pub default_region: Option<String>,
    /// Treat a supplied `password` as the AWS profile name.
    #[serde(default = "default_true")]
    pub password_as_profile: bool,
    /// IAM auth only works over TLS; force it for the `tls_schemes` drivers.
    #[serde(default = "default_true")]
    pub require_tls: bool,
    #[serde(default = "default_tls_schemes")]
    pub tls_schemes: Vec<String>,
    #[serde(default = "default_ports")]
    pub default_ports: BTreeMap<String, u16>,
    /// Added to the delegate properties when the caller did not set them.
    #[serde(default)]
    pub default_properties: BTreeMap<String, String>,
}

fn default_wrapper_prefix() -> String {
    "jdbc:iam:".to_string()
}
fn default_delegate_prefix() -> String {
    "jdbc:".to_string()
}
fn default_true() -> bool {
    true
}
fn default_tls_schemes() -> Vec<String> {
    vec!["mysql".to_string(), "mariadb".to_string()]
}
fn default_ports() -> BTreeMap<String, u16> {
    BTreeMap::from([("mysql".to_string(), 3306), ("mariadb".to_string(), 3306)])
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            wrapper_prefix: default_wrapper_prefix(),
            delegate_prefix: default_delegate_prefix(),
            default_region: None,
            password_as_profile: default_true(),
            default_ports: default_ports(),
            default_properties: BTreeMap::new(),
            require_tls: default_true(),
            tls_schemes: default_tls_schemes(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_log_format() -> LogFormat {
    LogFormat::Compact
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
