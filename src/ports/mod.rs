use crate::config::models::AppConfig;
use crate::core::error::{ConfigError, DriverError, TokenError};
use crate::core::types::{AwsCredentials, ConnectionIdentity, ConnectionProperties, Token};
use async_trait::async_trait;
use aws_credential_types::provider::error::CredentialsError;
use std::path::Path;

/// One link of the credential chain.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &str;

    /// `profile` is the profile explicitly requested for the connection, if any.
    async fn provide(&self, profile: Option<&str>) -> Result<AwsCredentials, CredentialsError>;
}

#[async_trait]
pub trait AuthTokenGenerator: Send + Sync {
    async fn generate_token(&self, identity: &ConnectionIdentity) -> Result<Token, TokenError>;
}

/// Fallback region lookup used when neither the URL nor the host name carries one.
#[async_trait]
pub trait RegionProvider: Send + Sync {
    async fn default_region(&self, profile: Option<&str>) -> Option<String>;
}

/// A real driver that speaks the wire protocol for one URL scheme.
#[async_trait]
pub trait DelegateDriver: Send + Sync {
    type Connection: Send;

    fn name(&self) -> &str;

    /// Scheme in the delegated URL this driver is registered for, e.g. `mysql`.
    fn scheme(&self) -> &str;

    fn accepts_url(&self, url: &str) -> bool;

    async fn connect(
        &self,
        url: &str,
        properties: &ConnectionProperties,
    ) -> Result<Self::Connection, DriverError>;
}

pub trait ConfigurationStore: Send + Sync {
    fn load_app_config_file(&self, path: &Path) -> Result<AppConfig, ConfigError>;
    fn save_app_config_file(&self, config: &AppConfig, path: &Path) -> Result<(), ConfigError>;
}
