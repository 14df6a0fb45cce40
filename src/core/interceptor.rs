use crate::config::models::ConnectionConfig;
use crate::core::connection_url::ParsedConnectionUrl;
use crate::core::error::ConnectError;
use crate::core::token_cache::TokenCache;
use crate::core::types::{
    ConnectionIdentity, ConnectionProperties, PASSWORD_PROPERTY, Token, USER_PROPERTY,
};
use crate::ports::RegionProvider;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

pub const AWS_REGION_PROPERTY: &str = "awsRegion";
pub const REGION_PROPERTY: &str = "region";
pub const AWS_PROFILE_PROPERTY: &str = "awsProfile";
pub const DELEGATE_DRIVER_PROPERTY: &str = "delegateDriver";

/// Always set when TLS is required, overriding the caller.
const FORCED_TLS_PROPERTIES: [(&str, &str); 2] = [("useSSL", "true"), ("requireSSL", "true")];
/// Set when TLS is required and the caller did not choose otherwise.
const DEFAULT_TLS_PROPERTIES: [(&str, &str); 2] = [
    ("enabledTLSProtocols", "TLSv1.2,TLSv1.3"),
    ("verifyServerCertificate", "true"),
];

static RDS_HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.([a-z0-9-]+)\.rds\.amazonaws\.com(?:\.cn)?$")
        .expect("RDS host pattern is a valid regex")
});

/// Region embedded in an RDS endpoint such as `orders.abc123.eu-west-1.rds.amazonaws.com`.
pub fn region_from_rds_host(host: &str) -> Option<String> {
    RDS_HOST_PATTERN
        .captures(&host.to_lowercase())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// A validated connection attempt, before a token has been attached.
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub identity: ConnectionIdentity,
    pub delegate_url: String,
    /// Delegate properties without the password.
    pub properties: ConnectionProperties,
    pub delegate_driver: Option<String>,
}

impl ConnectionRequest {
    pub fn with_token(self, token: Arc<Token>) -> InterceptedConnection {
        let mut properties = self.properties;
        properties.set(PASSWORD_PROPERTY, token.value());
        InterceptedConnection {
            identity: self.identity,
            delegate_url: self.delegate_url,
            properties,
            delegate_driver: self.delegate_driver,
            token,
        }
    }
}

/// What the delegate driver receives: rewritten URL plus properties with the token as password.
#[derive(Debug, Clone)]
pub struct InterceptedConnection {
    pub identity: ConnectionIdentity,
    pub delegate_url: String,
    pub properties: ConnectionProperties,
    pub delegate_driver: Option<String>,
    pub token: Arc<Token>,
}

pub struct ConnectionInterceptor {
    settings: ConnectionConfig,
    token_cache: Arc<TokenCache>,
    region_provider: Arc<dyn RegionProvider>,
}

impl ConnectionInterceptor {
    pub fn new(
        settings: ConnectionConfig,
        token_cache: Arc<TokenCache>,
        region_provider: Arc<dyn RegionProvider>,
    ) -> Self {
        Self {
            settings,
            token_cache,
            region_provider,
        }
    }

    pub fn wrapper_prefix(&self) -> &str {
        &self.settings.wrapper_prefix
    }

    pub fn accepts_url(&self, url: &str) -> bool {
        url.starts_with(&self.settings.wrapper_prefix)
    }

    /// Parses and validates a wrapper URL. Never touches the token cache.
    pub async fn prepare(
        &self,
        url: &str,
        properties: &ConnectionProperties,
    ) -> Result<ConnectionRequest, ConnectError> {
        let parsed = ParsedConnectionUrl::parse(url, &self.settings.wrapper_prefix)?;
        let effective = parsed.effective_properties(url, properties)?;

        let username = non_empty(effective.get(USER_PROPERTY))
            .ok_or_else(|| ConnectError::malformed(url, "missing user"))?
            .to_string();

        let port = parsed
            .port
            .or_else(|| self.settings.default_ports.get(&parsed.scheme).copied())
            .ok_or_else(|| {
                ConnectError::malformed(
                    url,
                    format!("missing port and no default port for '{}'", parsed.scheme),
                )
            })?;

        let profile = self.profile_from(&effective);
        let region = self
            .resolve_region(&parsed.host, &effective, profile.as_deref())
            .await?;

        let identity = ConnectionIdentity::new(
            parsed.host.clone(),
            port,
            region,
            username.clone(),
            parsed.scheme.clone(),
        )
        .with_profile(profile);

        let mut delegate_properties = properties.clone();
        delegate_properties.remove(PASSWORD_PROPERTY);
        delegate_properties.set(USER_PROPERTY, username);
        for (key, value) in &self.settings.default_properties {
            delegate_properties.set_if_absent(key, value);
        }
        if self.requires_tls(&parsed.scheme) {
            apply_tls_properties(&mut delegate_properties);
        }

        let request = ConnectionRequest {
            identity,
            delegate_url: parsed.delegate_url(&self.settings.delegate_prefix),
            properties: delegate_properties,
            delegate_driver: non_empty(effective.get(DELEGATE_DRIVER_PROPERTY)).map(String::from),
        };
        debug!(
            identity = %request.identity,
            delegate_url = %request.delegate_url,
            properties = ?request.properties,
            "Prepared IAM connection request"
        );
        Ok(request)
    }

    pub async fn intercept(
        &self,
        url: &str,
        properties: &ConnectionProperties,
    ) -> Result<InterceptedConnection, ConnectError> {
        let request = self.prepare(url, properties).await?;
        let token = self
            .token_cache
            .get_token(&request.identity)
            .await
            .map_err(|source| ConnectError::Token {
                identity: request.identity.to_string(),
                source,
            })?;
        Ok(request.with_token(token))
    }

    fn requires_tls(&self, scheme: &str) -> bool {
        self.settings.require_tls
            && self
                .settings
                .tls_schemes
                .iter()
                .any(|s| s.eq_ignore_ascii_case(scheme))
    }

    fn profile_from(&self, effective: &ConnectionProperties) -> Option<String> {
        non_empty(effective.get(AWS_PROFILE_PROPERTY))
            .or_else(|| {
                self.settings
                    .password_as_profile
                    .then(|| non_empty(effective.get(PASSWORD_PROPERTY)))
                    .flatten()
            })
            .map(String::from)
    }

    async fn resolve_region(
        &self,
        host: &str,
        effective: &ConnectionProperties,
        profile: Option<&str>,
    ) -> Result<String, ConnectError> {
        if let Some(region) = non_empty(effective.get(AWS_REGION_PROPERTY))
            .or_else(|| non_empty(effective.get(REGION_PROPERTY)))
        {
            return Ok(region.to_string());
        }
        if let Some(region) = region_from_rds_host(host) {
            debug!(host, %region, "Region taken from RDS host name");
            return Ok(region);
        }
        if let Some(region) = &self.settings.default_region {
            return Ok(region.clone());
        }
        if let Some(region) = self.region_provider.default_region(profile).await {
            debug!(host, %region, "Region taken from the AWS default region chain");
            return Ok(region);
        }
        Err(ConnectError::UnresolvedRegion {
            host: host.to_string(),
        })
    }
}

fn apply_tls_properties(properties: &mut ConnectionProperties) {
    for (key, value) in FORCED_TLS_PROPERTIES {
        if let Some(previous) = properties.set(key, value).filter(|p| p != value) {
            warn!(property = key, %previous, "Overriding caller setting, IAM auth requires TLS");
        }
    }
    for (key, value) in DEFAULT_TLS_PROPERTIES {
        properties.set_if_absent(key, value);
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
