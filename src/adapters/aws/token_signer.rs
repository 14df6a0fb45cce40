use crate::adapters::aws::credential_chain::CredentialResolver;
use crate::adapters::aws::types::{
    AwsCredentialsCache, CachedAwsCredentials, CredentialCacheKey, new_credentials_cache,
};
use crate::core::error::TokenError;
use crate::core::types::{AwsCredentials, ConnectionIdentity, TOKEN_LIFETIME, Token};
use crate::ports::AuthTokenGenerator;
use async_trait::async_trait;
use aws_sigv4::http_request::{
    self, SignableBody, SignableRequest, SignatureLocation, SigningSettings,
};
use aws_sigv4::sign::v4::SigningParams;
use aws_smithy_async::time::{SharedTimeSource, TimeSource};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use url::Url;

const SIGNING_SERVICE: &str = "rds-db";
const DB_ACTION: &str = "connect";

/// Presigns `rds-db:connect` requests with SigV4, one token per identity.
pub struct RdsTokenSigner {
    resolver: Arc<CredentialResolver>,
    time_source: SharedTimeSource,
    credentials_cache: AwsCredentialsCache,
    credential_refresh_margin: Duration,
}

impl RdsTokenSigner {
    pub fn new(resolver: Arc<CredentialResolver>, credential_refresh_margin: Duration) -> Self {
        Self {
            resolver,
            time_source: SharedTimeSource::default(),
            credentials_cache: new_credentials_cache(),
            credential_refresh_margin,
        }
    }

    pub fn with_time_source(mut self, time_source: impl TimeSource + 'static) -> Self {
        self.time_source = SharedTimeSource::new(time_source);
        self
    }

    fn generate_credentials_cache_key(profile: Option<&str>) -> CredentialCacheKey {
        match profile {
            Some(name) => format!("aws_profile_{}", name),
            None => "default_chain".to_string(),
        }
    }

    pub async fn sign(&self, identity: &ConnectionIdentity) -> Result<Token, TokenError> {
        let credentials = self.signing_credentials(identity.profile.as_deref()).await?;
        let now = self.time_source.now();
        let value = presign_auth_token(identity, &credentials, now)?;

        info!(
            host = %identity.host,
            port = identity.port,
            region = %identity.region,
            user = %identity.username,
            "Generated RDS IAM auth token"
        );
        Ok(Token::new(value, DateTime::<Utc>::from(now), TOKEN_LIFETIME))
    }

    async fn signing_credentials(&self, profile: Option<&str>) -> Result<AwsCredentials, TokenError> {
        let cache_key = Self::generate_credentials_cache_key(profile);

        if let Some(cached) = self.get_from_cache(&cache_key).await {
            return Ok(cached);
        }

        let resolved = self.resolver.resolve_for_profile(profile).await?;
        let expiry_time = resolved.expiry_time();
        let mut cache_guard = self.credentials_cache.write().await;
        debug!(
            "Storing credentials for key '{}' from {}. Expiry: {:?}",
            cache_key, resolved.source_name, expiry_time
        );
        cache_guard.insert(
            cache_key,
            CachedAwsCredentials {
                credentials: resolved.credentials.clone(),
                source_name: resolved.source_name,
                expiry_time,
            },
        );
        Ok(resolved.credentials)
    }

    async fn get_from_cache(&self, key: &CredentialCacheKey) -> Option<AwsCredentials> {
        let cache_guard = self.credentials_cache.read().await;
        let cached = cache_guard.get(key)?;
        match cached.expiry_time {
            Some(expiry) => {
                let margin = ChronoDuration::from_std(self.credential_refresh_margin).ok()?;
                let refresh_at = expiry.checked_sub_signed(margin)?;
                let now = DateTime::<Utc>::from(self.time_source.now());
                if now < refresh_at {
                    debug!(
                        "Credentials for key '{}' from {} found in cache and are valid.",
                        key, cached.source_name
                    );
                    Some(cached.credentials.clone())
                } else {
                    debug!(
                        "Credentials for key '{}' from {} found in cache but expiring at {}.",
                        key, cached.source_name, expiry
                    );
                    None
                }
            }
            None => {
                debug!(
                    "Static credentials for key '{}' from {} found in cache.",
                    key, cached.source_name
                );
                Some(cached.credentials.clone())
            }
        }
    }
}

#[async_trait]
impl AuthTokenGenerator for RdsTokenSigner {
    async fn generate_token(&self, identity: &ConnectionIdentity) -> Result<Token, TokenError> {
        self.sign(identity).await
    }
}

/// Builds the presigned token value for `identity`, deterministic for a fixed `time`.
pub fn presign_auth_token(
    identity: &ConnectionIdentity,
    credentials: &AwsCredentials,
    time: SystemTime,
) -> Result<String, TokenError> {
    let endpoint = identity.endpoint();

    let mut url = Url::parse(&format!("https://{}/", endpoint))
        .map_err(|e| TokenError::signing(&endpoint, e))?;
    url.query_pairs_mut()
        .append_pair("Action", DB_ACTION)
        .append_pair("DBUser", &identity.username);

    let mut signing_settings = SigningSettings::default();
    signing_settings.expires_in = Some(TOKEN_LIFETIME);
    signing_settings.signature_location = SignatureLocation::QueryParams;

    let signing_identity = credentials.clone().into();
    let signing_params = SigningParams::builder()
        .identity(&signing_identity)
        .region(&identity.region)
        .name(SIGNING_SERVICE)
        .time(time)
        .settings(signing_settings)
        .build()
        .map_err(|e| TokenError::signing(&endpoint, e))?;

    let signable_request = SignableRequest::new(
        "GET",
        url.as_str(),
        std::iter::empty(),
        SignableBody::Bytes(&[]),
    )
    .map_err(|e| TokenError::signing(&endpoint, e))?;

    let (signing_instructions, _signature) =
        http_request::sign(signable_request, &signing_params.into())
            .map_err(|e| TokenError::signing(&endpoint, e))?
            .into_parts();

    for (key, value) in signing_instructions.params() {
        url.query_pairs_mut().append_pair(key, value);
    }

    // Url drops default ports (443); the token must always carry host:port.
    Ok(format!("{}/?{}", endpoint, url.query().unwrap_or_default()))
}
