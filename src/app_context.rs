use crate::adapters::aws::credential_chain::CredentialResolver;
use crate::adapters::aws::region_provider::SdkRegionProvider;
use crate::adapters::aws::token_signer::RdsTokenSigner;
use crate::adapters::config::file_store::TomlFileConfigAdapter;
use crate::config::models::AppConfig;
use crate::core::dispatcher::DriverDispatcher;
use crate::core::driver::IamAuthDriver;
use crate::core::error::ConfigError;
use crate::core::interceptor::ConnectionInterceptor;
use crate::core::token_cache::TokenCache;
use crate::ports::{AuthTokenGenerator, ConfigurationStore, RegionProvider};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// The wired object graph: one resolver, signer, cache and interceptor per process.
pub struct AppContext {
    config: AppConfig,
    resolver: Arc<CredentialResolver>,
    signer: Arc<RdsTokenSigner>,
    token_cache: Arc<TokenCache>,
    interceptor: Arc<ConnectionInterceptor>,
}

impl AppContext {
    pub fn from_config(config: AppConfig) -> Result<Self, ConfigError> {
        Self::with_region_provider(config, Arc::new(SdkRegionProvider::new()))
    }

    pub fn with_region_provider(
        config: AppConfig,
        region_provider: Arc<dyn RegionProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let resolver = Arc::new(CredentialResolver::from_config(&config.credentials));
        debug!(sources = ?resolver.source_names(), "Credential chain configured");

        let signer = Arc::new(RdsTokenSigner::new(
            Arc::clone(&resolver),
            config.credentials.refresh_margin,
        ));
        let token_cache = Arc::new(TokenCache::new(
            Arc::clone(&signer) as Arc<dyn AuthTokenGenerator>,
            config.token.refresh_margin,
        ));
        let interceptor = Arc::new(ConnectionInterceptor::new(
            config.connection.clone(),
            Arc::clone(&token_cache),
            region_provider,
        ));

        info!(
            refresh_margin = ?config.token.refresh_margin,
            wrapper_prefix = %config.connection.wrapper_prefix,
            "IAM auth context initialized"
        );
        Ok(Self {
            config,
            resolver,
            signer,
            token_cache,
            interceptor,
        })
    }

    /// Loads and validates the TOML file at `path`; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = TomlFileConfigAdapter::new().load_app_config_file(path)?;
        Self::from_config(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn resolver(&self) -> Arc<CredentialResolver> {
        Arc::clone(&self.resolver)
    }

    pub fn signer(&self) -> Arc<RdsTokenSigner> {
        Arc::clone(&self.signer)
    }

    pub fn token_cache(&self) -> Arc<TokenCache> {
        Arc::clone(&self.token_cache)
    }

    pub fn interceptor(&self) -> Arc<ConnectionInterceptor> {
        Arc::clone(&self.interceptor)
    }

    pub fn driver<C: Send + 'static>(&self, dispatcher: DriverDispatcher<C>) -> IamAuthDriver<C> {
        IamAuthDriver::new(Arc::clone(&self.interceptor), dispatcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::aws::tests::mock_providers::MockRegionProvider;
    use crate::config::DEFAULT_CONFIG_FILE_NAME;
    use crate::core::types::ConnectionProperties;
    use assert_matches::assert_matches;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.token.refresh_margin = Duration::from_secs(15 * 60);
        assert_matches!(
            AppContext::from_config(config).err(),
            Some(ConfigError::InvalidValue { .. })
        );
    }

    #[tokio::test]
    async fn test_load_applies_file_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[token]\nrefresh_margin = \"2m\"\n\n[connection]\nwrapper_prefix = \"iam:\"\ndelegate_prefix = \"\"\ndefault_region = \"eu-north-1\"\n",
        )
        .unwrap();

        let context = AppContext::load(&path).unwrap();
        assert_eq!(context.config().token.refresh_margin, Duration::from_secs(120));
        assert_eq!(context.token_cache().refresh_margin(), Duration::from_secs(120));

        let interceptor = context.interceptor();
        assert!(interceptor.accepts_url("iam:postgresql://db:5432/app"));
        let request = interceptor
            .prepare("iam:postgresql://app@db:5432/app", &ConnectionProperties::new())
            .await
            .unwrap();
        assert_eq!(request.identity.region, "eu-north-1");
        assert_eq!(request.delegate_url, "postgresql://db:5432/app");
    }

    #[tokio::test]
    async fn test_region_provider_is_consulted_last() {
        let regions = Arc::new(MockRegionProvider::new(Some("us-west-1")));
        let context = AppContext::with_region_provider(
            AppConfig::default(),
            Arc::clone(&regions) as Arc<dyn RegionProvider>,
        )
        .unwrap();

        let request = context
            .interceptor()
            .prepare("jdbc:iam:mysql://app@db:3306/app", &ConnectionProperties::new())
            .await
            .unwrap();
        assert_eq!(request.identity.region, "us-west-1");
        assert_eq!(regions.call_count(), 1);
        assert_eq!(context.resolver().source_names().len(), 4);
    }
}
