use crate::adapters::aws::types::ResolvedCredentials;
use crate::config::models::{CredentialSourceKind, CredentialsConfig};
use crate::core::error::{CredentialError, SourceFailure};
use crate::core::types::AwsCredentials;
use crate::ports::CredentialSource;
use async_trait::async_trait;
use aws_config::ecs::EcsCredentialsProvider;
use aws_config::environment::EnvironmentVariableCredentialsProvider;
use aws_config::imds::credentials::ImdsCredentialsProvider;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_runtime::env_config::file::{EnvConfigFileKind, EnvConfigFiles};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The built-in credential sources, backed by the AWS SDK providers.
pub enum CredentialChainEntry {
    StaticProfile {
        default_profile: Option<String>,
        credentials_file: Option<PathBuf>,
    },
    EnvironmentVars(EnvironmentVariableCredentialsProvider),
    ContainerMetadata(EcsCredentialsProvider),
    InstanceMetadata(ImdsCredentialsProvider),
}

impl CredentialChainEntry {
    pub fn from_kind(kind: CredentialSourceKind, config: &CredentialsConfig) -> Self {
        match kind {
            CredentialSourceKind::Profile => CredentialChainEntry::StaticProfile {
                default_profile: config.profile.clone(),
                credentials_file: config.credentials_file.clone(),
            },
            CredentialSourceKind::Environment => {
                CredentialChainEntry::EnvironmentVars(EnvironmentVariableCredentialsProvider::new())
            }
            CredentialSourceKind::Container => {
                CredentialChainEntry::ContainerMetadata(EcsCredentialsProvider::builder().build())
            }
            CredentialSourceKind::Instance => {
                CredentialChainEntry::InstanceMetadata(ImdsCredentialsProvider::builder().build())
            }
        }
    }

    pub fn kind(&self) -> CredentialSourceKind {
        match self {
            CredentialChainEntry::StaticProfile { .. } => CredentialSourceKind::Profile,
            CredentialChainEntry::EnvironmentVars(_) => CredentialSourceKind::Environment,
            CredentialChainEntry::ContainerMetadata(_) => CredentialSourceKind::Container,
            CredentialChainEntry::InstanceMetadata(_) => CredentialSourceKind::Instance,
        }
    }

    async fn provide_from_profile(
        profile_name: &str,
        credentials_file: Option<&PathBuf>,
    ) -> Result<AwsCredentials, CredentialsError> {
        let mut builder = ProfileFileCredentialsProvider::builder().profile_name(profile_name);
        if let Some(path) = credentials_file {
            builder = builder.profile_files(
                EnvConfigFiles::builder()
                    .with_file(EnvConfigFileKind::Credentials, path)
                    .build(),
            );
        }
        builder.build().provide_credentials().await
    }
}

impl fmt::Debug for CredentialChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialChainEntry::StaticProfile {
                default_profile,
                credentials_file,
            } => f
                .debug_struct("StaticProfile")
                .field("default_profile", default_profile)
                .field("credentials_file", credentials_file)
                .finish(),
            other => f.write_str(other.kind().as_str()),
        }
    }
}

#[async_trait]
impl CredentialSource for CredentialChainEntry {
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    async fn provide(&self, profile: Option<&str>) -> Result<AwsCredentials, CredentialsError> {
        match self {
            CredentialChainEntry::StaticProfile {
                default_profile,
                credentials_file,
            } => {
                let Some(profile_name) = profile.or(default_profile.as_deref()) else {
                    return Err(CredentialsError::not_loaded("no profile requested"));
                };
                Self::provide_from_profile(profile_name, credentials_file.as_ref()).await
            }
            CredentialChainEntry::EnvironmentVars(provider) => provider.provide_credentials().await,
            CredentialChainEntry::ContainerMetadata(provider) => {
                provider.provide_credentials().await
            }
            CredentialChainEntry::InstanceMetadata(provider) => {
                provider.provide_credentials().await
            }
        }
    }
}

/// Walks an ordered list of credential sources and returns the first success.
///
/// Nothing is cached here; callers own the lifetime of what they receive.
pub struct CredentialResolver {
    sources: Vec<Arc<dyn CredentialSource>>,
}

impl CredentialResolver {
    pub fn new(sources: Vec<Arc<dyn CredentialSource>>) -> Self {
        Self { sources }
    }

    pub fn from_config(config: &CredentialsConfig) -> Self {
        let sources = config
            .chain
            .iter()
            .map(|kind| {
                Arc::new(CredentialChainEntry::from_kind(*kind, config)) as Arc<dyn CredentialSource>
            })
            .collect();
        Self::new(sources)
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    pub async fn resolve(&self) -> Result<ResolvedCredentials, CredentialError> {
        self.resolve_for_profile(None).await
    }

    pub async fn resolve_for_profile(
        &self,
        profile: Option<&str>,
    ) -> Result<ResolvedCredentials, CredentialError> {
        let mut attempts = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            match source.provide(profile).await {
                Ok(credentials) => {
                    info!(
                        source = source.name(),
                        access_key_id = credentials.access_key_id(),
                        expiry = ?credentials.expiry(),
                        "Resolved AWS credentials"
                    );
                    return Ok(ResolvedCredentials {
                        credentials,
                        source_name: source.name().to_string(),
                    });
                }
                Err(e) => {
                    debug!(
                        source = source.name(),
                        ?profile,
                        "Credential source unavailable: {}",
                        e
                    );
                    attempts.push(SourceFailure {
                        source_name: source.name().to_string(),
                        reason: describe_credentials_error(&e),
                    });
                }
            }
        }

        warn!(
            ?profile,
            tried = attempts.len(),
            "No credential source produced AWS credentials"
        );
        Err(CredentialError::NoCredentialsFound { attempts })
    }
}

fn describe_credentials_error(err: &CredentialsError) -> String {
    use std::error::Error;

    match err.source() {
        Some(source) => format!("{}: {}", err, source),
        None => err.to_string(),
    }
}
