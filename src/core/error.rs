use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Error type returned by delegate drivers. Passed through unchanged.
pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write configuration file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to deserialize configuration from {path}: {source}")]
    Deserialize {
        path: PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Failed to serialize configuration: {0}")]
    Serialize(Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// A single failed attempt of a credential source, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_name: String,
    pub reason: String,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source_name, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No AWS credentials found in the credential chain ({})", format_attempts(.attempts))]
    NoCredentialsFound { attempts: Vec<SourceFailure> },
}

fn format_attempts(attempts: &[SourceFailure]) -> String {
    if attempts.is_empty() {
        return "no credential sources configured".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error(transparent)]
    NoCredentials(#[from] CredentialError),
    #[error("Failed to sign auth token request for {endpoint}: {source}")]
    SigningFailure {
        endpoint: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Token generation for {endpoint} stopped before finishing: {reason}")]
    GenerationAborted { endpoint: String, reason: String },
}

impl TokenError {
    pub fn signing(
        endpoint: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        TokenError::SigningFailure {
            endpoint: endpoint.into(),
            source: source.into(),
        }
    }

    pub(crate) fn generation_aborted(endpoint: String, reason: String) -> Self {
        TokenError::GenerationAborted { endpoint, reason }
    }
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("URL is not handled by the IAM auth wrapper: {url}")]
    UnsupportedUrl { url: String },
    #[error("Malformed connection URL '{url}': {reason}")]
    MalformedConnectionUrl { url: String, reason: String },
    #[error(
        "AWS region couldn't be determined for host '{host}'. Define `awsRegion` in the query string or properties, or configure a default region."
    )]
    UnresolvedRegion { host: String },
    #[error("Failed to obtain IAM auth token for {identity}: {source}")]
    Token {
        identity: String,
        source: Arc<TokenError>,
    },
    #[error("No delegate driver registered for {selector}")]
    NoDelegateDriver { selector: String },
    #[error("Delegate driver '{driver}' failed to connect to {url}: {source}")]
    DelegateConnectionFailure {
        driver: String,
        url: String,
        source: DriverError,
    },
}

impl ConnectError {
    pub(crate) fn malformed(url: &str, reason: impl Into<String>) -> Self {
        ConnectError::MalformedConnectionUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_credentials_message_lists_attempts() {
        let err = CredentialError::NoCredentialsFound {
            attempts: vec![
                SourceFailure {
                    source_name: "environment".to_string(),
                    reason: "AWS_ACCESS_KEY_ID not set".to_string(),
                },
                SourceFailure {
                    source_name: "instance-metadata".to_string(),
                    reason: "timeout".to_string(),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("environment: AWS_ACCESS_KEY_ID not set"));
        assert!(message.contains("; instance-metadata: timeout"));
    }

    #[test]
    fn test_no_credentials_message_without_sources() {
        let err = CredentialError::NoCredentialsFound { attempts: vec![] };
        assert!(err.to_string().contains("no credential sources configured"));
    }

    #[test]
    fn test_token_error_messages() {
        let err = TokenError::from(CredentialError::NoCredentialsFound { attempts: vec![] });
        assert!(matches!(err, TokenError::NoCredentials(_)));

        let err = TokenError::signing("db:5432", "clock skew");
        assert_eq!(
            err.to_string(),
            "Failed to sign auth token request for db:5432: clock skew"
        );
    }

    #[test]
    fn test_connect_error_keeps_shared_token_error_as_source() {
        use std::error::Error;

        let token_err = Arc::new(TokenError::signing("db:5432", "boom"));
        let err = ConnectError::Token {
            identity: "app@db:5432".to_string(),
            source: Arc::clone(&token_err),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("boom"));
    }
}
