use aws_credential_types::Credentials as AwsCredentialsExternal;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub type AwsCredentials = AwsCredentialsExternal;

/// Validity window of an RDS IAM auth token, fixed by the service.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(15 * 60);

pub(crate) const PASSWORD_PROPERTY: &str = "password";
pub(crate) const USER_PROPERTY: &str = "user";
pub(crate) const REDACTED_VALUE: &str = "hidden-from-log";

/// Everything that distinguishes one token requirement from another.
///
/// Built once by the connection URL parser and used as the token cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionIdentity {
    pub host: String,
    pub port: u16,
    pub region: String,
    pub username: String,
    pub driver_scheme: String,
    /// Explicit credential profile, `None` means the configured chain.
    pub profile: Option<String>,
}

impl ConnectionIdentity {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        region: impl Into<String>,
        username: impl Into<String>,
        driver_scheme: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            region: region.into(),
            username: username.into(),
            driver_scheme: driver_scheme.into(),
            profile: None,
        }
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}@{}:{} ({})",
            self.driver_scheme, self.username, self.host, self.port, self.region
        )?;
        if let Some(profile) = &self.profile {
            write!(f, " [profile {}]", profile)?;
        }
        Ok(())
    }
}

/// A presigned auth token. Immutable once issued.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(value: String, issued_at: DateTime<Utc>, lifetime: Duration) -> Self {
        let lifetime = ChronoDuration::from_std(lifetime).unwrap_or(ChronoDuration::zero());
        Self {
            value,
            issued_at,
            expires_at: issued_at + lifetime,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Fresh tokens may be served from the cache; the margin is kept in reserve.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let Ok(margin) = ChronoDuration::from_std(margin) else {
            return false;
        };
        match self.expires_at.checked_sub_signed(margin) {
            Some(refresh_at) => now < refresh_at,
            None => false,
        }
    }

    /// Still accepted by the database, even if inside the refresh margin.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Keyed connection properties handed to a delegate driver.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties(BTreeMap<String, String>);

impl ConnectionProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn set_if_absent(&mut self, key: &str, value: &str) {
        if !self.0.contains_key(key) {
            self.0.insert(key.to_string(), value.to_string());
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overlays `other` on top of `self`; keys in `other` win.
    pub fn merged_with(&self, other: &ConnectionProperties) -> ConnectionProperties {
        let mut merged = self.clone();
        merged
            .0
            .extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Copy safe for logs and CLI output.
    pub fn redacted(&self) -> ConnectionProperties {
        let mut copy = self.clone();
        if copy.contains_key(PASSWORD_PROPERTY) {
            copy.set(PASSWORD_PROPERTY, REDACTED_VALUE);
        }
        copy
    }
}

impl fmt::Debug for ConnectionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.redacted().0.iter()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnectionProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub fallbacks: u64,
    pub failures: u64,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn issued() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 27, 21, 0, 0).unwrap()
    }

    #[test]
    fn test_token_expires_after_lifetime() {
        let token = Token::new("db:5432/?Action=connect".into(), issued(), TOKEN_LIFETIME);
        assert_eq!(token.expires_at() - token.issued_at(), ChronoDuration::seconds(900));
    }

    #[test]
    fn test_token_freshness_respects_margin() {
        let token = Token::new("t".into(), issued(), TOKEN_LIFETIME);
        let margin = Duration::from_secs(60);

        let early = issued() + ChronoDuration::seconds(600);
        assert!(token.is_fresh_at(early, margin));

        let thirty_left = token.expires_at() - ChronoDuration::seconds(30);
        assert!(!token.is_fresh_at(thirty_left, margin));
        assert!(token.is_valid_at(thirty_left));

        let boundary = token.expires_at() - ChronoDuration::seconds(60);
        assert!(!token.is_fresh_at(boundary, margin));

        let after = token.expires_at() + ChronoDuration::seconds(1);
        assert!(!token.is_valid_at(after));
    }

    #[test]
    fn test_token_debug_hides_value() {
        let token = Token::new("secret-signature".into(), issued(), TOKEN_LIFETIME);
        assert!(!format!("{:?}", token).contains("secret-signature"));
    }

    #[test]
    fn test_identity_structural_equality() {
        let a = ConnectionIdentity::new("db.example.com", 5432, "us-east-1", "app", "postgresql");
        let b = ConnectionIdentity::new("db.example.com", 5432, "us-east-1", "app", "postgresql");
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_profile(Some("prod".into())));
        assert_eq!(a.endpoint(), "db.example.com:5432");
        assert_eq!(
            a.to_string(),
            "postgresql://app@db.example.com:5432 (us-east-1)"
        );
    }

    #[test]
    fn test_properties_merge_and_redaction() {
        let base: ConnectionProperties = [("user", "a"), ("password", "p1"), ("ssl", "true")]
            .into_iter()
            .collect();
        let overlay: ConnectionProperties = [("user", "b")].into_iter().collect();

        let merged = base.merged_with(&overlay);
        assert_eq!(merged.get("user"), Some("b"));
        assert_eq!(merged.get("ssl"), Some("true"));

        let debug = format!("{:?}", merged);
        assert!(debug.contains(REDACTED_VALUE));
        assert!(!debug.contains("p1"));
        assert_eq!(merged.get("password"), Some("p1"));
    }
}
