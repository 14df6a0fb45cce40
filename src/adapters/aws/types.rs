use crate::core::types::AwsCredentials as CoreAwsCredentials;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type CredentialCacheKey = String;

#[derive(Debug, Clone)]
pub struct CachedAwsCredentials {
    pub credentials: CoreAwsCredentials,
    pub source_name: String,
    pub expiry_time: Option<DateTime<Utc>>,
}

pub type AwsCredentialsCache = Arc<RwLock<HashMap<CredentialCacheKey, CachedAwsCredentials>>>;

pub fn new_credentials_cache() -> AwsCredentialsCache {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Credentials plus the name of the chain entry that produced them.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub credentials: CoreAwsCredentials,
    pub source_name: String,
}

impl ResolvedCredentials {
    pub fn expiry_time(&self) -> Option<DateTime<Utc>> {
        self.credentials.expiry().map(DateTime::<Utc>::from)
    }
}
