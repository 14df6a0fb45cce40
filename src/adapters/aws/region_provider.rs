use crate::ports::RegionProvider;
use async_trait::async_trait;
use aws_config::default_provider::region::DefaultRegionChain;
use tracing::debug;

/// Looks up the region the AWS SDK would pick: `AWS_REGION`, the profile, then IMDS.
#[derive(Debug, Default, Clone)]
pub struct SdkRegionProvider;

impl SdkRegionProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RegionProvider for SdkRegionProvider {
    async fn default_region(&self, profile: Option<&str>) -> Option<String> {
        let mut builder = DefaultRegionChain::builder();
        if let Some(name) = profile {
            builder = builder.profile_name(name);
        }
        let region = builder.build().region().await;
        debug!(?profile, ?region, "SDK default region lookup");
        region.map(|r| r.as_ref().to_string())
    }
}
