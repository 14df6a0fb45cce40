use crate::core::dispatcher::DriverDispatcher;
use crate::core::error::ConnectError;
use crate::core::interceptor::ConnectionInterceptor;
use crate::core::types::ConnectionProperties;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, info, warn};

/// Drop-in driver for wrapper URLs: swaps in an IAM token and hands off to a delegate.
pub struct IamAuthDriver<C> {
    interceptor: Arc<ConnectionInterceptor>,
    dispatcher: DriverDispatcher<C>,
}

impl<C: Send + 'static> IamAuthDriver<C> {
    pub fn new(interceptor: Arc<ConnectionInterceptor>, dispatcher: DriverDispatcher<C>) -> Self {
        if dispatcher.is_empty() {
            warn!("IAM auth driver created without delegate drivers; every connect will fail");
        }
        Self {
            interceptor,
            dispatcher,
        }
    }

    pub fn accepts_url(&self, url: &str) -> bool {
        self.interceptor.accepts_url(url)
    }

    pub async fn connect(
        &self,
        url: &str,
        properties: &ConnectionProperties,
    ) -> Result<C, ConnectError> {
        if !self.accepts_url(url) {
            return Err(ConnectError::UnsupportedUrl {
                url: url.to_string(),
            });
        }

        let span = tracing::info_span!("iam_connect", prefix = %self.interceptor.wrapper_prefix());
        async {
            let started = Instant::now();
            let connection = self.interceptor.intercept(url, properties).await?;
            info!(
                identity = %connection.identity,
                delegate_url = %connection.delegate_url,
                properties = ?connection.properties,
                "Connecting through delegate driver"
            );

            let result = self.dispatcher.dispatch(&connection).await;
            match &result {
                Ok(_) => info!(elapsed = ?started.elapsed(), "Delegate connection established"),
                Err(e) => warn!(elapsed = ?started.elapsed(), "Delegate connection failed: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }
}
