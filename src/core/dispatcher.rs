use crate::core::error::ConnectError;
use crate::core::interceptor::InterceptedConnection;
use crate::ports::DelegateDriver;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type SharedDelegateDriver<C> = Arc<dyn DelegateDriver<Connection = C>>;

/// Registry of delegate drivers, keyed by URL scheme and by name.
///
/// The first driver registered for a scheme is that scheme's default; others
/// stay reachable through the `delegateDriver` property.
pub struct DriverDispatcher<C> {
    by_scheme: HashMap<String, SharedDelegateDriver<C>>,
    by_name: HashMap<String, SharedDelegateDriver<C>>,
}

impl<C: Send + 'static> Default for DriverDispatcher<C> {
    fn default() -> Self {
        Self {
            by_scheme: HashMap::new(),
            by_name: HashMap::new(),
        }
    }
}

impl<C: Send + 'static> DriverDispatcher<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_driver(mut self, driver: SharedDelegateDriver<C>) -> Self {
        self.register(driver);
        self
    }

    pub fn register(&mut self, driver: SharedDelegateDriver<C>) {
        let name = driver.name().to_string();
        let scheme = driver.scheme().to_lowercase();

        if let Some(previous) = self.by_name.insert(name.clone(), Arc::clone(&driver)) {
            warn!(
                driver = %name,
                replaced_scheme = previous.scheme(),
                "Delegate driver registered twice under the same name; keeping the latest"
            );
        }
        if self.by_scheme.contains_key(&scheme) {
            debug!(driver = %name, %scheme, "Scheme already has a default delegate driver");
        } else {
            self.by_scheme.insert(scheme.clone(), driver);
        }
        info!(driver = %name, %scheme, "Registered delegate driver");
    }

    pub fn driver_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn select(
        &self,
        scheme: &str,
        name: Option<&str>,
        delegate_url: &str,
    ) -> Result<SharedDelegateDriver<C>, ConnectError> {
        let (driver, selector) = match name {
            Some(name) => (self.by_name.get(name), format!("driver name '{}'", name)),
            None => (
                self.by_scheme.get(&scheme.to_lowercase()),
                format!("scheme '{}'", scheme),
            ),
        };
        let driver = driver.ok_or(ConnectError::NoDelegateDriver {
            selector: selector.clone(),
        })?;

        if !driver.accepts_url(delegate_url) {
            return Err(ConnectError::NoDelegateDriver {
                selector: format!(
                    "{} (driver '{}' does not accept {})",
                    selector,
                    driver.name(),
                    delegate_url
                ),
            });
        }
        Ok(Arc::clone(driver))
    }

    pub async fn dispatch(&self, connection: &InterceptedConnection) -> Result<C, ConnectError> {
        let driver = self.select(
            &connection.identity.driver_scheme,
            connection.delegate_driver.as_deref(),
            &connection.delegate_url,
        )?;
        debug!(
            driver = driver.name(),
            url = %connection.delegate_url,
            "Delegating connection"
        );

        driver
            .connect(&connection.delegate_url, &connection.properties)
            .await
            .map_err(|source| ConnectError::DelegateConnectionFailure {
                driver: driver.name().to_string(),
                url: connection.delegate_url.clone(),
                source,
            })
    }
}
