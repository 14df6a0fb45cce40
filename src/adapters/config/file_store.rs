use crate::config::models::AppConfig;
use crate::core::error::ConfigError;
use crate::ports::ConfigurationStore;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct TomlFileConfigAdapter;

impl TomlFileConfigAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn parse_config(content: &str, path: &Path) -> Result<AppConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Deserialize {
        path: path.to_path_buf(),
        source: Box::new(e),
    })
}

fn render_config(config: &AppConfig) -> Result<String, ConfigError> {
    toml::to_string_pretty(config).map_err(|e| ConfigError::Serialize(Box::new(e)))
}

impl ConfigurationStore for TomlFileConfigAdapter {
    fn load_app_config_file(&self, path: &Path) -> Result<AppConfig, ConfigError> {
        if !path.exists() {
            info!("Config file not found at {:?}. Using defaults.", path);
            return Ok(AppConfig::default());
        }
        debug!(path = %path.display(), "Reading configuration file");
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config = parse_config(&content, path)?;
        config.validate()?;
        Ok(config)
    }

    fn save_app_config_file(&self, config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
        config.validate()?;
        let content = render_config(config)?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| ConfigError::WriteFile {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        debug!(path = %path.display(), "Writing configuration file");
        fs::write(path, content).map_err(|source| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source,
        })
    }
}
