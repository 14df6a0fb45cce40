pub mod models;

use crate::core::error::ConfigError;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE_NAME: &str = "rds_iam_wrapper.toml";
pub(crate) const CONFIG_DIR_NAME: &str = "rds-iam-wrapper";

pub fn find_config_file() -> Result<PathBuf, ConfigError> {
    let current_dir_path = Path::new(".").join(DEFAULT_CONFIG_FILE_NAME);
    if current_dir_path.exists() {
        return Ok(current_dir_path);
    }

    if let Some(user_config_dir) = dirs::config_dir() {
        return Ok(user_config_dir
            .join(CONFIG_DIR_NAME)
            .join(DEFAULT_CONFIG_FILE_NAME));
    }
    Ok(current_dir_path)
}
