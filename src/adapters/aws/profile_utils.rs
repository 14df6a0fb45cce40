use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::{fs, io};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ProfileReadError {
    #[error("Failed to read AWS profile file {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("Home directory couldn't be determined")]
    NoHomeDirectory,
    #[error("No AWS shared config or credentials file found")]
    NoConfigFilesFound,
}

/// The shared config and credentials files, with `credentials_file` replacing the latter.
pub fn aws_profile_file_paths(home: &Path, credentials_file: Option<&Path>) -> Vec<PathBuf> {
    vec![
        home.join(".aws").join("config"),
        credentials_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home.join(".aws").join("credentials")),
    ]
}

pub fn read_aws_profiles_from_home(
    credentials_file: Option<&Path>,
) -> Result<Vec<String>, ProfileReadError> {
    let home = dirs::home_dir().ok_or(ProfileReadError::NoHomeDirectory)?;
    read_aws_profiles_from_files(&aws_profile_file_paths(&home, credentials_file))
}

/// Collects profile names from the given files, sorted case-insensitively.
pub fn read_aws_profiles_from_files(paths: &[PathBuf]) -> Result<Vec<String>, ProfileReadError> {
    let mut profiles = HashSet::new();
    let mut any_file_existed = false;

    for path in paths {
        if !path.exists() {
            continue;
        }
        any_file_existed = true;
        let content = fs::read_to_string(path).map_err(|source| ProfileReadError::Io {
            path: path.clone(),
            source,
        })?;
        for line in content.lines() {
            if let Some(name) = parse_profile_header(line) {
                profiles.insert(name.to_string());
            }
        }
    }

    if !any_file_existed {
        warn!("Neither ~/.aws/config nor ~/.aws/credentials file found.");
        return Err(ProfileReadError::NoConfigFilesFound);
    }

    let mut sorted_profiles: Vec<String> = profiles.into_iter().collect();
    sorted_profiles.sort_by_key(|a| a.to_lowercase());
    Ok(sorted_profiles)
}

fn parse_profile_header(line: &str) -> Option<&str> {
    let trimmed_line = line.trim();
    if !(trimmed_line.starts_with('[') && trimmed_line.ends_with(']')) {
        return None;
    }
    let mut profile_name = trimmed_line
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();
    if let Some(stripped) = profile_name.strip_prefix("profile ") {
        profile_name = stripped.trim();
    }
    // sso-session and services sections are not profiles
    if profile_name.is_empty() || profile_name.contains(' ') {
        return None;
    }
    Some(profile_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_read_aws_profiles_from_files_no_files() {
        let dir = tempdir().unwrap();
        let result = read_aws_profiles_from_files(&aws_profile_file_paths(dir.path(), None));

        match result {
            Err(ProfileReadError::NoConfigFilesFound) => {}
            Err(e) => panic!("Expected NoConfigFilesFound error, got: {}", e),
            Ok(_) => panic!("Expected error but got success"),
        }
    }

    #[test]
    fn test_read_aws_profiles_from_files_with_data() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let aws_dir = dir.path().join(".aws");
        std::fs::create_dir(&aws_dir)?;

        let mut config_file = File::create(aws_dir.join("config"))?;
        writeln!(config_file, "[profile user1]")?;
        writeln!(config_file, "region = us-east-1")?;
        writeln!(config_file, "[default]")?;
        writeln!(config_file, "output = json")?;
        writeln!(config_file, "[sso-session corp]")?;
        writeln!(config_file, "sso_region = us-east-1")?;

        let mut credentials_file = File::create(aws_dir.join("credentials"))?;
        writeln!(credentials_file, "[User2]")?;
        writeln!(credentials_file, "aws_access_key_id = AKIDEXAMPLE")?;
        writeln!(credentials_file, "[user1]")?;
        writeln!(credentials_file, "aws_secret_access_key = secret")?;

        let profiles = read_aws_profiles_from_files(&aws_profile_file_paths(dir.path(), None))?;
        assert_eq!(profiles, vec!["default", "user1", "User2"]);
        Ok(())
    }

    #[test]
    fn test_custom_credentials_file_replaces_default() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let custom = dir.path().join("creds.ini");
        fs::write(&custom, "[reporting]\naws_access_key_id = AKIDEXAMPLE\n")?;

        let paths = aws_profile_file_paths(dir.path(), Some(&custom));
        assert_eq!(paths[1], custom);
        assert_eq!(read_aws_profiles_from_files(&paths)?, vec!["reporting"]);
        Ok(())
    }

    #[test]
    fn test_unreadable_file_reports_its_path() {
        let dir = tempdir().unwrap();
        let not_a_file = dir.path().join("credentials");
        fs::create_dir(&not_a_file).unwrap();

        let err = read_aws_profiles_from_files(&[not_a_file.clone()]).unwrap_err();
        assert!(err.to_string().contains("credentials"));
        assert_matches!(err, ProfileReadError::Io { path, .. } if path == not_a_file);
    }
}
