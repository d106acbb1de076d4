//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: ServerConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_and_validates_file() {
        let dir = std::env::temp_dir();
        let path = dir.join("termws-loader-test.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[listener]\nhost = \"127.0.0.1\"\nport = 0\nmax_sessions = 8"
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.listener.host, "127.0.0.1");
        assert_eq!(config.listener.max_sessions, 8);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = std::env::temp_dir();
        let path = dir.join("termws-loader-invalid.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[listener]\nmax_sessions = 0").unwrap();

        match load_config(&path) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/termws.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
