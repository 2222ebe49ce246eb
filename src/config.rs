use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the spa booking API, e.g. http://localhost:3030
  pub base_url: String,
  /// Account email used for sign-in
  pub email: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./spaq.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/spaq/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/spaq/config.yaml\n\
                 with an `api.base_url` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("spaq.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("spaq").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the sign-in password from environment variables.
  ///
  /// Checks SPAQ_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("SPAQ_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set the SPAQ_PASSWORD environment variable."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_config_parses_yaml() {
    let config: Config = serde_yaml::from_str(
      "api:\n  base_url: http://localhost:3030\n  email: mary@example.com\n",
    )
    .unwrap();
    assert_eq!(config.api.base_url, "http://localhost:3030");
    assert_eq!(config.api.email.as_deref(), Some("mary@example.com"));
  }
}
