use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5353,
        }
    }
}

/// One MCP tool server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_url(),
            model: default_generation_model(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_url() -> String {
    "http://localhost:11434".into()
}

fn default_generation_model() -> String {
    "llama3.2".into()
}

fn default_generation_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainSettings {
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
        }
    }
}

fn default_step_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chain: ChainSettings,
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig {
        name: "db".into(),
        url: "http://localhost:5959".into(),
    }]
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| FlowError::Protocol(format!("failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Load the file when it exists; otherwise start from defaults. The
    /// environment wins either way.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = if path.as_ref().exists() {
            Self::from_file(path)?
        } else {
            Self {
                providers: default_providers(),
                ..Self::default()
            }
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = env::var("TOOLFLOW_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("TOOLFLOW_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Ok(url) = env::var("MCP_BASE_URL") {
            match self.providers.first_mut() {
                Some(provider) => provider.url = url,
                None => self.providers.push(ProviderConfig {
                    name: "db".into(),
                    url,
                }),
            }
        }
        if let Ok(url) = env::var("OLLAMA_BASE_URL") {
            self.generation.base_url = url;
        }
        if let Ok(model) = env::var("OLLAMA_MODEL") {
            self.generation.model = model;
        }
        if let Ok(timeout) = env::var("TOOLFLOW_STEP_TIMEOUT") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.chain.step_timeout_secs = parsed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nhost='127.0.0.1'\nport=9000\n\n[[providers]]\nname='db'\nurl='http://db:5959'\n\n[generation]\nmodel='llama3.2'"
        )
        .unwrap();

        env::set_var("TOOLFLOW_PORT", "9100");
        let cfg = AppConfig::from_env_or_file(file.path()).unwrap();
        env::remove_var("TOOLFLOW_PORT");

        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.providers[0].url, "http://db:5959");
        assert_eq!(cfg.generation.model, "llama3.2");
    }

    #[test]
    fn environment_overrides_provider_and_generation_urls() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[[providers]]\nname='db'\nurl='http://db:5959'").unwrap();

        env::set_var("MCP_BASE_URL", "http://other-db:5959");
        env::set_var("OLLAMA_BASE_URL", "http://ollama:11434");
        let cfg = AppConfig::from_env_or_file(file.path()).unwrap();
        env::remove_var("MCP_BASE_URL");
        env::remove_var("OLLAMA_BASE_URL");

        assert_eq!(cfg.providers[0].url, "http://other-db:5959");
        assert_eq!(cfg.generation.base_url, "http://ollama:11434");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        // Port and URLs are left out: sibling tests may be mutating those
        // environment variables concurrently.
        let cfg = AppConfig::load("does-not-exist.toml").unwrap();
        assert_eq!(cfg.providers.len(), 1);
        assert_eq!(cfg.chain.step_timeout_secs, 120);
    }
}
