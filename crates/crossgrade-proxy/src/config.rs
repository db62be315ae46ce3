use crossgrade_protocols::ProtocolOptions;
use crossgrade_types::ProtocolVersion;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Version name such as "1.14.4". Detected from the backend when absent.
    #[serde(default)]
    pub backend_version: Option<String>,
    #[serde(default)]
    pub mappings_dir: Option<PathBuf>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,
    #[serde(default)]
    pub suppress_conversion_warnings: bool,
    #[serde(default)]
    pub instant_respawn: bool,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    25565
}

fn default_backend() -> String {
    "127.0.0.1:25566".into()
}

fn default_max_path_length() -> usize {
    50
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            backend: default_backend(),
            backend_version: None,
            mappings_dir: None,
            debug: false,
            max_path_length: default_max_path_length(),
            suppress_conversion_warnings: false,
            instant_respawn: false,
        }
    }
}

impl ProxyConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ProxyConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// The configured backend version, if any. Unknown names are an error.
    pub fn backend_version(&self) -> anyhow::Result<Option<ProtocolVersion>> {
        match &self.backend_version {
            Some(name) => ProtocolVersion::from_name(name)
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("Unknown backend version {:?}", name)),
            None => Ok(None),
        }
    }

    pub fn protocol_options(&self) -> ProtocolOptions {
        ProtocolOptions {
            data_dir: self.mappings_dir.clone(),
            suppress_conversion_warnings: self.suppress_conversion_warnings,
            instant_respawn: self.instant_respawn,
        }
    }
}
