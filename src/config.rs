use crate::join::KeyPolicy;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub join: JoinConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub workbook: PathBuf,
    pub qualification_sheet: String,
    /// Zero-based index of the physical row carrying the column headers.
    /// The qualification sheet puts it on the 4th row.
    #[serde(default = "default_header_row")]
    pub header_row: usize,
    pub ranking_sheet: Option<String>,
    #[serde(default)]
    pub ranking_header_row: usize,
    pub microregions: LayerConfig,
    pub states: Option<LayerConfig>,
}

/// A geometry layer source: a remote zipped bundle or a local .shp path.
#[derive(Debug, Deserialize, Clone)]
pub struct LayerConfig {
    pub url: Option<String>,
    pub path: Option<PathBuf>,
    pub join_field: String,
}

impl LayerConfig {
    pub fn validate(&self, layer: &str) -> Result<()> {
        match (&self.url, &self.path) {
            (Some(_), Some(_)) => {
                bail!("layer '{layer}' sets both url and path; pick one")
            }
            (None, None) => bail!("layer '{layer}' needs either url or path"),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    AsText,
    ZeroPad,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JoinConfig {
    pub policy: PolicyKind,
    #[serde(default = "default_pad_width")]
    pub width: usize,
}

impl JoinConfig {
    pub fn key_policy(&self) -> KeyPolicy {
        match self.policy {
            PolicyKind::AsText => KeyPolicy::AsText,
            PolicyKind::ZeroPad => KeyPolicy::ZeroPad(self.width),
        }
    }
}

impl Default for JoinConfig {
    fn default() -> Self {
        JoinConfig {
            policy: PolicyKind::ZeroPad,
            width: default_pad_width(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            scratch_dir: default_scratch_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_header_row() -> usize {
    3
}

fn default_pad_width() -> usize {
    5
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("scratch")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from(".")
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;
        config.input.microregions.validate("microregions")?;
        if let Some(states) = &config.input.states {
            states.validate("states")?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [input]
        workbook = "IQM_BRASIL_2025.xlsm"
        qualification_sheet = "IQM_Qualificação"

        [input.microregions]
        path = "shapes/BR_Microrregioes_2022.shp"
        join_field = "CD_MICRO"

        [server]
        port = 8080
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.input.header_row, 3);
        assert_eq!(config.fetch.scratch_dir, PathBuf::from("scratch"));
        assert!(matches!(
            config.join.key_policy(),
            KeyPolicy::ZeroPad(5)
        ));
        assert!(config.input.states.is_none());
    }

    #[test]
    fn layer_must_pick_one_source() {
        let layer = LayerConfig {
            url: Some("https://example.com/shapes.zip".into()),
            path: Some(PathBuf::from("shapes/br.shp")),
            join_field: "CD_MICRO".into(),
        };
        assert!(layer.validate("microregions").is_err());

        let layer = LayerConfig {
            url: None,
            path: None,
            join_field: "CD_MICRO".into(),
        };
        assert!(layer.validate("microregions").is_err());
    }

    #[test]
    fn as_text_policy_parses() {
        let config: AppConfig = toml::from_str(&format!(
            "{MINIMAL}\n[join]\npolicy = \"as-text\"\n"
        ))
        .unwrap();
        assert!(matches!(config.join.key_policy(), KeyPolicy::AsText));
    }
}
