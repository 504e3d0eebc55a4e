use serde::{Deserialize, Serialize};

/// Resizer configuration from Resizer Config.yaml
///
/// Contains output locations and archive handling settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResizerConfig {
    #[serde(rename = "Resizer_Settings", default)]
    pub resizer_settings: ResizerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizerSettings {
    #[serde(rename = "Output Directory", default = "default_directory")]
    pub output_dir: String,

    #[serde(rename = "Work Directory", default = "default_directory")]
    pub work_dir: String,

    #[serde(rename = "Asset Folders", default = "default_asset_folders")]
    pub asset_folders: Vec<String>,

    #[serde(rename = "Legacy Encoding", default = "default_legacy_encoding")]
    pub legacy_encoding: String,

    #[serde(rename = "Strict Dashboard Lookup", default)]
    pub strict_dashboard_lookup: bool,

    #[serde(rename = "Debug Mode", default)]
    pub debug_mode: bool,
}

impl Default for ResizerSettings {
    fn default() -> Self {
        Self {
            output_dir: default_directory(),
            work_dir: default_directory(),
            asset_folders: default_asset_folders(),
            legacy_encoding: default_legacy_encoding(),
            strict_dashboard_lookup: false,
            debug_mode: false,
        }
    }
}

fn default_directory() -> String {
    ".".to_string()
}

fn default_asset_folders() -> Vec<String> {
    vec!["Data".to_string(), "Image".to_string()]
}

fn default_legacy_encoding() -> String {
    "shift_jis".to_string()
}
