//! Configuration

use courier_base::settings::Settings;

/// Settings for the relayer.
///
/// The relayer has no knobs of its own beyond the shared base settings; the
/// wrapper exists so agent-specific env prefixes and config partials have a
/// place to land when it grows some.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerSettings {
    #[serde(flatten)]
    pub(crate) base: Settings,
}

impl AsRef<Settings> for RelayerSettings {
    fn as_ref(&self) -> &Settings {
        &self.base
    }
}

impl RelayerSettings {
    /// Load the relayer's settings from config files and env vars.
    pub fn new() -> Result<Self, config::ConfigError> {
        Ok(Self {
            base: Settings::new("relayer")?,
        })
    }
}
