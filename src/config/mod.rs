//! Provisioner configuration: one ini file, one section per system
//!
//! Resolution overlays the `DEFAULT` section with the requested system's
//! entries and expands every `%(name)s` reference up front, producing an
//! immutable [`ConfigSection`].

pub mod ini;
pub mod settings;

pub use ini::{DEFAULT_SECTION, IniDocument};
pub use settings::ProvisionerSettings;

use crate::exceptions::ConfigError;
use crate::utils::first_env_var;
use log::{debug, trace};
use std::collections::BTreeMap;
use std::path::Path;

/// Environment variables consulted for `USER`, in order
pub const USER_ENV_VARS: [&str; 3] = ["USER", "USERNAME", "LOGNAME"];

/// Values injected into `DEFAULT` when the file does not define them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvDefaults {
    /// Value for `HOME`
    pub home: String,
    /// Value for `USER`
    pub user: String,
}

impl EnvDefaults {
    /// Take `HOME` from the user's home directory and `USER` from the environment
    pub fn from_env() -> Self {
        let home = dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "~".to_string());
        let user = first_env_var(&USER_ENV_VARS).unwrap_or_default();
        EnvDefaults { home, user }
    }
}

/// Parsed configuration with environment defaults applied
#[derive(Debug, Clone)]
pub struct ConfigView {
    document: IniDocument,
}

impl ConfigView {
    /// Load a config file and apply `env` defaults
    pub fn load(path: &Path, env: &EnvDefaults) -> Result<Self, ConfigError> {
        debug!("📖 Reading config from {}", path.display());
        Ok(Self::from_document(IniDocument::load(path)?, env))
    }

    /// Parse config text and apply `env` defaults
    pub fn parse(content: &str, env: &EnvDefaults) -> Result<Self, ConfigError> {
        Ok(Self::from_document(IniDocument::parse(content)?, env))
    }

    fn from_document(mut document: IniDocument, env: &EnvDefaults) -> Self {
        document.set_default_if_absent("HOME", &env.home);
        document.set_default_if_absent("USER", &env.user);
        ConfigView { document }
    }

    /// Names of the systems defined in the file
    pub fn systems(&self) -> impl Iterator<Item = &str> {
        self.document.section_names()
    }

    /// Resolve the section for `system`
    pub fn resolve(&self, system: &str) -> Result<ConfigSection, ConfigError> {
        let own = self
            .document
            .section(system)
            .ok_or_else(|| ConfigError::SectionNotFound(system.to_string()))?;

        let mut merged = self.document.defaults().clone();
        merged.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));

        let values = merged
            .iter()
            .map(|(key, raw)| -> Result<(String, String), ConfigError> {
                Ok((key.clone(), ini::interpolate(key, raw, &merged)?))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        trace!("🔧 Resolved [{}] with {} keys", system, values.len());
        Ok(ConfigSection {
            name: system.to_string(),
            values,
        })
    }
}

/// Fully resolved configuration of one system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSection {
    name: String,
    values: BTreeMap<String, String>,
}

impl ConfigSection {
    /// Build a section directly from resolved values
    pub fn new(name: impl Into<String>, values: BTreeMap<String, String>) -> Self {
        ConfigSection {
            name: name.into(),
            values,
        }
    }

    /// The system name this section was resolved for
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value of a key that must be present
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingKey {
            section: self.name.clone(),
            key: key.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Value of the first key in `keys` present in `section`, else `default`
pub fn first_of<'a>(section: &'a ConfigSection, keys: &[&str], default: &'a str) -> &'a str {
    keys.iter()
        .find_map(|key| section.get(key))
        .unwrap_or(default)
}
