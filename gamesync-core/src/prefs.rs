//! Small persisted device state: preferences and the installation id.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const PREFERENCES_FILE: &str = "preferences.json";
pub const INSTALLATION_FILE: &str = "installation-id";

/// User preferences remembered between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub remembered_handle: Option<String>,
    pub selected_event: Option<String>,
    pub dismissed_hints: BTreeSet<String>,
}

impl Preferences {
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(PREFERENCES_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read preferences from {:?}", path))?;
        serde_json::from_str(&data).with_context(|| "Failed to parse preferences JSON")
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(PREFERENCES_FILE);
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Record a dismissed hint; returns false if it was already dismissed.
    pub fn dismiss_hint(&mut self, hint: &str) -> bool {
        self.dismissed_hints.insert(hint.to_string())
    }
}

fn installation_path(data_dir: &Path) -> PathBuf {
    data_dir.join(INSTALLATION_FILE)
}

/// Return this device's installation id, creating one on first use.
pub fn resolve_installation_id(data_dir: &Path) -> Result<String> {
    let path = installation_path(data_dir);
    if path.exists() {
        let id = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read installation id from {:?}", path))?;
        let id = id.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }
    reset_installation_id(data_dir)
}

/// Generate and persist a fresh installation id.
pub fn reset_installation_id(data_dir: &Path) -> Result<String> {
    let id = new_installation_id();
    save_installation_id(data_dir, &id)?;
    Ok(id)
}

pub fn new_installation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn save_installation_id(data_dir: &Path, id: &str) -> Result<()> {
    fs::create_dir_all(data_dir)?;
    let path = installation_path(data_dir);
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, id)?;
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_installation_id_stable_until_reset() {
        let tmp = TempDir::new().unwrap();
        let first = resolve_installation_id(tmp.path()).unwrap();
        assert_eq!(first.len(), 36);
        assert_eq!(resolve_installation_id(tmp.path()).unwrap(), first);
        let second = reset_installation_id(tmp.path()).unwrap();
        assert_ne!(first, second);
        assert_eq!(resolve_installation_id(tmp.path()).unwrap(), second);
    }

    #[test]
    fn test_preferences_roundtrip() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(Preferences::load(tmp.path()).unwrap(), Preferences::default());

        let mut prefs = Preferences {
            remembered_handle: Some("alice".to_string()),
            selected_event: Some("Con1".to_string()),
            ..Default::default()
        };
        assert!(prefs.dismiss_hint("swipe-to-sign-up"));
        assert!(!prefs.dismiss_hint("swipe-to-sign-up"));
        prefs.save(tmp.path()).unwrap();
        assert_eq!(Preferences::load(tmp.path()).unwrap(), prefs);
    }
}
