//! Result envelope persistence under the output directory.

use anyhow::{Context, Result};
use simprep_core::ResultEnvelope;
use std::path::{Path, PathBuf};

/// Writes finished envelopes as pretty JSON, one file per combination.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    root: PathBuf,
}

impl ResultWriter {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// `{root}/{data_type}/{class}_{spec}_{fight_style}.json`
    #[must_use]
    pub fn path_for(&self, envelope: &ResultEnvelope) -> PathBuf {
        let settings = &envelope.simc_settings;
        self.root.join(&envelope.data_type).join(format!(
            "{}_{}_{}.json",
            settings.class, settings.spec, settings.fight_style
        ))
    }

    /// # Errors
    ///
    /// Returns an error when the directory or file cannot be written.
    pub fn write(&self, envelope: &ResultEnvelope) -> Result<PathBuf> {
        let path = self.path_for(envelope);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(envelope)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("wrote {}", path.display());
        Ok(path)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};
    use simprep_core::{Profile, SimcSettings};

    fn envelope() -> ResultEnvelope {
        ResultEnvelope {
            data_type: "races".to_string(),
            timestamp: "2021-03-09 18:05".to_string(),
            title: "Races | Frost Mage | Patchwerk".to_string(),
            subtitle: "UTC 2021-03-09 18:05".to_string(),
            simc_settings: SimcSettings {
                tier: "26".to_string(),
                fight_style: "patchwerk".to_string(),
                iterations: "60000".to_string(),
                target_error: "0.1".to_string(),
                ptr: "0".to_string(),
                simc_hash: None,
                class: "mage".to_string(),
                spec: "frost".to_string(),
            },
            data: Map::new(),
            translations: Map::new(),
            profile: Profile::default(),
            talent_data: Value::Null,
            class_id: 8,
            spec_id: 64,
        }
    }

    #[test]
    fn writes_under_category_directory() {
        let root = std::env::temp_dir().join(format!(
            "simprep-output-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        let writer = ResultWriter::new(root.clone());
        let path = writer.write(&envelope()).unwrap();

        assert_eq!(path, root.join("races").join("mage_frost_patchwerk.json"));
        let written: ResultEnvelope =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, envelope());
    }
}
