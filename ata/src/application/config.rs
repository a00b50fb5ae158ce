use ata_core::error::{AtaError, Result};
use ata_core::{CreateOptions, FailureMode, Limits};
use serde::Deserialize;
use std::path::Path;

/// Optional `--config` file. Every field may be omitted.
///
/// ```json
/// { "create": { "chunk_size": 1048576, "encrypt": true },
///   "extract": { "failure_mode": "all-or-nothing", "workers": 4 } }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub create: CreateOptions,
    pub extract: ExtractConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractConfig {
    pub failure_mode: Option<FailureMode>,
    pub workers: Option<usize>,
    pub limits: Limits,
}

pub fn load(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let raw = std::fs::read(path)?;
    serde_json::from_slice(&raw)
        .map_err(|e| AtaError::InvalidOption(format!("config {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ata_core::codec::CodecId;

    #[test]
    fn missing_file_means_defaults() {
        let c = load(None).unwrap();
        assert_eq!(c.create, CreateOptions::default());
        assert!(c.extract.failure_mode.is_none());
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ata.json");
        std::fs::write(
            &path,
            r#"{"create": {"chunk_size": 65536, "compression": {"codec": "none", "level": 0},
                "kdf": {"iterations": 4}},
               "extract": {"failure_mode": "all-or-nothing", "limits": {"max_entries": 10}}}"#,
        )
        .unwrap();
        let c = load(Some(&path)).unwrap();
        assert_eq!(c.create.chunk_size, 65536);
        assert_eq!(c.create.compression.codec, CodecId::None);
        assert_eq!(c.create.kdf.iterations, 4);
        assert_eq!(c.create.kdf.mem_cost_kib, 65536);
        assert!(!c.create.encrypt);
        assert_eq!(c.extract.failure_mode, Some(FailureMode::AllOrNothing));
        assert_eq!(c.extract.limits.max_entries, Some(10));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"creat": {}}"#).unwrap();
        assert!(matches!(load(Some(&path)), Err(AtaError::InvalidOption(_))));
    }
}
