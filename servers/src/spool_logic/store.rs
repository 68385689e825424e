use std::fs;
use std::path::PathBuf;

use lib_spool::SelectionStore;
use serde_json::{json, Value};

/// JSON-file-backed persistence for the active spool selection.
///
/// The file holds a single namespaced key:
/// `{"spoolman.spool_id": <id or null>}`.
pub struct JsonFileStore {
    path: PathBuf,
}

const ACTIVE_SPOOL_KEY: &str = "spoolman.spool_id";

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SelectionStore for JsonFileStore {
    fn load(&self) -> anyhow::Result<Option<i64>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&raw)?;
        Ok(value.get(ACTIVE_SPOOL_KEY).and_then(Value::as_i64))
    }

    fn save(&self, spool_id: Option<i64>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let value = json!({ ACTIVE_SPOOL_KEY: spool_id });
        fs::write(&self.path, serde_json::to_string_pretty(&value)?)?;
        Ok(())
    }
}
