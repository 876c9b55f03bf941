// price_monitor/src/storage.rs
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_models::MonitorTask;
use tracing::error;

/// On-disk image of the currently active monitor tasks, read by the listing
/// and detail endpoints without touching the service lock.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks: Vec<MonitorTask>,
}

impl Snapshot {
    pub fn find(&self, task_id: &str) -> Option<&MonitorTask> {
        self.tasks.iter().find(|task| task.task_id == task_id)
    }
}

/// Single-writer snapshot file. Writes go to a temp file first and are
/// swapped in with an atomic rename.
pub struct SnapshotStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(data_dir: &str) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {data_dir}"))?;
        Ok(Self {
            path: PathBuf::from(data_dir).join("active_tasks.json"),
            lock: Mutex::new(()),
        })
    }

    pub fn write(&self, tasks: &[MonitorTask]) -> Result<()> {
        let snapshot = Snapshot {
            updated_at: Some(Utc::now()),
            tasks: tasks.to_vec(),
        };
        let payload = serde_json::to_string_pretty(&snapshot)?;

        let _guard = self.lock.lock().expect("snapshot lock poisoned");
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)
            .with_context(|| format!("Failed to write snapshot temp file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace snapshot {}", self.path.display()))?;
        Ok(())
    }

    /// A missing or corrupt snapshot reads as empty; the service rewrites it
    /// on the next transition.
    pub fn load(&self) -> Snapshot {
        let _guard = self.lock.lock().expect("snapshot lock poisoned");
        if !self.path.exists() {
            return Snapshot::default();
        }
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!("Failed to parse snapshot {}: {}", self.path.display(), e);
                    Snapshot::default()
                }
            },
            Err(e) => {
                error!("Failed to read snapshot {}: {}", self.path.display(), e);
                Snapshot::default()
            }
        }
    }
}
