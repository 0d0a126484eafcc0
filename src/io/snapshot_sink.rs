//! Snapshot sink - writes the latest zone snapshot to `<dir>/<zone>.json`
//!
//! Each write goes to a temporary file in the same directory and is renamed
//! over the target, so readers never see a half-written snapshot.

use crate::domain::snapshot::ZoneSnapshot;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct SnapshotSink {
    dir: PathBuf,
}

impl SnapshotSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        info!(dir = %dir.display(), "snapshot_sink_initialized");
        Self { dir }
    }

    pub fn path_for(&self, zone: &str) -> PathBuf {
        self.dir.join(format!("{zone}.json"))
    }

    /// Write a snapshot, returning true on success
    pub fn write_snapshot(&self, snapshot: &ZoneSnapshot) -> bool {
        match self.replace(&snapshot.zone, &snapshot.to_json()) {
            Ok(()) => {
                debug!(
                    zone = %snapshot.zone,
                    cycle_id = %snapshot.cycle_id,
                    total_current = %snapshot.total_current,
                    "snapshot_written"
                );
                true
            }
            Err(e) => {
                error!(zone = %snapshot.zone, error = %e, "snapshot_write_failed");
                false
            }
        }
    }

    /// Write on the blocking pool so a slow disk never stalls the zone loop
    pub async fn persist(self: Arc<Self>, snapshot: Arc<ZoneSnapshot>) -> bool {
        let zone = snapshot.zone.clone();
        match tokio::task::spawn_blocking(move || self.write_snapshot(&snapshot)).await {
            Ok(written) => written,
            Err(e) => {
                error!(zone = %zone, error = %e, "snapshot_write_task_failed");
                false
            }
        }
    }

    fn replace(&self, zone: &str, json: &str) -> std::io::Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }

        let target = self.path_for(zone);
        let tmp = self.dir.join(format!(".{zone}.json.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)
    }
}
