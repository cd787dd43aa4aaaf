//! Persistence of planned snapshot sequences.
//!
//! The final snapshot sequence is written as a small versioned JSON document
//! so later tooling (e.g. a G-code post-processor inserting camera moves) can
//! reuse it. Floats are written in shortest round-trip form, so a save/load
//! cycle is lossless.

use crate::geometry::PointF;
use crate::{Error, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Current state file version.
pub const STATE_VERSION: u32 = 1;

/// On-disk representation of a snapshot sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub version: u32,
    /// One snapshot per layer, in layer order.
    pub snapshots: Vec<PointF>,
}

impl SnapshotFile {
    pub fn new(snapshots: Vec<PointF>) -> Self {
        Self {
            version: STATE_VERSION,
            snapshots,
        }
    }
}

/// Write a snapshot sequence to `path`, creating parent directories.
pub fn save_snapshots<P: AsRef<Path>>(path: P, snapshots: &[PointF]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&SnapshotFile::new(snapshots.to_vec()))?;
    fs::write(path, json)?;
    info!("Saved {} snapshots to {}", snapshots.len(), path.display());
    Ok(())
}

/// Read a snapshot sequence written by [`save_snapshots`].
pub fn load_snapshots<P: AsRef<Path>>(path: P) -> Result<Vec<PointF>> {
    let text = fs::read_to_string(path.as_ref())?;
    let file: SnapshotFile = serde_json::from_str(&text)?;
    if file.version != STATE_VERSION {
        return Err(Error::Config(format!(
            "unsupported state file version {} (expected {})",
            file.version, STATE_VERSION
        )));
    }
    Ok(file.snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("snapper-persist-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_save_load_is_lossless() {
        let path = temp_path("points.json");
        let snapshots = vec![
            PointF::new(0.1 + 0.2, 1.0 / 3.0),
            PointF::new(-1e-300, 123456.789012345),
            PointF::new(f64::MAX, f64::MIN_POSITIVE),
        ];
        save_snapshots(&path, &snapshots).unwrap();
        assert_eq!(load_snapshots(&path).unwrap(), snapshots);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let path = temp_path("future.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"version": 99, "snapshots": []}"#).unwrap();
        assert!(matches!(load_snapshots(&path), Err(Error::Config(_))));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        let path = temp_path("garbage.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();
        assert!(matches!(load_snapshots(&path), Err(Error::Serialization(_))));
        let _ = fs::remove_file(&path);
    }
}
