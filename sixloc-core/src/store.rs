//! File-backed landmark store keyed by IP address.
//!
//! One JSON object per line. The whole file is rewritten on save so that
//! prefix rotations (which move a landmark to a new key) persist.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::candidates::CandidateOffset;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Landmark {
    pub ip: String,
    pub interface_id: String,
    pub wan_mac: String,
    pub latitude: f64,
    pub longitude: f64,
    pub source_offset: CandidateOffset,
    #[serde(default)]
    pub is_reliable: bool,
    #[serde(default)]
    pub is_dynamic: bool,
    pub created_at_ms: i64,
    #[serde(default)]
    pub last_updated_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    pub old_ip: String,
    pub new_ip: String,
}

#[derive(Debug, Default)]
pub struct LandmarkStore {
    by_ip: BTreeMap<String, Landmark>,
}

impl LandmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A missing file is an empty store. Lines that do not parse are skipped.
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => return Err(err),
        };
        let mut store = Self::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Landmark>(&line) {
                Ok(lm) => {
                    store.by_ip.insert(lm.ip.clone(), lm);
                }
                Err(err) => warn!(path = %path.display(), line = lineno + 1, error = %err, "skipping bad landmark"),
            }
        }
        Ok(store)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for lm in self.by_ip.values() {
                serde_json::to_writer(&mut writer, lm)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)
    }

    pub fn len(&self) -> usize {
        self.by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ip.is_empty()
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.by_ip.contains_key(ip)
    }

    pub fn get(&self, ip: &str) -> Option<&Landmark> {
        self.by_ip.get(ip)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.by_ip.values()
    }

    /// Idempotent on IP: returns false and changes nothing if the IP is known.
    pub fn insert_if_absent(&mut self, landmark: Landmark) -> bool {
        if self.by_ip.contains_key(&landmark.ip) {
            return false;
        }
        self.by_ip.insert(landmark.ip.clone(), landmark);
        true
    }

    pub fn find_by_interface_id(&self, interface_id: &str) -> Option<&Landmark> {
        self.by_ip.values().find(|lm| lm.interface_id == interface_id)
    }

    /// Moves a landmark whose interface identifier reappeared under a new
    /// IP, marking it dynamic. Returns `None` if the identifier is unknown or
    /// already stored under `new_ip`.
    pub fn check_prefix_rotation(
        &mut self,
        new_ip: &str,
        interface_id: &str,
        now_ms: i64,
    ) -> Option<Rotation> {
        let old_ip = self.find_by_interface_id(interface_id)?.ip.clone();
        if old_ip == new_ip {
            return None;
        }
        let mut moved = self.by_ip.remove(&old_ip)?;
        info!(interface_id, %old_ip, %new_ip, "prefix rotation");
        moved.ip = new_ip.to_string();
        moved.is_dynamic = true;
        moved.last_updated_ms = Some(now_ms);
        self.by_ip.insert(new_ip.to_string(), moved);
        Some(Rotation {
            old_ip,
            new_ip: new_ip.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmark(ip: &str, iid: &str) -> Landmark {
        Landmark {
            ip: ip.to_string(),
            interface_id: iid.to_string(),
            wan_mac: "00:11:22:33:44:55".to_string(),
            latitude: 48.137,
            longitude: 11.575,
            source_offset: -1,
            is_reliable: false,
            is_dynamic: false,
            created_at_ms: 1_000,
            last_updated_ms: None,
        }
    }

    #[test]
    fn insert_is_idempotent_per_ip() {
        let mut store = LandmarkStore::new();
        assert!(store.insert_if_absent(landmark("2001:db8::1", "a")));
        let mut other = landmark("2001:db8::1", "b");
        other.latitude = 1.0;
        assert!(!store.insert_if_absent(other));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("2001:db8::1").unwrap().interface_id, "a");
    }

    #[test]
    fn rotation_moves_landmark_to_new_ip() {
        let mut store = LandmarkStore::new();
        store.insert_if_absent(landmark("2001:db8:1::1", "0211:22ff:fe33:4455"));

        let rot = store
            .check_prefix_rotation("2001:db8:2::1", "0211:22ff:fe33:4455", 5_000)
            .unwrap();
        assert_eq!(
            rot,
            Rotation {
                old_ip: "2001:db8:1::1".to_string(),
                new_ip: "2001:db8:2::1".to_string(),
            }
        );
        assert!(!store.contains("2001:db8:1::1"));
        let moved = store.get("2001:db8:2::1").unwrap();
        assert!(moved.is_dynamic);
        assert_eq!(moved.last_updated_ms, Some(5_000));
        assert_eq!(moved.created_at_ms, 1_000);
        assert_eq!(moved.source_offset, -1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rotation_ignores_unknown_or_unchanged() {
        let mut store = LandmarkStore::new();
        store.insert_if_absent(landmark("2001:db8:1::1", "x"));
        assert!(store.check_prefix_rotation("2001:db8:1::1", "x", 1).is_none());
        assert!(store.check_prefix_rotation("2001:db8:9::1", "y", 1).is_none());
        assert!(!store.get("2001:db8:1::1").unwrap().is_dynamic);
    }

    #[test]
    fn save_and_load_preserve_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("landmarks.jsonl");
        let mut store = LandmarkStore::new();
        store.insert_if_absent(landmark("2001:db8::1", "a"));
        store.insert_if_absent(landmark("2001:db8::2", "b"));
        store.save(&path).unwrap();

        let loaded = LandmarkStore::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("2001:db8::2"), store.get("2001:db8::2"));
    }

    #[test]
    fn load_skips_bad_lines_and_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = LandmarkStore::load(dir.path().join("none.jsonl")).unwrap();
        assert!(missing.is_empty());

        let path = dir.path().join("lm.jsonl");
        let good = serde_json::to_string(&landmark("2001:db8::1", "a")).unwrap();
        fs::write(&path, format!("{good}\nnot json\n\n")).unwrap();
        let loaded = LandmarkStore::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
