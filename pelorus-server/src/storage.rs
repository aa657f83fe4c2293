//! Persistence of discovered radar addresses.
//!
//! A radar that was seen once is written to disk so a driver restart can
//! reserve its slot and rejoin its data stream immediately, without waiting
//! up to half a minute for the next announcement.
//!
//! Storage path: `~/.local/share/pelorus/radars/{key}.json`

use directories::ProjectDirs;
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use pelorus_core::RadarDiscovery;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use crate::radar::radar_key;

static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("org", "pelorus", "pelorus"));

/// Data directory for the application, if the platform has one.
pub fn data_dir() -> Option<PathBuf> {
    PROJECT_DIRS.as_ref().map(|d| d.data_dir().to_owned())
}

/// On-disk store of the last known [`RadarDiscovery`] per radar key.
pub struct RadarStorage {
    base_dir: Option<PathBuf>,
}

impl RadarStorage {
    /// Store under the platform data directory. `enabled: false` gives a
    /// null store that never touches disk (`--no-persistence`).
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Self { base_dir: None };
        }
        let Some(mut base_dir) = data_dir() else {
            warn!("No platform data directory, radar persistence disabled");
            return Self { base_dir: None };
        };
        base_dir.push("radars");
        if let Err(e) = fs::create_dir_all(&base_dir) {
            error!("Failed to create {}: {}", base_dir.display(), e);
            return Self { base_dir: None };
        }
        debug!("Radar persistence directory: {}", base_dir.display());
        Self {
            base_dir: Some(base_dir),
        }
    }

    #[cfg(test)]
    fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            base_dir: Some(base_dir),
        }
    }

    fn file_path(&self, key: &str) -> Option<PathBuf> {
        let mut path = self.base_dir.clone()?;
        // Keys are already whitespace-free, but be strict about separators
        let safe_key: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        path.push(format!("{}.json", safe_key));
        Some(path)
    }

    /// All persisted discoveries. Unreadable files are skipped with a
    /// warning; a corrupt entry must not take the whole driver down.
    pub fn load_all(&self) -> Vec<RadarDiscovery> {
        let Some(base_dir) = &self.base_dir else {
            return Vec::new();
        };
        let mut result = Vec::new();
        let Ok(entries) = fs::read_dir(base_dir) else {
            return result;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::File::open(&path) {
                Ok(file) => {
                    let reader = BufReader::new(file);
                    match serde_json::from_reader::<_, RadarDiscovery>(reader) {
                        Ok(discovery) => {
                            debug!("Restored radar from {}", path.display());
                            result.push(discovery);
                        }
                        Err(e) => {
                            warn!("Skipping unparseable {}: {}", path.display(), e);
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path.display(), e);
                }
            }
        }
        result
    }

    /// Persist the latest discovery for its radar key.
    pub fn save(&self, discovery: &RadarDiscovery) {
        let key = radar_key(discovery);
        let Some(path) = self.file_path(&key) else {
            return;
        };
        match fs::File::create(&path) {
            Ok(file) => {
                let mut writer = BufWriter::new(file);
                if let Err(e) = serde_json::to_writer_pretty(&mut writer, discovery) {
                    error!("Failed to write {}: {}", path.display(), e);
                    return;
                }
                if let Err(e) = writer.write_all(b"\n").and_then(|_| writer.flush()) {
                    warn!("Failed to flush {}: {}", path.display(), e);
                    return;
                }
                info!("Persisted radar {} to {}", key, path.display());
            }
            Err(e) => {
                error!("Failed to create {}: {}", path.display(), e);
            }
        }
    }

    /// Forget a radar.
    pub fn remove(&self, key: &str) {
        let Some(path) = self.file_path(key) else {
            return;
        };
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to delete {}: {}", path.display(), e);
            } else {
                info!("Removed persisted radar {}", key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pelorus_core::Brand;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tempfile::TempDir;

    fn discovery(name: &str) -> RadarDiscovery {
        RadarDiscovery {
            brand: Brand::Navico,
            model: Some("HALO".to_string()),
            name: name.to_string(),
            address: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 50), 6878),
            spokes_per_revolution: 2048,
            max_spoke_len: 1024,
            pixel_values: 16,
            serial_number: Some("1234567890".to_string()),
            nic_address: None,
            suffix: None,
            data_address: Some(SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 8), 6678)),
            report_address: Some(SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 9), 6679)),
            send_address: Some(SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 10), 6680)),
        }
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let storage = RadarStorage::with_base_dir(temp.path().to_path_buf());

        storage.save(&discovery("HALO24"));
        storage.save(&discovery("4G"));

        let loaded = storage.load_all();
        assert_eq!(loaded.len(), 2);
        let names: Vec<&str> = loaded.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"HALO24"));
        assert!(names.contains(&"4G"));
        assert_eq!(loaded[0].serial_number.as_deref(), Some("1234567890"));
    }

    #[test]
    fn test_save_overwrites_same_key() {
        let temp = TempDir::new().unwrap();
        let storage = RadarStorage::with_base_dir(temp.path().to_path_buf());

        let mut d = discovery("HALO24");
        storage.save(&d);
        d.address = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 99), 6878);
        storage.save(&d);

        let loaded = storage.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].address.ip(), &Ipv4Addr::new(192, 168, 1, 99));
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let storage = RadarStorage::with_base_dir(temp.path().to_path_buf());

        let d = discovery("HALO24");
        storage.save(&d);
        storage.remove(&radar_key(&d));
        assert!(storage.load_all().is_empty());
    }

    #[test]
    fn test_disabled_storage_is_silent() {
        let storage = RadarStorage::new(false);
        storage.save(&discovery("HALO24"));
        assert!(storage.load_all().is_empty());
    }

    #[test]
    fn test_corrupt_entry_is_skipped() {
        let temp = TempDir::new().unwrap();
        let storage = RadarStorage::with_base_dir(temp.path().to_path_buf());

        storage.save(&discovery("HALO24"));
        fs::write(temp.path().join("broken.json"), b"{ not json").unwrap();

        assert_eq!(storage.load_all().len(), 1);
    }
}
