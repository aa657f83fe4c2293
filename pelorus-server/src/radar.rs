//! Per-radar shared state and the radar registry.
//!
//! Each receive engine owns its sockets but shares one [`RadarInfo`] with
//! the rest of the process behind a mutex. Lock discipline: take the lock
//! for one read-modify-write, never across an await or a socket call.

use pelorus_core::{
    Brand, Controls, ParseError, RadarDiscovery, RadarLocationInfo, Spoke, SpokeProcessor,
    StateTracker, Statistics,
};
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;

#[derive(thiserror::Error, Debug)]
pub enum RadarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Shutdown requested")]
    Shutdown,
    #[error("Radar not seen for too long")]
    Timeout,
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("No usable network interface")]
    NoInterface,
}

/// Everything the rest of the process may want to know about one radar.
pub struct RadarInfo {
    pub key: String,
    pub brand: Brand,
    pub location: RadarLocationInfo,
    pub nic_addr: Ipv4Addr,
    pub spokes_per_revolution: u16,
    pub max_spoke_len: u16,
    pub pixel_values: u8,
    /// Model name, once a type report identified it.
    pub model: Option<String>,
    /// Firmware or serial text from identification reports.
    pub firmware: Option<String>,
    pub controls: Controls,
    pub state: StateTracker,
    pub processor: SpokeProcessor,
    /// Range table reported by the radar, meters.
    pub ranges: Vec<u32>,
    /// Whether the operator asked for transmit.
    pub transmit_requested: bool,
}

impl RadarInfo {
    pub fn new(discovery: &RadarDiscovery, nic_addr: Ipv4Addr) -> Self {
        Self {
            key: radar_key(discovery),
            brand: discovery.brand,
            location: RadarLocationInfo::from_discovery(discovery),
            nic_addr,
            spokes_per_revolution: discovery.spokes_per_revolution,
            max_spoke_len: discovery.max_spoke_len,
            pixel_values: discovery.pixel_values,
            model: discovery.model.clone(),
            firmware: None,
            controls: Controls::new(),
            state: StateTracker::new(),
            processor: SpokeProcessor::new(
                discovery.spokes_per_revolution,
                discovery.max_spoke_len,
            ),
            ranges: Vec::new(),
            transmit_requested: false,
        }
    }

    pub fn statistics(&self) -> Statistics {
        self.processor.statistics
    }
}

/// Stable key for one logical radar.
pub fn radar_key(d: &RadarDiscovery) -> String {
    let mut key = format!("{}-{}", d.brand, d.name);
    if let Some(suffix) = &d.suffix {
        key.push('-');
        key.push_str(suffix);
    }
    key.retain(|c| !c.is_whitespace());
    key
}

pub type SharedRadar = Arc<Mutex<RadarInfo>>;

/// Spokes published by a receive engine, tagged with the radar they belong to.
#[derive(Clone, Debug)]
pub struct SpokeBatch {
    pub key: String,
    pub spokes: Arc<Vec<Spoke>>,
}

/// Summary for status listings.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RadarSummary {
    pub key: String,
    pub brand: Brand,
    pub model: Option<String>,
    pub state: pelorus_core::RadarState,
    pub received_spokes: u64,
    pub missing_spokes: u64,
    pub broken_packets: u64,
}

/// Thread-safe radar registry shared between the locator, the receive
/// engines, and the host-facing side.
#[derive(Clone)]
pub struct SharedRadars {
    radars: Arc<RwLock<HashMap<String, SharedRadar>>>,
    spoke_tx: broadcast::Sender<SpokeBatch>,
}

impl SharedRadars {
    pub fn new() -> Self {
        let (spoke_tx, _) = broadcast::channel(64);
        Self {
            radars: Arc::new(RwLock::new(HashMap::new())),
            spoke_tx,
        }
    }

    /// Register a radar if its key is new. Returns the shared handle and
    /// whether it was inserted (false when already known).
    pub fn insert(&self, discovery: &RadarDiscovery, nic_addr: Ipv4Addr) -> (SharedRadar, bool) {
        let key = radar_key(discovery);
        let mut radars = self.radars.write().unwrap();
        if let Some(existing) = radars.get(&key) {
            // Known radar, maybe announcing fresh addresses
            let mut info = existing.lock().unwrap();
            info.location.update_from(discovery);
            return (existing.clone(), false);
        }
        let radar = Arc::new(Mutex::new(RadarInfo::new(discovery, nic_addr)));
        radars.insert(key, radar.clone());
        (radar, true)
    }

    pub fn get(&self, key: &str) -> Option<SharedRadar> {
        self.radars.read().unwrap().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<SharedRadar> {
        self.radars.write().unwrap().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.radars.read().unwrap().keys().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<RadarSummary> {
        self.radars
            .read()
            .unwrap()
            .values()
            .map(|r| {
                let info = r.lock().unwrap();
                let stats = info.statistics();
                RadarSummary {
                    key: info.key.clone(),
                    brand: info.brand,
                    model: info.model.clone(),
                    state: info.state.state(),
                    received_spokes: stats.received_spokes,
                    missing_spokes: stats.missing_spokes,
                    broken_packets: stats.broken_packets,
                }
            })
            .collect()
    }

    /// Subscribe to the decoded spoke stream of every radar.
    pub fn subscribe_spokes(&self) -> broadcast::Receiver<SpokeBatch> {
        self.spoke_tx.subscribe()
    }

    /// Publish a batch of processed spokes. Fails silently when nobody
    /// listens; receive engines must not care.
    pub fn publish_spokes(&self, key: &str, spokes: Vec<Spoke>) {
        let _ = self.spoke_tx.send(SpokeBatch {
            key: key.to_string(),
            spokes: Arc::new(spokes),
        });
    }
}

impl Default for SharedRadars {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience for the "lock, mutate, unlock" pattern.
pub fn with_radar<T>(radar: &SharedRadar, f: impl FnOnce(&mut MutexGuard<RadarInfo>) -> T) -> T {
    let mut guard = radar.lock().unwrap();
    f(&mut guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddrV4;

    fn discovery(name: &str, suffix: Option<&str>) -> RadarDiscovery {
        RadarDiscovery {
            brand: Brand::Navico,
            model: None,
            name: name.to_string(),
            address: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 50), 6878),
            spokes_per_revolution: 2048,
            max_spoke_len: 1024,
            pixel_values: 16,
            serial_number: None,
            nic_address: None,
            suffix: suffix.map(|s| s.to_string()),
            data_address: None,
            report_address: None,
            send_address: None,
        }
    }

    #[test]
    fn test_radar_key_includes_suffix() {
        assert_eq!(radar_key(&discovery("HALO 24", None)), "Navico-HALO24");
        assert_eq!(
            radar_key(&discovery("HALO 24", Some("B"))),
            "Navico-HALO24-B"
        );
    }

    #[test]
    fn test_insert_is_idempotent() {
        let radars = SharedRadars::new();
        let (_, inserted) = radars.insert(&discovery("HALO 24", None), Ipv4Addr::UNSPECIFIED);
        assert!(inserted);
        let (_, inserted) = radars.insert(&discovery("HALO 24", None), Ipv4Addr::UNSPECIFIED);
        assert!(!inserted);
        assert_eq!(radars.keys().len(), 1);
    }
}
