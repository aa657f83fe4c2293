//! Radar data structures
//!
//! Metadata and per-spoke structures shared by every vendor family,
//! independent of any I/O or networking code.

use crate::Brand;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::net::{Ipv4Addr, SocketAddrV4};

// =============================================================================
// Serde helpers for SocketAddrV4/Ipv4Addr <-> String
// =============================================================================

mod socket_addr_serde {
    use super::*;

    pub fn serialize<S: Serializer>(addr: &SocketAddrV4, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddrV4, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod option_socket_addr_serde {
    use super::*;

    pub fn serialize<S: Serializer>(addr: &Option<SocketAddrV4>, s: S) -> Result<S::Ok, S::Error> {
        match addr {
            Some(a) => s.serialize_some(&a.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SocketAddrV4>, D::Error> {
        let opt: Option<String> = Option::deserialize(d)?;
        match opt {
            Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

mod option_ipv4_serde {
    use super::*;

    pub fn serialize<S: Serializer>(addr: &Option<Ipv4Addr>, s: S) -> Result<S::Ok, S::Error> {
        match addr {
            Some(a) => s.serialize_some(&a.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Ipv4Addr>, D::Error> {
        let opt: Option<String> = Option::deserialize(d)?;
        match opt {
            Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Basic radar information parsed from a discovery announcement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarDiscovery {
    /// Radar brand
    pub brand: Brand,
    /// Radar model (if known at discovery time)
    pub model: Option<String>,
    /// Radar name/serial from the announcement
    pub name: String,
    /// Primary radar address (IP + port the announcement points at)
    #[serde(with = "socket_addr_serde")]
    pub address: SocketAddrV4,
    /// Number of spokes per revolution
    pub spokes_per_revolution: u16,
    /// Maximum spoke length in samples
    pub max_spoke_len: u16,
    /// Pixel depth (e.g. 16 or 256 distinct values)
    pub pixel_values: u8,
    /// Serial number, when the announcement carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// NIC address that received this announcement
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_ipv4_serde")]
    pub nic_address: Option<Ipv4Addr>,
    /// Suffix for dual-channel radomes ("A" or "B"), None for single-channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    /// Spoke data multicast address
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_socket_addr_serde")]
    pub data_address: Option<SocketAddrV4>,
    /// Status report multicast address
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_socket_addr_serde")]
    pub report_address: Option<SocketAddrV4>,
    /// Command (send) address
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_socket_addr_serde")]
    pub send_address: Option<SocketAddrV4>,
}

/// Network identity of one logical radar, as maintained per session.
///
/// Created from a [`RadarDiscovery`] and revised whenever a fresh
/// announcement disagrees; persisted by the driver so a restart can
/// rejoin the data stream without waiting for the next announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarLocationInfo {
    /// Serial number, if any announcement carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Address the announcement originated from
    #[serde(with = "socket_addr_serde")]
    pub origin: SocketAddrV4,
    /// Status report multicast address
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_socket_addr_serde")]
    pub report_address: Option<SocketAddrV4>,
    /// Spoke data multicast address
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_socket_addr_serde")]
    pub data_address: Option<SocketAddrV4>,
    /// Command (send) address
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_socket_addr_serde")]
    pub send_address: Option<SocketAddrV4>,
    /// NIC via which the radar was last seen
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_ipv4_serde")]
    pub nic_address: Option<Ipv4Addr>,
}

impl RadarLocationInfo {
    pub fn from_discovery(d: &RadarDiscovery) -> Self {
        Self {
            serial_number: d.serial_number.clone(),
            origin: d.address,
            report_address: d.report_address,
            data_address: d.data_address,
            send_address: d.send_address,
            nic_address: d.nic_address,
        }
    }

    /// Merge a fresh discovery into this location, returning true when
    /// anything actually changed (callers persist on change).
    pub fn update_from(&mut self, d: &RadarDiscovery) -> bool {
        let fresh = Self::from_discovery(d);
        if *self != fresh {
            // Keep a previously learned serial if the new announcement has none
            let serial = fresh
                .serial_number
                .clone()
                .or_else(|| self.serial_number.clone());
            *self = fresh;
            self.serial_number = serial;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Spokes
// =============================================================================

/// One angular line of radar return intensities, normalized to one
/// sample per byte regardless of the vendor's wire packing.
#[derive(Debug, Clone, PartialEq)]
pub struct Spoke {
    /// Angle in vendor spoke units [0..spokes_per_revolution)
    pub angle: u16,
    /// Scanned range in meters
    pub range: u32,
    /// Heading in vendor angle units, when the radar supplied a valid one
    pub heading: Option<u16>,
    /// Timestamp in milliseconds (driver clock)
    pub time_ms: u64,
    /// Return intensities, innermost cell first
    pub data: Vec<u8>,
}

// =============================================================================
// Statistics
// =============================================================================

/// Rolling per-radar receive statistics.
///
/// `missing_spokes` is derived from non-consecutive angle indices, so it
/// only counts gaps the protocol makes visible.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub received_packets: u64,
    pub broken_packets: u64,
    pub received_spokes: u64,
    pub missing_spokes: u64,
}

impl Statistics {
    /// Account one spoke, using the previous spoke's angle to detect gaps.
    /// Returns true when this spoke completed a rotation (wrapped past 0).
    pub fn observe_spoke(
        &mut self,
        angle: u16,
        prev_angle: Option<u16>,
        spokes_per_revolution: u16,
    ) -> bool {
        self.received_spokes += 1;
        let mut full_rotation = false;
        if let Some(prev) = prev_angle {
            let expected = (prev + 1) % spokes_per_revolution;
            if angle != expected {
                let gap = (angle + spokes_per_revolution - expected) % spokes_per_revolution;
                self.missing_spokes += gap as u64;
            }
            if angle < prev {
                full_rotation = true;
            }
        }
        full_rotation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn discovery(serial: Option<&str>, origin: SocketAddrV4) -> RadarDiscovery {
        RadarDiscovery {
            brand: Brand::Navico,
            model: None,
            name: "radar".into(),
            address: origin,
            spokes_per_revolution: 2048,
            max_spoke_len: 1024,
            pixel_values: 16,
            serial_number: serial.map(|s| s.to_string()),
            nic_address: None,
            suffix: None,
            data_address: Some(SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 8), 6678)),
            report_address: Some(SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 9), 6679)),
            send_address: Some(SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 10), 6680)),
        }
    }

    #[test]
    fn test_location_update_keeps_serial() {
        let origin = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 50), 6878);
        let mut loc = RadarLocationInfo::from_discovery(&discovery(Some("1234567890"), origin));

        // Later announcement from a different origin, without a serial
        let origin2 = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 51), 6878);
        let changed = loc.update_from(&discovery(None, origin2));
        assert!(changed);
        assert_eq!(loc.origin, origin2);
        assert_eq!(loc.serial_number.as_deref(), Some("1234567890"));

        // Identical announcement is a no-op
        assert!(!loc.update_from(&discovery(None, origin2)));
    }

    #[test]
    fn test_statistics_gap_detection() {
        let mut stats = Statistics::default();

        assert!(!stats.observe_spoke(10, Some(9), 2048));
        assert_eq!(stats.missing_spokes, 0);

        // Jump from 10 to 14 skips 11, 12, 13
        assert!(!stats.observe_spoke(14, Some(10), 2048));
        assert_eq!(stats.missing_spokes, 3);

        // Wrap completes a rotation
        assert!(stats.observe_spoke(0, Some(2047), 2048));
        assert_eq!(stats.received_spokes, 3);
    }
}
