//! Raymarine radar protocol (RD series, Quantum)
//!
//! Two sub-generations share one discovery scheme but differ on the
//! data path:
//!
//! - **RD / HD / SHD / Magnum**: nested container datagrams, a 32-byte
//!   outer header followed by repeated {spoke header, optional extra
//!   header, spoke data} records, RLE compressed.
//! - **Quantum / Cyclone**: one spoke per datagram behind a 20-byte
//!   frame header, same RLE scheme.
//!
//! Discovery is a two-beacon handshake on 224.0.0.1:5800: a 56-byte
//! identity beacon names the radar, and a 36-byte endpoint beacon with
//! the same link id carries the report and command addresses. The two
//! halves are paired by [`BeaconPairer`].

use super::{c_string, LittleEndianSocketAddrV4};
use crate::error::ParseError;
use crate::radar::{RadarDiscovery, Spoke};
use crate::Brand;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};

// =============================================================================
// Constants
// =============================================================================

/// Spokes per revolution for RD series radars
pub const RD_SPOKES_PER_REVOLUTION: u16 = 2048;

/// Maximum spoke length in samples for RD series
pub const RD_MAX_SPOKE_LEN: u16 = 1024;

/// Spokes per revolution for Quantum radars
pub const QUANTUM_SPOKES_PER_REVOLUTION: u16 = 250;

/// Maximum spoke length in samples for Quantum
pub const QUANTUM_MAX_SPOKE_LEN: u16 = 252;

/// Pixel depth for non-HD radars (two 4-bit samples per wire byte)
pub const NON_HD_PIXEL_VALUES: u8 = 16;

/// Pixel depth for HD and Quantum radars (top bit reserved)
pub const HD_PIXEL_VALUES: u8 = 128;

/// Beacon multicast group shared by all wired Raymarine radars
pub const BEACON_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);
pub const BEACON_PORT: u16 = 5800;

/// Multicast group used by WiFi-connected Quantum radars
pub const QUANTUM_WIFI_ADDR: Ipv4Addr = Ipv4Addr::new(232, 1, 1, 1);

/// Quantum rotates its zero azimuth by half a revolution
pub const QUANTUM_ANGLE_OFFSET: u16 = 125;

/// Message ids (first u32 of every report/data datagram)
pub const MESSAGE_RD_STATUS: u32 = 0x00010001;
pub const MESSAGE_RD_FIXED: u32 = 0x00010002;
pub const MESSAGE_RD_FRAME: u32 = 0x00010003;
pub const MESSAGE_RD_SERIAL: u32 = 0x00010006;
pub const MESSAGE_RD_STATUS_HD: u32 = 0x00018801;
pub const MESSAGE_QUANTUM_STATUS: u32 = 0x00280002;
pub const MESSAGE_QUANTUM_SPOKE: u32 = 0x00280003;

/// RLE escape byte in spoke data
pub const RLE_ESCAPE: u8 = 0x5c;

/// Reported ranges are nautical-mile based; scale to meters
const RANGE_SCALE: f64 = 1.852;

/// Extract the message id of a report or data datagram
pub fn message_id(data: &[u8]) -> Option<u32> {
    if data.len() >= 4 {
        Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
    } else {
        None
    }
}

// =============================================================================
// Models
// =============================================================================

/// Protocol sub-generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseModel {
    /// Magnetron radars: RD, HD, SHD, Magnum
    #[default]
    Rd,
    /// Solid-state radars: Quantum, Cyclone
    Quantum,
}

impl BaseModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseModel::Rd => "RD",
            BaseModel::Quantum => "Quantum",
        }
    }

    pub fn spokes_per_revolution(&self) -> u16 {
        match self {
            BaseModel::Rd => RD_SPOKES_PER_REVOLUTION,
            BaseModel::Quantum => QUANTUM_SPOKES_PER_REVOLUTION,
        }
    }

    pub fn max_spoke_len(&self) -> u16 {
        match self {
            BaseModel::Rd => RD_MAX_SPOKE_LEN,
            BaseModel::Quantum => QUANTUM_MAX_SPOKE_LEN,
        }
    }
}

impl std::fmt::Display for BaseModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Model details resolved from an E-series part number
#[derive(Debug, Clone)]
pub struct Model {
    pub base: BaseModel,
    pub spokes_per_revolution: u16,
    pub max_spoke_len: u16,
    pub doppler: bool,
    pub name: &'static str,
    pub part_number: &'static str,
}

impl Model {
    pub fn from_part_number(part: &str) -> Option<Self> {
        use BaseModel::*;

        // (part_number, base, doppler, max_spoke_len, name)
        const TABLE: &[(&str, BaseModel, bool, u16, &str)] = &[
            ("E70210", Quantum, false, QUANTUM_MAX_SPOKE_LEN, "Quantum Q24"),
            ("E70344", Quantum, false, QUANTUM_MAX_SPOKE_LEN, "Quantum Q24C"),
            ("E70498", Quantum, true, QUANTUM_MAX_SPOKE_LEN, "Quantum Q24D"),
            ("E70620", Quantum, true, QUANTUM_MAX_SPOKE_LEN, "Cyclone"),
            ("E70621", Quantum, true, QUANTUM_MAX_SPOKE_LEN, "Cyclone Pro"),
            ("E70484", Rd, false, RD_MAX_SPOKE_LEN, "Magnum 4kW"),
            ("E70487", Rd, false, RD_MAX_SPOKE_LEN, "Magnum 12kW"),
            ("E52069", Rd, false, RD_MAX_SPOKE_LEN, "Open Array HD 4kW"),
            ("E92160", Rd, false, RD_MAX_SPOKE_LEN, "Open Array HD 12kW"),
            ("E52081", Rd, false, RD_MAX_SPOKE_LEN, "Open Array SHD 4kW"),
            ("E52082", Rd, false, RD_MAX_SPOKE_LEN, "Open Array SHD 12kW"),
            ("E92142", Rd, false, RD_MAX_SPOKE_LEN, "RD418HD"),
            ("E92143", Rd, false, RD_MAX_SPOKE_LEN, "RD424HD"),
            ("E92130", Rd, false, 512, "RD418D"),
            ("E92132", Rd, false, 512, "RD424D"),
        ];

        let &(part_number, base, doppler, max_spoke_len, name) =
            TABLE.iter().find(|entry| entry.0 == part)?;

        Some(Model {
            base,
            spokes_per_revolution: base.spokes_per_revolution(),
            max_spoke_len,
            doppler,
            name,
            part_number,
        })
    }
}

// =============================================================================
// Operational status
// =============================================================================

/// Scanner status byte shared by RD and Quantum status reports
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    Standby,
    Transmit,
    WarmingUp,
    Off,
    /// RD reports 6 while counting down to power off
    ShuttingDown,
}

impl Status {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(Status::Standby),
            1 => Some(Status::Transmit),
            2 => Some(Status::WarmingUp),
            3 => Some(Status::Off),
            6 => Some(Status::ShuttingDown),
            _ => None,
        }
    }
}

// =============================================================================
// Beacons
// =============================================================================

/// Beacon types (first u32)
const BEACON_TYPE_ENDPOINTS: u32 = 0x00000000;
const BEACON_TYPE_IDENTITY: u32 = 0x00000001;

/// Identity beacon subtypes
pub const SUBTYPE_QUANTUM_IDENTITY: u32 = 0x66;
pub const SUBTYPE_RD_IDENTITY: u32 = 0x01;
pub const SUBTYPE_WIRELESS_IDENTITY: u32 = 0x4d;
pub const SUBTYPE_MFD_REQUEST: u32 = 0x11;

/// Endpoint beacon subtypes
pub const SUBTYPE_QUANTUM_ENDPOINTS: u32 = 0x28;
pub const SUBTYPE_RD_ENDPOINTS: u32 = 0x01;

/// 56-byte identity beacon
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct IdentityBeacon {
    beacon_type: [u8; 4], // 0: 0x00000001
    subtype: [u8; 4],     // 4: 0x66 Quantum, 0x01 RD, 0x4d wireless, 0x11 MFD
    link_id: [u8; 4],     // 8
    _field4: [u8; 4],     // 12
    _field5: [u8; 4],     // 16
    model_name: [u8; 32], // 20: e.g. "QuantumRadar"
    _field7: [u8; 4],     // 52
}

/// 36-byte endpoint beacon, sent with the same link id
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct EndpointBeacon {
    beacon_type: [u8; 4],              // 0: 0x00000000
    link_id: [u8; 4],                  // 4
    subtype: [u8; 4],                  // 8: 0x28 Quantum, 0x01 RD
    _field4: [u8; 4],                  // 12
    _field5: [u8; 4],                  // 16
    report: LittleEndianSocketAddrV4,  // 20: report/data multicast
    _align1: [u8; 2],                  // 26
    command: LittleEndianSocketAddrV4, // 28: command address
    _align2: [u8; 2],                  // 34
}

pub const IDENTITY_BEACON_SIZE: usize = std::mem::size_of::<IdentityBeacon>();
pub const ENDPOINT_BEACON_SIZE: usize = std::mem::size_of::<EndpointBeacon>();

/// Parsed identity beacon
#[derive(Debug, Clone)]
pub struct BeaconIdentity {
    pub link_id: u32,
    pub base: BaseModel,
    pub model_name: Option<String>,
}

/// Parsed endpoint beacon
#[derive(Debug, Clone)]
pub struct BeaconEndpoints {
    pub link_id: u32,
    pub subtype: u32,
    pub report_address: SocketAddrV4,
    pub command_address: SocketAddrV4,
}

/// Any beacon seen on the discovery group
#[derive(Debug, Clone)]
pub enum Beacon {
    Identity(BeaconIdentity),
    Endpoints(BeaconEndpoints),
    /// Request from an MFD or other client; carries no radar info
    Ignore,
}

/// Parse a discovery datagram into one of the beacon halves.
pub fn parse_beacon(data: &[u8]) -> Result<Beacon, ParseError> {
    match data.len() {
        IDENTITY_BEACON_SIZE => parse_identity_beacon(data),
        ENDPOINT_BEACON_SIZE => parse_endpoint_beacon(data).map(Beacon::Endpoints),
        _ => Err(ParseError::TooShort {
            expected: ENDPOINT_BEACON_SIZE,
            actual: data.len(),
        }),
    }
}

fn parse_identity_beacon(data: &[u8]) -> Result<Beacon, ParseError> {
    let beacon: IdentityBeacon = bincode::deserialize(data)?;

    let beacon_type = u32::from_le_bytes(beacon.beacon_type);
    if beacon_type != BEACON_TYPE_IDENTITY {
        return Err(ParseError::InvalidHeader {
            expected: vec![0x01, 0x00, 0x00, 0x00],
            actual: beacon.beacon_type.to_vec(),
        });
    }

    let subtype = u32::from_le_bytes(beacon.subtype);
    let link_id = u32::from_le_bytes(beacon.link_id);

    let (base, model_name) = match subtype {
        SUBTYPE_QUANTUM_IDENTITY | SUBTYPE_WIRELESS_IDENTITY => {
            (BaseModel::Quantum, c_string(&beacon.model_name))
        }
        SUBTYPE_RD_IDENTITY => (BaseModel::Rd, None),
        SUBTYPE_MFD_REQUEST => return Ok(Beacon::Ignore),
        _ => {
            return Err(ParseError::InvalidPacket(format!(
                "unknown identity beacon subtype 0x{:02x}",
                subtype
            )))
        }
    };

    Ok(Beacon::Identity(BeaconIdentity {
        link_id,
        base,
        model_name,
    }))
}

fn parse_endpoint_beacon(data: &[u8]) -> Result<BeaconEndpoints, ParseError> {
    let beacon: EndpointBeacon = bincode::deserialize(data)?;

    let beacon_type = u32::from_le_bytes(beacon.beacon_type);
    if beacon_type != BEACON_TYPE_ENDPOINTS {
        return Err(ParseError::InvalidHeader {
            expected: vec![0x00, 0x00, 0x00, 0x00],
            actual: beacon.beacon_type.to_vec(),
        });
    }

    Ok(BeaconEndpoints {
        link_id: u32::from_le_bytes(beacon.link_id),
        subtype: u32::from_le_bytes(beacon.subtype),
        report_address: beacon.report.into(),
        command_address: beacon.command.into(),
    })
}

/// Pairs identity and endpoint beacons by link id.
///
/// A discovery is produced only once both halves of the handshake have
/// been seen; either order is accepted. Identities are kept so that a
/// later endpoint refresh re-yields a complete discovery.
#[derive(Debug, Default)]
pub struct BeaconPairer {
    identities: HashMap<u32, BeaconIdentity>,
    endpoints: HashMap<u32, BeaconEndpoints>,
}

impl BeaconPairer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one beacon; returns a discovery when its pair is complete.
    pub fn observe(&mut self, beacon: Beacon, source_addr: SocketAddrV4) -> Option<RadarDiscovery> {
        match beacon {
            Beacon::Identity(identity) => {
                let link_id = identity.link_id;
                self.identities.insert(link_id, identity);
                self.try_pair(link_id, source_addr)
            }
            Beacon::Endpoints(endpoints) => {
                let link_id = endpoints.link_id;
                self.endpoints.insert(link_id, endpoints);
                self.try_pair(link_id, source_addr)
            }
            Beacon::Ignore => None,
        }
    }

    fn try_pair(&self, link_id: u32, source_addr: SocketAddrV4) -> Option<RadarDiscovery> {
        let identity = self.identities.get(&link_id)?;
        let endpoints = self.endpoints.get(&link_id)?;

        let pixel_values = match identity.base {
            BaseModel::Quantum => HD_PIXEL_VALUES,
            BaseModel::Rd => NON_HD_PIXEL_VALUES,
        };

        Some(RadarDiscovery {
            brand: Brand::Raymarine,
            model: identity.model_name.clone(),
            name: format!("{} {:08X}", identity.base, link_id),
            address: source_addr,
            spokes_per_revolution: identity.base.spokes_per_revolution(),
            max_spoke_len: identity.base.max_spoke_len(),
            pixel_values,
            serial_number: None, // learned later from the serial report
            nic_address: None,   // filled in by the locator
            suffix: None,
            // Report and data share one multicast endpoint on Raymarine
            data_address: Some(endpoints.report_address),
            report_address: Some(endpoints.report_address),
            send_address: Some(endpoints.command_address),
        })
    }
}

/// 56-byte probe imitating an MFD; radars answer with their beacons
pub const MFD_PROBE: [u8; 56] = [
    0x01, 0x00, 0x00, 0x00, 0x11, 0x00, 0x00, 0x00, 0x38, 0x8c, 0x81, 0xd4, 0x6a, 0x01, 0x0e, 0x83,
    0x6c, 0x03, 0x12, 0xc6, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x00,
];

// =============================================================================
// RLE
// =============================================================================

/// Expand 0x5c-escaped run-length data into raw wire bytes.
///
/// An escape is {0x5c, count, fill}; any other byte is literal. A
/// truncated escape at the very end is dropped.
pub fn rle_decompress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut i = 0;
    while i < data.len() {
        if data[i] != RLE_ESCAPE {
            out.push(data[i]);
            i += 1;
        } else if i + 2 < data.len() {
            let count = data[i + 1] as usize;
            let fill = data[i + 2];
            out.extend(std::iter::repeat(fill).take(count));
            i += 3;
        } else {
            break;
        }
    }
    out
}

/// Compress raw bytes into the 0x5c-escaped run-length form.
///
/// Runs of three or more equal bytes become an escape triple, as does
/// any literal 0x5c (which cannot appear unescaped). Runs longer than
/// 255 are split.
pub fn rle_compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let value = data[i];
        let mut run = 1;
        while i + run < data.len() && data[i + run] == value && run < 255 {
            run += 1;
        }
        if run >= 3 || value == RLE_ESCAPE {
            out.push(RLE_ESCAPE);
            out.push(run as u8);
            out.push(value);
        } else {
            out.extend(std::iter::repeat(value).take(run));
        }
        i += run;
    }
    out
}

/// Expand non-HD wire bytes into two 4-bit samples each, low nibble
/// first (innermost cell).
fn expand_nibbles(packed: &[u8], max_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(packed.len() * 2);
    for &byte in packed {
        out.push(byte & 0x0f);
        out.push(byte >> 4);
        if out.len() >= max_len {
            break;
        }
    }
    out.truncate(max_len);
    out
}

// =============================================================================
// Quantum data path
// =============================================================================

/// Quantum spoke frame header (20 bytes)
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct QuantumFrameHeader {
    frame_type: [u8; 4],    // 0x00280003
    seq_num: [u8; 2],
    _something_1: [u8; 2],  // 0x0101
    scan_len: [u8; 2],
    num_spokes: [u8; 2],    // 0x00fa
    _something_3: [u8; 2],  // 0x0008
    returns_per_range: [u8; 2],
    azimuth: [u8; 2],
    data_len: [u8; 2],
}

pub const QUANTUM_FRAME_HEADER_SIZE: usize = std::mem::size_of::<QuantumFrameHeader>();

/// One decoded Quantum spoke
#[derive(Debug, Clone)]
pub struct DecodedQuantumSpoke {
    pub spoke: Spoke,
    pub seq_num: u16,
}

/// Decode one Quantum spoke datagram.
///
/// `range_meters` is the scanned range of the current range index,
/// taken from the latest status report. The azimuth is rotated by half
/// a revolution so that angle 0 points at the bow, and the effective
/// range is scaled by the ratio of returns in this spoke to the
/// returns the status promised for the range.
pub fn parse_quantum_spoke(
    data: &[u8],
    range_meters: u32,
    time_ms: u64,
) -> Result<DecodedQuantumSpoke, ParseError> {
    if data.len() < QUANTUM_FRAME_HEADER_SIZE {
        return Err(ParseError::TooShort {
            expected: QUANTUM_FRAME_HEADER_SIZE,
            actual: data.len(),
        });
    }

    let header: QuantumFrameHeader = bincode::deserialize(&data[..QUANTUM_FRAME_HEADER_SIZE])?;

    let frame_type = u32::from_le_bytes(header.frame_type);
    if frame_type != MESSAGE_QUANTUM_SPOKE {
        return Err(ParseError::UnknownPacketType(frame_type));
    }

    let scan_len = u16::from_le_bytes(header.scan_len) as usize;
    let returns_per_range = u16::from_le_bytes(header.returns_per_range) as u32;
    let azimuth = u16::from_le_bytes(header.azimuth);
    let data_len = u16::from_le_bytes(header.data_len) as usize;

    let compressed = &data[QUANTUM_FRAME_HEADER_SIZE..];
    let compressed = &compressed[..data_len.min(compressed.len())];

    let mut samples = rle_decompress(compressed);
    let returns_per_line = scan_len.min(QUANTUM_MAX_SPOKE_LEN as usize);
    samples.resize(returns_per_line, 0);

    let angle =
        (azimuth % QUANTUM_SPOKES_PER_REVOLUTION + QUANTUM_ANGLE_OFFSET) % QUANTUM_SPOKES_PER_REVOLUTION;

    let range = if returns_per_range > 0 {
        range_meters * returns_per_line as u32 / returns_per_range / 2
    } else {
        range_meters
    };

    Ok(DecodedQuantumSpoke {
        spoke: Spoke {
            angle,
            range,
            heading: None,
            time_ms,
            data: samples,
        },
        seq_num: u16::from_le_bytes(header.seq_num),
    })
}

/// Per-mode control block in a Quantum status report
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantumModeControls {
    pub gain_auto: bool,
    pub gain: u8,
    pub color_gain_auto: bool,
    pub color_gain: u8,
    pub sea_auto: bool,
    pub sea: u8,
    pub rain_enabled: bool,
    pub rain: u8,
}

/// Parsed Quantum status report (0x00280002)
#[derive(Debug, Clone)]
pub struct QuantumStatus {
    pub status: Option<Status>,
    pub bearing_offset: i16,
    pub interference_rejection: u8,
    pub range_index: u8,
    /// Operating mode: 0 harbor, 1 coastal, 2 offshore, 3 weather
    pub mode: u8,
    /// One control block per operating mode
    pub controls: [QuantumModeControls; 4],
    pub target_expansion: u8,
    pub mbs_enabled: bool,
    /// Range table in meters
    pub ranges: Vec<u32>,
}

impl QuantumStatus {
    /// Scanned range in meters for the active range index
    pub fn range_meters(&self) -> Option<u32> {
        self.ranges.get(self.range_index as usize).copied()
    }
}

/// Parse a Quantum status report.
pub fn parse_quantum_status(data: &[u8]) -> Result<QuantumStatus, ParseError> {
    const MIN_SIZE: usize = 228;
    if data.len() < MIN_SIZE {
        return Err(ParseError::TooShort {
            expected: MIN_SIZE,
            actual: data.len(),
        });
    }

    let mut controls = [QuantumModeControls::default(); 4];
    for (i, block) in controls.iter_mut().enumerate() {
        let base = 22 + i * 8;
        *block = QuantumModeControls {
            gain_auto: data[base] > 0,
            gain: data[base + 1],
            color_gain_auto: data[base + 2] > 0,
            color_gain: data[base + 3],
            sea_auto: data[base + 4] > 0,
            sea: data[base + 5],
            rain_enabled: data[base + 6] > 0,
            rain: data[base + 7],
        };
    }

    let mut ranges = Vec::with_capacity(20);
    for i in 0..20 {
        let offset = 148 + i * 4;
        if offset + 4 > data.len() {
            break;
        }
        let raw = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        ranges.push((raw as f64 * RANGE_SCALE) as u32);
    }

    Ok(QuantumStatus {
        status: Status::from_byte(data[4]),
        bearing_offset: i16::from_le_bytes([data[14], data[15]]),
        interference_rejection: data[17],
        range_index: data[20],
        mode: data[21],
        controls,
        target_expansion: data[54],
        mbs_enabled: data[59] > 0,
        ranges,
    })
}

// =============================================================================
// RD data path
// =============================================================================

/// RD frame outer header (32 bytes)
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct RdFrameHeader {
    field01: [u8; 4],     // 0x00010003
    _zero_1: [u8; 4],
    fieldx_1: [u8; 4],    // 0x0000001c
    _nspokes: [u8; 4],    // usually 8, varies
    _spoke_count: [u8; 4],
    _zero_3: [u8; 4],
    fieldx_3: [u8; 4],    // 0x00000001
    fieldx_4: [u8; 4],    // 0x400 on HD radars
}

pub const RD_FRAME_HEADER_SIZE: usize = std::mem::size_of::<RdFrameHeader>();

/// RD per-spoke header (40 bytes). Two field patterns are accepted,
/// one per resolution variant.
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct RdSpokeHeader {
    field01: [u8; 4],  // 0x00000001
    length: [u8; 4],   // 0x00000028
    azimuth: [u8; 4],
    fieldx_2: [u8; 4], // 1, or 3 on HD
    fieldx_3: [u8; 4], // 2
    fieldx_4: [u8; 4], // 1, or 3 on HD
    fieldx_5: [u8; 4], // 1, or 0 on HD
    fieldx_6: [u8; 4], // 0x1f4, or 0 on HD
    _zero_1: [u8; 4],
    fieldx_7: [u8; 4], // 1
}

const RD_SPOKE_HEADER_SIZE: usize = std::mem::size_of::<RdSpokeHeader>();

/// Data block header within one spoke record (12 bytes)
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct RdDataHeader {
    field01: [u8; 4], // 0x00000003, top bit marks the last record
    length: [u8; 4],
    data_len: [u8; 4],
}

const RD_DATA_HEADER_SIZE: usize = std::mem::size_of::<RdDataHeader>();

impl RdSpokeHeader {
    fn is_valid(&self) -> bool {
        if u32::from_le_bytes(self.field01) != 1 || u32::from_le_bytes(self.length) != 0x28 {
            return false;
        }
        let pattern = (
            u32::from_le_bytes(self.fieldx_2),
            u32::from_le_bytes(self.fieldx_3),
            u32::from_le_bytes(self.fieldx_4),
            u32::from_le_bytes(self.fieldx_5),
            u32::from_le_bytes(self.fieldx_6),
            u32::from_le_bytes(self.fieldx_7),
        );
        pattern == (1, 2, 1, 1, 0x1f4, 1) || pattern == (3, 2, 3, 0, 0, 1)
    }
}

/// Result of decoding one RD container datagram
#[derive(Debug, Clone)]
pub struct DecodedRdFrame {
    pub spokes: Vec<Spoke>,
    pub is_hd: bool,
}

/// Decode an RD container datagram into spokes.
///
/// The container is walked record by record; the first record whose
/// structural check fails stops the walk and everything decoded so far
/// is returned. A datagram whose very first record is malformed thus
/// yields zero spokes without being an error.
///
/// With `half_resolution` set, each spoke is emitted twice, at its own
/// angle and the next one, filling the slots a half-rate rotation
/// leaves empty.
pub fn parse_rd_frame(
    data: &[u8],
    max_spoke_len: usize,
    half_resolution: bool,
    range_meters: u32,
    time_ms: u64,
) -> Result<DecodedRdFrame, ParseError> {
    if data.len() < RD_FRAME_HEADER_SIZE + RD_SPOKE_HEADER_SIZE {
        return Err(ParseError::TooShort {
            expected: RD_FRAME_HEADER_SIZE + RD_SPOKE_HEADER_SIZE,
            actual: data.len(),
        });
    }

    let header: RdFrameHeader = bincode::deserialize(&data[..RD_FRAME_HEADER_SIZE])?;
    if u32::from_le_bytes(header.field01) != MESSAGE_RD_FRAME
        || u32::from_le_bytes(header.fieldx_1) != 0x1c
        || u32::from_le_bytes(header.fieldx_3) != 1
    {
        return Err(ParseError::InvalidHeader {
            expected: MESSAGE_RD_FRAME.to_le_bytes().to_vec(),
            actual: data[..4].to_vec(),
        });
    }

    let is_hd = u32::from_le_bytes(header.fieldx_4) == 0x400;

    let mut spokes = Vec::new();
    let mut offset = RD_FRAME_HEADER_SIZE;

    while offset + RD_SPOKE_HEADER_SIZE <= data.len() {
        let spoke_header: RdSpokeHeader =
            bincode::deserialize(&data[offset..offset + RD_SPOKE_HEADER_SIZE])?;
        if !spoke_header.is_valid() {
            break;
        }
        let azimuth = u32::from_le_bytes(spoke_header.azimuth);
        offset += RD_SPOKE_HEADER_SIZE;

        // Optional extra header, identified by record type 2
        if offset + 8 <= data.len() {
            let record_type = u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]);
            if record_type == 2 {
                let length = u32::from_le_bytes([
                    data[offset + 4],
                    data[offset + 5],
                    data[offset + 6],
                    data[offset + 7],
                ]) as usize;
                offset += length;
            }
        }

        if offset + RD_DATA_HEADER_SIZE > data.len() {
            break;
        }
        let data_header: RdDataHeader =
            bincode::deserialize(&data[offset..offset + RD_DATA_HEADER_SIZE])?;
        let record_type = u32::from_le_bytes(data_header.field01);
        let length = u32::from_le_bytes(data_header.length) as usize;
        let data_len = u32::from_le_bytes(data_header.data_len) as usize;
        if (record_type & 0x7fffffff) != 3 || length < data_len + 8 {
            break;
        }

        let start = offset + RD_DATA_HEADER_SIZE;
        let end = (start + data_len).min(data.len());
        let raw = rle_decompress(&data[start..end]);
        let mut samples = if is_hd {
            raw.iter().take(max_spoke_len).map(|b| b >> 1).collect()
        } else {
            expand_nibbles(&raw, max_spoke_len)
        };
        samples.resize(max_spoke_len, 0);

        offset += length;

        let angle = (azimuth % RD_SPOKES_PER_REVOLUTION as u32) as u16;
        let spoke = Spoke {
            angle,
            range: range_meters,
            heading: None,
            time_ms,
            data: samples,
        };
        if half_resolution {
            let mut twin = spoke.clone();
            twin.angle = (angle + 1) % RD_SPOKES_PER_REVOLUTION;
            spokes.push(spoke);
            spokes.push(twin);
        } else {
            spokes.push(spoke);
        }
    }

    Ok(DecodedRdFrame { spokes, is_hd })
}

/// Parsed RD status report (0x00010001 / 0x00018801)
#[derive(Debug, Clone)]
pub struct RdStatus {
    /// Range table in meters (displayed ranges; scanned is double)
    pub ranges: Vec<u32>,
    pub status: Option<Status>,
    pub warmup_time: u8,
    pub signal_strength: u8,
    pub range_id: u8,
    pub auto_gain: bool,
    pub gain: u32,
    pub auto_sea: u8,
    pub sea: u8,
    pub rain_enabled: bool,
    pub rain: u8,
    pub ftc_enabled: bool,
    pub ftc: u8,
    pub auto_tune: bool,
    pub tune: u8,
    pub bearing_offset: i16,
    pub interference_rejection: u8,
    pub target_expansion: u8,
    pub mbs_enabled: bool,
    pub is_hd: bool,
}

impl RdStatus {
    /// Scanned range in meters; the scanner sweeps twice the displayed
    /// range of the active index.
    pub fn scan_range_meters(&self) -> Option<u32> {
        self.ranges.get(self.range_id as usize).map(|r| r * 2)
    }
}

/// Parse an RD status report.
pub fn parse_rd_status(data: &[u8]) -> Result<RdStatus, ParseError> {
    const MIN_SIZE: usize = 250;
    if data.len() < MIN_SIZE {
        return Err(ParseError::TooShort {
            expected: MIN_SIZE,
            actual: data.len(),
        });
    }

    let id = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if id != MESSAGE_RD_STATUS && id != MESSAGE_RD_STATUS_HD {
        return Err(ParseError::UnknownPacketType(id));
    }
    let is_hd = id == MESSAGE_RD_STATUS_HD;

    let mut ranges = Vec::with_capacity(11);
    for i in 0..11 {
        let offset = 4 + i * 4;
        let raw = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        ranges.push((raw as f64 * RANGE_SCALE) as u32);
    }

    Ok(RdStatus {
        ranges,
        status: Status::from_byte(data[180]),
        warmup_time: data[184],
        signal_strength: data[185],
        range_id: data[193],
        auto_gain: data[196] > 0,
        gain: u32::from_le_bytes([data[200], data[201], data[202], data[203]]),
        auto_sea: data[204],
        sea: data[208],
        rain_enabled: data[209] > 0,
        rain: data[213],
        ftc_enabled: data[214] > 0,
        ftc: data[218],
        auto_tune: data[219] > 0,
        tune: data[223],
        bearing_offset: i16::from_le_bytes([data[224], data[225]]),
        interference_rejection: data[226],
        target_expansion: data[230],
        mbs_enabled: data[244] > 0,
        is_hd,
    })
}

/// Parse the serial number report (0x00010006).
///
/// Returns (interface serial, module serial), seven ASCII characters
/// each.
pub fn parse_rd_serial(data: &[u8]) -> Result<(String, String), ParseError> {
    if data.len() < 27 {
        return Err(ParseError::TooShort {
            expected: 27,
            actual: data.len(),
        });
    }
    let interface = std::str::from_utf8(&data[4..11])
        .map_err(|_| ParseError::InvalidString)?
        .trim_end_matches('\0')
        .to_string();
    let module = std::str::from_utf8(&data[20..27])
        .map_err(|_| ParseError::InvalidString)?
        .trim_end_matches('\0')
        .to_string();
    Ok((interface, module))
}

// =============================================================================
// Commands - Quantum
// =============================================================================

/// How often the long keepalive accompanies the short one
pub const KEEPALIVE_SLOTS: u32 = 5;

const QUANTUM_KEEPALIVE_1S: [u8; 12] = [
    0x00, 0x00, 0x28, 0x00, 0x52, 0x61, 0x64, 0x61, 0x72, 0x00, 0x00, 0x00, // "Radar"
];

const QUANTUM_KEEPALIVE_5S: [u8; 36] = [
    0x03, 0x89, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x9e, 0x03, 0x00, 0x00, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Quantum keepalive datagrams for one timer tick. The long message
/// rides along every [`KEEPALIVE_SLOTS`]th call.
pub fn quantum_keepalive(counter: u32) -> Vec<&'static [u8]> {
    if counter % KEEPALIVE_SLOTS == 0 {
        vec![&QUANTUM_KEEPALIVE_1S, &QUANTUM_KEEPALIVE_5S]
    } else {
        vec![&QUANTUM_KEEPALIVE_1S]
    }
}

fn quantum_command(op: u8, value: u8) -> Vec<u8> {
    vec![op, 0x03, 0x28, 0x00, 0x00, value, 0x00, 0x00]
}

/// Transmit on/off for Quantum
pub fn quantum_encode_transmit(on: bool) -> Vec<Vec<u8>> {
    vec![vec![0x10, 0x00, 0x28, 0x00, on as u8, 0x00, 0x00, 0x00]]
}

/// Select a range by index into the reported range table
pub fn quantum_encode_range_index(index: u8) -> Vec<Vec<u8>> {
    vec![vec![0x01, 0x01, 0x28, 0x00, 0x00, index, 0x00, 0x00]]
}

/// Gain: auto, or manual with a 0..100 value. Manual first disables
/// auto, then sets the value.
pub fn quantum_encode_gain(auto: bool, value: u8) -> Vec<Vec<u8>> {
    if auto {
        vec![quantum_command(0x01, 1)]
    } else {
        vec![quantum_command(0x01, 0), quantum_command(0x02, value)]
    }
}

/// Color gain: auto, or manual 0..100
pub fn quantum_encode_color_gain(auto: bool, value: u8) -> Vec<Vec<u8>> {
    if auto {
        vec![quantum_command(0x03, 1)]
    } else {
        vec![quantum_command(0x03, 0), quantum_command(0x04, value)]
    }
}

/// Sea clutter: auto, or manual 0..100
pub fn quantum_encode_sea(auto: bool, value: u8) -> Vec<Vec<u8>> {
    if auto {
        vec![quantum_command(0x05, 1)]
    } else {
        vec![quantum_command(0x05, 0), quantum_command(0x06, value)]
    }
}

/// Rain clutter: off, or on with a 0..100 value. The enable flag is
/// inverted relative to the other auto commands.
pub fn quantum_encode_rain(value: Option<u8>) -> Vec<Vec<u8>> {
    match value {
        Some(v) => vec![quantum_command(0x0b, 1), quantum_command(0x0c, v)],
        None => vec![quantum_command(0x0b, 0)],
    }
}

/// Operating mode: 0 harbor, 1 coastal, 2 offshore, 3 weather
pub fn quantum_encode_mode(mode: u8) -> Vec<Vec<u8>> {
    vec![quantum_command(0x14, mode)]
}

/// Target expansion on/off
pub fn quantum_encode_target_expansion(on: bool) -> Vec<Vec<u8>> {
    vec![quantum_command(0x0f, on as u8)]
}

/// Put gain, sea, and rain into their automatic modes at once
pub fn quantum_encode_all_auto() -> Vec<Vec<u8>> {
    vec![
        quantum_command(0x01, 1),
        quantum_command(0x05, 1),
        quantum_command(0x0b, 0),
    ]
}

// =============================================================================
// Commands - RD
// =============================================================================

const RD_KEEPALIVE_1S: [u8; 12] = [
    0x00, 0x80, 0x01, 0x00, 0x52, 0x41, 0x44, 0x41, 0x52, 0x00, 0x00, 0x00, // "RADAR"
];

const RD_KEEPALIVE_5S: [u8; 36] = [
    0x03, 0x89, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x68, 0x01, 0x00, 0x00,
    0x9e, 0x03, 0x00, 0x00, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// RD keepalive datagrams for one timer tick
pub fn rd_keepalive(counter: u32) -> Vec<&'static [u8]> {
    if counter % KEEPALIVE_SLOTS == 0 {
        vec![&RD_KEEPALIVE_5S, &RD_KEEPALIVE_1S]
    } else {
        vec![&RD_KEEPALIVE_1S]
    }
}

/// A 24-byte RD control message carrying its value at offset 20
fn rd_value_command(op: u8, value: u8) -> Vec<u8> {
    let mut cmd = vec![
        op, 0x83, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    cmd[20] = value;
    cmd
}

/// A 24-byte RD control message carrying its enable flag at offset 16
fn rd_enable_command(op: u8, enabled: bool) -> Vec<u8> {
    let mut cmd = vec![
        op, 0x83, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    cmd[16] = enabled as u8;
    cmd
}

/// Transmit on/off for RD
pub fn rd_encode_transmit(on: bool) -> Vec<Vec<u8>> {
    vec![vec![0x01, 0x80, 0x01, 0x00, on as u8, 0x00, 0x00, 0x00]]
}

/// Select a range by index into the reported range table
pub fn rd_encode_range_index(index: u8) -> Vec<Vec<u8>> {
    vec![vec![
        0x01, 0x81, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, index, 0x00, 0x00, 0x00,
    ]]
}

/// Gain: auto, or manual with a 0..255 value
pub fn rd_encode_gain(auto: bool, value: u8) -> Vec<Vec<u8>> {
    if auto {
        vec![rd_enable_command(0x01, true)]
    } else {
        vec![rd_enable_command(0x01, false), rd_value_command(0x01, value)]
    }
}

/// Sea clutter: auto, or manual with a 0..255 value
pub fn rd_encode_sea(auto: bool, value: u8) -> Vec<Vec<u8>> {
    if auto {
        vec![rd_enable_command(0x02, true)]
    } else {
        vec![rd_enable_command(0x02, false), rd_value_command(0x02, value)]
    }
}

/// Rain clutter: off, or on with a 0..255 value
pub fn rd_encode_rain(value: Option<u8>) -> Vec<Vec<u8>> {
    match value {
        Some(v) => vec![rd_enable_command(0x03, true), rd_value_command(0x03, v)],
        None => vec![rd_enable_command(0x03, false)],
    }
}

/// FTC: off, or on with a 0..255 value
pub fn rd_encode_ftc(value: Option<u8>) -> Vec<Vec<u8>> {
    match value {
        Some(v) => vec![rd_enable_command(0x04, true), rd_value_command(0x04, v)],
        None => vec![rd_enable_command(0x04, false)],
    }
}

/// Bearing alignment in the radar's internal units, signed
pub fn rd_encode_bearing_alignment(value: i32) -> Vec<Vec<u8>> {
    let mut cmd = vec![0x07, 0x82, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
    cmd[4..8].copy_from_slice(&value.to_le_bytes());
    vec![cmd]
}

/// Interference rejection: 0 off, 1 normal, 2 high
pub fn rd_encode_interference_rejection(level: u8) -> Vec<Vec<u8>> {
    vec![vec![0x07, 0x83, 0x01, 0x00, level, 0x00, 0x00, 0x00]]
}

/// Target expansion: 0 disabled, 1 low, 2 high
pub fn rd_encode_target_expansion(level: u8) -> Vec<Vec<u8>> {
    vec![vec![
        0x06, 0x83, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, level, 0x00, 0x00, 0x00,
    ]]
}

/// Main bang suppression on/off
pub fn rd_encode_mbs(enabled: bool) -> Vec<Vec<u8>> {
    let mut cmd = vec![
        0x01, 0x82, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    cmd[16] = enabled as u8;
    vec![cmd]
}

/// Display timing value
pub fn rd_encode_display_timing(value: u8) -> Vec<Vec<u8>> {
    vec![vec![
        0x02, 0x82, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, value, 0x00, 0x00, 0x00,
    ]]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Captured Quantum beacons
    const QUANTUM_ENDPOINT_BEACON: [u8; 36] = [
        0x0, 0x0, 0x0, 0x0, 0x58, 0x6b, 0x80, 0xd6, 0x28, 0x0, 0x0, 0x0, 0x3, 0x0, 0x64, 0x0, 0x6,
        0x8, 0x10, 0x0, 0x1, 0xf3, 0x1, 0xe8, 0xe, 0xa, 0x11, 0x0, 0xd6, 0x6, 0x12, 0xc6, 0xf, 0xa,
        0x36, 0x0,
    ];

    const QUANTUM_IDENTITY_BEACON: [u8; 56] = [
        0x1, 0x0, 0x0, 0x0, 0x66, 0x0, 0x0, 0x0, 0x58, 0x6b, 0x80, 0xd6, 0xf3, 0x0, 0x0, 0x0, 0xf3,
        0x0, 0xa8, 0xc0, 0x51, 0x75, 0x61, 0x6e, 0x74, 0x75, 0x6d, 0x52, 0x61, 0x64, 0x61, 0x72,
        0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0,
        0x0, 0x0, 0x2, 0x0, 0x0, 0x0,
    ];

    // Captured RD beacons
    const RD_ENDPOINT_BEACON: [u8; 36] = [
        0x0, 0x0, 0x0, 0x0, // type
        0xb1, 0x69, 0xc2, 0xb2, // link id
        0x1, 0x0, 0x0, 0x0, // subtype
        0x1, 0x0, 0x1e, 0x0, 0xb, 0x8, 0x10, 0x0, 231, 69, 29, 224, 0x6, 0xa, 0x0,
        0x0, // 224.29.69.231:2566
        47, 234, 0, 10, 11, 8, 0, 0, // 10.0.234.47:2059
    ];

    const RD_IDENTITY_BEACON: [u8; 56] = [
        0x1, 0x0, 0x0, 0x0, // type
        0x1, 0x0, 0x0, 0x0, // subtype
        0xb1, 0x69, 0xc2, 0xb2, // link id
        0xb, 0x2, 0x0, 0x0, 0x2f, 0xea, 0x0, 0xa, 0x0, 0x31, 0xcc, 0x33, 0xcc, 0x33, 0xcc, 0x33,
        0xcc, 0x33, 0x4e, 0x37, 0xcc, 0x27, 0xcc, 0x33, 0xcc, 0x33, 0xcc, 0x33, 0xcc, 0x30, 0xcc,
        0x13, 0xc8, 0x33, 0xcc, 0x13, 0xcc, 0x33, 0xc0, 0x13, 0x2, 0x0, 0x1, 0x0,
    ];

    fn source() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 234, 47), 5800)
    }

    #[test]
    fn test_parse_quantum_identity_beacon() {
        let beacon = parse_beacon(&QUANTUM_IDENTITY_BEACON).unwrap();
        match beacon {
            Beacon::Identity(identity) => {
                assert_eq!(identity.link_id, 0xd6806b58);
                assert_eq!(identity.base, BaseModel::Quantum);
                assert_eq!(identity.model_name.as_deref(), Some("QuantumRadar"));
            }
            other => panic!("expected identity beacon, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_quantum_endpoint_beacon() {
        let beacon = parse_beacon(&QUANTUM_ENDPOINT_BEACON).unwrap();
        match beacon {
            Beacon::Endpoints(endpoints) => {
                assert_eq!(endpoints.link_id, 0xd6806b58);
                assert_eq!(endpoints.subtype, SUBTYPE_QUANTUM_ENDPOINTS);
                assert_eq!(
                    endpoints.report_address,
                    SocketAddrV4::new(Ipv4Addr::new(232, 1, 243, 1), 2574)
                );
                assert_eq!(
                    endpoints.command_address,
                    SocketAddrV4::new(Ipv4Addr::new(198, 18, 6, 214), 2575)
                );
            }
            other => panic!("expected endpoint beacon, got {:?}", other),
        }
    }

    #[test]
    fn test_beacon_pairing_either_order() {
        let mut pairer = BeaconPairer::new();

        // Endpoints first: nothing yet
        let endpoints = parse_beacon(&QUANTUM_ENDPOINT_BEACON).unwrap();
        assert!(pairer.observe(endpoints, source()).is_none());

        // Identity completes the pair
        let identity = parse_beacon(&QUANTUM_IDENTITY_BEACON).unwrap();
        let discovery = pairer.observe(identity, source()).unwrap();

        assert_eq!(discovery.brand, Brand::Raymarine);
        assert_eq!(discovery.model.as_deref(), Some("QuantumRadar"));
        assert_eq!(discovery.spokes_per_revolution, 250);
        assert_eq!(discovery.max_spoke_len, 252);
        assert_eq!(
            discovery.report_address,
            Some(SocketAddrV4::new(Ipv4Addr::new(232, 1, 243, 1), 2574))
        );
        assert_eq!(
            discovery.send_address,
            Some(SocketAddrV4::new(Ipv4Addr::new(198, 18, 6, 214), 2575))
        );
    }

    #[test]
    fn test_beacon_pairing_separate_radars() {
        let mut pairer = BeaconPairer::new();

        // One radar's identity and another radar's endpoints never pair
        let identity = parse_beacon(&QUANTUM_IDENTITY_BEACON).unwrap();
        assert!(pairer.observe(identity, source()).is_none());
        let endpoints = parse_beacon(&RD_ENDPOINT_BEACON).unwrap();
        assert!(pairer.observe(endpoints, source()).is_none());

        // RD identity pairs with the RD endpoints
        let identity = parse_beacon(&RD_IDENTITY_BEACON).unwrap();
        let discovery = pairer.observe(identity, source()).unwrap();
        assert_eq!(discovery.spokes_per_revolution, 2048);
        assert_eq!(discovery.pixel_values, NON_HD_PIXEL_VALUES);
        assert!(discovery.name.contains("B2C269B1"));
    }

    #[test]
    fn test_mfd_request_ignored() {
        let mut data = QUANTUM_IDENTITY_BEACON;
        data[4] = 0x11; // MFD request subtype
        assert!(matches!(parse_beacon(&data), Ok(Beacon::Ignore)));
    }

    #[test]
    fn test_parse_beacon_wrong_size() {
        assert!(matches!(
            parse_beacon(&[0u8; 10]),
            Err(ParseError::TooShort { .. })
        ));
    }

    #[test]
    fn test_model_from_part_number() {
        let q24d = Model::from_part_number("E70498").unwrap();
        assert_eq!(q24d.name, "Quantum Q24D");
        assert_eq!(q24d.base, BaseModel::Quantum);
        assert!(q24d.doppler);
        assert_eq!(q24d.spokes_per_revolution, 250);

        let rd418hd = Model::from_part_number("E92142").unwrap();
        assert_eq!(rd418hd.name, "RD418HD");
        assert_eq!(rd418hd.max_spoke_len, 1024);

        let rd418d = Model::from_part_number("E92130").unwrap();
        assert_eq!(rd418d.max_spoke_len, 512);

        assert!(Model::from_part_number("EXXXXX").is_none());
    }

    #[test]
    fn test_rle_round_trip() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![1, 2, 3, 4],
            vec![7; 300],          // run longer than one escape can hold
            vec![0x5c],            // escape byte as a literal
            vec![0x5c, 0x5c, 0x5c, 1, 0x5c],
            vec![0, 0, 0, 0, 9, 9, 1, 2, 2, 2, 2],
        ];
        for case in cases {
            assert_eq!(rle_decompress(&rle_compress(&case)), case, "case {:?}", case);
        }
    }

    #[test]
    fn test_rle_compress_shrinks_runs() {
        let long_run = vec![0u8; 200];
        let packed = rle_compress(&long_run);
        assert_eq!(packed, vec![RLE_ESCAPE, 200, 0]);
    }

    #[test]
    fn test_rle_decompress_truncated_escape() {
        // Escape with no fill byte is dropped, not an error
        assert_eq!(rle_decompress(&[1, 2, RLE_ESCAPE, 5]), vec![1, 2]);
    }

    fn quantum_spoke_datagram(azimuth: u16, payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&MESSAGE_QUANTUM_SPOKE.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes()); // seq_num
        data.extend_from_slice(&0x0101u16.to_le_bytes());
        data.extend_from_slice(&(QUANTUM_MAX_SPOKE_LEN).to_le_bytes()); // scan_len
        data.extend_from_slice(&250u16.to_le_bytes()); // num_spokes
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&(QUANTUM_MAX_SPOKE_LEN).to_le_bytes()); // returns_per_range
        data.extend_from_slice(&azimuth.to_le_bytes());
        data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn test_quantum_spoke_angle_rotation() {
        let payload = rle_compress(&[10u8; 252]);

        // Azimuth 0 maps to angle 125 (half a revolution)
        let decoded = parse_quantum_spoke(&quantum_spoke_datagram(0, &payload), 1852, 0).unwrap();
        assert_eq!(decoded.spoke.angle, 125);

        // Azimuth 125 wraps back to 0
        let decoded = parse_quantum_spoke(&quantum_spoke_datagram(125, &payload), 1852, 0).unwrap();
        assert_eq!(decoded.spoke.angle, 0);

        assert_eq!(decoded.spoke.data.len(), 252);
        assert!(decoded.spoke.data.iter().all(|&s| s == 10));
        // Full returns per range: half the scanned range
        assert_eq!(decoded.spoke.range, 926);
    }

    #[test]
    fn test_quantum_spoke_bad_frame_type() {
        let mut data = quantum_spoke_datagram(0, &[]);
        data[0] = 0x99;
        assert!(matches!(
            parse_quantum_spoke(&data, 1852, 0),
            Err(ParseError::UnknownPacketType(_))
        ));
    }

    #[test]
    fn test_quantum_status_ranges_in_meters() {
        let mut data = vec![0u8; 228];
        data[4] = 1; // transmit
        data[14] = 0x0a; // bearing offset 10
        data[20] = 2; // range index
        data[21] = 1; // coastal
        data[22] = 1; // mode 0: gain auto
        data[23] = 75; // mode 0: gain
        // Range table entries 125, 250, 500 (quarter/half/one nm units)
        data[148..152].copy_from_slice(&125u32.to_le_bytes());
        data[152..156].copy_from_slice(&250u32.to_le_bytes());
        data[156..160].copy_from_slice(&500u32.to_le_bytes());

        let status = parse_quantum_status(&data).unwrap();
        assert_eq!(status.status, Some(Status::Transmit));
        assert_eq!(status.bearing_offset, 10);
        assert_eq!(status.range_index, 2);
        assert!(status.controls[0].gain_auto);
        assert_eq!(status.controls[0].gain, 75);
        assert_eq!(status.ranges[0], 231); // 125 * 1.852
        assert_eq!(status.ranges[1], 463);
        assert_eq!(status.range_meters(), Some(926));
    }

    fn rd_spoke_record(azimuth: u32, payload: &[u8]) -> Vec<u8> {
        let mut rec = Vec::new();
        // Spoke header, non-HD field pattern
        rec.extend_from_slice(&1u32.to_le_bytes());
        rec.extend_from_slice(&0x28u32.to_le_bytes());
        rec.extend_from_slice(&azimuth.to_le_bytes());
        rec.extend_from_slice(&1u32.to_le_bytes());
        rec.extend_from_slice(&2u32.to_le_bytes());
        rec.extend_from_slice(&1u32.to_le_bytes());
        rec.extend_from_slice(&1u32.to_le_bytes());
        rec.extend_from_slice(&0x1f4u32.to_le_bytes());
        rec.extend_from_slice(&0u32.to_le_bytes());
        rec.extend_from_slice(&1u32.to_le_bytes());
        // Data header
        rec.extend_from_slice(&3u32.to_le_bytes());
        rec.extend_from_slice(&((payload.len() + 12) as u32).to_le_bytes());
        rec.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        rec.extend_from_slice(payload);
        rec
    }

    fn rd_frame(records: &[Vec<u8>]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&MESSAGE_RD_FRAME.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0x1cu32.to_le_bytes());
        data.extend_from_slice(&(records.len() as u32).to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        for rec in records {
            data.extend_from_slice(rec);
        }
        data
    }

    #[test]
    fn test_rd_frame_decode() {
        // 512 packed bytes carry 1024 nibble samples
        let payload = rle_compress(&[0x21u8; 512]);
        let frame = rd_frame(&[rd_spoke_record(100, &payload), rd_spoke_record(101, &payload)]);

        let decoded = parse_rd_frame(&frame, 1024, false, 3704, 7).unwrap();
        assert!(!decoded.is_hd);
        assert_eq!(decoded.spokes.len(), 2);
        assert_eq!(decoded.spokes[0].angle, 100);
        assert_eq!(decoded.spokes[1].angle, 101);
        assert_eq!(decoded.spokes[0].range, 3704);
        assert_eq!(decoded.spokes[0].data.len(), 1024);
        // 0x21 expands to low nibble 1 then high nibble 2
        assert_eq!(decoded.spokes[0].data[0], 1);
        assert_eq!(decoded.spokes[0].data[1], 2);
    }

    #[test]
    fn test_rd_frame_first_record_mismatch_yields_zero_spokes() {
        let payload = rle_compress(&[0x21u8; 512]);
        let mut record = rd_spoke_record(100, &payload);
        record[0] = 0x77; // corrupt the record type

        let frame = rd_frame(&[record]);
        let decoded = parse_rd_frame(&frame, 1024, false, 3704, 7).unwrap();
        assert!(decoded.spokes.is_empty());
    }

    #[test]
    fn test_rd_frame_stops_at_later_mismatch() {
        let payload = rle_compress(&[0x21u8; 512]);
        let good = rd_spoke_record(5, &payload);
        let mut bad = rd_spoke_record(6, &payload);
        bad[4] = 0x99; // corrupt the header length field

        let frame = rd_frame(&[good, bad]);
        let decoded = parse_rd_frame(&frame, 1024, false, 3704, 7).unwrap();
        assert_eq!(decoded.spokes.len(), 1);
        assert_eq!(decoded.spokes[0].angle, 5);
    }

    #[test]
    fn test_rd_frame_half_resolution_duplicates() {
        let payload = rle_compress(&[0x21u8; 512]);
        let frame = rd_frame(&[rd_spoke_record(10, &payload)]);

        let decoded = parse_rd_frame(&frame, 1024, true, 3704, 7).unwrap();
        assert_eq!(decoded.spokes.len(), 2);
        assert_eq!(decoded.spokes[0].angle, 10);
        assert_eq!(decoded.spokes[1].angle, 11);
        assert_eq!(decoded.spokes[0].data, decoded.spokes[1].data);
    }

    #[test]
    fn test_rd_frame_bad_outer_header() {
        let mut frame = rd_frame(&[]);
        frame[0] = 0xff;
        assert!(parse_rd_frame(&frame, 1024, false, 0, 0).is_err());
    }

    #[test]
    fn test_rd_status_decode() {
        let mut data = vec![0u8; 250];
        data[0..4].copy_from_slice(&MESSAGE_RD_STATUS_HD.to_le_bytes());
        // Displayed range table starts with 125 (1/8 nm units scale)
        data[4..8].copy_from_slice(&125u32.to_le_bytes());
        data[8..12].copy_from_slice(&250u32.to_le_bytes());
        data[180] = 1; // transmit
        data[193] = 1; // range id
        data[196] = 1; // auto gain
        data[200..204].copy_from_slice(&55u32.to_le_bytes());
        data[224..226].copy_from_slice(&(-10i16).to_le_bytes());

        let status = parse_rd_status(&data).unwrap();
        assert!(status.is_hd);
        assert_eq!(status.status, Some(Status::Transmit));
        assert!(status.auto_gain);
        assert_eq!(status.gain, 55);
        assert_eq!(status.bearing_offset, -10);
        assert_eq!(status.ranges[0], 231);
        // Scanned range is double the displayed range of the index
        assert_eq!(status.scan_range_meters(), Some(926));
    }

    #[test]
    fn test_rd_serial_report() {
        let mut data = vec![0u8; 28];
        data[0..4].copy_from_slice(&MESSAGE_RD_SERIAL.to_le_bytes());
        data[4..11].copy_from_slice(b"AB12345");
        data[20..27].copy_from_slice(b"CD67890");

        let (interface, module) = parse_rd_serial(&data).unwrap();
        assert_eq!(interface, "AB12345");
        assert_eq!(module, "CD67890");
    }

    #[test]
    fn test_keepalive_rotation() {
        // Long keepalive on every fifth tick only
        assert_eq!(quantum_keepalive(0).len(), 2);
        assert_eq!(quantum_keepalive(1).len(), 1);
        assert_eq!(quantum_keepalive(4).len(), 1);
        assert_eq!(quantum_keepalive(5).len(), 2);

        assert_eq!(rd_keepalive(0).len(), 2);
        assert_eq!(rd_keepalive(3).len(), 1);
    }

    #[test]
    fn test_quantum_gain_command_sequence() {
        let manual = quantum_encode_gain(false, 40);
        assert_eq!(manual.len(), 2);
        assert_eq!(manual[0], vec![0x01, 0x03, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(manual[1], vec![0x02, 0x03, 0x28, 0x00, 0x00, 40, 0x00, 0x00]);

        let auto = quantum_encode_gain(true, 0);
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0][5], 1);
    }

    #[test]
    fn test_quantum_transmit_and_range() {
        assert_eq!(
            quantum_encode_transmit(true)[0],
            vec![0x10, 0x00, 0x28, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
        assert_eq!(quantum_encode_range_index(7)[0][5], 7);
    }

    #[test]
    fn test_rd_gain_command_sequence() {
        let manual = rd_encode_gain(false, 128);
        assert_eq!(manual.len(), 2);
        assert_eq!(manual[0][0], 0x01);
        assert_eq!(manual[0][16], 0); // auto off
        assert_eq!(manual[1][20], 128); // value

        let auto = rd_encode_gain(true, 0);
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0][16], 1);
    }

    #[test]
    fn test_rd_bearing_alignment_encoding() {
        let cmds = rd_encode_bearing_alignment(-20);
        assert_eq!(&cmds[0][4..8], &(-20i32).to_le_bytes());
    }

    #[test]
    fn test_rd_transmit_and_range() {
        assert_eq!(
            rd_encode_transmit(false)[0],
            vec![0x01, 0x80, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(rd_encode_range_index(3)[0][8], 3);
    }
}
