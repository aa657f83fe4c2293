//! Navico radar protocol (BR24, 3G, 4G, HALO)
//!
//! Pure parsing and command encoding, no I/O. The data channel carries
//! frames of up to 32 spoke lines, each a 24-byte header plus 512 bytes
//! of packed 4-bit samples. The report channel carries small status
//! reports keyed by a `{id, 0xC4}` byte pair. Commands are short
//! `[op, 0xC1]`-prefixed datagrams.
//!
//! # Supported Models
//!
//! - **BR24**: original broadband radome (distinct line-header layout)
//! - **3G**: third generation
//! - **4G**: fourth generation, dual channel
//! - **HALO**: pulse-compression series with Doppler

use std::net::{Ipv4Addr, SocketAddrV4};

use super::{c_string, NetworkSocketAddrV4};
use crate::error::ParseError;
use crate::radar::{RadarDiscovery, Spoke};
use crate::Brand;
use serde::Deserialize;

// =============================================================================
// Constants
// =============================================================================

/// Number of spokes per revolution
pub const SPOKES_PER_REVOLUTION: u16 = 2048;

/// Maximum spoke length in samples (after nibble unpacking)
pub const MAX_SPOKE_LEN: u16 = 1024;

/// Raw angle space (wire angles are 0..4096, delivered every other one)
pub const SPOKES_RAW: u16 = 4096;

/// Maximum number of spoke lines per UDP frame
pub const SPOKES_PER_FRAME: usize = 32;

/// Bytes of packed sample data per spoke line (2 samples per byte)
pub const SPOKE_DATA_BYTES: usize = MAX_SPOKE_LEN as usize / 2;

/// BR24 / old 3G discovery multicast group
pub const BR24_BEACON_ADDR: Ipv4Addr = Ipv4Addr::new(236, 6, 7, 4);
pub const BR24_BEACON_PORT: u16 = 6768;

/// Gen3/Gen4/HALO discovery multicast group
pub const GEN3_BEACON_ADDR: Ipv4Addr = Ipv4Addr::new(236, 6, 7, 5);
pub const GEN3_BEACON_PORT: u16 = 6878;

/// Probe datagram that solicits a beacon response
pub const ADDRESS_REQUEST_PACKET: [u8; 2] = [0x01, 0xB1];

/// Beacon response header (first 2 bytes)
pub const BEACON_RESPONSE_HEADER: [u8; 2] = [0x01, 0xB2];

/// Report request: radar answers with Report 3
pub const REQUEST_03_REPORT: [u8; 2] = [0x04, 0xc2];

/// Report request: radar answers with Reports 02, 03, 04, 07 and 08
pub const REQUEST_MANY2_REPORT: [u8; 2] = [0x01, 0xc2];

/// Report request: radar answers with Report 4
pub const REQUEST_04_REPORT: [u8; 2] = [0x02, 0xc2];

/// Report request: radar answers with Reports 2 and 8
pub const REQUEST_02_08_REPORT: [u8; 2] = [0x03, 0xc2];

/// Stay-alive for channel A; must be sent periodically while transmitting
pub const COMMAND_STAY_ON_A: [u8; 2] = [0xa0, 0xc1];

/// Marker bytes identifying the BR24/3G line-header layout
const BR24_MARK: [u8; 4] = [0x00, 0x44, 0x0d, 0x0e];

// =============================================================================
// Radar Models
// =============================================================================

/// Known Navico radar models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Model {
    #[default]
    Unknown,
    BR24,
    Gen3,
    Gen4,
    HALO,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Unknown => "Unknown",
            Model::BR24 => "BR24",
            Model::Gen3 => "3G",
            Model::Gen4 => "4G",
            Model::HALO => "HALO",
        }
    }

    /// Parse model from the model byte in Report 03
    pub fn from_byte(model: u8) -> Self {
        match model {
            0x0e | 0x0f => Model::BR24, // 0x0e seen on older BR24
            0x08 => Model::Gen3,
            0x01 => Model::Gen4,
            0x00 => Model::HALO,
            _ => Model::Unknown,
        }
    }

    pub fn from_name(s: &str) -> Self {
        match s {
            "BR24" => Model::BR24,
            "3G" => Model::Gen3,
            "4G" => Model::Gen4,
            "HALO" => Model::HALO,
            _ => Model::Unknown,
        }
    }

    pub fn has_doppler(&self) -> bool {
        matches!(self, Model::HALO)
    }

    pub fn has_dual_channel(&self) -> bool {
        matches!(self, Model::Gen4 | Model::HALO)
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Doppler Mode / Status
// =============================================================================

/// Doppler mode for HALO radars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DopplerMode {
    #[default]
    None,
    Both,
    Approaching,
}

impl DopplerMode {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(DopplerMode::None),
            1 => Some(DopplerMode::Both),
            2 => Some(DopplerMode::Approaching),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            DopplerMode::None => 0,
            DopplerMode::Both => 1,
            DopplerMode::Approaching => 2,
        }
    }
}

/// Radar status byte in Report 01
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Off = 0,
    Standby = 1,
    Transmit = 2,
    Preparing = 5,
}

impl Status {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(Status::Off),
            1 => Some(Status::Standby),
            2 => Some(Status::Transmit),
            5 => Some(Status::Preparing),
            _ => None,
        }
    }
}

// =============================================================================
// Beacon Packets
// =============================================================================

/// Common beacon header (Gen3 and up)
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct BeaconHeader {
    id: u16,
    serial_no: [u8; 16], // ASCII serial number, zero terminated
    radar_addr: NetworkSocketAddrV4, // DHCP address of the scanner
    _filler1: [u8; 12],
    _addr1: NetworkSocketAddrV4,
    _filler2: [u8; 4],
    _addr2: NetworkSocketAddrV4,
    _filler3: [u8; 10],
    _addr3: NetworkSocketAddrV4,
    _filler4: [u8; 4],
    _addr4: NetworkSocketAddrV4,
}

/// Endpoint addresses for one logical channel within a beacon
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct BeaconChannel {
    _filler1: [u8; 10],
    data: NetworkSocketAddrV4,
    _filler2: [u8; 4],
    send: NetworkSocketAddrV4,
    _filler3: [u8; 4],
    report: NetworkSocketAddrV4,
}

/// Single-channel beacon (3G, HALO 20, ...)
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct BeaconSingle {
    header: BeaconHeader,
    a: BeaconChannel,
}

/// Dual-channel beacon (4G, HALO 20+/24/3, ...)
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct BeaconDual {
    header: BeaconHeader,
    a: BeaconChannel,
    b: BeaconChannel,
}

/// BR24 beacon; endpoint order differs from the newer layout
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct Br24Beacon {
    id: u16,
    serial_no: [u8; 16],
    radar_addr: NetworkSocketAddrV4,
    _filler1: [u8; 12],
    _addr1: NetworkSocketAddrV4,
    _filler2: [u8; 4],
    _addr2: NetworkSocketAddrV4,
    _filler3: [u8; 4],
    _addr3: NetworkSocketAddrV4,
    _filler4: [u8; 10],
    report: NetworkSocketAddrV4,
    _filler5: [u8; 4],
    send: NetworkSocketAddrV4,
    _filler6: [u8; 4],
    data: NetworkSocketAddrV4,
}

pub const BEACON_BR24_SIZE: usize = std::mem::size_of::<Br24Beacon>();
pub const BEACON_SINGLE_SIZE: usize = std::mem::size_of::<BeaconSingle>();
pub const BEACON_DUAL_SIZE: usize = std::mem::size_of::<BeaconDual>();

/// Check if a datagram is a beacon response
pub fn is_beacon_response(data: &[u8]) -> bool {
    data.len() > 2 && data[0] == BEACON_RESPONSE_HEADER[0] && data[1] == BEACON_RESPONSE_HEADER[1]
}

fn discovery(
    serial_no: String,
    source_addr: SocketAddrV4,
    suffix: Option<&str>,
    model: Option<&str>,
    channel: (SocketAddrV4, SocketAddrV4, SocketAddrV4),
) -> RadarDiscovery {
    let (data, report, send) = channel;
    RadarDiscovery {
        brand: Brand::Navico,
        model: model.map(|m| m.to_string()),
        name: serial_no,
        address: source_addr,
        spokes_per_revolution: SPOKES_PER_REVOLUTION,
        max_spoke_len: MAX_SPOKE_LEN,
        pixel_values: 16, // 4-bit samples
        serial_number: None,
        nic_address: None, // filled in by the locator
        suffix: suffix.map(|s| s.to_string()),
        data_address: Some(data),
        report_address: Some(report),
        send_address: Some(send),
    }
}

/// Parse a beacon response into zero or more discoveries.
///
/// Dual-channel scanners (4G, HALO) announce two independent logical
/// radars and yield two discoveries with suffixes "A" and "B". The
/// layout variant is picked by datagram size, largest first.
pub fn parse_beacon_response(
    data: &[u8],
    source_addr: SocketAddrV4,
) -> Result<Vec<RadarDiscovery>, ParseError> {
    if !is_beacon_response(data) {
        return Err(ParseError::InvalidHeader {
            expected: BEACON_RESPONSE_HEADER.to_vec(),
            actual: data.iter().take(2).copied().collect(),
        });
    }

    if data.len() >= BEACON_DUAL_SIZE {
        let beacon: BeaconDual = bincode::deserialize(data)?;
        let serial_no = c_string(&beacon.header.serial_no).ok_or(ParseError::InvalidString)?;
        Ok(vec![
            discovery(
                serial_no.clone(),
                source_addr,
                Some("A"),
                None,
                (
                    beacon.a.data.into(),
                    beacon.a.report.into(),
                    beacon.a.send.into(),
                ),
            ),
            discovery(
                serial_no,
                source_addr,
                Some("B"),
                None,
                (
                    beacon.b.data.into(),
                    beacon.b.report.into(),
                    beacon.b.send.into(),
                ),
            ),
        ])
    } else if data.len() >= BEACON_SINGLE_SIZE {
        let beacon: BeaconSingle = bincode::deserialize(data)?;
        let serial_no = c_string(&beacon.header.serial_no).ok_or(ParseError::InvalidString)?;
        Ok(vec![discovery(
            serial_no,
            source_addr,
            None,
            None,
            (
                beacon.a.data.into(),
                beacon.a.report.into(),
                beacon.a.send.into(),
            ),
        )])
    } else if data.len() >= BEACON_BR24_SIZE {
        let beacon: Br24Beacon = bincode::deserialize(data)?;
        let serial_no = c_string(&beacon.serial_no).ok_or(ParseError::InvalidString)?;
        Ok(vec![discovery(
            serial_no,
            source_addr,
            None,
            Some("BR24"),
            (beacon.data.into(), beacon.report.into(), beacon.send.into()),
        )])
    } else {
        Err(ParseError::TooShort {
            expected: BEACON_BR24_SIZE,
            actual: data.len(),
        })
    }
}

// =============================================================================
// Spoke Frames
// =============================================================================

/// Frame header preceding the spoke lines
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct FrameHeader {
    _frame_hdr: [u8; 8],
}

pub const FRAME_HEADER_SIZE: usize = std::mem::size_of::<FrameHeader>();

/// BR24/3G spoke line header (24 bytes)
#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(C, packed)]
struct Br24LineHeader {
    header_len: u8,
    status: u8,
    scan_number: [u8; 2],
    mark: [u8; 4], // always 00 44 0d 0e
    angle: [u8; 2],
    heading: [u8; 2], // valid with an RI-10/11 interface box
    range: [u8; 4],
    _u01: [u8; 2],
    _u02: [u8; 2],
    _u03: [u8; 4],
}

/// 4G/HALO spoke line header (24 bytes); the BR24 range field is split
/// into a compact (`small_range`) and extended (`large_range`) pair
#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(C, packed)]
struct Br4gLineHeader {
    header_len: u8,
    status: u8,
    scan_number: [u8; 2],
    mark: [u8; 2],
    large_range: [u8; 2],
    angle: [u8; 2],
    heading: [u8; 2],
    small_range: [u8; 2], // or 0xffff
    rotation: [u8; 2],
    _u01: [u8; 4],
    _u02: [u8; 4],
}

pub const LINE_HEADER_SIZE: usize = std::mem::size_of::<Br4gLineHeader>();

/// One spoke line on the wire: header plus packed sample block
pub const LINE_SIZE: usize = LINE_HEADER_SIZE + SPOKE_DATA_BYTES;

fn parse_4g_line_header(data: &[u8]) -> Result<(u32, u16, Option<u16>), ParseError> {
    let header: Br4gLineHeader = bincode::deserialize(&data[..LINE_HEADER_SIZE])?;

    if header.header_len != LINE_HEADER_SIZE as u8 {
        return Err(ParseError::LengthMismatch {
            header_len: header.header_len as usize,
            actual_len: LINE_HEADER_SIZE,
        });
    }
    if header.status != 0x02 && header.status != 0x12 {
        return Err(ParseError::InvalidPacket(format!(
            "bad spoke status 0x{:02x}",
            header.status
        )));
    }

    let angle = u16::from_le_bytes(header.angle) / 2; // 4096 -> 2048
    let large_range = u16::from_le_bytes(header.large_range);
    let small_range = u16::from_le_bytes(header.small_range);

    // 4G reports all ranges through the compact field; HALO multiplies
    // the pair.
    let range = if large_range == 0x80 {
        if small_range == 0xffff {
            0
        } else {
            (small_range as u32) / 4
        }
    } else {
        ((large_range as u32) * (small_range as u32)) / 512
    };

    Ok((range, angle, extract_heading(u16::from_le_bytes(header.heading))))
}

fn parse_br24_line_header(data: &[u8]) -> Result<(u32, u16, Option<u16>), ParseError> {
    let header: Br24LineHeader = bincode::deserialize(&data[..LINE_HEADER_SIZE])?;

    if header.header_len != LINE_HEADER_SIZE as u8 {
        return Err(ParseError::LengthMismatch {
            header_len: header.header_len as usize,
            actual_len: LINE_HEADER_SIZE,
        });
    }
    if header.status != 0x02 && header.status != 0x12 {
        return Err(ParseError::InvalidPacket(format!(
            "bad spoke status 0x{:02x}",
            header.status
        )));
    }

    let angle = u16::from_le_bytes(header.angle) / 2;

    // The raw unit is 10m / sqrt(2)
    const BR24_RANGE_FACTOR: f64 = 10.0 / 1.414;
    let raw_range = u32::from_le_bytes(header.range) & 0xffffff;
    let range = (raw_range as f64 * BR24_RANGE_FACTOR) as u32;

    Ok((range, angle, extract_heading(u16::from_le_bytes(header.heading))))
}

/// Result of decoding one data frame
#[derive(Debug, Clone, Default)]
pub struct DecodedFrame {
    pub spokes: Vec<Spoke>,
    /// Lines whose header failed validation (skipped, counted)
    pub broken_lines: usize,
}

/// Decode a data-channel frame into normalized spokes.
///
/// Each line is dispatched on its marker bytes: the BR24/3G layout
/// carries `00 44 0d 0e` at offset 4, anything else parses as 4G/HALO.
/// A malformed line is skipped and counted; it does not abort the frame.
pub fn parse_frame(
    data: &[u8],
    lookup: &PixelLookup,
    doppler: DopplerMode,
    time_ms: u64,
) -> Result<DecodedFrame, ParseError> {
    if data.len() < FRAME_HEADER_SIZE + LINE_SIZE {
        return Err(ParseError::TooShort {
            expected: FRAME_HEADER_SIZE + LINE_SIZE,
            actual: data.len(),
        });
    }

    let mut decoded = DecodedFrame::default();
    let mut offset = FRAME_HEADER_SIZE;
    let mut lines = 0;

    while offset + LINE_SIZE <= data.len() && lines < SPOKES_PER_FRAME {
        let line = &data[offset..offset + LINE_SIZE];
        let is_br24 = line[4..8] == BR24_MARK;
        let parsed = if is_br24 {
            parse_br24_line_header(line)
        } else {
            parse_4g_line_header(line)
        };

        match parsed {
            Ok((range, angle, heading)) => {
                let samples = lookup.unpack(&line[LINE_HEADER_SIZE..], doppler);
                decoded.spokes.push(Spoke {
                    angle,
                    range,
                    heading,
                    time_ms,
                    data: samples,
                });
            }
            Err(_) => decoded.broken_lines += 1,
        }

        offset += LINE_SIZE;
        lines += 1;
    }

    Ok(decoded)
}

// =============================================================================
// Pixel Lookup
// =============================================================================

const LOOKUP_VARIANTS: usize = 6;

#[derive(Debug, Clone, Copy)]
#[repr(usize)]
enum LookupVariant {
    LowNormal = 0,
    LowBoth = 1,
    LowApproaching = 2,
    HighNormal = 3,
    HighBoth = 4,
    HighApproaching = 5,
}

/// Pre-computed 256x6 table unpacking two 4-bit samples per byte with
/// Doppler substitution folded in.
///
/// In Doppler modes the raw values 0x0F (approaching) and 0x0E
/// (receding) are replaced with caller-chosen palette indices.
#[derive(Debug, Clone)]
pub struct PixelLookup {
    lookup: [[u8; 256]; LOOKUP_VARIANTS],
}

impl PixelLookup {
    pub fn new(doppler_approaching: u8, doppler_receding: u8) -> Self {
        let mut lookup = [[0u8; 256]; LOOKUP_VARIANTS];

        for j in 0..256 {
            let low: u8 = (j as u8) & 0x0f;
            let high: u8 = ((j as u8) >> 4) & 0x0f;

            lookup[LookupVariant::LowNormal as usize][j] = low;
            lookup[LookupVariant::LowBoth as usize][j] = match low {
                0x0f => doppler_approaching,
                0x0e => doppler_receding,
                _ => low,
            };
            lookup[LookupVariant::LowApproaching as usize][j] = match low {
                0x0f => doppler_approaching,
                _ => low,
            };

            lookup[LookupVariant::HighNormal as usize][j] = high;
            lookup[LookupVariant::HighBoth as usize][j] = match high {
                0x0f => doppler_approaching,
                0x0e => doppler_receding,
                _ => high,
            };
            lookup[LookupVariant::HighApproaching as usize][j] = match high {
                0x0f => doppler_approaching,
                _ => high,
            };
        }

        Self { lookup }
    }

    /// Unpack packed sample bytes to one sample per byte, low nibble
    /// first. Output is twice the input length.
    pub fn unpack(&self, packed: &[u8], doppler: DopplerMode) -> Vec<u8> {
        let (low_index, high_index) = match doppler {
            DopplerMode::None => (LookupVariant::LowNormal, LookupVariant::HighNormal),
            DopplerMode::Both => (LookupVariant::LowBoth, LookupVariant::HighBoth),
            DopplerMode::Approaching => {
                (LookupVariant::LowApproaching, LookupVariant::HighApproaching)
            }
        };
        let (low_index, high_index) = (low_index as usize, high_index as usize);

        let mut output = Vec::with_capacity(packed.len() * 2);
        for &byte in packed {
            let byte = byte as usize;
            output.push(self.lookup[low_index][byte]);
            output.push(self.lookup[high_index][byte]);
        }
        output
    }
}

impl Default for PixelLookup {
    fn default() -> Self {
        Self::new(255, 255)
    }
}

// =============================================================================
// Report Packets
// =============================================================================

/// Report 01 - radar status (0x01 0xC4, 18 bytes)
#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(C, packed)]
struct Report01 {
    what: u8,    // 0x01
    command: u8, // 0xC4
    status: u8,
    _u00: [u8; 15],
}

pub const REPORT_01_SIZE: usize = 18;

/// Report 02 - control state (0x02 0xC4, 99 bytes), guard zone block at 54..89
#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(C, packed)]
struct Report02 {
    what: u8,                        // 0x02
    command: u8,                     // 0xC4
    range: [u8; 4],                  // 2..6, decimeters
    _u00: [u8; 1],                   // 6
    mode: u8,                        // 7
    gain_auto: u8,                   // 8
    _u01: [u8; 3],                   // 9..12
    gain: u8,                        // 12
    sea_auto: u8,                    // 13: 0=off, 1=harbor, 2=offshore
    _u02: [u8; 3],                   // 14..17
    sea: [u8; 4],                    // 17..21
    _u03: u8,                        // 21
    rain: u8,                        // 22
    _u04: [u8; 11],                  // 23..34
    interference_rejection: u8,      // 34
    _u05: [u8; 3],                   // 35..38
    target_expansion: u8,            // 38
    _u06: [u8; 3],                   // 39..42
    target_boost: u8,                // 42
    _u07: [u8; 11],                  // 43..54
    guard_zone_sensitivity: u8,      // 54, shared by both zones
    guard_zone_1_enabled: u8,        // 55
    guard_zone_2_enabled: u8,        // 56
    _u08: [u8; 4],                   // 57..61
    guard_zone_1_inner_range: u8,    // 61, meters
    _u09: [u8; 3],                   // 62..65
    guard_zone_1_outer_range: u8,    // 65, meters
    _u10: [u8; 3],                   // 66..69
    guard_zone_1_bearing: [u8; 2],   // 69..71, deci-degrees LE
    guard_zone_1_width: [u8; 2],     // 71..73, deci-degrees LE
    _u11: [u8; 4],                   // 73..77
    guard_zone_2_inner_range: u8,    // 77
    _u12: [u8; 3],                   // 78..81
    guard_zone_2_outer_range: u8,    // 81
    _u13: [u8; 3],                   // 82..85
    guard_zone_2_bearing: [u8; 2],   // 85..87
    guard_zone_2_width: [u8; 2],     // 87..89
    _u14: [u8; 10],                  // 89..99
}

pub const REPORT_02_SIZE: usize = 99;

/// Report 03 - model info (0x03 0xC4, 129 bytes)
#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(C, packed)]
struct Report03 {
    what: u8,                  // 0x03
    command: u8,               // 0xC4
    model: u8,                 // 0x00=HALO, 0x01=4G, 0x08=3G, 0x0E/0x0F=BR24
    _u00: [u8; 31],            // 3..34
    hours: [u8; 4],            // 34..38, total power-on hours
    _u01: [u8; 4],             // 38..42
    transmit_seconds: [u8; 4], // 42..46, total TX time
    _u02: [u8; 12],            // 46..58
    firmware_date: [u8; 32],   // 58..90, UTF-16LE
    firmware_time: [u8; 32],   // 90..122, UTF-16LE
    _u03: [u8; 7],             // 122..129
}

pub const REPORT_03_SIZE: usize = 129;

/// Report 04 - installation settings (0x04 0xC4, 66 bytes)
#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(C, packed)]
struct Report04 {
    what: u8,                   // 0x04
    command: u8,                // 0xC4
    _u00: [u8; 4],              // 2..6
    bearing_alignment: [u8; 2], // 6..8, deci-degrees
    _u01: [u8; 2],              // 8..10
    antenna_height: [u8; 2],    // 10..12, millimeters
    _u02: [u8; 7],              // 12..19
    accent_light: u8,           // 19 (HALO only)
    _u03a: [u8; 32],            // 20..52 (split for serde array limit)
    _u03b: [u8; 14],            // 52..66
}

pub const REPORT_04_SIZE: usize = 66;

/// Sector blanking entry in Report 06
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct SectorBlanking {
    enabled: u8,
    start_angle: [u8; 2],
    end_angle: [u8; 2],
}

/// Report 06 - blanking/name, 68-byte variant (HALO 2006)
#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(C, packed)]
struct Report06_68 {
    what: u8,                      // 0x06
    command: u8,                   // 0xC4
    _u00: [u8; 4],                 // 2..6
    name: [u8; 6],                 // 6..12
    _u01: [u8; 24],                // 12..36
    blanking: [SectorBlanking; 4], // 36..56
    _u02: [u8; 12],                // 56..68
}

/// Report 06 - blanking/name, 74-byte variant (HALO 24, 2023+)
#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(C, packed)]
struct Report06_74 {
    what: u8,
    command: u8,
    _u00: [u8; 4],
    name: [u8; 6],
    _u01: [u8; 30],
    blanking: [SectorBlanking; 4], // 42..62
    _u02: [u8; 12],
}

const REPORT_06_68_SIZE: usize = 68;
const REPORT_06_74_SIZE: usize = 74;

/// Report 08 - advanced settings, base layout (0x08 0xC4, 18 bytes)
#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(C, packed)]
struct Report08Base {
    what: u8,                   // 0x08
    command: u8,                // 0xC4
    sea_state: u8,              // 2
    interference_rejection: u8, // 3
    scan_speed: u8,             // 4
    sls_auto: u8,               // 5, sidelobe suppression auto
    _field6: u8,
    _field7: u8,
    _field8: u8,
    side_lobe_suppression: u8, // 9
    _field10: [u8; 2],
    noise_rejection: u8, // 12
    target_sep: u8,      // 13
    sea_clutter: u8,     // 14 (HALO)
    auto_sea_clutter: i8, // 15 (HALO)
    _field16: u8,
    _field17: u8,
}

pub const REPORT_08_BASE_SIZE: usize = 18;

/// Report 08 extended with Doppler fields (21 bytes)
#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(C, packed)]
struct Report08Extended {
    base: Report08Base,
    doppler_state: u8,
    doppler_speed: [u8; 2], // threshold in cm/s (0..1594)
}

pub const REPORT_08_EXTENDED_SIZE: usize = 21;

// =============================================================================
// Parsed Reports
// =============================================================================

/// Guard zone block from Report 02
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardZoneReport {
    pub enabled: bool,
    pub inner_range_m: u8,
    pub outer_range_m: u8,
    pub bearing_decideg: u16,
    pub width_decideg: u16,
}

/// Control state from Report 02
#[derive(Debug, Clone)]
pub struct ControlsReport {
    pub range_dm: i32,
    pub mode: u8,
    pub gain: u8,
    pub gain_auto: bool,
    pub sea: i32,
    pub sea_auto: u8,
    pub rain: u8,
    pub interference_rejection: u8,
    pub target_expansion: u8,
    pub target_boost: u8,
    pub guard_zone_sensitivity: u8,
    pub guard_zone_1: GuardZoneReport,
    pub guard_zone_2: GuardZoneReport,
}

/// Model/firmware identification from Report 03
#[derive(Debug, Clone)]
pub struct ModelReport {
    pub model: Model,
    pub model_byte: u8,
    pub operating_hours: u32,
    pub transmit_hours: f64,
    pub firmware_date: String,
    pub firmware_time: String,
}

/// Installation settings from Report 04
#[derive(Debug, Clone)]
pub struct InstallationReport {
    pub bearing_alignment_decideg: u16,
    pub antenna_height_mm: u16,
    pub accent_light: u8,
}

/// One sector blanking entry from Report 06
#[derive(Debug, Clone, PartialEq)]
pub struct BlankingSector {
    pub enabled: bool,
    pub start_decideg: i16,
    pub end_decideg: i16,
}

/// Blanking/name settings from Report 06
#[derive(Debug, Clone)]
pub struct BlankingReport {
    pub name: Option<String>,
    pub sectors: Vec<BlankingSector>,
}

/// Advanced settings from Report 08
#[derive(Debug, Clone)]
pub struct AdvancedReport {
    pub sea_state: u8,
    pub local_interference_rejection: u8,
    pub scan_speed: u8,
    pub sidelobe_suppression_auto: bool,
    pub sidelobe_suppression: u8,
    pub noise_rejection: u8,
    pub target_separation: u8,
    pub sea_clutter: u8,
    pub auto_sea_clutter: i8,
    pub doppler_state: Option<u8>,
    pub doppler_speed: Option<u16>,
}

/// One decoded report from the report channel
#[derive(Debug, Clone)]
pub enum Report {
    Status(Status),
    Controls(ControlsReport),
    Model(ModelReport),
    Installation(InstallationReport),
    Blanking(BlankingReport),
    Advanced(AdvancedReport),
}

/// Check whether a datagram is a report (second byte 0xC4 or 0xC6)
pub fn is_report(data: &[u8]) -> bool {
    data.len() >= 2 && (data[1] == 0xC4 || data[1] == 0xC6)
}

fn check_header(what: u8, command: u8, expected: u8) -> Result<(), ParseError> {
    if what != expected || command != 0xC4 {
        return Err(ParseError::InvalidHeader {
            expected: vec![expected, 0xC4],
            actual: vec![what, command],
        });
    }
    Ok(())
}

fn check_len(data: &[u8], expected: usize) -> Result<(), ParseError> {
    if data.len() < expected {
        return Err(ParseError::TooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Parse any report-channel datagram, dispatching on the type byte.
///
/// Unrecognized type bytes yield `UnknownPacketType`; the caller logs
/// and continues with the next datagram.
pub fn parse_report(data: &[u8]) -> Result<Report, ParseError> {
    if !is_report(data) {
        return Err(ParseError::InvalidPacket("not a report".into()));
    }
    match data[0] {
        0x01 => parse_report_01(data).map(Report::Status),
        0x02 => parse_report_02(data).map(Report::Controls),
        0x03 => parse_report_03(data).map(Report::Model),
        0x04 => parse_report_04(data).map(Report::Installation),
        0x06 => parse_report_06(data).map(Report::Blanking),
        0x08 => parse_report_08(data).map(Report::Advanced),
        other => Err(ParseError::UnknownPacketType(other as u32)),
    }
}

/// Parse Report 01 (status)
pub fn parse_report_01(data: &[u8]) -> Result<Status, ParseError> {
    check_len(data, REPORT_01_SIZE)?;
    let report: Report01 = bincode::deserialize(&data[..REPORT_01_SIZE])?;
    check_header(report.what, report.command, 0x01)?;

    Status::from_byte(report.status).ok_or(ParseError::InvalidPacket(format!(
        "unknown status {}",
        report.status
    )))
}

/// Parse Report 02 (controls and guard zones)
pub fn parse_report_02(data: &[u8]) -> Result<ControlsReport, ParseError> {
    check_len(data, REPORT_02_SIZE)?;
    let report: Report02 = bincode::deserialize(&data[..REPORT_02_SIZE])?;
    check_header(report.what, report.command, 0x02)?;

    Ok(ControlsReport {
        range_dm: i32::from_le_bytes(report.range),
        mode: report.mode,
        gain: report.gain,
        gain_auto: report.gain_auto > 0,
        sea: i32::from_le_bytes(report.sea),
        sea_auto: report.sea_auto,
        rain: report.rain,
        interference_rejection: report.interference_rejection,
        target_expansion: report.target_expansion,
        target_boost: report.target_boost,
        guard_zone_sensitivity: report.guard_zone_sensitivity,
        guard_zone_1: GuardZoneReport {
            enabled: report.guard_zone_1_enabled > 0,
            inner_range_m: report.guard_zone_1_inner_range,
            outer_range_m: report.guard_zone_1_outer_range,
            bearing_decideg: u16::from_le_bytes(report.guard_zone_1_bearing),
            width_decideg: u16::from_le_bytes(report.guard_zone_1_width),
        },
        guard_zone_2: GuardZoneReport {
            enabled: report.guard_zone_2_enabled > 0,
            inner_range_m: report.guard_zone_2_inner_range,
            outer_range_m: report.guard_zone_2_outer_range,
            bearing_decideg: u16::from_le_bytes(report.guard_zone_2_bearing),
            width_decideg: u16::from_le_bytes(report.guard_zone_2_width),
        },
    })
}

/// Parse Report 03 (model and firmware)
pub fn parse_report_03(data: &[u8]) -> Result<ModelReport, ParseError> {
    check_len(data, REPORT_03_SIZE)?;
    let report: Report03 = bincode::deserialize(&data[..REPORT_03_SIZE])?;
    check_header(report.what, report.command, 0x03)?;

    let transmit_seconds = u32::from_le_bytes(report.transmit_seconds);

    Ok(ModelReport {
        model: Model::from_byte(report.model),
        model_byte: report.model,
        operating_hours: u32::from_le_bytes(report.hours),
        transmit_hours: transmit_seconds as f64 / 3600.0,
        firmware_date: wide_string_to_string(&report.firmware_date),
        firmware_time: wide_string_to_string(&report.firmware_time),
    })
}

/// Parse Report 04 (installation settings)
pub fn parse_report_04(data: &[u8]) -> Result<InstallationReport, ParseError> {
    check_len(data, REPORT_04_SIZE)?;
    let report: Report04 = bincode::deserialize(&data[..REPORT_04_SIZE])?;
    check_header(report.what, report.command, 0x04)?;

    Ok(InstallationReport {
        bearing_alignment_decideg: u16::from_le_bytes(report.bearing_alignment),
        antenna_height_mm: u16::from_le_bytes(report.antenna_height),
        accent_light: report.accent_light,
    })
}

/// Parse Report 06 (blanking/name), picking the layout by size
pub fn parse_report_06(data: &[u8]) -> Result<BlankingReport, ParseError> {
    check_len(data, REPORT_06_68_SIZE)?;

    let (name, blanking) = if data.len() >= REPORT_06_74_SIZE {
        let report: Report06_74 = bincode::deserialize(&data[..REPORT_06_74_SIZE])?;
        check_header(report.what, report.command, 0x06)?;
        (c_string(&report.name), report.blanking)
    } else {
        let report: Report06_68 = bincode::deserialize(&data[..REPORT_06_68_SIZE])?;
        check_header(report.what, report.command, 0x06)?;
        (c_string(&report.name), report.blanking)
    };

    let sectors = blanking
        .iter()
        .map(|b| BlankingSector {
            enabled: b.enabled > 0,
            start_decideg: i16::from_le_bytes(b.start_angle),
            end_decideg: i16::from_le_bytes(b.end_angle),
        })
        .collect();

    Ok(BlankingReport { name, sectors })
}

/// Parse Report 08 (advanced settings), base or Doppler-extended
pub fn parse_report_08(data: &[u8]) -> Result<AdvancedReport, ParseError> {
    check_len(data, REPORT_08_BASE_SIZE)?;
    let report: Report08Base = bincode::deserialize(&data[..REPORT_08_BASE_SIZE])?;
    check_header(report.what, report.command, 0x08)?;

    let (doppler_state, doppler_speed) = if data.len() >= REPORT_08_EXTENDED_SIZE {
        let extended: Report08Extended = bincode::deserialize(&data[..REPORT_08_EXTENDED_SIZE])?;
        (
            Some(extended.doppler_state),
            Some(u16::from_le_bytes(extended.doppler_speed)),
        )
    } else {
        (None, None)
    };

    Ok(AdvancedReport {
        sea_state: report.sea_state,
        local_interference_rejection: report.interference_rejection,
        scan_speed: report.scan_speed,
        sidelobe_suppression_auto: report.sls_auto > 0,
        sidelobe_suppression: report.side_lobe_suppression,
        noise_rejection: report.noise_rejection,
        target_separation: report.target_sep,
        sea_clutter: report.sea_clutter,
        auto_sea_clutter: report.auto_sea_clutter,
        doppler_state,
        doppler_speed,
    })
}

// =============================================================================
// Heading Utilities
// =============================================================================

const HEADING_TRUE_FLAG: u16 = 0x4000;
const HEADING_MASK: u16 = SPOKES_RAW - 1;

pub fn is_heading_true(x: u16) -> bool {
    (x & HEADING_TRUE_FLAG) != 0
}

pub fn is_valid_heading(x: u16) -> bool {
    (x & !(HEADING_TRUE_FLAG | HEADING_MASK)) == 0
}

/// Extract the heading in raw angle units, or None when the field is
/// invalid or not flagged as true heading (caller falls back to the
/// host heading).
pub fn extract_heading(x: u16) -> Option<u16> {
    if is_valid_heading(x) && is_heading_true(x) {
        Some(x & HEADING_MASK)
    } else {
        None
    }
}

// =============================================================================
// Command Encoding
// =============================================================================

/// Value scaling: raw 0..255 hardware unit to displayed percent
pub fn raw_to_percent(raw: u8) -> u8 {
    ((raw as u32 * 100) / 255) as u8
}

/// Value scaling: displayed percent to raw 0..255 hardware unit
pub fn percent_to_raw(percent: u8) -> u8 {
    ((percent.min(100) as u32 * 255) / 100) as u8
}

/// Transmit on/off. Two datagrams: the first arms the status change,
/// the second carries the value; the radar ignores the second alone.
pub fn encode_transmit(on: bool) -> Vec<Vec<u8>> {
    let value = if on { 1u8 } else { 0u8 };
    vec![vec![0x00, 0xc1, 0x01], vec![0x01, 0xc1, value]]
}

/// Range in decimeters
pub fn encode_range(decimeters: i32) -> Vec<u8> {
    let mut cmd = vec![0x03, 0xc1];
    cmd.extend_from_slice(&decimeters.to_le_bytes());
    cmd
}

/// Gain, raw 0..255 with auto flag
pub fn encode_gain(raw: u8, auto: bool) -> Vec<u8> {
    let auto = if auto { 1u32 } else { 0u32 };
    let mut cmd = vec![0x06, 0xc1, 0x00, 0x00, 0x00, 0x00];
    cmd.extend_from_slice(&auto.to_le_bytes());
    cmd.push(raw);
    cmd
}

/// Sea clutter, raw 0..255; auto 0=off, 1=harbor, 2=offshore
pub fn encode_sea(raw: u8, auto: u8) -> Vec<u8> {
    let mut cmd = vec![0x06, 0xc1, 0x02, 0x00, 0x00, 0x00];
    cmd.extend_from_slice(&(auto as u32).to_le_bytes());
    cmd.push(raw);
    cmd
}

/// Rain clutter, raw 0..255
pub fn encode_rain(raw: u8) -> Vec<u8> {
    vec![0x06, 0xc1, 0x04, 0, 0, 0, 0, 0, 0, 0, raw]
}

/// Interference rejection level 0..3
pub fn encode_interference_rejection(level: u8) -> Vec<u8> {
    vec![0x08, 0xc1, level]
}

/// Target expansion 0..1 (BR24..4G) or 0..3 (HALO)
pub fn encode_target_expansion(level: u8) -> Vec<u8> {
    vec![0x12, 0xc1, level]
}

/// Target boost 0..2
pub fn encode_target_boost(level: u8) -> Vec<u8> {
    vec![0x0a, 0xc1, level]
}

/// Scan speed 0..3
pub fn encode_scan_speed(speed: u8) -> Vec<u8> {
    vec![0x0f, 0xc1, speed]
}

/// Noise rejection 0..3
pub fn encode_noise_rejection(level: u8) -> Vec<u8> {
    vec![0x21, 0xc1, level]
}

/// Target separation 0..3
pub fn encode_target_separation(level: u8) -> Vec<u8> {
    vec![0x22, 0xc1, level]
}

/// Local interference rejection 0..3
pub fn encode_local_interference_rejection(level: u8) -> Vec<u8> {
    vec![0x0e, 0xc1, level]
}

/// Mode (HALO): 0=custom, 1=harbor, 2=offshore, 4=weather, 5=bird
pub fn encode_mode(mode: u8) -> Vec<u8> {
    vec![0x10, 0xc1, mode]
}

/// Bearing alignment in deci-degrees (0..3599)
pub fn encode_bearing_alignment(decideg: u16) -> Vec<u8> {
    let mut cmd = vec![0x05, 0xc1];
    cmd.extend_from_slice(&decideg.to_le_bytes());
    cmd
}

/// Antenna height in millimeters
pub fn encode_antenna_height(mm: u32) -> Vec<u8> {
    let mut cmd = vec![0x30, 0xc1, 0x01, 0x00, 0x00, 0x00];
    cmd.extend_from_slice(&mm.to_le_bytes());
    cmd
}

/// Accent light level 0..3 (HALO)
pub fn encode_accent_light(level: u8) -> Vec<u8> {
    vec![0x31, 0xc1, level]
}

/// Doppler mode (HALO)
pub fn encode_doppler(mode: DopplerMode) -> Vec<u8> {
    vec![0x23, 0xc1, mode.as_byte()]
}

/// Doppler speed threshold in cm/s (HALO)
pub fn encode_doppler_speed(cm_per_s: u16) -> Vec<u8> {
    let mut cmd = vec![0x24, 0xc1];
    cmd.extend_from_slice(&cm_per_s.to_le_bytes());
    cmd
}

/// Sector blanking (HALO). Two datagrams: enable/disable the sector,
/// then set its angles; the angle datagram only applies to an armed
/// sector.
pub fn encode_sector_blanking(
    sector: u8,
    enabled: bool,
    start_decideg: u16,
    end_decideg: u16,
) -> Vec<Vec<u8>> {
    let enable = vec![0x0d, 0xc1, sector, 0, 0, 0, enabled as u8];
    let mut angles = vec![0xc0, 0xc1, sector, 0, 0, 0];
    angles.extend_from_slice(&start_decideg.to_le_bytes());
    angles.extend_from_slice(&end_decideg.to_le_bytes());
    vec![enable, angles]
}

/// Number of distinct keepalive slots
pub const KEEPALIVE_SLOTS: u64 = 4;

/// Keepalive datagrams for one transmission slot.
///
/// Slot 0 sends the stay-alive plus all four report requests so control
/// state stays fresh; slots 1..3 send the stay-alive alone. Successive
/// calls with an incrementing counter cycle through the slots.
pub fn keepalive_datagrams(counter: u64) -> Vec<&'static [u8]> {
    match counter % KEEPALIVE_SLOTS {
        0 => vec![
            &COMMAND_STAY_ON_A,
            &REQUEST_03_REPORT,
            &REQUEST_MANY2_REPORT,
            &REQUEST_04_REPORT,
            &REQUEST_02_08_REPORT,
        ],
        _ => vec![&COMMAND_STAY_ON_A],
    }
}

// =============================================================================
// Utilities
// =============================================================================

/// Decode a zero-terminated UTF-16LE field
fn wide_string_to_string(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .take_while(|&c| c != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_from_byte() {
        assert_eq!(Model::from_byte(0x00), Model::HALO);
        assert_eq!(Model::from_byte(0x01), Model::Gen4);
        assert_eq!(Model::from_byte(0x08), Model::Gen3);
        assert_eq!(Model::from_byte(0x0e), Model::BR24);
        assert_eq!(Model::from_byte(0x0f), Model::BR24);
        assert_eq!(Model::from_byte(0xFF), Model::Unknown);
    }

    #[test]
    fn test_heading_extraction() {
        // True heading 1000 = 0x4000 | 1000
        assert_eq!(extract_heading(0x43E8), Some(1000));
        // No true flag
        assert_eq!(extract_heading(0x03E8), None);
        // Bad upper bits
        assert_eq!(extract_heading(0x83E8), None);
    }

    #[test]
    fn test_pixel_lookup_unpack() {
        let lookup = PixelLookup::default();
        // 0x12 -> low=2, high=1; 0xAB -> low=11, high=10
        assert_eq!(lookup.unpack(&[0x12, 0xAB], DopplerMode::None), vec![2, 1, 11, 10]);
    }

    #[test]
    fn test_pixel_lookup_doppler() {
        let lookup = PixelLookup::new(20, 21);
        // 0xEF: low=0xF (approaching), high=0xE (receding)
        assert_eq!(lookup.unpack(&[0xEF], DopplerMode::Both), vec![20, 21]);
        assert_eq!(lookup.unpack(&[0xEF], DopplerMode::Approaching), vec![20, 14]);
        assert_eq!(lookup.unpack(&[0xEF], DopplerMode::None), vec![15, 14]);
    }

    #[test]
    fn test_status_from_byte() {
        assert_eq!(Status::from_byte(0), Some(Status::Off));
        assert_eq!(Status::from_byte(1), Some(Status::Standby));
        assert_eq!(Status::from_byte(2), Some(Status::Transmit));
        assert_eq!(Status::from_byte(5), Some(Status::Preparing));
        assert_eq!(Status::from_byte(3), None);
    }

    #[test]
    fn test_percent_scaling() {
        // Raw gain 200 of 255 displays as 78%
        assert_eq!(raw_to_percent(200), 78);
        assert_eq!(raw_to_percent(0), 0);
        assert_eq!(raw_to_percent(255), 100);
        assert_eq!(percent_to_raw(100), 255);
    }

    #[test]
    fn test_transmit_is_two_phase() {
        let on = encode_transmit(true);
        assert_eq!(on.len(), 2);
        assert_eq!(on[0], vec![0x00, 0xc1, 0x01]);
        assert_eq!(on[1], vec![0x01, 0xc1, 0x01]);

        let off = encode_transmit(false);
        assert_eq!(off[1], vec![0x01, 0xc1, 0x00]);
    }

    #[test]
    fn test_encode_range() {
        let cmd = encode_range(10000);
        assert_eq!(&cmd[0..2], &[0x03, 0xc1]);
        assert_eq!(&cmd[2..6], &10000i32.to_le_bytes());
    }

    #[test]
    fn test_encode_gain_auto() {
        let cmd = encode_gain(128, true);
        assert_eq!(&cmd[0..2], &[0x06, 0xc1]);
        assert_eq!(&cmd[6..10], &1u32.to_le_bytes());
        assert_eq!(cmd[10], 128);
    }

    #[test]
    fn test_keepalive_rotation() {
        // Slot 0 carries the report requests, slots 1..3 only stay-alive
        let slot0 = keepalive_datagrams(0);
        assert_eq!(slot0.len(), 5);
        assert_eq!(slot0[0], &COMMAND_STAY_ON_A);

        for counter in 1..4 {
            let slot = keepalive_datagrams(counter);
            assert_eq!(slot.len(), 1);
            assert_eq!(slot[0], &COMMAND_STAY_ON_A);
        }

        // Call 5 cycles back to slot 0
        assert_eq!(keepalive_datagrams(4).len(), 5);
    }

    #[test]
    fn test_parse_report_01() {
        let mut data = vec![0x01, 0xC4, 0x02];
        data.extend_from_slice(&[0; 15]);
        assert_eq!(parse_report_01(&data).unwrap(), Status::Transmit);

        data[2] = 9;
        assert!(parse_report_01(&data).is_err());
    }

    #[test]
    fn test_parse_report_02_gain() {
        let mut data = vec![0u8; REPORT_02_SIZE];
        data[0] = 0x02;
        data[1] = 0xC4;
        data[2..6].copy_from_slice(&15000i32.to_le_bytes()); // 1500 m
        data[8] = 1; // gain auto
        data[12] = 200; // raw gain

        let parsed = parse_report_02(&data).unwrap();
        assert_eq!(parsed.range_dm, 15000);
        assert!(parsed.gain_auto);
        assert_eq!(parsed.gain, 200);
        assert_eq!(raw_to_percent(parsed.gain), 78);
    }

    #[test]
    fn test_parse_report_02_guard_zones() {
        let mut data = vec![0u8; REPORT_02_SIZE];
        data[0] = 0x02;
        data[1] = 0xC4;
        data[54] = 128; // sensitivity
        data[55] = 1; // zone 1 enabled
        data[61] = 50; // inner
        data[65] = 200; // outer
        data[69..71].copy_from_slice(&900u16.to_le_bytes()); // bearing 90 deg
        data[71..73].copy_from_slice(&450u16.to_le_bytes()); // width 45 deg

        let parsed = parse_report_02(&data).unwrap();
        assert_eq!(parsed.guard_zone_sensitivity, 128);
        assert!(parsed.guard_zone_1.enabled);
        assert_eq!(parsed.guard_zone_1.inner_range_m, 50);
        assert_eq!(parsed.guard_zone_1.outer_range_m, 200);
        assert_eq!(parsed.guard_zone_1.bearing_decideg, 900);
        assert_eq!(parsed.guard_zone_1.width_decideg, 450);
        assert!(!parsed.guard_zone_2.enabled);
    }

    #[test]
    fn test_parse_report_04() {
        let mut data = vec![0x04, 0xC4];
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&(3600u16 - 50u16).to_le_bytes()); // alignment -5.0 deg
        data.extend_from_slice(&[0; 2]);
        data.extend_from_slice(&4500u16.to_le_bytes()); // antenna height mm
        data.extend_from_slice(&[0; 7]);
        data.push(3); // accent light
        data.extend_from_slice(&[0; 46]);

        let parsed = parse_report_04(&data).unwrap();
        assert_eq!(parsed.bearing_alignment_decideg, 3550);
        assert_eq!(parsed.antenna_height_mm, 4500);
        assert_eq!(parsed.accent_light, 3);
    }

    #[test]
    fn test_parse_report_08_with_doppler() {
        let mut data = vec![0u8; REPORT_08_EXTENDED_SIZE];
        data[0] = 0x08;
        data[1] = 0xC4;
        data[2] = 1; // sea state
        data[5] = 1; // sls auto
        data[9] = 0x50; // sidelobe suppression
        data[18] = 1; // doppler state: both
        data[19..21].copy_from_slice(&500u16.to_le_bytes());

        let parsed = parse_report_08(&data).unwrap();
        assert_eq!(parsed.sea_state, 1);
        assert!(parsed.sidelobe_suppression_auto);
        assert_eq!(parsed.sidelobe_suppression, 0x50);
        assert_eq!(parsed.doppler_state, Some(1));
        assert_eq!(parsed.doppler_speed, Some(500));

        // Base-size report has no doppler fields
        let parsed = parse_report_08(&data[..REPORT_08_BASE_SIZE]).unwrap();
        assert!(parsed.doppler_state.is_none());
    }

    #[test]
    fn test_parse_report_dispatch() {
        let mut data = vec![0x01, 0xC4, 0x01];
        data.extend_from_slice(&[0; 15]);
        assert!(matches!(
            parse_report(&data).unwrap(),
            Report::Status(Status::Standby)
        ));

        let unknown = vec![0x55, 0xC4, 0, 0];
        assert!(matches!(
            parse_report(&unknown),
            Err(ParseError::UnknownPacketType(0x55))
        ));
    }

    fn frame_with_line(header: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_HEADER_SIZE];
        frame.extend_from_slice(header);
        frame.resize(FRAME_HEADER_SIZE + LINE_SIZE, 0x11); // samples: 1,1,...
        frame
    }

    #[test]
    fn test_parse_frame_4g_split_range() {
        let mut header = vec![0u8; LINE_HEADER_SIZE];
        header[0] = LINE_HEADER_SIZE as u8;
        header[1] = 0x02; // status
        header[6..8].copy_from_slice(&0x80u16.to_le_bytes()); // large_range
        header[8..10].copy_from_slice(&700u16.to_le_bytes()); // raw angle
        header[12..14].copy_from_slice(&4000u16.to_le_bytes()); // small_range

        let frame = frame_with_line(&header);
        let decoded = parse_frame(&frame, &PixelLookup::default(), DopplerMode::None, 42).unwrap();
        assert_eq!(decoded.broken_lines, 0);
        assert_eq!(decoded.spokes.len(), 1);
        let spoke = &decoded.spokes[0];
        // large == 0x80: range is small / 4
        assert_eq!(spoke.range, 1000);
        assert_eq!(spoke.angle, 350);
        assert_eq!(spoke.heading, None);
        assert_eq!(spoke.time_ms, 42);
        assert_eq!(spoke.data.len(), MAX_SPOKE_LEN as usize);
        assert_eq!(spoke.data[0], 1);
    }

    #[test]
    fn test_parse_frame_halo_range() {
        let mut header = vec![0u8; LINE_HEADER_SIZE];
        header[0] = LINE_HEADER_SIZE as u8;
        header[1] = 0x02;
        header[6..8].copy_from_slice(&0x100u16.to_le_bytes()); // large_range
        header[12..14].copy_from_slice(&512u16.to_le_bytes()); // small_range

        let frame = frame_with_line(&header);
        let decoded = parse_frame(&frame, &PixelLookup::default(), DopplerMode::None, 0).unwrap();
        // (256 * 512) / 512
        assert_eq!(decoded.spokes[0].range, 256);
    }

    #[test]
    fn test_parse_frame_br24_line() {
        let mut header = vec![0u8; LINE_HEADER_SIZE];
        header[0] = LINE_HEADER_SIZE as u8;
        header[1] = 0x02;
        header[4..8].copy_from_slice(&BR24_MARK);
        header[8..10].copy_from_slice(&100u16.to_le_bytes()); // raw angle
        header[12..16].copy_from_slice(&1414u32.to_le_bytes()); // raw range

        let frame = frame_with_line(&header);
        let decoded = parse_frame(&frame, &PixelLookup::default(), DopplerMode::None, 0).unwrap();
        let spoke = &decoded.spokes[0];
        assert_eq!(spoke.angle, 50);
        // 1414 * 10 / 1.414 = 10000
        assert_eq!(spoke.range, 10000);
    }

    #[test]
    fn test_parse_frame_skips_broken_line() {
        let mut header = vec![0u8; LINE_HEADER_SIZE];
        header[0] = LINE_HEADER_SIZE as u8;
        header[1] = 0x07; // bad status

        let frame = frame_with_line(&header);
        let decoded = parse_frame(&frame, &PixelLookup::default(), DopplerMode::None, 0).unwrap();
        assert!(decoded.spokes.is_empty());
        assert_eq!(decoded.broken_lines, 1);
    }

    #[test]
    fn test_beacon_sizes_ordered() {
        assert!(BEACON_BR24_SIZE > 0);
        assert!(BEACON_SINGLE_SIZE > BEACON_BR24_SIZE);
        assert!(BEACON_DUAL_SIZE > BEACON_SINGLE_SIZE);
    }

    #[test]
    fn test_beacon_rejects_probe() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 6878);
        assert!(parse_beacon_response(&ADDRESS_REQUEST_PACKET, addr).is_err());
    }
}
