//! Garmin radar protocol (xHD series)
//!
//! Garmin carries exactly one spoke per data datagram and runs its
//! reports as `{u32 packet-type, u32 length, parameter}` records on a
//! separate multicast group. There is no structured discovery beacon:
//! any traffic on the report group identifies a scanner, and commands
//! go to port 50101 on the scanner's own address.

use std::net::{Ipv4Addr, SocketAddrV4};

use serde::Deserialize;

use super::c_string;
use crate::error::ParseError;
use crate::radar::{RadarDiscovery, Spoke};
use crate::Brand;

// =============================================================================
// Network Constants
// =============================================================================

/// Report multicast group
pub const REPORT_ADDR: Ipv4Addr = Ipv4Addr::new(239, 254, 2, 0);
pub const REPORT_PORT: u16 = 50100;

/// Data multicast group
pub const DATA_ADDR: Ipv4Addr = Ipv4Addr::new(239, 254, 2, 0);
pub const DATA_PORT: u16 = 50102;

/// Command port on the scanner's address
pub const SEND_PORT: u16 = 50101;

// =============================================================================
// Radar Characteristics
// =============================================================================

/// Spokes per revolution
pub const SPOKES_PER_REVOLUTION: u16 = 1440;

/// Maximum samples per spoke (actual spokes vary 547..733)
pub const MAX_SPOKE_LEN: u16 = 733;

/// One byte per sample
pub const PIXEL_VALUES: u8 = 255;

// =============================================================================
// Report Packet Types
// =============================================================================

pub const REPORT_DOME_SPEED: u32 = 0x0916;
pub const REPORT_TRANSMIT_STATE: u32 = 0x0919;
pub const REPORT_AUTO_GAIN_MODE: u32 = 0x0924;
pub const REPORT_GAIN: u32 = 0x0925;
pub const REPORT_AUTO_GAIN_LEVEL: u32 = 0x091d;
pub const REPORT_RANGE: u32 = 0x091e;
/// Dome offset, reported as degrees x 32
pub const REPORT_BEARING_ALIGNMENT: u32 = 0x0930;
pub const REPORT_CROSSTALK: u32 = 0x0932;
pub const REPORT_RAIN_MODE: u32 = 0x0933;
pub const REPORT_RAIN_LEVEL: u32 = 0x0934;
pub const REPORT_SEA_MODE: u32 = 0x0939;
pub const REPORT_SEA_LEVEL: u32 = 0x093a;
pub const REPORT_SEA_AUTO_LEVEL: u32 = 0x093b;
pub const REPORT_NTZ_MODE: u32 = 0x093f;
pub const REPORT_NTZ_START: u32 = 0x0940;
pub const REPORT_NTZ_END: u32 = 0x0941;
pub const REPORT_TIMED_IDLE_MODE: u32 = 0x0942;
pub const REPORT_TIMED_IDLE_TIME: u32 = 0x0943;
pub const REPORT_TIMED_RUN_TIME: u32 = 0x0944;
pub const REPORT_SCANNER_STATUS: u32 = 0x0992;
/// Countdown to the next status change, milliseconds
pub const REPORT_STATUS_CHANGE: u32 = 0x0993;
/// Scanner message containing model info text
pub const REPORT_SCANNER_MESSAGE: u32 = 0x099b;

// =============================================================================
// Scanner Status
// =============================================================================

/// Scanner state byte in report 0x0992
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerStatus {
    WarmingUp,
    Standby,
    SpinningUp,
    Transmit,
    Unknown(u32),
}

impl ScannerStatus {
    pub fn from_value(v: u32) -> Self {
        match v {
            1 => ScannerStatus::WarmingUp,
            3 => ScannerStatus::Standby,
            4 => ScannerStatus::SpinningUp,
            5 => ScannerStatus::Transmit,
            _ => ScannerStatus::Unknown(v),
        }
    }
}

/// Auto-gain level in report 0x091d
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoGainLevel {
    High,
    Low,
    Unknown(u32),
}

impl AutoGainLevel {
    pub fn from_value(v: u32) -> Self {
        match v {
            0 => AutoGainLevel::High,
            1 => AutoGainLevel::Low,
            _ => AutoGainLevel::Unknown(v),
        }
    }
}

// =============================================================================
// Parsed Reports
// =============================================================================

/// One decoded report-channel record
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// Antenna rotation speed; wire value is level x 2
    DomeSpeed(u32),
    /// Echo of a standby/transmit request, not a state change
    TransmitRequest(bool),
    /// Gain value; wire value is percent x 100
    Gain(u32),
    AutoGainMode(bool),
    AutoGainLevel(AutoGainLevel),
    /// Range in meters
    Range(u32),
    /// Dome offset in degrees
    BearingAlignment(f32),
    CrosstalkRejection(u32),
    RainMode(u32),
    /// Rain level; wire value is percent x 100
    RainLevel(u32),
    SeaMode(u32),
    /// Sea level; wire value is percent x 100
    SeaLevel(u32),
    SeaAutoLevel(u32),
    NoTransmitZoneMode(u32),
    NoTransmitZoneStart(f32),
    NoTransmitZoneEnd(f32),
    TimedIdleMode(u32),
    TimedIdleMinutes(u32),
    TimedRunMinutes(u32),
    ScannerStatus(ScannerStatus),
    /// Milliseconds until the announced status change
    StatusChangeMs(u32),
    /// Free-form model/firmware text
    ScannerMessage(String),
    Unknown { packet_type: u32, value: u32 },
}

/// Check if data is large enough to be a report record
pub fn is_report_packet(data: &[u8]) -> bool {
    // u32 type + u32 length + at least one parameter byte
    data.len() >= 9
}

/// Parse one report record.
///
/// The parameter width follows the length field: 1, 2 or 4 bytes.
pub fn parse_report(data: &[u8]) -> Result<Report, ParseError> {
    if data.len() < 9 {
        return Err(ParseError::TooShort {
            expected: 9,
            actual: data.len(),
        });
    }

    let packet_type = u32::from_le_bytes(data[0..4].try_into().unwrap());
    let len = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
    let payload = &data[8..];

    if payload.len() < len {
        return Err(ParseError::LengthMismatch {
            header_len: len,
            actual_len: payload.len(),
        });
    }

    let value: u32 = match len {
        1 => payload[0] as u32,
        2 => u16::from_le_bytes(payload[0..2].try_into().unwrap()) as u32,
        4 => u32::from_le_bytes(payload[0..4].try_into().unwrap()),
        _ => 0,
    };

    let report = match packet_type {
        REPORT_DOME_SPEED => Report::DomeSpeed(value >> 1),
        REPORT_TRANSMIT_STATE => Report::TransmitRequest(value != 0),
        REPORT_GAIN => Report::Gain(value / 100),
        REPORT_AUTO_GAIN_MODE => Report::AutoGainMode(value == 2),
        REPORT_AUTO_GAIN_LEVEL => Report::AutoGainLevel(AutoGainLevel::from_value(value)),
        REPORT_RANGE => Report::Range(value),
        REPORT_BEARING_ALIGNMENT => Report::BearingAlignment(value as i32 as f32 / 32.0),
        REPORT_CROSSTALK => Report::CrosstalkRejection(value),
        REPORT_RAIN_MODE => Report::RainMode(value),
        REPORT_RAIN_LEVEL => Report::RainLevel(value / 100),
        REPORT_SEA_MODE => Report::SeaMode(value),
        REPORT_SEA_LEVEL => Report::SeaLevel(value / 100),
        REPORT_SEA_AUTO_LEVEL => Report::SeaAutoLevel(value),
        REPORT_NTZ_MODE => Report::NoTransmitZoneMode(value),
        REPORT_NTZ_START => Report::NoTransmitZoneStart(value as i32 as f32 / 32.0),
        REPORT_NTZ_END => Report::NoTransmitZoneEnd(value as i32 as f32 / 32.0),
        REPORT_TIMED_IDLE_MODE => Report::TimedIdleMode(value),
        REPORT_TIMED_IDLE_TIME => Report::TimedIdleMinutes(value / 60),
        REPORT_TIMED_RUN_TIME => Report::TimedRunMinutes(value / 60),
        REPORT_SCANNER_STATUS => Report::ScannerStatus(ScannerStatus::from_value(value)),
        REPORT_STATUS_CHANGE => Report::StatusChangeMs(value),
        REPORT_SCANNER_MESSAGE if len >= 80 => {
            // Model text starts at offset 16, up to 64 bytes
            let info_bytes: [u8; 64] = payload[16..80].try_into().unwrap();
            Report::ScannerMessage(c_string(&info_bytes).unwrap_or_default())
        }
        _ => Report::Unknown { packet_type, value },
    };

    Ok(report)
}

// =============================================================================
// Spoke Data
// =============================================================================

/// Spoke datagram header. The sample block follows directly and holds
/// `scan_length` bytes, one sample per byte.
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct SpokeHeader {
    packet_type: [u8; 4],
    len1: [u8; 4],
    _fill_1: [u8; 2],
    scan_length: [u8; 2],
    angle: [u8; 2], // spoke index x 8
    _fill_2: [u8; 2],
    range_meters: [u8; 4],
    display_meters: [u8; 4],
    _fill_3: [u8; 8],
}

pub const SPOKE_HEADER_SIZE: usize = std::mem::size_of::<SpokeHeader>();

/// One decoded spoke plus the absolute range the scanner reported
/// alongside the display range.
#[derive(Debug, Clone)]
pub struct DecodedSpoke {
    pub spoke: Spoke,
    /// Instrumented (absolute) range in meters; `spoke.range` carries
    /// the display range the samples are scaled to
    pub range_meters: u32,
}

/// Decode a data-channel datagram into one spoke.
///
/// The scanner has no heading source, so `heading` is always None and
/// the caller stabilizes against the host heading.
pub fn parse_spoke(data: &[u8], time_ms: u64) -> Result<DecodedSpoke, ParseError> {
    if data.len() < SPOKE_HEADER_SIZE {
        return Err(ParseError::TooShort {
            expected: SPOKE_HEADER_SIZE,
            actual: data.len(),
        });
    }

    let header: SpokeHeader = bincode::deserialize(&data[..SPOKE_HEADER_SIZE])?;
    let scan_length = u16::from_le_bytes(header.scan_length) as usize;

    if scan_length > MAX_SPOKE_LEN as usize || data.len() < SPOKE_HEADER_SIZE + scan_length {
        return Err(ParseError::LengthMismatch {
            header_len: scan_length,
            actual_len: data.len().saturating_sub(SPOKE_HEADER_SIZE),
        });
    }

    let angle = u16::from_le_bytes(header.angle) / 8;
    if angle >= SPOKES_PER_REVOLUTION {
        return Err(ParseError::InvalidPacket(format!(
            "spoke angle {} out of range",
            angle
        )));
    }

    Ok(DecodedSpoke {
        spoke: Spoke {
            angle,
            range: u32::from_le_bytes(header.display_meters),
            heading: None,
            time_ms,
            data: data[SPOKE_HEADER_SIZE..SPOKE_HEADER_SIZE + scan_length].to_vec(),
        },
        range_meters: u32::from_le_bytes(header.range_meters),
    })
}

// =============================================================================
// Discovery
// =============================================================================

/// Build a discovery from the source of any report datagram.
///
/// The report group is scanner-agnostic, so the origin address is the
/// only identity Garmin gives us.
pub fn create_discovery(source_addr: SocketAddrV4) -> RadarDiscovery {
    RadarDiscovery {
        brand: Brand::Garmin,
        model: Some("xHD".to_string()),
        name: format!("Garmin xHD @ {}", source_addr.ip()),
        address: source_addr,
        spokes_per_revolution: SPOKES_PER_REVOLUTION,
        max_spoke_len: MAX_SPOKE_LEN,
        pixel_values: PIXEL_VALUES,
        serial_number: None,
        nic_address: None, // filled in by the locator
        suffix: None,
        data_address: Some(SocketAddrV4::new(DATA_ADDR, DATA_PORT)),
        report_address: Some(SocketAddrV4::new(REPORT_ADDR, REPORT_PORT)),
        send_address: Some(SocketAddrV4::new(*source_addr.ip(), SEND_PORT)),
    }
}

// =============================================================================
// Command Encoding
// =============================================================================

fn command_u8(packet_type: u32, parm: u8) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(9);
    cmd.extend_from_slice(&packet_type.to_le_bytes());
    cmd.extend_from_slice(&1u32.to_le_bytes());
    cmd.push(parm);
    cmd
}

fn command_u16(packet_type: u32, parm: u16) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(10);
    cmd.extend_from_slice(&packet_type.to_le_bytes());
    cmd.extend_from_slice(&2u32.to_le_bytes());
    cmd.extend_from_slice(&parm.to_le_bytes());
    cmd
}

fn command_u32(packet_type: u32, parm: u32) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(12);
    cmd.extend_from_slice(&packet_type.to_le_bytes());
    cmd.extend_from_slice(&4u32.to_le_bytes());
    cmd.extend_from_slice(&parm.to_le_bytes());
    cmd
}

/// Standby/transmit
pub fn encode_transmit(on: bool) -> Vec<u8> {
    command_u8(REPORT_TRANSMIT_STATE, on as u8)
}

/// Range in meters; resending the current range doubles as the
/// keepalive
pub fn encode_range(meters: u32) -> Vec<u8> {
    command_u32(REPORT_RANGE, meters)
}

/// Gain. Auto sends the mode plus the auto level; manual sends the
/// mode plus the value scaled x 100. Ordered two-phase sequences.
pub fn encode_gain(auto: Option<AutoGainLevel>, percent: u16) -> Vec<Vec<u8>> {
    match auto {
        Some(level) => {
            let level = match level {
                AutoGainLevel::High => 0u8,
                AutoGainLevel::Low => 1u8,
                AutoGainLevel::Unknown(v) => v as u8,
            };
            vec![
                command_u8(REPORT_AUTO_GAIN_MODE, 2),
                command_u8(REPORT_AUTO_GAIN_LEVEL, level),
            ]
        }
        None => vec![
            command_u8(REPORT_AUTO_GAIN_MODE, 0),
            command_u16(REPORT_GAIN, percent * 100),
        ],
    }
}

/// Sea clutter: off, auto with level, or manual with percent
pub fn encode_sea(mode: SeaMode) -> Vec<Vec<u8>> {
    match mode {
        SeaMode::Off => vec![command_u8(REPORT_SEA_MODE, 0)],
        SeaMode::Auto(level) => vec![
            command_u8(REPORT_SEA_MODE, 2),
            command_u8(REPORT_SEA_AUTO_LEVEL, level),
        ],
        SeaMode::Manual(percent) => vec![
            command_u8(REPORT_SEA_MODE, 1),
            command_u16(REPORT_SEA_LEVEL, percent * 100),
        ],
    }
}

/// Sea clutter request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeaMode {
    Off,
    Auto(u8),
    Manual(u16),
}

/// Rain clutter: off or manual with percent
pub fn encode_rain(percent: Option<u16>) -> Vec<Vec<u8>> {
    match percent {
        None => vec![command_u8(REPORT_RAIN_MODE, 0)],
        Some(p) => vec![
            command_u8(REPORT_RAIN_MODE, 1),
            command_u16(REPORT_RAIN_LEVEL, p * 100),
        ],
    }
}

/// Crosstalk/interference rejection; the scanner expects the level on
/// three related opcodes
pub fn encode_interference_rejection(level: u8) -> Vec<Vec<u8>> {
    vec![
        command_u8(0x091b, level),
        command_u8(REPORT_CROSSTALK, level),
        command_u8(0x02b9, level),
    ]
}

/// Dome offset in degrees, scaled x 32
pub fn encode_bearing_alignment(degrees: f32) -> Vec<u8> {
    command_u32(REPORT_BEARING_ALIGNMENT, (degrees * 32.0) as i32 as u32)
}

/// Dome rotation speed; wire value is level x 2
pub fn encode_dome_speed(level: u8) -> Vec<u8> {
    command_u8(REPORT_DOME_SPEED, level * 2)
}

/// No-transmit zone. Disable is one datagram; enable sends the flag
/// then both angles scaled x 32.
pub fn encode_no_transmit_zone(zone: Option<(f32, f32)>) -> Vec<Vec<u8>> {
    match zone {
        None => vec![command_u8(REPORT_NTZ_MODE, 0)],
        Some((start_deg, end_deg)) => vec![
            command_u8(REPORT_NTZ_MODE, 1),
            command_u32(REPORT_NTZ_START, (start_deg * 32.0) as i32 as u32),
            command_u32(REPORT_NTZ_END, (end_deg * 32.0) as i32 as u32),
        ],
    }
}

/// Timed idle: off or idle minutes
pub fn encode_timed_idle(minutes: Option<u16>) -> Vec<Vec<u8>> {
    match minutes {
        None => vec![command_u8(REPORT_TIMED_IDLE_MODE, 0)],
        Some(m) => vec![
            command_u16(REPORT_TIMED_IDLE_TIME, m * 60),
            command_u8(REPORT_TIMED_IDLE_MODE, 1),
        ],
    }
}

/// Timed run minutes
pub fn encode_timed_run(minutes: u16) -> Vec<u8> {
    command_u16(REPORT_TIMED_RUN_TIME, minutes * 60)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(packet_type: u32, len: u32, payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&packet_type.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn test_scanner_status() {
        assert_eq!(ScannerStatus::from_value(1), ScannerStatus::WarmingUp);
        assert_eq!(ScannerStatus::from_value(3), ScannerStatus::Standby);
        assert_eq!(ScannerStatus::from_value(4), ScannerStatus::SpinningUp);
        assert_eq!(ScannerStatus::from_value(5), ScannerStatus::Transmit);
        assert_eq!(ScannerStatus::from_value(2), ScannerStatus::Unknown(2));
    }

    #[test]
    fn test_parse_gain_scaled() {
        // Gain record carries percent x 100
        let data = record(REPORT_GAIN, 2, &7800u16.to_le_bytes());
        assert_eq!(parse_report(&data).unwrap(), Report::Gain(78));
    }

    #[test]
    fn test_parse_bearing_alignment_scaled() {
        // Alignment record carries degrees x 32
        let data = record(REPORT_BEARING_ALIGNMENT, 4, &320u32.to_le_bytes());
        match parse_report(&data).unwrap() {
            Report::BearingAlignment(deg) => assert!((deg - 10.0).abs() < 0.01),
            other => panic!("expected BearingAlignment, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_dome_speed_halved() {
        let data = record(REPORT_DOME_SPEED, 1, &[6]);
        assert_eq!(parse_report(&data).unwrap(), Report::DomeSpeed(3));
    }

    #[test]
    fn test_parse_range_report() {
        let data = record(REPORT_RANGE, 4, &1000u32.to_le_bytes());
        assert_eq!(parse_report(&data).unwrap(), Report::Range(1000));
    }

    #[test]
    fn test_parse_scanner_status_report() {
        let data = record(REPORT_SCANNER_STATUS, 1, &[5]);
        assert_eq!(
            parse_report(&data).unwrap(),
            Report::ScannerStatus(ScannerStatus::Transmit)
        );
    }

    #[test]
    fn test_parse_report_too_short() {
        assert!(matches!(
            parse_report(&[0u8; 5]),
            Err(ParseError::TooShort { .. })
        ));
    }

    #[test]
    fn test_unknown_report_passthrough() {
        let data = record(0x0777, 1, &[9]);
        assert_eq!(
            parse_report(&data).unwrap(),
            Report::Unknown {
                packet_type: 0x0777,
                value: 9
            }
        );
    }

    #[test]
    fn test_spoke_header_size() {
        assert_eq!(SPOKE_HEADER_SIZE, 32);
    }

    #[test]
    fn test_parse_spoke() {
        let mut data = vec![0u8; SPOKE_HEADER_SIZE];
        data[10..12].copy_from_slice(&600u16.to_le_bytes()); // scan_length
        data[12..14].copy_from_slice(&(720u16 * 8).to_le_bytes()); // angle raw
        data[16..20].copy_from_slice(&2000u32.to_le_bytes()); // range_meters
        data[20..24].copy_from_slice(&1852u32.to_le_bytes()); // display_meters
        data.extend(std::iter::repeat(0x40).take(600));

        let decoded = parse_spoke(&data, 7).unwrap();
        assert_eq!(decoded.spoke.angle, 720);
        assert_eq!(decoded.spoke.range, 1852);
        assert_eq!(decoded.range_meters, 2000);
        assert_eq!(decoded.spoke.heading, None);
        assert_eq!(decoded.spoke.data.len(), 600);
        assert_eq!(decoded.spoke.time_ms, 7);
    }

    #[test]
    fn test_parse_spoke_truncated() {
        let mut data = vec![0u8; SPOKE_HEADER_SIZE];
        data[10..12].copy_from_slice(&600u16.to_le_bytes());
        // Sample block missing
        assert!(matches!(
            parse_spoke(&data, 0),
            Err(ParseError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_create_discovery() {
        let source = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 100), 50100);
        let disc = create_discovery(source);
        assert_eq!(disc.brand, Brand::Garmin);
        assert_eq!(disc.data_address.unwrap().port(), DATA_PORT);
        assert_eq!(
            disc.send_address.unwrap(),
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 100), SEND_PORT)
        );
        assert_eq!(disc.spokes_per_revolution, 1440);
    }

    #[test]
    fn test_encode_transmit() {
        let cmd = encode_transmit(true);
        assert_eq!(&cmd[0..4], &REPORT_TRANSMIT_STATE.to_le_bytes());
        assert_eq!(&cmd[4..8], &1u32.to_le_bytes());
        assert_eq!(cmd[8], 1);
        assert_eq!(encode_transmit(false)[8], 0);
    }

    #[test]
    fn test_encode_gain_manual_scaled() {
        let cmds = encode_gain(None, 78);
        assert_eq!(cmds.len(), 2);
        // Mode first, then the value x 100
        assert_eq!(&cmds[0][0..4], &REPORT_AUTO_GAIN_MODE.to_le_bytes());
        assert_eq!(cmds[0][8], 0);
        assert_eq!(&cmds[1][0..4], &REPORT_GAIN.to_le_bytes());
        assert_eq!(&cmds[1][8..10], &7800u16.to_le_bytes());
    }

    #[test]
    fn test_encode_gain_auto() {
        let cmds = encode_gain(Some(AutoGainLevel::Low), 0);
        assert_eq!(cmds[0][8], 2); // auto mode
        assert_eq!(&cmds[1][0..4], &REPORT_AUTO_GAIN_LEVEL.to_le_bytes());
        assert_eq!(cmds[1][8], 1);
    }

    #[test]
    fn test_encode_bearing_alignment_scaled() {
        let cmd = encode_bearing_alignment(10.0);
        assert_eq!(&cmd[8..12], &320u32.to_le_bytes());
    }

    #[test]
    fn test_encode_ntz_sequence() {
        let cmds = encode_no_transmit_zone(Some((350.0, 10.0)));
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0][8], 1); // enable flag first
        assert_eq!(&cmds[1][8..12], &(350u32 * 32).to_le_bytes());
        assert_eq!(&cmds[2][8..12], &(10u32 * 32).to_le_bytes());

        let off = encode_no_transmit_zone(None);
        assert_eq!(off.len(), 1);
        assert_eq!(off[0][8], 0);
    }
}
