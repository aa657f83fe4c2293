//! # Pelorus Core
//!
//! Platform-independent marine radar integration library.
//!
//! This crate contains pure parsing, encoding and processing logic with
//! **zero I/O dependencies**. All socket operations go through the
//! [`IoProvider`] trait, so the same radar logic runs under tokio in the
//! native driver and under in-memory queues in tests.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  pelorus-core (platform-independent, no tokio deps)      │
//! │  ├── protocol/    (wire format parsing & command bytes)  │
//! │  ├── locator      (discovery + radar slot routing)       │
//! │  ├── process      (spoke pipeline: filter/zones/trails)  │
//! │  ├── controls     (versioned control snapshots)          │
//! │  └── IoProvider   (abstracts UDP I/O)                    │
//! └──────────────────────────────────────────────────────────┘
//!                           ▲
//!              ┌────────────┴────────────┐
//!              │  pelorus-server         │
//!              │  (TokioIoProvider)      │
//!              └─────────────────────────┘
//! ```
//!
//! ## Supported Radars
//!
//! | Brand     | Models                         |
//! |-----------|--------------------------------|
//! | Navico    | BR24, 3G, 4G, HALO series      |
//! | Garmin    | xHD series                     |
//! | Raymarine | RD/HD radomes, Quantum         |
//!
//! ## Feature Flags
//!
//! Enable/disable support for specific radar brands: `navico`, `garmin`,
//! `raymarine`, `emulator` (all on by default).

pub mod brand;
pub mod controls;
#[cfg(feature = "emulator")]
pub mod emulator;
pub mod error;
pub mod guard_zones;
pub mod io;
pub mod locator;
pub mod process;
pub mod protocol;
pub mod radar;
pub mod state;
pub mod trails;

// Re-export commonly used types
pub use brand::Brand;
pub use controls::{ControlItem, ControlType, ControlValue, Controls};
pub use error::ParseError;
pub use guard_zones::{GuardZone, ZoneType};
pub use io::{IoError, IoProvider, UdpSocketHandle};
pub use locator::{BrandStatus, Locator, LocatorEvent, RadarSlot};
pub use process::SpokeProcessor;
pub use radar::{RadarDiscovery, RadarLocationInfo, Spoke, Statistics};
pub use state::{RadarState, StateTracker};
pub use trails::TrailBuffer;
