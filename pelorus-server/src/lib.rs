//! # Pelorus Server
//!
//! Native radar integration driver: discovers radar scanners on the local
//! network, runs one receive engine per radar, and exposes their state to
//! the host navigation application.
//!
//! Built on [`pelorus_core`] for all protocol handling, with [`tokio`]
//! providing the async runtime and sockets.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    pelorus-server                        │
//! │  ┌─────────────┐   ┌──────────────────────────────────┐  │
//! │  │ Locator     │──▶│ per-radar receive engines        │  │
//! │  │ (discovery) │   │ (brand::navico / garmin / ...)   │  │
//! │  └─────────────┘   └──────────────┬───────────────────┘  │
//! │                                   ▼                      │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │         SharedRadars (Arc<RwLock<...>>)             │ │
//! │  │  controls, power state, statistics, spoke stream    │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`Cli`]. Key options: `-i/--interface` to limit discovery to one
//! NIC, `-b/--brand` to limit to one brand, `--emulator` to run a
//! synthetic radar without hardware.

use clap::Parser;
use pelorus_core::Brand;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod brand;
pub mod locator;
pub mod network;
pub mod radar;
pub mod storage;
pub mod tokio_io;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Limit radar location to a single interface
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Limit radar location to a single brand
    #[arg(short, long)]
    pub brand: Option<String>,

    /// Run a synthetic emulated radar instead of discovering hardware
    #[arg(long, default_value_t = false)]
    pub emulator: bool,

    /// Do not persist or restore radar addresses
    #[arg(long, default_value_t = false)]
    pub no_persistence: bool,

    /// Write decoded spokes to stdout as JSON lines
    #[arg(long, default_value_t = false)]
    pub output: bool,
}

impl Cli {
    /// Brand filter parsed from the command line, if any.
    pub fn brand_filter(&self) -> Option<Brand> {
        self.brand
            .as_deref()
            .and_then(|name| Brand::try_from(name).ok())
    }
}

pub struct SessionInner {
    pub args: Cli,
    pub radars: radar::SharedRadars,
}

/// Main application state container, shared by the entry point and the
/// locator.
#[derive(Clone)]
pub struct Session {
    inner: Arc<RwLock<SessionInner>>,
}

impl Session {
    pub fn new(args: Cli) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SessionInner {
                args,
                radars: radar::SharedRadars::new(),
            })),
        }
    }

    pub fn read(
        &self,
    ) -> Result<RwLockReadGuard<'_, SessionInner>, PoisonError<RwLockReadGuard<'_, SessionInner>>>
    {
        self.inner.read()
    }

    pub fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, SessionInner>, PoisonError<RwLockWriteGuard<'_, SessionInner>>>
    {
        self.inner.write()
    }

    pub fn args(&self) -> Cli {
        self.read().unwrap().args.clone()
    }

    pub fn radars(&self) -> radar::SharedRadars {
        self.read().unwrap().radars.clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session {{ }}")
    }
}
