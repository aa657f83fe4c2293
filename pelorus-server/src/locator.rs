//! Discovery driver.
//!
//! Owns a [`TokioIoProvider`] and drives the poll-based
//! [`pelorus_core::Locator`] on a fixed cadence. Every discovery event is
//! routed to the radar registry, persisted, and, for new radars, answered
//! by starting the brand's receive engine as a subsystem.

use std::time::Duration;

use pelorus_core::{LocatorEvent, RadarDiscovery};
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;

use crate::network::find_nic_for_radar;
use crate::radar::{radar_key, RadarError, SharedRadars};
use crate::storage::RadarStorage;
use crate::tokio_io::TokioIoProvider;
use crate::{brand, Session};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct Locator {
    session: Session,
    radars: SharedRadars,
    storage: RadarStorage,
}

impl Locator {
    pub fn new(session: Session, radars: SharedRadars) -> Self {
        let storage = RadarStorage::new(!session.args().no_persistence);
        Locator {
            session,
            radars,
            storage,
        }
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), RadarError> {
        let args = self.session.args();
        let mut io = TokioIoProvider::new(args.interface.clone());
        let mut locator = pelorus_core::Locator::new();

        // Persisted radars claim their slots before the first announcement
        // arrives, and their engines start immediately on the last known
        // addresses.
        for discovery in self.storage.load_all() {
            locator.add_slot(discovery.brand, discovery.suffix.as_deref());
            self.handle_discovery(&discovery, &subsys);
        }

        locator.start(&mut io);
        log::info!("Radar discovery started");

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::info!("Locator shutdown requested");
                    locator.shutdown(&mut io);
                    return Ok(());
                }
                _ = sleep(POLL_INTERVAL) => {
                    for event in locator.poll(&mut io) {
                        match event {
                            LocatorEvent::RadarDiscovered { discovery, .. }
                            | LocatorEvent::RadarUpdated { discovery, .. } => {
                                self.handle_discovery(&discovery, &subsys);
                            }
                        }
                    }
                }
            }
        }
    }

    fn handle_discovery(&self, discovery: &RadarDiscovery, subsys: &SubsystemHandle) {
        let args = self.session.args();
        if let Some(only) = args.brand_filter() {
            if discovery.brand != only {
                log::debug!(
                    "Ignoring {} radar {} (brand filter)",
                    discovery.brand,
                    discovery.name
                );
                return;
            }
        }

        let Some(nic_addr) = find_nic_for_radar(discovery.address.ip()) else {
            log::warn!(
                "No usable interface for {} radar at {}",
                discovery.brand,
                discovery.address
            );
            return;
        };

        let (radar, inserted) = self.radars.insert(discovery, nic_addr);
        self.storage.save(discovery);

        if inserted {
            let key = radar_key(discovery);
            log::info!(
                "Located {} radar {} at {} via {}",
                discovery.brand,
                key,
                discovery.address,
                nic_addr
            );
            brand::start_receive_engine(
                self.radars.clone(),
                radar,
                discovery.clone(),
                nic_addr,
                subsys,
            );
        } else {
            log::info!(
                "Updated {} radar {} addresses from announcement",
                discovery.brand,
                radar_key(discovery)
            );
        }
    }
}
