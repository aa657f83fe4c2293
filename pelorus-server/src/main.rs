use std::net::Ipv4Addr;
use std::time::Duration;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tokio::time::sleep;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use pelorus_server::locator::Locator;
use pelorus_server::radar::{RadarError, SharedRadars};
use pelorus_server::{brand, Cli, Session, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    log::info!("pelorus-server {} starting", VERSION);
    log::debug!("{:?}", args);

    let session = Session::new(args.clone());
    let radars = session.radars();

    Toplevel::new(move |s| async move {
        if args.output {
            let radars_out = radars.clone();
            s.start(SubsystemBuilder::new("output", move |s| {
                spoke_output(radars_out, s)
            }));
        }

        if args.emulator {
            start_emulator(&radars, &s);
        } else {
            let locator = Locator::new(session.clone(), radars.clone());
            s.start(SubsystemBuilder::new("locator", |s| locator.run(s)));

            #[cfg(feature = "emulator")]
            if session.args().brand_filter() == Some(pelorus_core::Brand::Emulator) {
                start_emulator(&radars, &s);
            }
        }

        let radars_stats = radars.clone();
        s.start(SubsystemBuilder::new("statistics", move |s| {
            statistics_logger(radars_stats, s)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .into_diagnostic()
}

#[cfg(feature = "emulator")]
fn start_emulator(radars: &SharedRadars, subsys: &SubsystemHandle) {
    let discovery = pelorus_core::emulator::Emulator::discovery();
    let (radar, inserted) = radars.insert(&discovery, Ipv4Addr::LOCALHOST);
    if inserted {
        brand::start_receive_engine(
            radars.clone(),
            radar,
            discovery,
            Ipv4Addr::LOCALHOST,
            subsys,
        );
    }
}

#[cfg(not(feature = "emulator"))]
fn start_emulator(_radars: &SharedRadars, _subsys: &SubsystemHandle) {
    log::error!("Emulator support not compiled in");
}

/// Write every processed spoke to stdout as one JSON object per line.
async fn spoke_output(radars: SharedRadars, subsys: SubsystemHandle) -> Result<(), RadarError> {
    use tokio::sync::broadcast::error::RecvError;

    let mut rx = radars.subscribe_spokes();
    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => return Ok(()),
            batch = rx.recv() => {
                match batch {
                    Ok(batch) => {
                        for spoke in batch.spokes.iter() {
                            let line = serde_json::json!({
                                "radar": batch.key,
                                "angle": spoke.angle,
                                "range": spoke.range,
                                "heading": spoke.heading,
                                "time": spoke.time_ms,
                                "data": spoke.data,
                            });
                            println!("{}", line);
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("Spoke output lagging, {} batches dropped", n);
                    }
                    Err(RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}

/// Periodic per-radar receive statistics at info level.
async fn statistics_logger(radars: SharedRadars, subsys: SubsystemHandle) -> Result<(), RadarError> {
    const INTERVAL: Duration = Duration::from_secs(60);

    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => return Ok(()),
            _ = sleep(INTERVAL) => {
                for summary in radars.summaries() {
                    log::info!(
                        "{}: state {} spokes {} missing {} broken {}",
                        summary.key,
                        summary.state,
                        summary.received_spokes,
                        summary.missing_spokes,
                        summary.broken_packets,
                    );
                }
            }
        }
    }
}
