//! Walker constellation ISL scenario runner.
//!
//! Builds the configured constellation, wires the link observability hooks
//! to log output, drives a periodic probe frame through the forward ring,
//! runs the event loop for the configured lifetime and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use event_sim::{Simulator, Time};
use optical_isl::{
    frame::ETHERTYPE_IPV4, Constellation, ConstellationBuilder, DataRate, DeviceId, MacAddr,
    SimConfig, TraceCounter, TraceKind,
};
use std::fs;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "isl-sim",
    about = "Discrete-event simulation of a Walker-constellation optical ISL network"
)]
struct Args {
    /// JSON scenario config; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated lifetime in seconds (overrides the config)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Link data rate override, e.g. "1Gbps"
    #[arg(long)]
    data_rate: Option<DataRate>,

    /// Probe frame cadence in seconds; 0 disables probe traffic
    #[arg(long, default_value_t = 10.0)]
    probe_secs: f64,

    /// Verbose output (link maintenance, power-budget drops)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading scenario config {}", path.display()))?;
            serde_json::from_str::<SimConfig>(&raw)
                .with_context(|| format!("parsing scenario config {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    if let Some(duration) = args.duration {
        config.run_secs = duration;
    }
    if let Some(rate) = args.data_rate {
        config.device.data_rate = rate;
    }

    info!(
        "scenario: {:?} T={} P={} F={}, lat limit {}°, {} lifetime {}s",
        config.constellation.kind,
        config.constellation.total,
        config.constellation.planes,
        config.constellation.phasing,
        config.lat_limit_deg,
        config.device.data_rate,
        config.run_secs,
    );

    let mut sim: Simulator<Constellation> = Simulator::new();
    let mut constellation = ConstellationBuilder::from_config(&config)
        .on_connect(|ev| {
            info!(
                "{}: {} ---------> {} [{:.2}°, {:.2}°]",
                ev.time, ev.a_name, ev.b_name, ev.a_latitude_deg, ev.b_latitude_deg
            );
        })
        .on_disconnect(|ev| {
            info!(
                "{}: {} ----x----> {} [{:.2}°, {:.2}°]",
                ev.time, ev.a_name, ev.b_name, ev.a_latitude_deg, ev.b_latitude_deg
            );
        })
        .on_ready_break(|ev| {
            tracing::debug!(
                "{}: {} --ready--> {}: headroom {:.4}",
                ev.time,
                ev.a_name,
                ev.b_name,
                ev.headroom_sin
            );
        })
        .build(&mut sim)?;

    info!(
        "built {} satellites, {} devices, {} channels ({} spare at start)",
        constellation.num_nodes(),
        constellation.num_devices(),
        constellation.num_channels(),
        constellation.spare_pool().len(),
    );

    let counter = TraceCounter::new();
    constellation.traces.subscribe(counter.sink());

    if args.probe_secs > 0.0 {
        if let Some(probe) = constellation.device_by_name("S0000/ethF") {
            schedule_probe(probe, Time::from_secs_f64(args.probe_secs), &mut sim);
        }
    }

    sim.stop(Time::from_secs_f64(config.run_secs));
    sim.run(&mut constellation);

    info!("run complete at {}", sim.now());
    info!(
        "tx: {} accepted, {} dropped | rx: {} delivered, {} phy drops",
        counter.total(TraceKind::MacTx),
        counter.total(TraceKind::MacTxDrop),
        counter.total(TraceKind::MacRx),
        counter.total(TraceKind::PhyRxDrop),
    );
    info!(
        "links: {} temporary up, {} spare | {} satellites polar",
        constellation.attached_temporary_count(),
        constellation.spare_pool().len(),
        (0..constellation.num_nodes())
            .filter(|&n| constellation.is_polar(optical_isl::NodeId(n)))
            .count(),
    );

    Ok(())
}

/// Broadcast one probe frame on `device` every `every`, rescheduling forever.
fn schedule_probe(device: DeviceId, every: Time, sim: &mut Simulator<Constellation>) {
    sim.schedule(every, move |c: &mut Constellation, sim| {
        c.send(device, b"isl-sim probe", MacAddr::BROADCAST, ETHERTYPE_IPV4, sim);
        schedule_probe(device, every, sim);
    });
}
