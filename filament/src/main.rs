use std::{sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

mod cli;
mod core;
mod helpers;

use crate::{
    cli::Cli,
    core::{
        manager::{ManagerConfig, UprobeManager},
        monitor::LogMonitor,
        probe::tracer::BpfTracer,
        process::proc::{ProcInspector, ProcfsInspector},
    },
    helpers::logger::Logger,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    Logger::init(cli.log_level)?;

    if !nix::unistd::Uid::effective().is_root() {
        warn!("Not running as root; attaching probes will likely fail");
    }

    let tracer = BpfTracer::load(&cli.bpf_object)
        .with_context(|| format!("Could not load BPF object {}", cli.bpf_object.display()))?;

    let cfg = ManagerConfig {
        enable_http2_tracing: cli.enable_http2_tracing,
        disable_self_probing: !cli.probe_self,
        rescan_on_map_change: !cli.no_rescan_on_map_change,
        backoff_factor: cli.rescan_backoff_factor,
        backoff_max: cli.rescan_backoff_max,
    };
    let manager = UprobeManager::new(
        cfg,
        Box::new(tracer),
        Box::new(ProcfsInspector),
        Arc::new(LogMonitor),
    )?;

    info!("Starting deployment passes every {}s", cli.interval);
    loop {
        match ProcfsInspector.live() {
            Ok(live) => match manager.deploy(live).join() {
                Ok(summary) => {
                    for status in summary
                        .statuses
                        .iter()
                        .filter(|status| !status.errors.is_empty())
                    {
                        warn!(
                            "pid {}: {} probe(s), errors: {}",
                            status.pid.tgid,
                            status.probes,
                            status.errors.join("; ")
                        );
                    }
                }
                Err(_) => error!("Deployment pass panicked"),
            },
            Err(e) => error!("Could not list processes: {e}"),
        }
        thread::sleep(Duration::from_secs(cli.interval));
    }
}
