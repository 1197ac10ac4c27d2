//! Command line definition.

use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use crate::core::rescan;

#[derive(Parser, Debug)]
#[command(
    name = "filament",
    about = "Dynamic uprobe deployment for TLS and http2 library tracing"
)]
pub(crate) struct Cli {
    /// Compiled BPF object holding the probe programs and symaddr maps.
    #[arg(long, value_name = "FILE")]
    pub(crate) bpf_object: PathBuf,

    /// Seconds between deployment passes.
    #[arg(long, default_value_t = 10)]
    pub(crate) interval: u64,

    /// Deploy the Go http2 probes in addition to the TLS ones.
    #[arg(long)]
    pub(crate) enable_http2_tracing: bool,

    /// Allow deploying probes into our own process.
    #[arg(long)]
    pub(crate) probe_self: bool,

    /// Disable immediate rescans on kernel mmap notifications.
    #[arg(long)]
    pub(crate) no_rescan_on_map_change: bool,

    /// Growth factor of the per-process rescan backoff.
    #[arg(long, default_value_t = rescan::DEFAULT_BACKOFF_FACTOR)]
    pub(crate) rescan_backoff_factor: u32,

    /// Cap of the per-process rescan backoff, in pass periods.
    #[arg(long, default_value_t = rescan::DEFAULT_BACKOFF_MAX)]
    pub(crate) rescan_backoff_max: u32,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    pub(crate) log_level: LevelFilter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::parse_from(["filament", "--bpf-object", "/tmp/probes.o"]);
        assert_eq!(cli.interval, 10);
        assert!(!cli.enable_http2_tracing);
        assert!(!cli.probe_self);
        assert_eq!(cli.rescan_backoff_factor, 2);
        assert_eq!(cli.rescan_backoff_max, 1 << 12);
        assert_eq!(cli.log_level, LevelFilter::Info);
    }

    #[test]
    fn parse_overrides() {
        let cli = Cli::parse_from([
            "filament",
            "--bpf-object",
            "/tmp/probes.o",
            "--enable-http2-tracing",
            "--no-rescan-on-map-change",
            "--rescan-backoff-max",
            "64",
            "--log-level",
            "debug",
        ]);
        assert!(cli.enable_http2_tracing);
        assert!(cli.no_rescan_on_map_change);
        assert_eq!(cli.rescan_backoff_max, 64);
        assert_eq!(cli.log_level, LevelFilter::Debug);
    }
}
