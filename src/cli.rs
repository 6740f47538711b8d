//! Command line interface for the `callframe` load demo.
//!
//! Shared with `build.rs`, which renders the man page from it, so this file
//! depends on nothing but `clap`.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `callframe` binary.
#[derive(Debug, Parser)]
#[command(
    name = "callframe",
    version,
    about = "Drive a synthetic call load through the callframe pipeline"
)]
pub struct Cli {
    /// Number of calls to submit.
    #[arg(short, long, default_value_t = 1_000)]
    pub calls: u64,
    /// Worker tasks executing calls.
    #[arg(short, long, default_value_t = 8)]
    pub workers: usize,
    /// Admission budget in bytes.
    #[arg(long, default_value_t = 1024 * 1024)]
    pub capacity_bytes: u64,
    /// Estimated size of each call in bytes.
    #[arg(long, default_value_t = 4 * 1024)]
    pub call_size: u64,
    /// Per-call timeout in milliseconds; 0 disables deadlines.
    #[arg(long, default_value_t = 0)]
    pub timeout_ms: u64,
    /// Simulated handler latency in milliseconds.
    #[arg(long, default_value_t = 1)]
    pub latency_ms: u64,
    /// Make every Nth call high priority; 0 keeps all calls normal.
    #[arg(long, default_value_t = 4)]
    pub high_every: u64,
    /// High-priority calls served before a waiting normal call.
    #[arg(long, default_value_t = 8)]
    pub max_high_before_low: usize,
    /// Hand calls straight to idle workers when nothing is queued.
    #[arg(long)]
    pub fast_path: bool,
    /// Drop rejected calls without answering them.
    #[arg(long)]
    pub silent_rejections: bool,
    /// Serve Prometheus metrics on this address while the demo runs.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_are_applied() {
        let cli = Cli::parse_from(["callframe"]);
        assert_eq!(cli.calls, 1_000);
        assert_eq!(cli.workers, 8);
        assert_eq!(cli.timeout_ms, 0);
        assert!(!cli.fast_path);
        assert!(cli.metrics_addr.is_none());
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "callframe",
            "--calls",
            "50",
            "--workers",
            "2",
            "--fast-path",
            "--metrics-addr",
            "127.0.0.1:9000",
        ]);
        assert_eq!(cli.calls, 50);
        assert_eq!(cli.workers, 2);
        assert!(cli.fast_path);
        assert_eq!(
            cli.metrics_addr.map(|addr| addr.port()),
            Some(9000)
        );
    }
}
