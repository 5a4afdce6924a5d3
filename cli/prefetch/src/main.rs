//! bf-prefetch CLI
//!
//! Runs a prefetching batch pipeline with built-in producers and compute
//! steps and reports how well prefetching hid producer latency.

use anyhow::Context;
use bf_cli_common::{format_bytes, format_duration, format_number, init_logging};
use clap::Parser;
use std::time::Duration;

mod args;
mod progress;
mod run;

use args::Cli;

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // Logs go to stderr so stdout stays clean for --json
    init_logging(args.log_level)?;

    if args.list {
        return run::list_components();
    }

    let report = run::execute(&args)?;
    let stats = &report.stats;

    if args.json {
        let json = serde_json::to_string_pretty(stats).context("failed to serialize stats")?;
        println!("{json}");
    }

    eprintln!();
    eprintln!("Prefetch run completed:");
    eprintln!("  Pipeline:          {} ({})", report.pipeline, report.mode);
    eprintln!("  Producer / step:   {} / {}", report.producer, report.step);
    eprintln!("  Steps:             {}", format_number(report.steps));
    eprintln!(
        "  Batches produced:  {} ({} discarded at shutdown)",
        format_number(report.summary.batches_produced),
        report.summary.batches_discarded
    );
    eprintln!("  Data staged:       {}", format_bytes(stats.bytes_produced));
    eprintln!("  Elements read:     {}", format_number(report.elements));
    eprintln!("  Checksum:          {:.4}", report.checksum);
    eprintln!("  Duration:          {}", format_duration(report.elapsed));

    let secs = report.elapsed.as_secs_f64();
    if secs > 0.0 {
        eprintln!(
            "  Throughput:        {:.1} batches/sec",
            report.steps as f64 / secs
        );
    }
    if let Some(fill_ms) = stats.mean_fill_ms() {
        eprintln!("  Mean fill:         {:.2}ms", fill_ms);
    }
    if let Some(stage_ms) = stats.mean_stage_ms() {
        eprintln!("  Mean staging:      {:.2}ms", stage_ms);
    }
    eprintln!(
        "  Consumer waits:    {} ({:.0}% of steps, {} total)",
        format_number(stats.consumer_waits),
        stats.consumer_wait_ratio() * 100.0,
        format_duration(Duration::from_micros(stats.consumer_wait_us))
    );
    eprintln!(
        "  Producer waits:    {}",
        format_number(stats.producer_waits)
    );

    Ok(())
}
