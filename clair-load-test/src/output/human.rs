use std::fmt::Write as _;
use std::time::Duration;

use clair_load_core::{MetricsSnapshot, OperationReport, RunReport};

use super::{OutputFormatter, RunInfo};

pub(crate) struct HumanReadableOutput;

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, info: &RunInfo) {
        println!("run: {}", info.run_id);
        println!("host: {}", info.host);
        println!(
            "batch: {} containers, rate {}/s, timeout {}",
            info.batch,
            info.rate,
            humantime::format_duration(info.timeout)
        );
        println!("operations: {}", info.operations.join(", "));
        println!();
    }

    fn print_operation(&self, report: &OperationReport) -> anyhow::Result<()> {
        print!("{}", render(&report.snapshot));
        Ok(())
    }

    fn print_run(&self, info: &RunInfo, report: &RunReport) -> anyhow::Result<()> {
        println!("completed {} operations", report.operations.len());
        if !report.publish_failures.is_empty() {
            println!("publish failures:");
            for (label, err) in &report.publish_failures {
                println!("  {label}: {err}");
            }
        }
        println!("config:");
        println!("{}", serde_json::to_string_pretty(&info.config)?);
        Ok(())
    }
}

pub(crate) fn render(s: &MetricsSnapshot) -> String {
    let mut out = String::new();

    writeln!(&mut out, "operation: {}", s.label).ok();
    writeln!(
        &mut out,
        "  requests: {} in {} (throughput {:.2}/s)",
        s.requests,
        format_duration_single(s.duration),
        s.throughput
    )
    .ok();
    writeln!(&mut out, "  success: {:.2}%", s.success_ratio * 100.0).ok();

    let codes = s
        .status_codes
        .iter()
        .map(|(code, n)| format!("{code}:{n}"))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(&mut out, "  status codes: {codes}").ok();

    if !s.errors.is_empty() {
        writeln!(&mut out, "  errors:").ok();
        for (kind, n) in &s.errors {
            writeln!(&mut out, "    {kind}: {n}").ok();
        }
    }

    match &s.latencies {
        Some(l) => {
            writeln!(
                &mut out,
                "  latency: p50 {} p95 {} p99 {} min {} mean {} max {}",
                format_duration_single(l.p50),
                format_duration_single(l.p95),
                format_duration_single(l.p99),
                format_duration_single(l.min),
                format_duration_single(l.mean),
                format_duration_single(l.max),
            )
            .ok();
        }
        None => {
            writeln!(&mut out, "  latency: -").ok();
        }
    }

    writeln!(
        &mut out,
        "  bytes: in {} (mean {:.0}) out {} (mean {:.0})",
        format_bytes(s.bytes_in_total),
        s.bytes_in_mean,
        format_bytes(s.bytes_out_total),
        s.bytes_out_mean
    )
    .ok();
    out.push('\n');
    out
}

pub(crate) fn format_duration_single(d: Duration) -> String {
    // One rounded component in us, ms or s keeps the table columns short.
    let total_ns = d.as_nanos();

    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    if total_ns >= NS_PER_S {
        return format!("{:.2}s", d.as_secs_f64());
    }
    if total_ns >= NS_PER_MS {
        return format!("{}ms", round_div(total_ns, NS_PER_MS));
    }
    format!("{}us", round_div(total_ns, NS_PER_US))
}

pub(crate) fn format_bytes(b: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    if b >= GIB {
        return format!("{:.2}GiB", (b as f64) / (GIB as f64));
    }
    if b >= MIB {
        return format!("{:.2}MiB", (b as f64) / (MIB as f64));
    }
    if b >= KIB {
        return format!("{:.2}KiB", (b as f64) / (KIB as f64));
    }

    format!("{b}B")
}
