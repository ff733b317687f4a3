//! Printing of scenario results.

use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};
use kubebench_harness::Measurement;
use kubebench_harness::driver::{LatencyReport, ThroughputReport, WatchReport};
use kubebench_harness::scenario::ScenarioConfig;
use sketches_ddsketch::DDSketch;
use yansi::Paint;

/// Shows a spinner with the elapsed time while a scenario runs.
pub fn spinner(scenario: &str) -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message(format!("Running {scenario}:"));
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

/// Prints the heading and results of one scenario.
pub fn print(scenario: &ScenarioConfig, measurement: &Measurement) {
    let object_size = serde_json::to_vec(scenario.template.as_value())
        .map(|bytes| ByteSize::b(bytes.len() as u64))
        .unwrap_or_default();

    println!();
    println!(
        "{} {} (resource: {}, namespace: {}, object size: {:.2})",
        "## Scenario".bold(),
        scenario.name.bold().blue(),
        scenario.descriptor,
        scenario.namespace,
        object_size.bold()
    );

    match measurement {
        Measurement::CreateLatency(report) => print_latency("CREATE:", report),
        Measurement::CreateThroughput(report) => print_throughput(report),
        Measurement::List(report) => print_latency("LIST:", report),
        Measurement::Watch(report) => print_watch(report),
    }
}

fn print_latency(label: &str, report: &LatencyReport) {
    let ops = report.timings.count();
    println!("{} ({} ops)", label.bold().green(), ops.bold());
    print_ops(ops, report.elapsed);
    println!();
    print_percentiles(&report.timings);
}

fn print_throughput(report: &ThroughputReport) {
    println!(
        "{} ({} objects)",
        "CREATE:".bold().green(),
        report.count.bold()
    );
    println!(
        "  {:.2} objects/s; total: {:.2?}",
        report.per_second().bold(),
        report.elapsed
    );
}

fn print_watch(report: &WatchReport) {
    println!(
        "{} ({} watchers, {} events)",
        "WATCH:".bold().green(),
        report.watchers.bold(),
        report.events.bold()
    );
    println!("  setup: {:.2?}", report.setup.bold());
    print_ops(report.deliveries, report.delivery);
    println!(", delivered in {:.2?}", report.delivery.bold());
}

fn print_percentiles(sketch: &DDSketch) {
    let Some(sum) = sketch.sum() else {
        println!("  no samples");
        return;
    };

    let quantile = |q| {
        let value = sketch.quantile(q).ok().flatten().unwrap_or_default();
        Duration::from_secs_f64(value)
    };
    let avg = Duration::from_secs_f64(sum / sketch.count() as f64);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

fn print_ops(ops: usize, duration: Duration) {
    let ops_ps = ops as f64 / duration.as_secs_f64();
    print!("  {:.2} operations/s", ops_ps.bold());
}
