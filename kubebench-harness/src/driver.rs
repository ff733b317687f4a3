//! Timed measurement loops.
//!
//! Each driver receives a ready [`SharedClient`] and keeps setup work, such as populating a
//! collection or opening watches, outside of the timed region. The first failing remote call ends
//! the run with an error.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sketches_ddsketch::DDSketch;

use crate::client::{Event, EventStream, SharedClient};
use crate::concurrency::TaskGroup;
use crate::environment::ensure_object_count;
use crate::error::{Error, Result};
use crate::scenario::Operation;

/// Sizes of the workloads run by the drivers.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Workloads {
    /// Number of sequential creates in a latency run.
    pub latency_iterations: usize,
    /// Number of concurrent creates in a throughput run.
    pub throughput_fanout: usize,
    /// Number of objects present in the collection during a list run.
    pub list_size: usize,
    /// Number of sequential lists in a list run.
    pub list_iterations: usize,
    /// Number of concurrent watchers in a watch run.
    pub watchers: usize,
    /// Number of objects created while watchers are subscribed.
    pub watch_events: usize,
}

impl Default for Workloads {
    fn default() -> Self {
        Self {
            latency_iterations: 100,
            throughput_fanout: 100,
            list_size: 1000,
            list_iterations: 20,
            watchers: 1000,
            watch_events: 10,
        }
    }
}

/// Per-call timings of a sequential run.
#[derive(Clone)]
pub struct LatencyReport {
    /// Duration of each call, in seconds.
    pub timings: DDSketch,
    /// Wall-clock time of the whole timed region.
    pub elapsed: Duration,
}

impl fmt::Debug for LatencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyReport")
            .field("count", &self.timings.count())
            .field("elapsed", &self.elapsed)
            .finish_non_exhaustive()
    }
}

/// Aggregate timing of a concurrent create burst.
#[derive(Clone, Debug)]
pub struct ThroughputReport {
    /// Number of objects created.
    pub count: usize,
    /// Wall-clock time from launching the first create until the last one finished.
    pub elapsed: Duration,
}

impl ThroughputReport {
    /// Returns the achieved creates per second.
    pub fn per_second(&self) -> f64 {
        self.count as f64 / self.elapsed.as_secs_f64()
    }
}

/// Fan-out delivery timing of a watch run.
#[derive(Clone, Debug)]
pub struct WatchReport {
    /// Number of concurrent watchers.
    pub watchers: usize,
    /// Number of events every watcher received.
    pub events: usize,
    /// Total events received across all watchers.
    pub deliveries: usize,
    /// Time until all watchers were subscribed.
    pub setup: Duration,
    /// Time from the first create until every watcher saw all events.
    pub delivery: Duration,
}

/// The result of running one scenario.
#[derive(Clone, Debug)]
pub enum Measurement {
    /// Sequential create latencies.
    CreateLatency(LatencyReport),
    /// Concurrent create throughput.
    CreateThroughput(ThroughputReport),
    /// Sequential list latencies.
    List(LatencyReport),
    /// Watch fan-out delivery.
    Watch(WatchReport),
}

/// Runs the driver for `operation` with the configured workload sizes.
pub async fn run(
    operation: Operation,
    client: &SharedClient,
    workloads: &Workloads,
) -> Result<Measurement> {
    let measurement = match operation {
        Operation::CreateLatency => {
            Measurement::CreateLatency(create_latency(client, workloads.latency_iterations).await?)
        }
        Operation::CreateThroughput => Measurement::CreateThroughput(
            create_throughput(client, workloads.throughput_fanout).await?,
        ),
        Operation::List => Measurement::List(
            list(client, workloads.list_size, workloads.list_iterations).await?,
        ),
        Operation::Watch => {
            Measurement::Watch(watch(client, workloads.watchers, workloads.watch_events).await?)
        }
    };
    Ok(measurement)
}

/// Creates `iterations` objects one after another and records the latency of each call.
pub async fn create_latency(client: &SharedClient, iterations: usize) -> Result<LatencyReport> {
    let mut timings = DDSketch::default();

    let start = Instant::now();
    for _ in 0..iterations {
        let call = Instant::now();
        client.create(0).await?;
        timings.add(call.elapsed().as_secs_f64());
    }

    Ok(LatencyReport {
        timings,
        elapsed: start.elapsed(),
    })
}

/// Creates `fanout` objects concurrently and measures the time until all of them exist.
pub async fn create_throughput(client: &SharedClient, fanout: usize) -> Result<ThroughputReport> {
    let start = Instant::now();

    let mut group = TaskGroup::new();
    for index in 0..fanout {
        let client = SharedClient::clone(client);
        group.spawn(async move { client.create(index).await.map(drop) });
    }
    group.join_all().await?;

    let elapsed = start.elapsed();
    tracing::info!(count = fanout, ?elapsed, "created objects");

    Ok(ThroughputReport {
        count: fanout,
        elapsed,
    })
}

/// Lists a collection of exactly `list_size` objects `iterations` times.
///
/// The collection is populated before timing starts.
pub async fn list(
    client: &SharedClient,
    list_size: usize,
    iterations: usize,
) -> Result<LatencyReport> {
    ensure_object_count(client, list_size).await?;

    let mut timings = DDSketch::default();

    let start = Instant::now();
    for _ in 0..iterations {
        let call = Instant::now();
        client.list().await?;
        timings.add(call.elapsed().as_secs_f64());
    }

    Ok(LatencyReport {
        timings,
        elapsed: start.elapsed(),
    })
}

/// Measures how long it takes to deliver `events` creates to each of `watchers` subscribers.
///
/// Timing starts only after every watcher is subscribed.
pub async fn watch(client: &SharedClient, watchers: usize, events: usize) -> Result<WatchReport> {
    let start = Instant::now();

    // All subscriptions must be accepted before any object is created.
    let streams =
        futures::future::try_join_all((0..watchers).map(|_| client.watch())).await?;

    let setup = start.elapsed();
    tracing::info!(watchers, ?setup, "created watches");

    let start = Instant::now();
    let mut group = TaskGroup::new();

    for stream in streams {
        group.spawn(drain(stream, events));
    }
    for index in 0..events {
        let client = SharedClient::clone(client);
        group.spawn(async move { client.create(index).await.map(|_| 0) });
    }

    let deliveries = group.join_all().await?.into_iter().sum();
    let delivery = start.elapsed();
    tracing::info!(deliveries, ?delivery, "processed watch events");

    Ok(WatchReport {
        watchers,
        events,
        deliveries,
        setup,
        delivery,
    })
}

/// Consumes `expected` creation events from `stream`, then stops it.
async fn drain(mut stream: EventStream, expected: usize) -> Result<usize> {
    let mut seen = 0;

    while seen < expected {
        match stream.next().await {
            Some(Ok(Event::Added(_))) => seen += 1,
            Some(Ok(Event::Bookmark)) => {}
            Some(Ok(event)) => tracing::debug!(?event, "ignoring unexpected watch event"),
            Some(Err(error)) => return Err(error),
            None => return Err(Error::WatchClosed { seen, expected }),
        }
    }

    stream.stop();
    Ok(seen)
}
