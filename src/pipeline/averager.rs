//! Time-bucketed averaging.
//!
//! Every raw scan is classified and converted for each configured device, then folded
//! into the bucket `floor(t / period) * period` of the device-corrected timestamp. A
//! bucket moves through the following states:
//!
//! ```text
//! Open ──(a newer bucket starts)──> Due ──(popped as oldest)──> Closed
//! ```
//!
//! Only the oldest tracked bucket may be popped, and only once a newer one exists. A raw
//! sample that lands in an already closed bucket is dropped so published output stays in
//! chronological order.

use crate::description::Configuration;
use crate::physics::{MeasurementSample, OutputField};
use crate::pipeline::acquisition::{AcquisitionBuffer, RawPeakSet, Timestamp};
use crate::pipeline::shared::SharedBuffer;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Incremental arithmetic mean over valid values only.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    mean: f64,
    count: u64,
}

impl RunningMean {
    /// Fold one value in: `mean = (mean * n + value) / (n + 1)`.
    pub fn push(&mut self, value: f64) {
        self.mean = (self.mean * self.count as f64 + value) / (self.count + 1) as f64;
        self.count += 1;
    }

    /// Fold an optional value in; `None` leaves the mean untouched.
    pub fn push_opt(&mut self, value: Option<f64>) {
        if let Some(value) = value {
            self.push(value);
        }
    }

    /// Current mean, `None` until the first valid value.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Number of values folded in.
    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Per-device accumulator inside one bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceAverage {
    samples: u64,
    fields: [RunningMean; OutputField::COUNT],
}

impl DeviceAverage {
    /// Fold one matched sample in.
    pub fn record(&mut self, sample: &MeasurementSample) {
        self.samples += 1;
        for field in OutputField::ALL {
            self.fields[field.index()].push_opt(sample.field(field));
        }
    }

    /// Number of matched samples seen in this bucket.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Running mean of one published field.
    pub fn field(&self, field: OutputField) -> &RunningMean {
        &self.fields[field.index()]
    }
}

/// Averages for all configured devices over one bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct AveragedBlock {
    /// Bucket start
    pub start: Timestamp,
    /// One entry per configured device, in configuration order
    pub devices: Vec<DeviceAverage>,
}

impl AveragedBlock {
    fn new(start: Timestamp, device_count: usize) -> Self {
        Self {
            start,
            devices: vec![DeviceAverage::default(); device_count],
        }
    }
}

/// Lifecycle of a bucket as seen by the block store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    /// Newest bucket, or not started yet; still accumulating
    Open,
    /// A newer bucket exists; waiting to be popped
    Due,
    /// Published or skipped; samples for it are dropped
    Closed,
}

#[derive(Debug, Default)]
struct Blocks {
    pending: BTreeMap<Timestamp, AveragedBlock>,
    last_published: Option<Timestamp>,
}

/// Averaged buckets waiting for the publisher.
#[derive(Debug, Default)]
pub struct BlockStore {
    blocks: SharedBuffer<Blocks>,
}

impl BlockStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome for device `index` in bucket `start`.
    ///
    /// `sample` is `None` when the device found no match in the scan; the bucket still
    /// starts but no mean moves. Returns `false` if the bucket is already closed.
    pub fn record(
        &self,
        start: Timestamp,
        device_count: usize,
        index: usize,
        sample: Option<&MeasurementSample>,
    ) -> bool {
        let mut blocks = self.blocks.claim();
        if blocks.last_published.is_some_and(|last| start <= last) {
            return false;
        }

        let block = blocks
            .pending
            .entry(start)
            .or_insert_with(|| AveragedBlock::new(start, device_count));
        if block.devices.len() < device_count {
            block.devices.resize_with(device_count, DeviceAverage::default);
        }
        if let (Some(sample), Some(average)) = (sample, block.devices.get_mut(index)) {
            average.record(sample);
        }
        true
    }

    /// State of bucket `start`.
    pub fn state(&self, start: Timestamp) -> BucketState {
        let blocks = self.blocks.claim();
        if blocks.last_published.is_some_and(|last| start <= last) {
            return BucketState::Closed;
        }
        match blocks.pending.last_key_value() {
            Some((newest, _)) if start < *newest => BucketState::Due,
            _ => BucketState::Open,
        }
    }

    /// Remove and return the oldest bucket, provided a newer one has already started.
    pub fn pop_publishable(&self) -> Option<AveragedBlock> {
        let mut blocks = self.blocks.claim();
        if blocks.pending.len() < 2 {
            return None;
        }
        let (start, block) = blocks.pending.pop_first()?;
        blocks.last_published = Some(start);
        Some(block)
    }

    /// Bucket starts currently tracked, oldest first.
    pub fn pending(&self) -> Vec<Timestamp> {
        self.blocks.claim().pending.keys().copied().collect()
    }

    /// Drop every tracked bucket. Buckets already published stay closed.
    pub fn clear(&self) {
        self.blocks.claim().pending.clear();
    }

    /// Wait until a bucket changes or `limit` elapses.
    pub async fn wait_for_change(&self, limit: Duration) {
        self.blocks.wait_for_change(limit).await;
    }
}

/// Counters for one averaging pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AveragingSummary {
    /// Scans processed
    pub scans: u64,
    /// Device samples folded into a bucket
    pub matched: u64,
    /// Device outcomes dropped because their bucket was closed
    pub late: u64,
}

/// Convert `scans` for every device of `config` and fold the results into `blocks`.
pub fn average_scans(
    config: &Configuration,
    scans: &[RawPeakSet],
    blocks: &BlockStore,
) -> AveragingSummary {
    let period = config.sample_period();
    let device_count = config.devices.len();
    let mut summary = AveragingSummary::default();

    for scan in scans {
        summary.scans += 1;
        for (index, device) in config.devices.iter().enumerate() {
            let sample = scan
                .peaks_pm(device.channel())
                .and_then(|peaks| device.measure(&peaks, device.channel()));

            let corrected = scan
                .timestamp
                .as_nanos()
                .saturating_add_signed(device.parameters().time_of_flight_ns);
            let bucket = Timestamp::from_nanos(corrected).bucket_start(period);

            if !blocks.record(bucket, device_count, index, sample.as_ref()) {
                summary.late += 1;
                warn!(
                    device = device.name(),
                    bucket = bucket.as_secs_f64(),
                    "sample for already published bucket dropped"
                );
                continue;
            }
            match sample {
                Some(_) => summary.matched += 1,
                None => trace!(device = device.name(), "no peak match in scan"),
            }
        }
    }

    summary
}

/// Averaging task: drain raw scans into buckets for the current configuration.
///
/// Raw scans that arrive while no configuration is active are discarded.
pub async fn run_averager(
    acquisition: &AcquisitionBuffer,
    blocks: &BlockStore,
    mut configuration: watch::Receiver<Option<Arc<Configuration>>>,
    pause: Duration,
) {
    loop {
        acquisition.wait_for_data(pause).await;

        let config = configuration.borrow_and_update().clone();
        let scans = acquisition.drain();
        if scans.is_empty() {
            continue;
        }

        match config {
            Some(config) => {
                let summary = average_scans(&config, &scans, blocks);
                debug!(
                    scans = summary.scans,
                    matched = summary.matched,
                    late = summary.late,
                    "averaging pass"
                );
            }
            None => debug!(scans = scans.len(), "no configuration, raw scans discarded"),
        }
    }
}
