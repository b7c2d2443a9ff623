//! Raw peak intake.
//!
//! The upstream source delivers one [`RawPeakSet`] per interrogator scan through a small
//! bounded queue. The intake task moves them into the [`AcquisitionBuffer`], keyed by
//! scan timestamp, where the averaging task picks them up. Intake ends on an explicit
//! [`SourceEvent::EndOfStream`] (or when every sender is gone).

use crate::pipeline::shared::SharedBuffer;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Picometres per nanometre. The interrogator reports nm, the physics model works in pm.
pub const PM_PER_NM: f64 = 1000.0;

/// Scan time as nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// From nanoseconds since the epoch.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// From (fractional) seconds since the epoch. Negative values clamp to the epoch.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1e9).round().max(0.0) as u64)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Nanoseconds since the epoch.
    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Seconds since the epoch.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Start of the bucket of length `period` containing this instant:
    /// `floor(t / period) * period`.
    pub fn bucket_start(self, period: Duration) -> Self {
        let period = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX).max(1);
        Self(self.0 - self.0 % period)
    }

    /// UTC calendar time.
    pub fn to_utc(self) -> DateTime<Utc> {
        let secs = (self.0 / 1_000_000_000) as i64;
        let nanos = (self.0 % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }
}

/// All peaks reported by one interrogator scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPeakSet {
    /// Scan time
    pub timestamp: Timestamp,
    /// Peak wavelengths in nm, per channel (1-based), in instrument order
    pub peaks_nm: BTreeMap<u32, Vec<f64>>,
}

impl RawPeakSet {
    /// Empty scan at `timestamp`.
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            peaks_nm: BTreeMap::new(),
        }
    }

    /// Add the peaks of one channel.
    pub fn with_channel(mut self, channel: u32, peaks_nm: Vec<f64>) -> Self {
        self.peaks_nm.insert(channel, peaks_nm);
        self
    }

    /// Peaks of `channel` converted to pm, or `None` if the channel was not reported.
    pub fn peaks_pm(&self, channel: u32) -> Option<Vec<f64>> {
        self.peaks_nm
            .get(&channel)
            .map(|peaks| peaks.iter().map(|wl| wl * PM_PER_NM).collect())
    }
}

/// What the upstream source puts on the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// One scan
    Peaks(RawPeakSet),
    /// The source has stopped; intake terminates
    EndOfStream,
}

/// Raw scans waiting for the averaging task, keyed by timestamp.
#[derive(Debug, Default)]
pub struct AcquisitionBuffer {
    scans: SharedBuffer<BTreeMap<Timestamp, BTreeMap<u32, Vec<f64>>>>,
}

impl AcquisitionBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a scan. A second scan with an already stored timestamp is ignored and
    /// `false` is returned.
    pub fn insert(&self, set: RawPeakSet) -> bool {
        let mut scans = self.scans.claim();
        if scans.contains_key(&set.timestamp) {
            return false;
        }
        scans.insert(set.timestamp, set.peaks_nm);
        true
    }

    /// Take every stored scan, oldest first, leaving the buffer empty.
    pub fn drain(&self) -> Vec<RawPeakSet> {
        let mut scans = self.scans.claim();
        if scans.is_empty() {
            return Vec::new();
        }
        std::mem::take(&mut *scans)
            .into_iter()
            .map(|(timestamp, peaks_nm)| RawPeakSet { timestamp, peaks_nm })
            .collect()
    }

    /// Number of stored scans.
    pub fn len(&self) -> usize {
        self.scans.claim().len()
    }

    /// `true` if no scan is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when no task holds the buffer.
    pub fn is_ready(&self) -> bool {
        self.scans.is_ready()
    }

    /// Wait until a scan arrives or `limit` elapses.
    pub async fn wait_for_data(&self, limit: Duration) {
        self.scans.wait_for_change(limit).await;
    }
}

/// Counters reported when intake finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeSummary {
    /// Scans stored
    pub accepted: u64,
    /// Scans dropped because their timestamp was already stored
    pub duplicates: u64,
}

/// Drain the upstream queue into `buffer` until the end marker arrives.
pub async fn run_intake(
    mut queue: mpsc::Receiver<SourceEvent>,
    buffer: &AcquisitionBuffer,
) -> IntakeSummary {
    let mut summary = IntakeSummary::default();

    while let Some(event) = queue.recv().await {
        match event {
            SourceEvent::Peaks(set) => {
                let timestamp = set.timestamp;
                if buffer.insert(set) {
                    summary.accepted += 1;
                } else {
                    summary.duplicates += 1;
                    debug!(timestamp = timestamp.as_nanos(), "duplicate scan ignored");
                }
            }
            SourceEvent::EndOfStream => {
                info!(accepted = summary.accepted, "peak source signalled end of stream");
                return summary;
            }
        }
    }

    warn!(accepted = summary.accepted, "peak queue closed without end marker");
    summary
}
