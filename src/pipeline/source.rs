//! Upstream peak sources.
//!
//! A [`PeakSource`] stands in for the interrogator link: it pushes one
//! [`SourceEvent::Peaks`] per scan into the bounded queue and finishes with
//! [`SourceEvent::EndOfStream`]. When the queue is full the source waits, which is the
//! only backpressure in the pipeline.

use crate::description::Configuration;
use crate::error::{AppResult, DaqError};
use crate::pipeline::acquisition::{RawPeakSet, SourceEvent, Timestamp, PM_PER_NM};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Producer of raw peak sets.
#[async_trait]
pub trait PeakSource: Send {
    /// Push scans into `queue` until the source is exhausted, then send the end marker.
    async fn stream(&mut self, queue: mpsc::Sender<SourceEvent>) -> AppResult<()>;
}

/// Stray reflection present on every channel, nm. Sits outside the default device windows.
const SPURIOUS_PEAK_NM: f64 = 1_440.0;

/// Synthetic interrogator driven by the device forward model.
///
/// Each scan reflects, for every configured device, a slowly drifting temperature and a
/// tension slightly above the ice-free baseline, plus uniform noise on every peak.
#[derive(Debug)]
pub struct SimulatedPeakSource {
    config: Arc<Configuration>,
    noise_pm: f64,
    max_scans: Option<u64>,
    start: Option<Timestamp>,
    paced: bool,
    rng: StdRng,
}

impl SimulatedPeakSource {
    /// Source for `config`, timestamped with the wall clock and paced at the scan rate.
    pub fn new(config: Arc<Configuration>, noise_pm: f64) -> Self {
        Self {
            config,
            noise_pm,
            max_scans: None,
            start: None,
            paced: true,
            rng: StdRng::from_entropy(),
        }
    }

    /// Stop after `max_scans` scans.
    pub fn with_max_scans(mut self, max_scans: Option<u64>) -> Self {
        self.max_scans = max_scans;
        self
    }

    /// Use a synthetic clock starting at `start` instead of the wall clock.
    pub fn with_start(mut self, start: Timestamp) -> Self {
        self.start = Some(start);
        self
    }

    /// Emit scans back to back instead of at the scan rate.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Deterministic noise.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Peak set for scan number `index`.
    pub fn scan(&mut self, index: u64, timestamp: Timestamp) -> RawPeakSet {
        let mut peaks_pm: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        let phase = index as f64 * 0.01;

        for (n, device) in self.config.devices.iter().enumerate() {
            let t = -2.0 + 4.0 * (phase + n as f64).sin();
            let tension = device.expected_tension(t) + 150.0;
            let wls = device.expected_wavelengths(t, tension + 20.0, tension - 20.0);

            let channel = peaks_pm.entry(device.channel()).or_default();
            for wl in [wls.temperature, wls.strain_left, wls.strain_right] {
                let jitter = if self.noise_pm > 0.0 {
                    self.rng.gen_range(-self.noise_pm..=self.noise_pm)
                } else {
                    0.0
                };
                channel.push(wl + jitter);
            }
        }

        let mut set = RawPeakSet::new(timestamp);
        for (channel, mut peaks) in peaks_pm {
            peaks.push(SPURIOUS_PEAK_NM * PM_PER_NM);
            peaks.sort_by(f64::total_cmp);
            set = set.with_channel(channel, peaks.into_iter().map(|pm| pm / PM_PER_NM).collect());
        }
        set
    }

    fn timestamp(&self, index: u64) -> Timestamp {
        match self.start {
            Some(start) => {
                let step =
                    u64::try_from(self.config.scan_interval().as_nanos()).unwrap_or(u64::MAX);
                Timestamp::from_nanos(start.as_nanos().saturating_add(step.saturating_mul(index)))
            }
            None => Timestamp::now(),
        }
    }
}

#[async_trait]
impl PeakSource for SimulatedPeakSource {
    async fn stream(&mut self, queue: mpsc::Sender<SourceEvent>) -> AppResult<()> {
        info!(
            instrument = %self.config.instrument_address,
            scan_rate_hz = self.config.scan_rate_hz,
            "simulated interrogator started"
        );
        let mut ticker = tokio::time::interval(self.config.scan_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut index = 0;
        while self.max_scans.map_or(true, |max| index < max) {
            if self.paced {
                ticker.tick().await;
            }
            let timestamp = self.timestamp(index);
            let set = self.scan(index, timestamp);
            queue
                .send(SourceEvent::Peaks(set))
                .await
                .map_err(|_| DaqError::Source("peak queue closed".to_string()))?;
            index += 1;
        }

        debug!(scans = index, "simulated interrogator finished");
        queue
            .send(SourceEvent::EndOfStream)
            .await
            .map_err(|_| DaqError::Source("peak queue closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::device::tests::{test_device, test_device_with};

    fn configuration() -> Arc<Configuration> {
        Arc::new(Configuration {
            instrument_address: "10.0.0.5".to_string(),
            scan_rate_hz: 10.0,
            sample_rate_hz: 1.0,
            devices: vec![test_device(), test_device_with(|p| p.channel = 2)],
        })
    }

    #[test]
    fn every_device_finds_its_peaks_in_a_simulated_scan() {
        let config = configuration();
        let mut source = SimulatedPeakSource::new(config.clone(), 2.0).with_seed(7);
        let set = source.scan(3, Timestamp::from_nanos(0));

        assert_eq!(set.peaks_nm.len(), 2);
        for device in &config.devices {
            let peaks = set.peaks_pm(device.channel()).unwrap();
            assert_eq!(peaks.len(), 4);
            assert!(peaks.windows(2).all(|w| w[0] <= w[1]));

            let sample = device.measure(&peaks, device.channel()).unwrap();
            assert!(sample.temperature > -7.0 && sample.temperature < 3.0);
        }
    }

    #[tokio::test]
    async fn bounded_run_ends_with_marker() {
        let mut source = SimulatedPeakSource::new(configuration(), 0.0)
            .with_max_scans(Some(3))
            .with_start(Timestamp::from_nanos(1_000_000_000))
            .unpaced();
        let (tx, mut rx) = mpsc::channel(5);

        source.stream(tx).await.unwrap();

        let mut timestamps = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                SourceEvent::Peaks(set) => timestamps.push(set.timestamp.as_nanos()),
                SourceEvent::EndOfStream => break,
            }
        }
        assert_eq!(timestamps, vec![1_000_000_000, 1_100_000_000, 1_200_000_000]);
    }

    #[tokio::test]
    async fn closed_queue_is_a_source_error() {
        let mut source = SimulatedPeakSource::new(configuration(), 0.0).unpaced();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(matches!(source.stream(tx).await, Err(DaqError::Source(_))));
    }
}
