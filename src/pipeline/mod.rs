//! Acquisition → averaging → publish pipeline.
//!
//! ```text
//!  PeakSource ──mpsc(5)──> intake ──> AcquisitionBuffer ──> averager ──> BlockStore
//!      ^                                                                     │
//!      │                                                  archive <── publisher ──> subscriber
//!      └── supervisor (restarts the source for every new Configuration)
//! ```
//!
//! All tasks share one [`PipelineContext`] passed explicitly at spawn time. The active
//! [`Configuration`] is distributed through a `watch` channel; replacing it resets the
//! raw and averaged buffers, since the device list (and thus the block layout) may
//! have changed.

pub mod acquisition;
pub mod averager;
pub mod publisher;
pub mod shared;
pub mod source;

pub use crate::description::Configuration;

use crate::archive::HourlyArchive;
use crate::config::{PipelineConfig, Settings, SourceConfig};
use acquisition::{run_intake, AcquisitionBuffer, SourceEvent};
use averager::{run_averager, BlockStore};
use publisher::{run_publisher, SubscriberSlot};
use source::{PeakSource, SimulatedPeakSource};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Builds the upstream source for a configuration.
pub type SourceFactory = Arc<dyn Fn(Arc<Configuration>) -> Box<dyn PeakSource> + Send + Sync>;

/// State shared by every pipeline task.
#[derive(Debug)]
pub struct PipelineContext {
    /// Tuning knobs
    pub settings: PipelineConfig,
    /// Raw scans awaiting averaging
    pub acquisition: AcquisitionBuffer,
    /// Averaged buckets awaiting publication
    pub blocks: BlockStore,
    /// The single downstream subscriber
    pub subscribers: Arc<SubscriberSlot>,
    /// Flat-file sink, if enabled
    pub archive: Option<HourlyArchive>,
    configuration: watch::Sender<Option<Arc<Configuration>>>,
}

impl PipelineContext {
    /// Context built from the service settings.
    pub fn new(settings: &Settings) -> Arc<Self> {
        let archive = settings
            .archive
            .enabled
            .then(|| HourlyArchive::new(&settings.archive.output_dir));
        Self::with_archive(settings.pipeline.clone(), archive)
    }

    /// Context with an explicit archive choice.
    pub fn with_archive(settings: PipelineConfig, archive: Option<HourlyArchive>) -> Arc<Self> {
        let (configuration, _) = watch::channel(None);
        Arc::new(Self {
            settings,
            acquisition: AcquisitionBuffer::new(),
            blocks: BlockStore::new(),
            subscribers: SubscriberSlot::new(),
            archive,
            configuration,
        })
    }

    /// Replace the active configuration.
    pub fn apply_configuration(&self, configuration: Configuration) {
        info!(
            instrument = %configuration.instrument_address,
            devices = configuration.devices.len(),
            sample_rate_hz = configuration.sample_rate_hz,
            "applying configuration"
        );
        for device in &configuration.devices {
            info!(channel = device.channel(), "{device}");
        }

        self.acquisition.drain();
        self.blocks.clear();
        self.configuration.send_replace(Some(Arc::new(configuration)));
    }

    /// Active configuration, if one was received.
    pub fn configuration(&self) -> Option<Arc<Configuration>> {
        self.configuration.borrow().clone()
    }

    /// Receiver notified on every configuration change.
    pub fn watch_configuration(&self) -> watch::Receiver<Option<Arc<Configuration>>> {
        self.configuration.subscribe()
    }
}

/// Factory launching the built-in simulated interrogator.
pub fn simulated_source_factory(settings: &SourceConfig) -> SourceFactory {
    let noise_pm = settings.noise_pm;
    let max_scans = settings.max_scans;
    Arc::new(move |config: Arc<Configuration>| -> Box<dyn PeakSource> {
        Box::new(SimulatedPeakSource::new(config, noise_pm).with_max_scans(max_scans))
    })
}

/// Running pipeline tasks.
#[derive(Debug)]
pub struct Pipeline {
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the averaging, publish and source supervision tasks on the current runtime.
    pub fn spawn(ctx: Arc<PipelineContext>, sources: SourceFactory) -> Self {
        let averager = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                let config = ctx.watch_configuration();
                run_averager(&ctx.acquisition, &ctx.blocks, config, ctx.settings.pause()).await;
            })
        };

        let publisher = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                run_publisher(
                    &ctx.blocks,
                    ctx.archive.as_ref(),
                    &ctx.subscribers,
                    ctx.settings.publish_poll(),
                )
                .await;
            })
        };

        let supervisor = tokio::spawn(supervise_source(ctx, sources));

        Self {
            tasks: vec![averager, publisher, supervisor],
        }
    }

    /// Abort every task.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Keep exactly one source running for the active configuration.
async fn supervise_source(ctx: Arc<PipelineContext>, sources: SourceFactory) {
    let mut changes = ctx.watch_configuration();
    let mut running: Option<JoinHandle<()>> = None;

    loop {
        let config = changes.borrow_and_update().clone();
        if let Some(previous) = running.take() {
            previous.abort();
            info!("previous peak source stopped");
        }

        if let Some(config) = config {
            let (queue_tx, queue_rx) = mpsc::channel(ctx.settings.queue_capacity);
            let source = sources(Arc::clone(&config));
            running = Some(tokio::spawn(run_source(Arc::clone(&ctx), source, queue_tx, queue_rx)));
        }

        if changes.changed().await.is_err() {
            warn!("configuration channel closed, source supervision stops");
            return;
        }
    }
}

async fn run_source(
    ctx: Arc<PipelineContext>,
    mut source: Box<dyn PeakSource>,
    queue_tx: mpsc::Sender<SourceEvent>,
    queue_rx: mpsc::Receiver<SourceEvent>,
) {
    let produce = async move {
        if let Err(e) = source.stream(queue_tx).await {
            error!(error = %e, "peak source failed");
        }
    };
    let (summary, ()) = tokio::join!(run_intake(queue_rx, &ctx.acquisition), produce);
    info!(
        accepted = summary.accepted,
        duplicates = summary.duplicates,
        "intake finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::device::tests::test_device;
    use acquisition::{RawPeakSet, Timestamp};

    fn configuration() -> Configuration {
        Configuration {
            instrument_address: "10.0.0.5".to_string(),
            scan_rate_hz: 10.0,
            sample_rate_hz: 1.0,
            devices: vec![test_device()],
        }
    }

    #[test]
    fn applying_configuration_resets_buffers() {
        let ctx = PipelineContext::with_archive(PipelineConfig::default(), None);
        assert!(ctx.configuration().is_none());

        ctx.acquisition.insert(RawPeakSet::new(Timestamp::from_nanos(1)));
        ctx.blocks.record(Timestamp::from_nanos(0), 1, 0, None);

        let mut changes = ctx.watch_configuration();
        ctx.apply_configuration(configuration());

        assert!(ctx.acquisition.is_empty());
        assert!(ctx.blocks.pending().is_empty());
        assert!(changes.has_changed().unwrap());
        assert_eq!(ctx.configuration().unwrap().devices.len(), 1);
    }

    #[test]
    fn archive_follows_settings() {
        let mut settings = Settings::default();
        settings.archive.enabled = false;
        assert!(PipelineContext::new(&settings).archive.is_none());

        settings.archive.enabled = true;
        settings.archive.output_dir = "blocks".into();
        let ctx = PipelineContext::new(&settings);
        assert_eq!(ctx.archive.as_ref().unwrap().dir(), std::path::Path::new("blocks"));
    }
}
