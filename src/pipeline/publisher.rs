//! Publishing of averaged blocks.
//!
//! The publish task pops the oldest closed bucket, serialises it, appends it to the
//! hourly archive and forwards it to the attached subscriber, if any. Delivery is
//! best effort: a failed ping or send is logged and the bucket is retired anyway.
//!
//! Wire layout of one block:
//!
//! ```text
//! [bucket_start_s, n_0, T_0, F_0, B_0, I_0, n_1, T_1, F_1, B_1, I_1, ...]
//! ```
//!
//! `n` is the number of matched samples for the device, followed by the means of
//! temperature, average tension, bending load and ice thickness. A mean with no valid
//! sample is `NaN` (`null` once encoded as JSON).

use crate::archive::HourlyArchive;
use crate::error::{AppResult, DaqError};
use crate::physics::OutputField;
use crate::pipeline::averager::{AveragedBlock, BlockStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Values per device in a serialised block: sample count plus every output field.
pub const VALUES_PER_DEVICE: usize = 1 + OutputField::COUNT;

/// Flatten a block into its wire layout.
pub fn serialize(block: &AveragedBlock) -> Vec<f64> {
    let mut values = Vec::with_capacity(1 + block.devices.len() * VALUES_PER_DEVICE);
    values.push(block.start.as_secs_f64());
    for device in &block.devices {
        values.push(device.samples() as f64);
        for field in OutputField::ALL {
            values.push(device.field(field).mean().unwrap_or(f64::NAN));
        }
    }
    values
}

/// Downstream consumer of published blocks.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Peer description for logs.
    fn peer(&self) -> String;

    /// Liveness probe sent before every delivery.
    async fn ping(&self) -> AppResult<()>;

    /// Deliver one serialised block.
    async fn deliver(&self, block: &[f64]) -> AppResult<()>;
}

enum SlotState {
    Empty,
    Reserved,
    Attached(Arc<dyn Subscriber>),
}

/// Holds the single permitted subscriber.
///
/// A connection reserves the slot as soon as it is accepted, before any handshake, so
/// that a second concurrent connection is refused without touching the first.
pub struct SubscriberSlot {
    state: Mutex<SlotState>,
}

impl Default for SubscriberSlot {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }
}

impl std::fmt::Debug for SubscriberSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.lock() {
            SlotState::Empty => "empty".to_string(),
            SlotState::Reserved => "reserved".to_string(),
            SlotState::Attached(sub) => format!("attached({})", sub.peer()),
        };
        f.debug_struct("SubscriberSlot").field("state", &state).finish()
    }
}

impl SubscriberSlot {
    /// Empty slot.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reserve the slot. Fails with [`DaqError::SubscriberBusy`] while another
    /// connection holds it.
    pub fn reserve(self: &Arc<Self>) -> AppResult<SlotLease> {
        let mut state = self.state.lock();
        match *state {
            SlotState::Empty => {
                *state = SlotState::Reserved;
                Ok(SlotLease { slot: Arc::clone(self) })
            }
            _ => Err(DaqError::SubscriberBusy),
        }
    }

    /// Currently attached subscriber.
    pub fn current(&self) -> Option<Arc<dyn Subscriber>> {
        match &*self.state.lock() {
            SlotState::Attached(sub) => Some(Arc::clone(sub)),
            _ => None,
        }
    }

    /// `true` when no connection holds the slot.
    pub fn is_free(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Empty)
    }
}

/// Exclusive hold on the [`SubscriberSlot`]; frees the slot when dropped.
pub struct SlotLease {
    slot: Arc<SubscriberSlot>,
}

impl SlotLease {
    /// Attach the subscriber that published blocks go to.
    pub fn attach(&self, subscriber: Arc<dyn Subscriber>) {
        info!(peer = %subscriber.peer(), "subscriber attached");
        *self.slot.state.lock() = SlotState::Attached(subscriber);
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        *self.slot.state.lock() = SlotState::Empty;
    }
}

/// What happened to one published block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Line appended to the archive
    pub archived: bool,
    /// Block accepted by the subscriber
    pub delivered: bool,
}

/// Archive and forward one block. Never fails; problems are logged.
pub async fn publish_block(
    block: &AveragedBlock,
    archive: Option<&HourlyArchive>,
    slot: &SubscriberSlot,
) -> PublishOutcome {
    let values = serialize(block);
    let mut outcome = PublishOutcome::default();

    if let Some(archive) = archive {
        match archive.append(block.start, &values).await {
            Ok(path) => {
                outcome.archived = true;
                debug!(path = %path.display(), "block archived");
            }
            Err(e) => warn!(error = %e, "failed to archive block"),
        }
    }

    if let Some(subscriber) = slot.current() {
        let delivery = async {
            subscriber.ping().await?;
            subscriber.deliver(&values).await
        };
        match delivery.await {
            Ok(()) => outcome.delivered = true,
            Err(e) => warn!(
                peer = %subscriber.peer(),
                bucket = block.start.as_secs_f64(),
                error = %e,
                "block delivery failed"
            ),
        }
    }

    outcome
}

/// Publish task: retire buckets oldest first as soon as they are publishable.
pub async fn run_publisher(
    blocks: &BlockStore,
    archive: Option<&HourlyArchive>,
    slot: &SubscriberSlot,
    poll: Duration,
) {
    loop {
        blocks.wait_for_change(poll).await;
        while let Some(block) = blocks.pop_publishable() {
            publish_block(&block, archive, slot).await;
        }
    }
}
