//! # FBG DAQ Core Library
//!
//! Acquisition service for fibre-Bragg-grating line monitors. Raw wavelength peaks from
//! an optical interrogator are matched to the gratings of each ODTiT device, converted
//! to temperature, conductor tension, bending load and ice thickness, averaged into
//! fixed-duration blocks, archived, and forwarded to one subscriber.
//!
//! ## Crate Structure
//!
//! - **`config`**: Service settings loaded with `figment` (TOML file + `FBG_DAQ_*` env).
//! - **`description`**: Inbound instrument description messages and per-device
//!   construction reports.
//! - **`physics`**: Grating and device models, and the peak classifier.
//! - **`pipeline`**: Intake, averaging and publish tasks wired through two shared
//!   buffers, plus the upstream source contract.
//! - **`archive`**: Append-only hourly text files of published blocks.
//! - **`control`**: Websocket control channel with a single-subscriber policy.
//! - **`error`**: The `DaqError` enum and `AppResult` alias.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`validation`**: Small reusable value checks.

pub mod archive;
pub mod config;
pub mod control;
pub mod description;
pub mod error;
pub mod logging;
pub mod physics;
pub mod pipeline;
pub mod validation;
