//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole service.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the errors that can occur, from configuration loading and inbound device
//! descriptions to archive I/O and subscriber delivery.
//!
//! ## Error Hierarchy
//!
//! `DaqError` is an enum that consolidates the error sources:
//!
//! - **`Config`**: Wraps errors from `figment` when the settings file or environment
//!   overrides cannot be parsed.
//! - **`Configuration`**: Semantic errors in settings or in an inbound instrument
//!   description that pass parsing but are logically incorrect (e.g. a sample rate of 0).
//! - **`InvalidDevice`**: A single device descriptor could not be turned into a device.
//!   These are reported per device and never abort the rest of the device list.
//! - **`Io`**: Wraps `std::io::Error`, covering archive files and sockets.
//! - **`Json`**: Decoding or encoding failures of control-channel messages.
//! - **`WebSocket`**, **`SubscriberBusy`**, **`Delivery`**: control-channel and
//!   subscriber problems. Delivery failures are logged by the publisher and never
//!   block retirement of a block.
//! - **`Source`**: The upstream peak source stopped unexpectedly.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types,
//! simplifying error handling with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type of the service.
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Invalid device: {0}")]
    InvalidDevice(#[from] DeviceConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("A subscriber is already attached")]
    SubscriberBusy,

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Peak source error: {0}")]
    Source(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for DaqError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        DaqError::WebSocket(err.to_string())
    }
}

/// Failure to construct one device from its descriptor.
///
/// Carries enough context (list index, device name, field) for the operator to find
/// the offending entry in the configuration message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceConfigError {
    /// The descriptor is missing a required field or a field has the wrong type.
    #[error("device #{index}: {reason}")]
    Malformed { index: usize, reason: String },

    /// The descriptor decoded, but a value is outside what the physics model accepts.
    #[error("device '{device}': invalid {field}: {reason}")]
    InvalidValue {
        device: String,
        field: &'static str,
        reason: String,
    },
}

impl DeviceConfigError {
    pub(crate) fn invalid(
        device: impl Into<String>,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        DeviceConfigError::InvalidValue {
            device: device.into(),
            field,
            reason: reason.into(),
        }
    }
}
