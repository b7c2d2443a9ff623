//! Sensor and device physics.
//!
//! Turns raw FBG peak wavelengths (picometres) into engineering quantities:
//!
//! - [`sensor`]: one grating. Temperature gratings convert wavelength to °C.
//! - [`device`]: one measurement point (ODTiT) owning a temperature grating and two
//!   strain gratings; computes strain, per-leg tension, bending load and ice thickness.
//! - [`classifier`]: picks out, from every peak seen on a channel, the three peaks that
//!   belong to a given device.
//! - [`window`]: inclusive value windows shared by all of the above.

pub mod classifier;
pub mod device;
pub mod sensor;
pub mod window;

pub use classifier::WavelengthTriple;
pub use device::{Device, MeasurementSample, OutputField, SensorRole, SpanParameters};
pub use sensor::{Grating, StrainSensor, TemperatureSensor};
pub use window::Window;
