//! Peak classification.
//!
//! An interrogator channel carries the peaks of every grating spliced onto that fibre.
//! A device finds its own peaks by position alone:
//!
//! 1. The temperature grating must sit inside the window spanned by the device's
//!    operating temperature range. The first peak inside that window wins.
//! 2. Knowing the temperature, each strain grating must sit inside the window spanned
//!    by the device's tension range (widened by the reserve). Both strain windows are
//!    scanned independently, in input order, and the first peak inside each wins.
//!
//! The first-in-window rule does not disambiguate between several peaks in the same
//! window. Callers relying on the result must make sure gratings on one fibre are spaced
//! further apart than their working ranges.

use crate::physics::device::{Device, SensorRole};
use crate::physics::window::Window;

/// The three peaks belonging to one device, in pm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavelengthTriple {
    /// Temperature grating peak
    pub temperature: f64,
    /// Left strain grating peak
    pub strain_left: f64,
    /// Right strain grating peak
    pub strain_right: f64,
}

impl Device {
    /// Wavelengths the temperature grating can occupy over the operating temperature range.
    pub fn temperature_wavelength_window(&self) -> Window {
        self.temperature_sensor()
            .wavelength_window(self.parameters().temperature_window)
    }

    /// Wavelengths a strain grating can occupy at temperature `t` over the widened
    /// tension range. `None` for [`SensorRole::Temperature`].
    pub fn strain_wavelength_window(&self, role: SensorRole, t: f64) -> Option<Window> {
        let sensor = self.strain_sensor(role)?;
        let params = self.parameters();
        let temperature = self.temperature_sensor();
        let tensions = params.tension_window.widened(params.tension_reserve);

        let area_stiffness = self.stiffness() * 1e-6;
        let thermal = (t - sensor.grating.t0) * (sensor.ctet() - params.ctes) / 1e6;
        let drift = (t - temperature.grating.t0) * temperature.st();
        let wavelength = |tension_dan: f64| {
            sensor.grating.wl0
                * (1.0 + (tension_dan * 10.0 / area_stiffness - thermal) * sensor.fg() + drift)
        };

        Some(Window::new(wavelength(tensions.min), wavelength(tensions.max)))
    }

    /// Pick this device's three peaks out of everything seen on `channel`.
    ///
    /// Returns `None` when the channel is not this device's channel or when any of the
    /// three gratings has no peak inside its window. That is a normal outcome for a
    /// sparse or partially occluded spectrum, not an error.
    pub fn find_own_wavelengths(&self, peaks: &[f64], channel: u32) -> Option<WavelengthTriple> {
        if channel != self.channel() {
            return None;
        }

        let temperature_window = self.temperature_wavelength_window();
        let wl_temperature = peaks.iter().copied().find(|wl| temperature_window.contains(*wl))?;
        let t = self.temperature(wl_temperature);

        let first_in = |role: SensorRole| {
            let window = self.strain_wavelength_window(role, t)?;
            peaks.iter().copied().find(|wl| window.contains(*wl))
        };
        let strain_left = first_in(SensorRole::StrainLeft);
        let strain_right = first_in(SensorRole::StrainRight);

        match (strain_left, strain_right) {
            (Some(strain_left), Some(strain_right)) => Some(WavelengthTriple {
                temperature: wl_temperature,
                strain_left,
                strain_right,
            }),
            _ => {
                tracing::trace!(
                    device = self.name(),
                    left = strain_left.is_some(),
                    right = strain_right.is_some(),
                    "strain peaks not found"
                );
                None
            }
        }
    }
}
