//! FBG sensor model.
//!
//! A grating reflects a narrow band around its Bragg wavelength. The wavelength shifts
//! with temperature and strain; the temperature grating (os4100 type) is strain-free and
//! is used both to read the temperature and to compensate the strain gratings (os3110
//! type) for thermal drift.
//!
//! All wavelengths are in picometres, temperatures in °C.

use crate::error::DeviceConfigError;
use crate::physics::window::Window;
use crate::validation;
use std::fmt;

/// Default power window accepted from the interrogator, in instrument units.
pub const DEFAULT_POWER_WINDOW: Window = Window {
    min: 0.0,
    max: 65535.0,
};

/// Default wavelength window of the interrogator, in picometres.
pub const DEFAULT_WAVELENGTH_WINDOW: Window = Window {
    min: 1_420_000.0,
    max: 1_660_000.0,
};

/// Properties common to every grating.
#[derive(Debug, Clone, PartialEq)]
pub struct Grating {
    /// Identifier from the calibration sheet
    pub id: String,
    /// Sensor model, e.g. `os4100`, `os3110`
    pub model: String,
    /// Human readable name
    pub name: String,
    /// Reference temperature, °C
    pub t0: f64,
    /// Reference wavelength at `t0`, pm
    pub wl0: f64,
    /// Accepted reflected power
    pub power_window: Window,
    /// Accepted wavelength range
    pub wavelength_window: Window,
}

impl Grating {
    /// Grating with the default power and wavelength windows.
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        name: impl Into<String>,
        t0: f64,
        wl0: f64,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            name: name.into(),
            t0,
            wl0,
            power_window: DEFAULT_POWER_WINDOW,
            wavelength_window: DEFAULT_WAVELENGTH_WINDOW,
        }
    }

    /// Replace the power window.
    pub fn with_power_window(mut self, min: f64, max: f64) -> Self {
        self.power_window = Window::new(min, max);
        self
    }

    /// `pMin <= power <= pMax`.
    pub fn is_power_ok(&self, power: f64) -> bool {
        self.power_window.contains(power)
    }

    /// Whether `wl` lies inside the instrument wavelength window.
    pub fn is_wavelength_in_range(&self, wl: f64) -> bool {
        self.wavelength_window.contains(wl)
    }

    /// Relative wavelength shift `(wl - wl0) / wl0`.
    pub fn relative_shift(&self, wl: f64) -> f64 {
        (wl - self.wl0) / self.wl0
    }

    fn validate(&self) -> Result<(), DeviceConfigError> {
        validation::is_positive(self.wl0)
            .map_err(|e| DeviceConfigError::invalid(self.label(), "WL0", e))?;
        validation::is_finite(self.t0)
            .map_err(|e| DeviceConfigError::invalid(self.label(), "T0", e))?;
        Ok(())
    }

    fn label(&self) -> String {
        format!("sensor {}", self.name)
    }
}

impl fmt::Display for Grating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sensor {} Name={} ID={} WL0={:.4} T0={:.2}",
            self.model, self.name, self.id, self.wl0, self.t0
        )
    }
}

/// Temperature grating: `T = t0 + (wl - wl0) / (wl0 * st)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureSensor {
    /// Common grating data
    pub grating: Grating,
    st: f64,
}

impl TemperatureSensor {
    /// Build a temperature sensor. A zero (or non-finite) `st` is rejected here so
    /// that [`temperature`](Self::temperature) can never divide by zero.
    pub fn new(grating: Grating, st: f64) -> Result<Self, DeviceConfigError> {
        grating.validate()?;
        validation::is_non_zero(st)
            .map_err(|e| DeviceConfigError::invalid(grating.label(), "ST", e))?;
        Ok(Self { grating, st })
    }

    /// Temperature coefficient, 1/°C.
    pub fn st(&self) -> f64 {
        self.st
    }

    /// Temperature reading for a peak at `wl`.
    pub fn temperature(&self, wl: f64) -> f64 {
        self.grating.t0 + (wl - self.grating.wl0) / (self.grating.wl0 * self.st)
    }

    /// Peak position at temperature `t`; inverse of [`temperature`](Self::temperature).
    pub fn wavelength_at(&self, t: f64) -> f64 {
        self.grating.wl0 * (1.0 + (t - self.grating.t0) * self.st)
    }

    /// Wavelengths the peak can occupy while the temperature stays inside `temperatures`.
    pub fn wavelength_window(&self, temperatures: Window) -> Window {
        Window::new(
            self.wavelength_at(temperatures.min),
            self.wavelength_at(temperatures.max),
        )
    }
}

/// Strain grating bonded to the device body.
#[derive(Debug, Clone, PartialEq)]
pub struct StrainSensor {
    /// Common grating data
    pub grating: Grating,
    fg: f64,
    ctet: f64,
}

impl StrainSensor {
    /// Build a strain sensor. The gauge factor divides the measured shift, so it must
    /// not be zero.
    pub fn new(grating: Grating, fg: f64, ctet: f64) -> Result<Self, DeviceConfigError> {
        grating.validate()?;
        validation::is_non_zero(fg)
            .map_err(|e| DeviceConfigError::invalid(grating.label(), "FG", e))?;
        validation::is_finite(ctet)
            .map_err(|e| DeviceConfigError::invalid(grating.label(), "CTET", e))?;
        Ok(Self { grating, fg, ctet })
    }

    /// Gauge factor.
    pub fn fg(&self) -> f64 {
        self.fg
    }

    /// Thermal expansion coefficient of the grating substrate, 1e-6/°C.
    pub fn ctet(&self) -> f64 {
        self.ctet
    }
}
