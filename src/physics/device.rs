//! ODTiT measurement device.
//!
//! One device sits on one span and carries three gratings: a temperature grating and two
//! strain gratings on opposite sides of the device body ("left" and "right"). The mean
//! of the two strains gives the conductor tension, their difference the transverse
//! bending load. Tension above the ice-free baseline for the current temperature is
//! attributed to ice accretion.
//!
//! Units: wavelengths in pm, temperature in °C, strain in µε, modulus in Pa, body
//! cross-section in mm, tension window in daN, computed forces in N.

use crate::error::DeviceConfigError;
use crate::physics::classifier::WavelengthTriple;
use crate::physics::sensor::{Grating, StrainSensor, TemperatureSensor};
use crate::physics::window::Window;
use crate::validation;
use std::fmt;

/// Refractive index of the fibre core.
pub const FIBER_REFRACTIVE_INDEX: f64 = 1.4682;

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Ice can only form strictly between these temperatures, °C.
pub const ICE_FORMING_TEMPERATURES: (f64, f64) = (-10.0, 5.0);

/// Index of a grating inside a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorRole {
    /// os4100 temperature grating
    Temperature,
    /// First os3110 strain grating
    StrainLeft,
    /// Second os3110 strain grating
    StrainRight,
}

impl SensorRole {
    /// All roles in descriptor order.
    pub const ALL: [SensorRole; 3] = [
        SensorRole::Temperature,
        SensorRole::StrainLeft,
        SensorRole::StrainRight,
    ];
}

/// Quantities published for every device, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputField {
    /// Temperature, °C
    Temperature,
    /// Mean of the two leg tensions, N
    AverageTension,
    /// Transverse load, from the strain difference
    BendingLoad,
    /// Radial ice thickness, mm
    IceThickness,
}

impl OutputField {
    /// Field order of the published block. Part of the wire contract.
    pub const ALL: [OutputField; 4] = [
        OutputField::Temperature,
        OutputField::AverageTension,
        OutputField::BendingLoad,
        OutputField::IceThickness,
    ];

    /// Number of published fields per device.
    pub const COUNT: usize = Self::ALL.len();

    /// Position in [`ALL`](Self::ALL).
    pub fn index(self) -> usize {
        match self {
            OutputField::Temperature => 0,
            OutputField::AverageTension => 1,
            OutputField::BendingLoad => 2,
            OutputField::IceThickness => 3,
        }
    }
}

/// Span the device is mounted on. Informational; not used by the strain model.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpanParameters {
    /// Span length, m
    pub length: f64,
    /// Conductor diameter, m
    pub rope_diameter: f64,
    /// Linear density, kg/m
    pub rope_density: f64,
    /// Bending stiffness (modulus times moment of inertia)
    pub rope_ej: f64,
}

/// Scalar calibration of a device body, as read from a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParameters {
    /// Device identifier
    pub id: String,
    /// Device name, used in logs
    pub name: String,
    /// Interrogator channel (1-based)
    pub channel: u32,
    /// Young's modulus of the body, Pa
    pub e: f64,
    /// Thermal expansion coefficient of the body, 1e-6/°C
    pub ctes: f64,
    /// Working cross-section (width, height), mm
    pub size: (f64, f64),
    /// Sensitivity to transverse load, µε/daN
    pub bend_sensitivity: f64,
    /// Expected tension range, daN
    pub tension_window: Window,
    /// Margin added to both sides of the tension range when matching peaks, daN
    pub tension_reserve: f64,
    /// Operating temperature range, °C
    pub temperature_window: Window,
    /// Ice-free tension polynomial `(f0, f1, f2)`, daN
    pub tension_model: (f64, f64, f64),
    /// Ice polynomial `(i1, i2)`
    pub ice_model: (f64, f64),
    /// Round trip delay from the interrogator to the device, ns
    pub time_of_flight_ns: i64,
    /// Span description
    pub span: SpanParameters,
}

/// Physical result for one device at one raw timestamp.
///
/// Only exists when all three peaks were identified; an unmatched device yields no
/// sample at all rather than a sample computed from placeholder wavelengths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementSample {
    /// Temperature, °C
    pub temperature: f64,
    /// Left strain, µε
    pub strain_left: f64,
    /// Right strain, µε
    pub strain_right: f64,
    /// Left leg tension, N
    pub tension_left: f64,
    /// Right leg tension, N
    pub tension_right: f64,
    /// Mean tension, N
    pub average_tension: f64,
    /// Transverse load
    pub bending_load: f64,
    /// Ice thickness, mm; `None` when the ice polynomial has no admissible root
    pub ice_thickness: Option<f64>,
}

impl MeasurementSample {
    /// Value of a published field, if available.
    pub fn field(&self, field: OutputField) -> Option<f64> {
        match field {
            OutputField::Temperature => Some(self.temperature),
            OutputField::AverageTension => Some(self.average_tension),
            OutputField::BendingLoad => Some(self.bending_load),
            OutputField::IceThickness => self.ice_thickness,
        }
    }
}

/// One ODTiT device. Immutable after construction; a reconfiguration replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    params: DeviceParameters,
    temperature: TemperatureSensor,
    strain_left: StrainSensor,
    strain_right: StrainSensor,
}

impl Device {
    /// Validate the calibration and assemble the device.
    pub fn new(
        params: DeviceParameters,
        temperature: TemperatureSensor,
        strain_left: StrainSensor,
        strain_right: StrainSensor,
    ) -> Result<Self, DeviceConfigError> {
        let name = params.name.as_str();
        let check = |field: &'static str, result: Result<(), &'static str>| {
            result.map_err(|e| DeviceConfigError::invalid(name, field, e))
        };

        if params.channel == 0 {
            return Err(DeviceConfigError::invalid(
                name,
                "x55_channel",
                "channels are numbered from 1",
            ));
        }
        check("E", validation::is_positive(params.e))?;
        check("CTES", validation::is_finite(params.ctes))?;
        check("Asize", validation::is_positive(params.size.0))?;
        check("Bsize", validation::is_positive(params.size.1))?;
        check("Bending_sensivity", validation::is_non_zero(params.bend_sensitivity))?;
        check("Fmin", validation::is_finite(params.tension_window.min))?;
        check("Fmax", validation::is_finite(params.tension_window.max))?;
        check("Freserve", validation::is_non_negative(params.tension_reserve))?;
        check("Tmin", validation::is_finite(params.temperature_window.min))?;
        check("Tmax", validation::is_finite(params.temperature_window.max))?;
        let (f0, f1, f2) = params.tension_model;
        check("Fmodel", validation::is_finite(f0 + f1 + f2))?;
        check("Icemodel", validation::is_finite(params.ice_model.0 + params.ice_model.1))?;

        Ok(Self {
            params,
            temperature,
            strain_left,
            strain_right,
        })
    }

    /// Round trip delay for a device `distance_m` metres of fibre away, ns.
    ///
    /// Negative, as it is applied as a backwards shift of the peak timestamp.
    pub fn propagation_delay_ns(distance_m: f64) -> i64 {
        (-2e9 * distance_m * FIBER_REFRACTIVE_INDEX / SPEED_OF_LIGHT) as i64
    }

    /// Device identifier.
    pub fn id(&self) -> &str {
        &self.params.id
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.params.name
    }

    /// Interrogator channel this device is wired to.
    pub fn channel(&self) -> u32 {
        self.params.channel
    }

    /// Full calibration.
    pub fn parameters(&self) -> &DeviceParameters {
        &self.params
    }

    /// Temperature grating.
    pub fn temperature_sensor(&self) -> &TemperatureSensor {
        &self.temperature
    }

    /// Strain grating for [`SensorRole::StrainLeft`] or [`SensorRole::StrainRight`].
    pub fn strain_sensor(&self, role: SensorRole) -> Option<&StrainSensor> {
        match role {
            SensorRole::Temperature => None,
            SensorRole::StrainLeft => Some(&self.strain_left),
            SensorRole::StrainRight => Some(&self.strain_right),
        }
    }

    /// Common grating data for any role.
    pub fn grating(&self, role: SensorRole) -> &Grating {
        match role {
            SensorRole::Temperature => &self.temperature.grating,
            SensorRole::StrainLeft => &self.strain_left.grating,
            SensorRole::StrainRight => &self.strain_right.grating,
        }
    }

    /// Temperature from the temperature grating peak.
    pub fn temperature(&self, wl_temperature: f64) -> f64 {
        self.temperature.temperature(wl_temperature)
    }

    /// `E * width * height`, Pa·mm².
    pub(crate) fn stiffness(&self) -> f64 {
        self.params.e * self.params.size.0 * self.params.size.1
    }

    /// Thermally compensated strain of one strain grating, µε.
    fn strain(&self, sensor: &StrainSensor, wl_strain: f64, wl_temperature: f64, t: f64) -> f64 {
        1e6 * (sensor.grating.relative_shift(wl_strain)
            - self.temperature.grating.relative_shift(wl_temperature))
            / sensor.fg()
            + (t - self.temperature.grating.t0) * (sensor.ctet() - self.params.ctes)
    }

    /// Ice-free tension predicted for temperature `t`, N.
    pub fn expected_tension(&self, t: f64) -> f64 {
        let (f0, f1, f2) = self.params.tension_model;
        10.0 * (f0 + f1 * t + f2 * t * t)
    }

    /// Ice thickness explaining `tension_excess` at temperature `t`.
    ///
    /// Solves `i2·x² + i1·x = excess / 10` for the admissible root. Zero outside the
    /// ice-forming band, `None` if the polynomial has no real positive-discriminant root.
    pub fn ice_thickness(&self, tension_excess: f64, t: f64) -> Option<f64> {
        let (low, high) = ICE_FORMING_TEMPERATURES;
        if !(low < t && t < high) {
            return Some(0.0);
        }

        let (i1, i2) = self.params.ice_model;
        if i2 == 0.0 {
            return None;
        }
        let discriminant = 4.0 * i2 * tension_excess / 10.0 + i1 * i1;
        if discriminant > 0.0 {
            Some((discriminant.sqrt() - i1) / (2.0 * i2))
        } else {
            None
        }
    }

    /// Convert an identified wavelength triple into engineering units.
    pub fn compute_tension_and_ice(&self, wls: &WavelengthTriple) -> MeasurementSample {
        let t = self.temperature(wls.temperature);

        let strain_left = self.strain(&self.strain_left, wls.strain_left, wls.temperature, t);
        let strain_right = self.strain(&self.strain_right, wls.strain_right, wls.temperature, t);

        let stiffness = self.stiffness();
        let tension_left = strain_left * stiffness / 1e12;
        let tension_right = strain_right * stiffness / 1e12;
        let average_tension = (tension_left + tension_right) / 2.0;

        let tension_excess = average_tension - self.expected_tension(t);

        MeasurementSample {
            temperature: t,
            strain_left,
            strain_right,
            tension_left,
            tension_right,
            average_tension,
            bending_load: (strain_left - strain_right) / (2.0 * self.params.bend_sensitivity),
            ice_thickness: self.ice_thickness(tension_excess, t),
        }
    }

    /// Classify `peaks` and, if all three gratings were found, compute the sample.
    pub fn measure(&self, peaks: &[f64], channel: u32) -> Option<MeasurementSample> {
        self.find_own_wavelengths(peaks, channel)
            .map(|wls| self.compute_tension_and_ice(&wls))
    }

    /// Forward model: the peaks this device reflects at temperature `t` with leg
    /// tensions `tension_left` and `tension_right` (N).
    pub fn expected_wavelengths(
        &self,
        t: f64,
        tension_left: f64,
        tension_right: f64,
    ) -> WavelengthTriple {
        let wl_temperature = self.temperature.wavelength_at(t);
        let thermal_shift = self.temperature.grating.relative_shift(wl_temperature);
        let stiffness = self.stiffness();

        let leg = |sensor: &StrainSensor, tension: f64| {
            let strain = tension * 1e12 / stiffness;
            let mechanical =
                strain - (t - self.temperature.grating.t0) * (sensor.ctet() - self.params.ctes);
            sensor.grating.wl0 * (1.0 + mechanical * sensor.fg() / 1e6 + thermal_shift)
        };

        WavelengthTriple {
            temperature: wl_temperature,
            strain_left: leg(&self.strain_left, tension_left),
            strain_right: leg(&self.strain_right, tension_right),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ODTiT device: {}\t{}\t{}\t{}",
            self.params.name,
            self.strain_left.grating,
            self.strain_right.grating,
            self.temperature.grating
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Aluminium body 10 x 5 mm, gratings at 1530/1550/1570 nm, all referenced to 20 °C.
    pub(crate) fn test_device() -> Device {
        test_device_with(|_| {})
    }

    fn test_temperature_sensor() -> TemperatureSensor {
        let grating = Grating::new("10", "os4100", "T", 20.0, 1_530_000.0);
        TemperatureSensor::new(grating, 1.8775e-5).unwrap()
    }

    fn test_strain_sensor(id: &str, name: &str, wl0: f64, ctet: f64) -> StrainSensor {
        StrainSensor::new(Grating::new(id, "os3110", name, 20.0, wl0), 0.89, ctet).unwrap()
    }

    pub(crate) fn test_device_with(adjust: impl FnOnce(&mut DeviceParameters)) -> Device {
        let mut params = DeviceParameters {
            id: "1".to_string(),
            name: "span-1".to_string(),
            channel: 1,
            e: 7.0e10,
            ctes: 23.0,
            size: (10.0, 5.0),
            bend_sensitivity: 0.01,
            tension_window: Window::new(0.0, 400.0),
            tension_reserve: 1000.0,
            temperature_window: Window::new(-60.0, 60.0),
            tension_model: (100.0, -1.5, 0.01),
            ice_model: (2.0, 0.5),
            time_of_flight_ns: 0,
            span: SpanParameters::default(),
        };
        adjust(&mut params);

        let temperature = test_temperature_sensor();
        let left = test_strain_sensor("11", "L", 1_550_000.0, 23.0);
        let right = test_strain_sensor("12", "R", 1_570_000.0, 23.0);
        Device::new(params, temperature, left, right).unwrap()
    }

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn forward_model_round_trips() {
        let device = test_device();
        let wls = device.expected_wavelengths(-3.0, 2500.0, 2100.0);
        let sample = device.compute_tension_and_ice(&wls);

        assert!(close(sample.temperature, -3.0, 1e-6));
        assert!(close(sample.tension_left, 2500.0, 1e-3));
        assert!(close(sample.tension_right, 2100.0, 1e-3));
        assert!(close(sample.average_tension, 2300.0, 1e-3));
    }

    #[test]
    fn equal_strains_have_no_bending() {
        let device = test_device();
        let wls = device.expected_wavelengths(15.0, 1800.0, 1800.0);
        let sample = device.compute_tension_and_ice(&wls);
        assert!(close(sample.strain_left, sample.strain_right, 1e-6));
        assert!(close(sample.bending_load, 0.0, 1e-4));
    }

    #[test]
    fn bending_is_half_strain_difference_over_sensitivity() {
        let device = test_device();
        let wls = device.expected_wavelengths(10.0, 2000.0, 1000.0);
        let sample = device.compute_tension_and_ice(&wls);
        let expected = (sample.strain_left - sample.strain_right) / (2.0 * 0.01);
        assert!(close(sample.bending_load, expected, 1e-9));
        assert!(sample.bending_load > 0.0);
    }

    #[test]
    fn ice_is_zero_outside_forming_band() {
        let device = test_device();
        for t in [-10.0, 5.0, -25.0, 30.0] {
            assert_eq!(device.ice_thickness(5000.0, t), Some(0.0), "t = {t}");
            assert_eq!(device.ice_thickness(-5000.0, t), Some(0.0), "t = {t}");
        }
    }

    #[test]
    fn ice_solves_the_quadratic_inside_band() {
        let device = test_device();
        // i2 = 0.5, i1 = 2: 0.5 x² + 2 x = 100 / 10 -> x = 2.8990
        let x = device.ice_thickness(100.0, 0.0).unwrap();
        assert!(close(0.5 * x * x + 2.0 * x, 10.0, 1e-9));
        assert!(x > 0.0);
    }

    #[test]
    fn ice_unavailable_for_negative_discriminant_or_zero_i2() {
        let device = test_device();
        // 4 * 0.5 * excess / 10 + 4 <= 0 for excess <= -20
        assert_eq!(device.ice_thickness(-50.0, 0.0), None);

        let flat = test_device_with(|p| p.ice_model = (2.0, 0.0));
        assert_eq!(flat.ice_thickness(100.0, 0.0), None);
        assert_eq!(flat.ice_thickness(100.0, 20.0), Some(0.0));
    }

    #[test]
    fn expected_tension_polynomial() {
        let device = test_device();
        assert!(close(device.expected_tension(0.0), 1000.0, 1e-9));
        assert!(close(device.expected_tension(10.0), 10.0 * (100.0 - 15.0 + 1.0), 1e-9));
    }

    #[test]
    fn invalid_calibration_is_rejected() {
        let temperature = test_temperature_sensor();
        let left = test_strain_sensor("11", "L", 1_550_000.0, 0.0);
        let right = left.clone();
        let mut params = test_device().parameters().clone();
        params.bend_sensitivity = 0.0;

        let err = Device::new(params.clone(), temperature.clone(), left.clone(), right.clone())
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceConfigError::InvalidValue {
                field: "Bending_sensivity",
                ..
            }
        ));

        params.bend_sensitivity = 0.01;
        params.channel = 0;
        assert!(Device::new(params, temperature, left, right).is_err());
    }

    #[test]
    fn propagation_delay_matches_fibre_length() {
        // 1 km of fibre: 2 * 1000 * 1.4682 / c = 9794.78 ns
        assert_eq!(Device::propagation_delay_ns(1000.0), -9794);
        assert_eq!(Device::propagation_delay_ns(0.0), 0);
    }

    #[test]
    fn display_lists_strain_then_temperature_gratings() {
        let text = test_device().to_string();
        assert!(text.starts_with("ODTiT device: span-1\tSensor os3110 Name=L"));
        assert!(text.ends_with("Name=T ID=10 WL0=1530000.0000 T0=20.00"));
    }

    #[test]
    fn sample_fields_follow_output_order() {
        let device = test_device();
        let wls = device.expected_wavelengths(0.0, 1500.0, 1500.0);
        let sample = device.compute_tension_and_ice(&wls);
        let values: Vec<Option<f64>> = OutputField::ALL.iter().map(|f| sample.field(*f)).collect();
        assert_eq!(values[0], Some(sample.temperature));
        assert_eq!(values[1], Some(sample.average_tension));
        assert_eq!(values[2], Some(sample.bending_load));
        assert_eq!(values[3], sample.ice_thickness);
        for (i, field) in OutputField::ALL.iter().enumerate() {
            assert_eq!(field.index(), i);
        }
    }
}
