//! Inbound instrument description.
//!
//! The control channel delivers one JSON message describing the interrogator and every
//! device spliced onto it. Decoding happens in two stages so that one bad device never
//! discards the others:
//!
//! 1. The envelope (`IP_address`, `LaserScanSpeed`, `SampleRate`, `devices`) is decoded
//!    and validated. A failure here refuses the whole message.
//! 2. Each entry of `devices` is decoded and validated on its own. Failures are
//!    collected as [`DeviceConfigError`]s next to the devices that did build.
//!
//! Messages written with single quotes are accepted; quotes are normalised first.
//!
//! # Example
//! ```
//! use fbg_daq::description::InstrumentDescription;
//!
//! let msg = r#"{'IP_address': '10.0.0.5', 'LaserScanSpeed': 10, 'SampleRate': 1, 'devices': []}"#;
//! let report = InstrumentDescription::decode(msg)?.into_configuration()?;
//! assert_eq!(report.configuration.instrument_address, "10.0.0.5");
//! assert!(report.rejected.is_empty());
//! # Ok::<(), fbg_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError, DeviceConfigError};
use crate::physics::device::{Device, DeviceParameters, SpanParameters};
use crate::physics::sensor::{Grating, StrainSensor, TemperatureSensor};
use crate::physics::window::Window;
use crate::validation;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;

/// Interrogator address as sent: either one string or a list whose first entry is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AddressField {
    /// Single address
    One(String),
    /// Several addresses; the first one is used
    Many(Vec<String>),
}

impl AddressField {
    fn primary(&self) -> Option<&str> {
        match self {
            AddressField::One(addr) => Some(addr.as_str()),
            AddressField::Many(addrs) => addrs.first().map(String::as_str),
        }
    }
}

/// Decoded message envelope.
///
/// Device entries stay raw until [`into_configuration`](Self::into_configuration).
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentDescription {
    /// Interrogator address
    #[serde(rename = "IP_address")]
    pub ip_address: AddressField,
    /// Laser scan rate, Hz
    #[serde(rename = "LaserScanSpeed")]
    pub laser_scan_speed: f64,
    /// Averaged block rate, Hz
    #[serde(rename = "SampleRate")]
    pub sample_rate: f64,
    /// Raw device descriptors
    pub devices: Vec<Value>,
}

/// Temperature grating as described in the message (`Sensor4100`).
#[derive(Debug, Clone, Deserialize)]
pub struct TemperatureSensorDescriptor {
    #[serde(rename = "ID", deserialize_with = "identifier")]
    id: String,
    #[serde(rename = "type")]
    model: String,
    name: String,
    #[serde(rename = "WL0")]
    wl0: f64,
    #[serde(rename = "T0")]
    t0: f64,
    #[serde(rename = "Pmin")]
    p_min: f64,
    #[serde(rename = "Pmax")]
    p_max: f64,
    #[serde(rename = "ST")]
    st: f64,
}

/// Strain grating as described in the message (`Sensor3110_1`, `Sensor3110_2`).
#[derive(Debug, Clone, Deserialize)]
pub struct StrainSensorDescriptor {
    #[serde(rename = "ID", deserialize_with = "identifier")]
    id: String,
    #[serde(rename = "type")]
    model: String,
    name: String,
    #[serde(rename = "WL0")]
    wl0: f64,
    #[serde(rename = "T0")]
    t0: f64,
    #[serde(rename = "Pmin")]
    p_min: f64,
    #[serde(rename = "Pmax")]
    p_max: f64,
    #[serde(rename = "FG")]
    fg: f64,
    #[serde(rename = "CTET")]
    ctet: f64,
}

/// One device entry of the message.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDescriptor {
    #[serde(rename = "ID", deserialize_with = "identifier")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "x55_channel")]
    channel: u32,
    #[serde(rename = "CTES")]
    ctes: f64,
    #[serde(rename = "E")]
    e: f64,
    #[serde(rename = "Asize")]
    a_size: f64,
    #[serde(rename = "Bsize")]
    b_size: f64,
    #[serde(rename = "Tmin")]
    t_min: f64,
    #[serde(rename = "Tmax")]
    t_max: f64,
    #[serde(rename = "Fmin")]
    f_min: f64,
    #[serde(rename = "Fmax")]
    f_max: f64,
    #[serde(rename = "Freserve")]
    f_reserve: f64,
    #[serde(rename = "Bending_sensivity")]
    bending_sensitivity: f64,
    #[serde(rename = "Distance")]
    distance: f64,
    #[serde(rename = "SpanRopeDiametr", default)]
    span_rope_diameter: f64,
    #[serde(rename = "SpanRopeLen", default)]
    span_length: f64,
    #[serde(rename = "SpanRopeDensity", default)]
    span_rope_density: f64,
    #[serde(rename = "SpanRopeEJ", default)]
    span_rope_ej: f64,
    #[serde(rename = "Fmodel_f0", default)]
    fmodel_f0: f64,
    #[serde(rename = "Fmodel_f1", default)]
    fmodel_f1: f64,
    #[serde(rename = "Fmodel_f2", default)]
    fmodel_f2: f64,
    #[serde(rename = "Icemodel_i1", default)]
    icemodel_i1: f64,
    #[serde(rename = "Icemodel_i2", default)]
    icemodel_i2: f64,
    #[serde(rename = "Sensor4100")]
    temperature_sensor: TemperatureSensorDescriptor,
    #[serde(rename = "Sensor3110_1")]
    strain_sensor_1: StrainSensorDescriptor,
    #[serde(rename = "Sensor3110_2")]
    strain_sensor_2: StrainSensorDescriptor,
}

/// Accept identifiers sent either as numbers or as strings.
fn identifier<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number identifier, found {other}"
        ))),
    }
}

impl TemperatureSensorDescriptor {
    fn build(&self) -> Result<TemperatureSensor, DeviceConfigError> {
        let grating = Grating::new(&self.id, &self.model, &self.name, self.t0, self.wl0)
            .with_power_window(self.p_min, self.p_max);
        TemperatureSensor::new(grating, self.st)
    }
}

impl StrainSensorDescriptor {
    fn build(&self) -> Result<StrainSensor, DeviceConfigError> {
        let grating = Grating::new(&self.id, &self.model, &self.name, self.t0, self.wl0)
            .with_power_window(self.p_min, self.p_max);
        StrainSensor::new(grating, self.fg, self.ctet)
    }
}

impl DeviceDescriptor {
    /// Validate and build the device.
    pub fn build(&self) -> Result<Device, DeviceConfigError> {
        let params = DeviceParameters {
            id: self.id.clone(),
            name: self.name.clone(),
            channel: self.channel,
            e: self.e,
            ctes: self.ctes,
            size: (self.a_size, self.b_size),
            bend_sensitivity: self.bending_sensitivity,
            tension_window: Window::new(self.f_min, self.f_max),
            tension_reserve: self.f_reserve,
            temperature_window: Window::new(self.t_min, self.t_max),
            tension_model: (self.fmodel_f0, self.fmodel_f1, self.fmodel_f2),
            ice_model: (self.icemodel_i1, self.icemodel_i2),
            time_of_flight_ns: Device::propagation_delay_ns(self.distance),
            span: SpanParameters {
                length: self.span_length,
                rope_diameter: self.span_rope_diameter,
                rope_density: self.span_rope_density,
                rope_ej: self.span_rope_ej,
            },
        };

        let in_device = |err: DeviceConfigError| match err {
            DeviceConfigError::InvalidValue {
                device,
                field,
                reason,
            } => DeviceConfigError::InvalidValue {
                device: format!("{} / {}", self.name, device),
                field,
                reason,
            },
            other => other,
        };

        Device::new(
            params,
            self.temperature_sensor.build().map_err(in_device)?,
            self.strain_sensor_1.build().map_err(in_device)?,
            self.strain_sensor_2.build().map_err(in_device)?,
        )
    }
}

/// Validated runtime configuration built from one description message.
///
/// Replaced wholesale whenever a new message arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// Interrogator address
    pub instrument_address: String,
    /// Laser scan rate, Hz
    pub scan_rate_hz: f64,
    /// Averaged block rate, Hz
    pub sample_rate_hz: f64,
    /// Devices that built successfully, in message order
    pub devices: Vec<Device>,
}

impl Configuration {
    /// Duration of one averaging bucket, `1 / sample rate`.
    pub fn sample_period(&self) -> Duration {
        clamped_period(self.sample_rate_hz)
    }

    /// Interval between two interrogator scans, `1 / scan rate`.
    pub fn scan_interval(&self) -> Duration {
        clamped_period(self.scan_rate_hz)
    }
}

/// Period of one cycle at `rate_hz`.
///
/// Refused unless it is at least 1 ns and at most `u64::MAX` ns, the range timestamps and
/// tokio timers work in.
fn period_of(rate_hz: f64) -> Result<Duration, &'static str> {
    validation::is_positive(rate_hz)?;
    let period = Duration::try_from_secs_f64(1.0 / rate_hz).map_err(|_| "Rate is too low")?;
    if period.is_zero() {
        return Err("Rate is too high");
    }
    u64::try_from(period.as_nanos()).map_err(|_| "Rate is too low")?;
    Ok(period)
}

/// [`period_of`] for a configuration that was built by hand: out-of-range rates saturate.
fn clamped_period(rate_hz: f64) -> Duration {
    match period_of(rate_hz) {
        Ok(period) => period,
        Err(_) if rate_hz > 1.0 => Duration::from_nanos(1),
        Err(_) => Duration::from_nanos(u64::MAX),
    }
}

/// Outcome of building a configuration: the usable part plus every rejected device.
#[derive(Debug, Clone)]
pub struct ConfigurationReport {
    /// Configuration with all devices that built
    pub configuration: Configuration,
    /// One entry per device that did not build
    pub rejected: Vec<DeviceConfigError>,
}

impl InstrumentDescription {
    /// Decode a control-channel message.
    pub fn decode(msg: &str) -> AppResult<Self> {
        let normalised = msg.replace('\'', "\"");
        Ok(serde_json::from_str(&normalised)?)
    }

    /// Validate the envelope and build every device independently.
    pub fn into_configuration(self) -> AppResult<ConfigurationReport> {
        let instrument_address = self
            .ip_address
            .primary()
            .ok_or_else(|| DaqError::Configuration("IP_address list is empty".to_string()))?
            .to_string();
        period_of(self.laser_scan_speed).map_err(|e| {
            DaqError::Configuration(format!("LaserScanSpeed {}: {e}", self.laser_scan_speed))
        })?;
        period_of(self.sample_rate)
            .map_err(|e| DaqError::Configuration(format!("SampleRate {}: {e}", self.sample_rate)))?;

        let mut devices = Vec::with_capacity(self.devices.len());
        let mut rejected = Vec::new();
        for (index, raw) in self.devices.into_iter().enumerate() {
            let built = serde_json::from_value::<DeviceDescriptor>(raw)
                .map_err(|e| DeviceConfigError::Malformed {
                    index,
                    reason: e.to_string(),
                })
                .and_then(|descriptor| descriptor.build());
            match built {
                Ok(device) => devices.push(device),
                Err(err) => rejected.push(err),
            }
        }

        Ok(ConfigurationReport {
            configuration: Configuration {
                instrument_address,
                scan_rate_hz: self.laser_scan_speed,
                sample_rate_hz: self.sample_rate,
                devices,
            },
            rejected,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn device_json(id: u32, name: &str, channel: u32) -> Value {
        json!({
            "ID": id, "Name": name, "x55_channel": channel,
            "CTES": 23.0, "E": 7.0e10, "Asize": 10.0, "Bsize": 5.0,
            "Tmin": -60.0, "Tmax": 60.0, "Fmin": 0.0, "Fmax": 400.0, "Freserve": 1000.0,
            "SpanRopeDiametr": 0.0216, "SpanRopeLen": 250.0, "SpanRopeDensity": 0.85, "SpanRopeEJ": 1200.0,
            "Bending_sensivity": 0.01, "Distance": 1000.0,
            "Fmodel_f0": 100.0, "Fmodel_f1": -1.5, "Fmodel_f2": 0.01,
            "Icemodel_i1": 2.0, "Icemodel_i2": 0.5,
            "Sensor4100": {"ID": "T", "type": "os4100", "name": "temp", "WL0": 1530000.0, "T0": 20.0,
                           "Pmin": 0, "Pmax": 65535, "ST": 1.8775e-5},
            "Sensor3110_1": {"ID": "L", "type": "os3110", "name": "left", "WL0": 1550000.0, "T0": 20.0,
                             "Pmin": 0, "Pmax": 65535, "FG": 0.89, "CTET": 23.0},
            "Sensor3110_2": {"ID": "R", "type": "os3110", "name": "right", "WL0": 1570000.0, "T0": 20.0,
                             "Pmin": 0, "Pmax": 65535, "FG": 0.89, "CTET": 23.0}
        })
    }

    pub(crate) fn description_json(devices: Vec<Value>) -> String {
        json!({
            "IP_address": ["10.0.10.71", "10.0.10.72"],
            "LaserScanSpeed": 10,
            "SampleRate": 1,
            "devices": devices
        })
        .to_string()
    }

    #[test]
    fn decodes_complete_message() {
        let msg = description_json(vec![device_json(1, "span-1", 1), device_json(2, "span-2", 2)]);
        let report = InstrumentDescription::decode(&msg).unwrap().into_configuration().unwrap();

        assert!(report.rejected.is_empty());
        let config = report.configuration;
        assert_eq!(config.instrument_address, "10.0.10.71");
        assert_eq!(config.sample_period(), Duration::from_secs(1));
        assert_eq!(config.scan_interval(), Duration::from_millis(100));
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[1].name(), "span-2");
        assert_eq!(config.devices[1].channel(), 2);
        assert_eq!(config.devices[0].id(), "1");
        assert_eq!(config.devices[0].parameters().time_of_flight_ns, -9794);
        assert_eq!(config.devices[0].parameters().span.length, 250.0);
    }

    #[test]
    fn single_quoted_messages_are_accepted() {
        let msg = "{'IP_address': '192.168.1.216', 'LaserScanSpeed': 10, 'SampleRate': 2, 'devices': []}";
        let report = InstrumentDescription::decode(msg).unwrap().into_configuration().unwrap();
        assert_eq!(report.configuration.instrument_address, "192.168.1.216");
        assert_eq!(report.configuration.sample_rate_hz, 2.0);
    }

    #[test]
    fn missing_field_rejects_only_that_device() {
        let mut broken = device_json(2, "span-2", 1);
        broken.as_object_mut().unwrap().remove("E");
        let msg = description_json(vec![
            device_json(1, "span-1", 1),
            broken,
            device_json(3, "span-3", 1),
        ]);

        let report = InstrumentDescription::decode(&msg).unwrap().into_configuration().unwrap();
        let names: Vec<&str> = report.configuration.devices.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["span-1", "span-3"]);
        assert_eq!(report.rejected.len(), 1);
        match &report.rejected[0] {
            DeviceConfigError::Malformed { index, reason } => {
                assert_eq!(*index, 1);
                assert!(reason.contains("E"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_temperature_coefficient_rejects_device() {
        let mut broken = device_json(1, "span-1", 1);
        broken["Sensor4100"]["ST"] = json!(0.0);
        let msg = description_json(vec![broken]);

        let report = InstrumentDescription::decode(&msg).unwrap().into_configuration().unwrap();
        assert!(report.configuration.devices.is_empty());
        match &report.rejected[0] {
            DeviceConfigError::InvalidValue { device, field, .. } => {
                assert_eq!(*field, "ST");
                assert!(device.starts_with("span-1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn channel_zero_rejects_device() {
        let msg = description_json(vec![device_json(1, "span-1", 0), device_json(2, "span-2", 2)]);
        let report = InstrumentDescription::decode(&msg).unwrap().into_configuration().unwrap();

        assert_eq!(report.configuration.devices.len(), 1);
        assert_eq!(report.configuration.devices[0].name(), "span-2");
        assert!(matches!(
            report.rejected[0],
            DeviceConfigError::InvalidValue {
                field: "x55_channel",
                ..
            }
        ));
    }

    #[test]
    fn malformed_json_is_refused() {
        assert!(matches!(
            InstrumentDescription::decode("{not json"),
            Err(DaqError::Json(_))
        ));
        assert!(InstrumentDescription::decode(r#"{"IP_address": "a"}"#).is_err());
    }

    #[test]
    fn zero_sample_rate_is_refused() {
        let msg = r#"{"IP_address": "a", "LaserScanSpeed": 10, "SampleRate": 0, "devices": []}"#;
        let err = InstrumentDescription::decode(msg).unwrap().into_configuration().unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[test]
    fn rates_without_a_usable_period_are_refused() {
        let rates = [("10", "1e-20"), ("1e12", "1"), ("10", "1e300"), ("1e-300", "1")];
        for (scan, sample) in rates {
            let msg = format!(
                r#"{{"IP_address": "a", "LaserScanSpeed": {scan}, "SampleRate": {sample}, "devices": []}}"#
            );
            let result = InstrumentDescription::decode(&msg).unwrap().into_configuration();
            assert!(
                matches!(result, Err(DaqError::Configuration(_))),
                "scan {scan} Hz, sample {sample} Hz accepted"
            );
        }
    }

    #[test]
    fn slow_but_representable_rates_are_accepted() {
        let msg = r#"{"IP_address": "a", "LaserScanSpeed": 1e3, "SampleRate": 1e-6, "devices": []}"#;
        let config = InstrumentDescription::decode(msg)
            .unwrap()
            .into_configuration()
            .unwrap()
            .configuration;
        assert_eq!(config.sample_period(), Duration::from_secs(1_000_000));
        assert_eq!(config.scan_interval(), Duration::from_millis(1));
    }

    #[test]
    fn hand_built_configuration_periods_saturate() {
        let config = Configuration {
            instrument_address: "a".to_string(),
            scan_rate_hz: 1e12,
            sample_rate_hz: 1e-20,
            devices: Vec::new(),
        };
        assert_eq!(config.scan_interval(), Duration::from_nanos(1));
        assert_eq!(config.sample_period(), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn empty_address_list_is_refused() {
        let msg = r#"{"IP_address": [], "LaserScanSpeed": 10, "SampleRate": 1, "devices": []}"#;
        assert!(InstrumentDescription::decode(msg).unwrap().into_configuration().is_err());
    }
}
