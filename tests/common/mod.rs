//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use fbg_daq::description::{Configuration, InstrumentDescription};
use fbg_daq::error::AppResult;
use fbg_daq::pipeline::publisher::Subscriber;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::time::Duration;

/// Aligned to a whole hour and a whole second: 2023-11-14 22:13:20 UTC.
pub const START_SECS: u64 = 1_700_000_000;

/// One ODTiT device at the interrogator (no propagation delay).
pub fn device_json(id: u32, name: &str, channel: u32) -> Value {
    json!({
        "ID": id, "Name": name, "x55_channel": channel,
        "CTES": 23.0, "E": 7.0e10, "Asize": 10.0, "Bsize": 5.0,
        "Tmin": -60.0, "Tmax": 60.0, "Fmin": 0.0, "Fmax": 400.0, "Freserve": 1000.0,
        "Bending_sensivity": 0.01, "Distance": 0.0,
        "Fmodel_f0": 100.0, "Fmodel_f1": -1.5, "Fmodel_f2": 0.01,
        "Icemodel_i1": 2.0, "Icemodel_i2": 0.5,
        "Sensor4100": {"ID": 10, "type": "os4100", "name": "temp", "WL0": 1530000.0, "T0": 20.0,
                       "Pmin": 0, "Pmax": 65535, "ST": 1.8775e-5},
        "Sensor3110_1": {"ID": 11, "type": "os3110", "name": "left", "WL0": 1550000.0, "T0": 20.0,
                         "Pmin": 0, "Pmax": 65535, "FG": 0.89, "CTET": 23.0},
        "Sensor3110_2": {"ID": 12, "type": "os3110", "name": "right", "WL0": 1570000.0, "T0": 20.0,
                         "Pmin": 0, "Pmax": 65535, "FG": 0.89, "CTET": 23.0}
    })
}

/// Description message at 10 Hz scan rate and 1 Hz output rate.
pub fn description_json(devices: Vec<Value>) -> String {
    json!({
        "IP_address": ["10.0.10.71"],
        "LaserScanSpeed": 10,
        "SampleRate": 1,
        "devices": devices
    })
    .to_string()
}

/// Two devices on two channels.
pub fn two_device_description() -> String {
    description_json(vec![device_json(1, "span-1", 1), device_json(2, "span-2", 2)])
}

/// Decoded [`two_device_description`].
pub fn two_device_configuration() -> Configuration {
    InstrumentDescription::decode(&two_device_description())
        .and_then(InstrumentDescription::into_configuration)
        .map(|report| report.configuration)
        .unwrap()
}

/// Subscriber keeping every delivered block.
#[derive(Default)]
pub struct RecordingSubscriber {
    pub blocks: Mutex<Vec<Vec<f64>>>,
}

#[async_trait::async_trait]
impl Subscriber for RecordingSubscriber {
    fn peer(&self) -> String {
        "recording".to_string()
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn deliver(&self, block: &[f64]) -> AppResult<()> {
        self.blocks.lock().push(block.to_vec());
        Ok(())
    }
}

/// Poll `condition` every 10 ms until it holds, panicking after `limit`.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
