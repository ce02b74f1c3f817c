use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One sensor as listed in the device-level shadow's `reported.sensors`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub sensor_id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

impl SensorRecord {
    pub fn new(sensor_id: impl Into<String>, active: bool) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            active,
            settings: None,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut record = Map::new();
        record.insert("sensor_id".to_string(), Value::String(self.sensor_id.clone()));
        record.insert("active".to_string(), Value::Bool(self.active));
        if let Some(settings) = &self.settings {
            record.insert("settings".to_string(), settings.clone());
        }
        Value::Object(record)
    }

    pub fn apply(&mut self, change: &SensorChange) {
        match change {
            SensorChange::Active(active) => self.active = *active,
            SensorChange::Settings(settings) => self.settings = Some(settings.clone()),
        }
    }
}

/// A change to one sensor that the device API has confirmed
#[derive(Debug, Clone, PartialEq)]
pub enum SensorChange {
    Active(bool),
    Settings(Value),
}

impl SensorChange {
    /// Key of the per-sensor shadow this change lands in
    pub fn key(&self) -> &'static str {
        match self {
            SensorChange::Active(_) => "active",
            SensorChange::Settings(_) => "settings",
        }
    }

    pub fn value(&self) -> Value {
        match self {
            SensorChange::Active(active) => Value::Bool(*active),
            SensorChange::Settings(settings) => settings.clone(),
        }
    }
}

/// Known sensors plus a derived `sensor_id → position` index
///
/// The index is never persisted; it is rebuilt from the sensor list whenever
/// the device-level shadow's list is replaced. When an id appears twice the
/// first position wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorRegistry {
    sensors: Vec<SensorRecord>,
    index: HashMap<String, usize>,
}

impl SensorRegistry {
    pub fn from_sensors(sensors: Vec<SensorRecord>) -> Self {
        let mut registry = Self::default();
        registry.rebuild_index(sensors);
        registry
    }

    pub fn rebuild_index(&mut self, sensors: Vec<SensorRecord>) {
        let mut index = HashMap::with_capacity(sensors.len());
        for (position, sensor) in sensors.iter().enumerate() {
            index.entry(sensor.sensor_id.clone()).or_insert(position);
        }
        self.sensors = sensors;
        self.index = index;
    }

    pub fn contains(&self, sensor_id: &str) -> bool {
        self.index.contains_key(sensor_id)
    }

    pub fn position_of(&self, sensor_id: &str) -> Option<usize> {
        self.index.get(sensor_id).copied()
    }

    pub fn get(&self, sensor_id: &str) -> Option<&SensorRecord> {
        self.position_of(sensor_id).and_then(|i| self.sensors.get(i))
    }

    /// Applies `change` to the record of `sensor_id`; false when the id is unknown
    ///
    /// Ids are untouched, so the index stays valid.
    pub fn update(&mut self, sensor_id: &str, change: &SensorChange) -> bool {
        let Some(record) = self
            .position_of(sensor_id)
            .and_then(|i| self.sensors.get_mut(i))
        else {
            return false;
        };
        record.apply(change);
        true
    }

    /// The sensor list as it appears in `reported.sensors`
    pub fn to_value(&self) -> Value {
        Value::Array(self.sensors.iter().map(SensorRecord::to_value).collect())
    }

    pub fn records(&self) -> &[SensorRecord] {
        &self.sensors
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
