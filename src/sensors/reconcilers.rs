//! Reconcilers that act on the local device API

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::SharedRegistry;
use crate::device_api::{DeviceApi, OperateAction};
use crate::shadow::{Reconciled, Reconciler, ReconcilerTable};

/// Reconciler table of a per-sensor shadow: `active` and `settings`
pub fn sensor_table(api: Arc<dyn DeviceApi>, sensor_id: &str) -> ReconcilerTable {
    ReconcilerTable::new()
        .with(
            "active",
            Arc::new(OperateReconciler {
                api: api.clone(),
                sensor_id: sensor_id.to_string(),
            }),
        )
        .with(
            "settings",
            Arc::new(SettingsReconciler {
                api,
                sensor_id: sensor_id.to_string(),
            }),
        )
}

/// Reconciler table of the device-level shadow: `sensors`
pub fn device_table(api: Arc<dyn DeviceApi>, registry: SharedRegistry) -> ReconcilerTable {
    ReconcilerTable::new().with("sensors", Arc::new(SensorListReconciler { api, registry }))
}

/// Starts or stops a sensor to match a desired `active` flag
pub struct OperateReconciler {
    api: Arc<dyn DeviceApi>,
    sensor_id: String,
}

#[async_trait]
impl Reconciler for OperateReconciler {
    async fn reconcile(&self, desired: &Value, _reported: Option<&Value>) -> Reconciled {
        let Some(active) = desired.as_bool() else {
            return Reconciled::failed(format!("expected a boolean for 'active', got {}", desired));
        };
        let action = OperateAction::from(active);
        info!("{}: sending {} to sensor", self.sensor_id, action);

        match self.api.operate(&self.sensor_id, action).await {
            Ok(()) => Reconciled::applied(Value::Bool(active)),
            Err(e) => {
                error!("{}: operate request failed: {}", self.sensor_id, e);
                Reconciled::failed("Operate request failed")
            }
        }
    }
}

/// Pushes desired settings to the sensor; a `null` desired value re-reads them
pub struct SettingsReconciler {
    api: Arc<dyn DeviceApi>,
    sensor_id: String,
}

#[async_trait]
impl Reconciler for SettingsReconciler {
    async fn reconcile(&self, desired: &Value, _reported: Option<&Value>) -> Reconciled {
        let result = if desired.is_null() {
            self.api.get_settings(&self.sensor_id).await
        } else {
            self.api.put_settings(&self.sensor_id, desired).await
        };

        match result {
            Ok(settings) => Reconciled::applied(settings),
            Err(e) => {
                error!("{}: settings request failed: {}", self.sensor_id, e);
                Reconciled::failed("Settings request failed")
            }
        }
    }
}

/// Applies the `active` flags of a desired sensor list to known sensors
///
/// Entries for sensors the registry does not know are skipped. The reported
/// list is rebuilt from the registry so unknown entries never leak into it.
pub struct SensorListReconciler {
    api: Arc<dyn DeviceApi>,
    registry: SharedRegistry,
}

#[async_trait]
impl Reconciler for SensorListReconciler {
    async fn reconcile(&self, desired: &Value, _reported: Option<&Value>) -> Reconciled {
        let Some(entries) = desired.as_array() else {
            return Reconciled::failed(format!("expected a list for 'sensors', got {}", desired));
        };

        let known = self.registry.read().await.clone();
        let mut records = known.records().to_vec();
        let mut errors = Vec::new();
        let mut changed = false;

        for entry in entries {
            let (Some(sensor_id), Some(active)) = (
                entry.get("sensor_id").and_then(Value::as_str),
                entry.get("active").and_then(Value::as_bool),
            ) else {
                errors.push(format!("malformed sensor entry {}", entry));
                continue;
            };

            let Some(record) = known.position_of(sensor_id).and_then(|i| records.get_mut(i)) else {
                debug!("Ignoring desired state for unknown sensor {}", sensor_id);
                continue;
            };
            if record.active == active {
                continue;
            }

            match self.api.operate(sensor_id, OperateAction::from(active)).await {
                Ok(()) => {
                    record.active = active;
                    changed = true;
                }
                Err(e) => {
                    error!("{}: operate request failed: {}", sensor_id, e);
                    errors.push(format!("{}: operate request failed", sensor_id));
                }
            }
        }

        if changed {
            self.registry.write().await.rebuild_index(records.clone());
        }
        let reported = Value::Array(records.iter().map(|r| r.to_value()).collect());
        Reconciled {
            reported: Some(reported),
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }
}
