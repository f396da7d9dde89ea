//! Payload models served by the analytics backend.
//!
//! The acquisition layer passes payloads through as opaque JSON; these types
//! are typed views for consumers that want them, plus request bodies for the
//! auxiliary endpoints.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One reading from the field's environmental sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IotReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
    pub temperature_c: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_pct: Option<f64>,
    pub soil_moisture_pct: f64,
}

/// Extract sensor readings from a payload.
///
/// Snapshots and analysis results embed the readings under `iot_data`, while
/// `iot_data_update` events carry the bare list.
pub fn iot_readings(payload: &Value) -> Result<Vec<IotReading>, serde_json::Error> {
    let list = payload.get("iot_data").unwrap_or(payload);
    Vec::<IotReading>::deserialize(list)
}

/// Averages over a batch of sensor readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IotSummary {
    pub readings: usize,
    pub avg_temperature: f64,
    pub avg_soil_moisture: f64,
    /// Absent when no reading carried humidity.
    pub avg_humidity: Option<f64>,
}

impl IotSummary {
    pub fn from_readings(readings: &[IotReading]) -> Option<Self> {
        if readings.is_empty() {
            return None;
        }
        let n = readings.len() as f64;
        let humidity: Vec<f64> = readings.iter().filter_map(|r| r.humidity_pct).collect();

        Some(Self {
            readings: readings.len(),
            avg_temperature: readings.iter().map(|r| r.temperature_c).sum::<f64>() / n,
            avg_soil_moisture: readings.iter().map(|r| r.soil_moisture_pct).sum::<f64>() / n,
            avg_humidity: if humidity.is_empty() {
                None
            } else {
                Some(humidity.iter().sum::<f64>() / humidity.len() as f64)
            },
        })
    }
}

/// Vegetation index used for health maps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthIndex {
    #[default]
    Ndvi,
    Ndre,
    Savi,
}

impl HealthIndex {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthIndex::Ndvi => "ndvi",
            HealthIndex::Ndre => "ndre",
            HealthIndex::Savi => "savi",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Pdf,
    Json,
}

/// Body of `POST /api/generate_report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub format: ReportFormat,
    pub include_iot: bool,
    pub include_analysis: bool,
    pub include_spectral: bool,
}

impl Default for ReportRequest {
    fn default() -> Self {
        Self {
            format: ReportFormat::Pdf,
            include_iot: true,
            include_analysis: true,
            include_spectral: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

/// Body of `POST /api/export_data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub include_iot: bool,
    pub include_analysis: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_iot_readings_from_snapshot() {
        let payload = json!({
            "success": true,
            "iot_data": [
                {"timestamp": "2025-06-01T08:00:00.123456", "temperature_c": 24.5, "humidity_pct": 61.2, "soil_moisture_pct": 68.0},
                {"timestamp": "2025-06-01T09:00:00", "temperature_c": 26.5, "humidity_pct": 58.8, "soil_moisture_pct": 67.8}
            ]
        });
        let readings = iot_readings(&payload).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].temperature_c, 24.5);
        assert!(readings[0].timestamp.is_some());

        let summary = IotSummary::from_readings(&readings).unwrap();
        assert_eq!(summary.readings, 2);
        assert!((summary.avg_temperature - 25.5).abs() < 1e-9);
        assert!((summary.avg_humidity.unwrap() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_iot_readings_bare_list() {
        let payload = json!([{"temperature_c": 24.5, "soil_moisture_pct": 68}]);
        let readings = iot_readings(&payload).unwrap();
        assert_eq!(readings[0].soil_moisture_pct, 68.0);
        assert_eq!(readings[0].humidity_pct, None);

        let summary = IotSummary::from_readings(&readings).unwrap();
        assert_eq!(summary.avg_humidity, None);
        assert_eq!(IotSummary::from_readings(&[]), None);
    }

    #[test]
    fn test_iot_readings_rejects_other_payloads() {
        assert!(iot_readings(&json!({"prediction_map": [0, 1]})).is_err());
    }

    #[test]
    fn test_report_request_wire_shape() {
        let body = serde_json::to_value(ReportRequest::default()).unwrap();
        assert_eq!(
            body,
            json!({"format": "pdf", "include_iot": true, "include_analysis": true, "include_spectral": true})
        );
    }
}
