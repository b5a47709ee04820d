use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default sample temperature in °C when the request does not carry one.
pub const DEFAULT_SAMPLE_TEMPERATURE: f64 = 37.0;

/// One requested measurement cycle. At most one request is outstanding at a
/// time; it is consumed by the acquisition timer or discarded by
/// `stop_analysis`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Sample identifier; generated (`AUTO_<epoch>`) when absent
    pub sample_id: Option<String>,
    pub patient_id: Option<String>,
    /// Sample temperature in °C
    pub temperature: Option<f64>,
}

/// The synthesized measurement set for one completed cycle. Immutable once
/// produced; retained as "last result" until the next run overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sample_id: String,
    pub patient_id: String,
    pub operator: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    #[serde(rename = "pH")]
    pub ph: f64,
    #[serde(rename = "pCO2")]
    pub pco2: f64,
    #[serde(rename = "pO2")]
    pub po2: f64,
    #[serde(rename = "HCO3")]
    pub hco3: f64,
    #[serde(rename = "SO2")]
    pub so2: f64,
    #[serde(rename = "BE")]
    pub base_excess: f64,
    #[serde(rename = "Na")]
    pub sodium: f64,
    #[serde(rename = "K")]
    pub potassium: f64,
    #[serde(rename = "Cl")]
    pub chloride: f64,
    #[serde(rename = "Ca")]
    pub calcium: f64,
    #[serde(rename = "Glucose")]
    pub glucose: f64,
    #[serde(rename = "Lactate")]
    pub lactate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisState {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("analysis already in progress")]
    AlreadyRunning,
    #[error("no user logged in")]
    NoActiveSession,
    #[error("device not calibrated")]
    NotCalibrated,
}
