//! HL7 v2 result export.
//!
//! Formats a finished result as an ORU^R01 observation message and simulates
//! delivery; there is no network layer, just a message history and counters
//! the way a send queue would expose them. Export is best-effort by
//! contract: a disconnected exporter declines with `Ok(false)` and the
//! caller moves on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::AnalysisResult;
use crate::storage::ExportOperations;

const HL7_VERSION: &str = "2.5";
const PROCESSING_ID: &str = "P";

#[derive(Debug, Clone, PartialEq)]
pub struct Hl7Message {
    pub message_type: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Hl7Exporter {
    sending_application: String,
    sending_facility: String,
    receiving_application: String,
    receiving_facility: String,
    connected: AtomicBool,
    messages_sent: AtomicU64,
    history: Mutex<Vec<Hl7Message>>,
}

impl Default for Hl7Exporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Hl7Exporter {
    pub fn new() -> Self {
        Self {
            sending_application: "HEMOGAS".to_string(),
            sending_facility: "LAB".to_string(),
            receiving_application: "HIS".to_string(),
            receiving_facility: "HOSPITAL".to_string(),
            connected: AtomicBool::new(true),
            messages_sent: AtomicU64::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::SeqCst)
    }

    pub fn history(&self) -> Vec<Hl7Message> {
        self.history
            .lock()
            .expect("message history mutex poisoned")
            .clone()
    }

    fn build_oru_r01(&self, result: &AnalysisResult) -> String {
        let control_id = Uuid::new_v4().simple().to_string();
        let timestamp = result.timestamp.format("%Y%m%d%H%M%S").to_string();

        let msh = [
            "MSH",
            r"^~\&",
            self.sending_application.as_str(),
            self.sending_facility.as_str(),
            self.receiving_application.as_str(),
            self.receiving_facility.as_str(),
            timestamp.as_str(),
            "",
            "ORU^R01",
            control_id.as_str(),
            PROCESSING_ID,
            HL7_VERSION,
        ]
        .join("|");
        let pid = format!("PID|1||{}", result.patient_id);
        let obr = format!(
            "OBR|1|{}||BLOODGAS^Blood Gas Panel|||{timestamp}|||{}",
            result.sample_id, result.operator
        );

        let observations: [(&str, f64, &str); 12] = [
            ("pH", result.ph, ""),
            ("pCO2", result.pco2, "mmHg"),
            ("pO2", result.po2, "mmHg"),
            ("HCO3", result.hco3, "mmol/L"),
            ("SO2", result.so2, "%"),
            ("BE", result.base_excess, "mmol/L"),
            ("Na", result.sodium, "mmol/L"),
            ("K", result.potassium, "mmol/L"),
            ("Cl", result.chloride, "mmol/L"),
            ("Ca", result.calcium, "mmol/L"),
            ("Glucose", result.glucose, "mg/dL"),
            ("Lactate", result.lactate, "mmol/L"),
        ];

        let mut segments = vec![msh, pid, obr];
        for (index, (code, value, units)) in observations.iter().enumerate() {
            segments.push(format!(
                "OBX|{}|NM|{code}||{value:.2}|{units}|||||F",
                index + 1
            ));
        }
        segments.join("\r")
    }
}

impl ExportOperations for Hl7Exporter {
    fn export_result(&self, result: &AnalysisResult) -> Result<bool> {
        if !self.is_connected() {
            warn!("not connected to HL7 receiver; export declined");
            return Ok(false);
        }

        let content = self.build_oru_r01(result);
        self.history
            .lock()
            .expect("message history mutex poisoned")
            .push(Hl7Message {
                message_type: "ORU^R01".to_string(),
                content,
                timestamp: Utc::now(),
            });
        self.messages_sent.fetch_add(1, Ordering::SeqCst);
        info!(sample_id = %result.sample_id, "sent HL7 results message");
        Ok(true)
    }
}
