use std::time::Duration;

use serde_json::json;

use crate::calibration::types::CalibrationStep;

/// Step name matched by the `ph_only` filter.
pub const PH_CALIBRATION_STEP: &str = "pH Calibration";

/// Calibration type that restricts the run to the pH step.
pub const PH_ONLY_TYPE: &str = "ph_only";

/// The fixed, ordered step sequence. Order is significant: each step depends
/// on the previous one having left the instrument in a known state.
pub fn standard_steps(nominal_duration: Duration) -> Vec<CalibrationStep> {
    vec![
        CalibrationStep {
            name: "System Check",
            description: "Performing system diagnostics and sensor check",
            nominal_duration,
            expected_values: json!({"temperature": 37.0, "pressure": 760.0}),
            tolerances: json!({"temperature": 1.0, "pressure": 5.0}),
        },
        CalibrationStep {
            name: PH_CALIBRATION_STEP,
            description: "Calibrating pH electrode with buffer solutions",
            nominal_duration,
            expected_values: json!({"pH_buffer1": 7.40, "pH_buffer2": 6.84}),
            tolerances: json!({"pH_buffer1": 0.02, "pH_buffer2": 0.02}),
        },
        CalibrationStep {
            name: "Gas Calibration",
            description: "Calibrating pO2 and pCO2 sensors",
            nominal_duration,
            expected_values: json!({"pO2_cal": 150.0, "pCO2_cal": 40.0}),
            tolerances: json!({"pO2_cal": 5.0, "pCO2_cal": 2.0}),
        },
        CalibrationStep {
            name: "Electrolyte Calibration",
            description: "Calibrating ion-selective electrodes",
            nominal_duration,
            expected_values: json!({"Na_cal": 140.0, "K_cal": 4.0, "Cl_cal": 100.0}),
            tolerances: json!({"Na_cal": 2.0, "K_cal": 0.2, "Cl_cal": 2.0}),
        },
        CalibrationStep {
            name: "Quality Control",
            description: "Running quality control samples",
            nominal_duration,
            expected_values: json!({"qc_passed": true}),
            tolerances: json!({}),
        },
    ]
}
