//! Stateless acid-base interpretation of a finished measurement.
//!
//! Threshold-based classification only; no state, no side effects. The
//! reference ranges are the usual arterial ones: pH 7.35–7.45, pCO2 35–45
//! mmHg, HCO3 22–28 mmol/L, BE ±2 mmol/L, pO2 ≥ 80 mmHg.

use serde::{Deserialize, Serialize};

use crate::analysis::types::AnalysisResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimaryDisorder {
    Normal,
    RespiratoryAcidosis,
    MetabolicAcidosis,
    MixedAcidosis,
    RespiratoryAlkalosis,
    MetabolicAlkalosis,
    MixedAlkalosis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compensation {
    Uncompensated,
    PartiallyCompensated,
    FullyCompensated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpretation {
    pub primary: PrimaryDisorder,
    pub compensation: Compensation,
    pub hypoxemic: bool,
}

impl std::fmt::Display for Interpretation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let primary = match self.primary {
            PrimaryDisorder::Normal => "Normal pH",
            PrimaryDisorder::RespiratoryAcidosis => "Respiratory Acidosis",
            PrimaryDisorder::MetabolicAcidosis => "Metabolic Acidosis",
            PrimaryDisorder::MixedAcidosis => "Mixed Acidosis",
            PrimaryDisorder::RespiratoryAlkalosis => "Respiratory Alkalosis",
            PrimaryDisorder::MetabolicAlkalosis => "Metabolic Alkalosis",
            PrimaryDisorder::MixedAlkalosis => "Mixed Alkalosis",
        };
        let compensation = match self.compensation {
            Compensation::Uncompensated => "Uncompensated",
            Compensation::PartiallyCompensated => "Partially Compensated",
            Compensation::FullyCompensated => "Fully Compensated",
        };
        let oxygenation = if self.hypoxemic {
            "Hypoxemia present (pO2 < 80 mmHg)"
        } else {
            "Oxygenation adequate"
        };
        write!(f, "{primary} ({compensation}); {oxygenation}")
    }
}

pub fn interpret(result: &AnalysisResult) -> Interpretation {
    Interpretation {
        primary: classify_primary(result),
        compensation: classify_compensation(result),
        hypoxemic: result.po2 < 80.0,
    }
}

fn is_acidemic(r: &AnalysisResult) -> bool {
    r.ph < 7.35
}

fn is_alkalemic(r: &AnalysisResult) -> bool {
    r.ph > 7.45
}

fn is_respiratory_acidosis(r: &AnalysisResult) -> bool {
    r.pco2 > 45.0
}

fn is_respiratory_alkalosis(r: &AnalysisResult) -> bool {
    r.pco2 < 35.0
}

fn is_metabolic_acidosis(r: &AnalysisResult) -> bool {
    r.hco3 < 22.0 || r.base_excess < -2.0
}

fn is_metabolic_alkalosis(r: &AnalysisResult) -> bool {
    r.hco3 > 28.0 || r.base_excess > 2.0
}

fn classify_primary(r: &AnalysisResult) -> PrimaryDisorder {
    if is_acidemic(r) {
        if is_respiratory_acidosis(r) {
            PrimaryDisorder::RespiratoryAcidosis
        } else if is_metabolic_acidosis(r) {
            PrimaryDisorder::MetabolicAcidosis
        } else {
            PrimaryDisorder::MixedAcidosis
        }
    } else if is_alkalemic(r) {
        if is_respiratory_alkalosis(r) {
            PrimaryDisorder::RespiratoryAlkalosis
        } else if is_metabolic_alkalosis(r) {
            PrimaryDisorder::MetabolicAlkalosis
        } else {
            PrimaryDisorder::MixedAlkalosis
        }
    } else {
        PrimaryDisorder::Normal
    }
}

fn classify_compensation(r: &AnalysisResult) -> Compensation {
    let fully = if is_acidemic(r) {
        (is_respiratory_acidosis(r) && r.hco3 > 28.0)
            || (is_metabolic_acidosis(r) && r.pco2 < 35.0)
    } else if is_alkalemic(r) {
        (is_respiratory_alkalosis(r) && r.hco3 < 22.0)
            || (is_metabolic_alkalosis(r) && r.pco2 > 45.0)
    } else {
        false
    };
    if fully {
        return Compensation::FullyCompensated;
    }

    let partially = if (r.ph - 7.4).abs() > 0.05 {
        if is_acidemic(r) {
            (is_respiratory_acidosis(r) && r.hco3 > 24.0)
                || (is_metabolic_acidosis(r) && r.pco2 < 40.0)
        } else if is_alkalemic(r) {
            (is_respiratory_alkalosis(r) && r.hco3 < 24.0)
                || (is_metabolic_alkalosis(r) && r.pco2 > 40.0)
        } else {
            false
        }
    } else {
        false
    };
    if partially {
        Compensation::PartiallyCompensated
    } else {
        Compensation::Uncompensated
    }
}
