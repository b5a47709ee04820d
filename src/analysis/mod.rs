// Analysis Execution Gate - precondition checks and simulated acquisition

pub mod gate;
pub mod interpretation;
pub mod types;

pub use gate::AnalysisGate;
pub use interpretation::{interpret, Compensation, Interpretation, PrimaryDisorder};
pub use types::{AnalysisError, AnalysisRequest, AnalysisResult, AnalysisState};
