// Storage and export collaborator seams
//
// The core never issues raw queries; everything goes through these named
// operations so the simulator backend can be swapped for a real LIS/database
// without touching the managers.

pub mod memory;
pub mod traits;

pub use memory::{AuditEntry, InMemoryStorage};
pub use traits::{ExportOperations, StorageOperations};
