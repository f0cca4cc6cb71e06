//! Claim Export Service
//!
//! Turns application-level claim records into HL7 DFT^P03 message files:
//! - Claim message assembly (control IDs, composites, defaulting rules)
//! - Batch file writing with collision-safe names and metadata sidecars
//! - Ordered manifest accumulation for the delivery stage

pub mod assembler;
pub mod batch;
pub mod error;
pub mod models;

pub use assembler::*;
pub use batch::*;
pub use error::*;
pub use models::*;
