//! HL7 v2.3.1 message generation for charge posting
//!
//! Provides the low-level encoding layer for DFT^P03 messages:
//! - Segment encoding with HL7 escape sequences and fixed encoding characters
//! - Composite (component) and repetition field assembly
//! - Fixed-point charge rendering (no exponent notation, exact cents)
//! - DFT^P03 message assembly in the mandated segment order

pub mod error;
pub mod message;
pub mod segment;

pub use error::*;
pub use message::*;
pub use segment::*;
