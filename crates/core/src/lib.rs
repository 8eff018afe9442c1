pub mod codec;
pub mod error;
pub mod ext;
pub mod scan;
pub mod signature;
pub mod verdict;

pub use error::{EngineError, ErrorKind, Result};
pub use scan::{ScanKind, ScanOutcome, ScanStatistics};
pub use signature::{Signature, SignatureDatabase, SignatureOffset};
pub use verdict::{ThreatInfo, Verdict};
