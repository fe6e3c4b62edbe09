pub mod cli;
pub mod config;
pub mod detectors;
pub mod error;
pub mod parser;
pub mod reporter;
pub mod scanner;
pub mod utils;

pub use config::ScanConfig;
pub use detectors::{Confidence, Finding, PatternId, Severity};
pub use error::{FileError, ScanError};
pub use parser::SolidityParser;
pub use reporter::Reporter;
pub use scanner::{collect_sources, FileReport, ScanReport, Scanner};
