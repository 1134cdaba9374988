//! Per-test outcomes and the XML report they are recorded in.

pub mod outcome;
pub mod xml;

pub use outcome::{ExecutionResult, ExitClassification};
pub use xml::{ReportError, ReportResult, XmlReport, CASE_NAME, SUITE_NAME};
