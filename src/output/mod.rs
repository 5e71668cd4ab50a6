/// Output formats and writing reports to a file or stdout.
pub mod formatter;
/// Markdown and JSON rendering of analysis reports and simulation results.
pub mod report;

pub use formatter::{GraphFormat, OutputFormat};
pub use report::Report;
