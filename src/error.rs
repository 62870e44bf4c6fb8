//! Error kinds for the partitioning core, and the application shell built on top of it.

use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can make a run fail.
///
/// `InputOpenFailed`, `InputMalformed`, and `ConfigInvalid` are raised at the coordinator before
/// the run has done any collective work beyond sharing the initial dimensions; `OutputWriteFailed`
/// and `CollectiveFailed` are terminal wherever they occur.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The coordinator could not open the input file.
    #[error("failed to open input file {path:?}: {source}")]
    InputOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The header was unparsable, or a document line had fewer than `S + 1` tokens.
    #[error("malformed input at line {line}: {reason}")]
    InputMalformed { line: usize, reason: String },

    /// The coordinator could not write the output file.
    #[error("failed to write output file {path:?}: {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A collective call reported failure in the underlying transport.
    #[error("collective operation {operation} failed: {reason}")]
    CollectiveFailed { operation: &'static str, reason: String },

    /// Dimensions provided by the header, CLI override, or collective size query are inconsistent.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}
