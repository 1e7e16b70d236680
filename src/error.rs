//! Error types for the pipeline core.
//!
//! Workers catch nothing: the first unhandled error on any worker terminates its pool, the driver
//! joins, observes, and rethrows to the caller (see `crate::worker`). Partial output is discarded.

use thiserror::Error as ThisError;

/// Errors that can occur while the pipeline core is running.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum PipelineError {
    /// Malformed input (bad file header, missing property, corrupt blob record). Fatal, aborts the job.
    #[error("format error: {0}")]
    FormatError(String),
    /// A leaf (microblock) cell exceeded `max_bucket_splats` and recursion could not reduce it further.
    #[error("density error: cell holds {0} splats and cannot be split further")]
    DensityError(u64),
    /// File read/write failure, captured with the file name and the underlying OS error.
    #[error("io error on \"{path}\": {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// A device (GPU) could not fit the buffers required for a bucket. Fatal before the job starts.
    #[error("resource error: {0}")]
    ResourceError(String),
    /// API misuse: empty stream, bad iterator, calling a stage out of order.
    #[error("state error: {0}")]
    StateError(String),
    /// Integer overflow in a size computation. Always a programmer error, always fatal.
    #[error("range error: integer overflow in size computation")]
    RangeError,
}

impl PipelineError {
    /// Wraps an I/O error together with the path that caused it
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::IoError {
            path: path.into(),
            source,
        }
    }
}
