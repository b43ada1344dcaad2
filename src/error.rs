//! Crate-wide error type.
//!
//! Every fallible boundary in the engine returns `Result<T, EngineError>` so
//! callers can match on a single enum instead of threading `Box<dyn Error>`
//! or raw `std::io::Error` through the download pipeline.

/// Errors that can terminate a download, or be produced while wiring the
/// engine up from configuration.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The task's URI could not be parsed, or used an unsupported scheme.
    #[error("invalid URI: {0}")]
    UriParse(#[from] url::ParseError),

    /// The URI scheme was valid syntax but not `http`/`https`.
    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// DNS resolution failed or timed out.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// TCP connect failed or timed out.
    #[error("connect error: {0}")]
    Connect(String),

    /// Writing the request failed or timed out.
    #[error("write error: {0}")]
    Write(String),

    /// Reading the response failed, timed out, or hit EOF before the parser
    /// reached `Done`.
    #[error("read error: {0}")]
    Read(String),

    /// The HTTP response failed to parse.
    #[error("parse error: {0}")]
    Parse(String),

    /// The destination file could not be opened (already exists, or a
    /// permission failure).
    #[error("could not open file {path}: {source}")]
    FileOpen {
        /// Path that failed to open.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A write to the destination file failed.
    #[error("file write error: {0}")]
    FileWrite(std::io::Error),

    /// Closing the destination file failed.
    #[error("file close error: {0}")]
    FileClose(std::io::Error),

    /// The download was aborted by an external `stop()` call.
    #[error("aborted")]
    Aborted,

    /// `-n` was not a valid non-negative integer.
    #[error("invalid concurrency value: {0}")]
    InvalidConcurrency(String),

    /// `-l` did not match `^\d+(k|K|m|M)?$`, or evaluated to zero.
    #[error("invalid speed limit: {0}")]
    InvalidSpeedLimit(String),

    /// Argument parsing itself failed (missing flag, malformed value, or a
    /// `clap` usage error) — reported verbatim so the binary can still map
    /// it to exit code 1 instead of letting `clap` terminate the process
    /// with its own exit code.
    #[error("{0}")]
    ArgsParse(String),

    /// The reactor's `mio::Poll`/`Waker` could not be constructed.
    #[error("event loop init failed: {0}")]
    ReactorInit(std::io::Error),

    /// `-f` did not name a file that exists.
    #[error("task file not found: {0}")]
    TaskFileNotFound(String),

    /// The task file could not be read.
    #[error("task file I/O error: {0}")]
    TaskFileIo(#[from] std::io::Error),
}

impl EngineError {
    /// Human-readable detail suitable for `DownloadStatus::detail`.
    pub fn detail(&self) -> String {
        self.to_string()
    }
}
