use std::io;

/// Errors surfaced by the persistent corpus store. Per-file I/O failures
/// during `open`/`minimize` are logged and skipped rather than raised here;
/// only directory-level failures (can't create/read the workdir) propagate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot open corpus directory {path:?}: {source}")]
    OpenDir { path: std::path::PathBuf, source: io::Error },

    #[error("cannot write corpus entry: {0}")]
    Write(#[from] io::Error),
}

/// Corpus engine errors. `UnknownFuzzer` is a programmer-invariant
/// violation per the manager's error taxonomy: callers treat it as fatal.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("poll from unknown fuzzer {0:?}")]
    UnknownFuzzer(String),
}

/// RPC wire-level errors.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("connection closed")]
    Eof,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}
