/// Error taxonomy for VM driver operations.
///
/// `Timeout` is the sentinel the supervisor checks for to tell "the fuzzer
/// ran long enough and got killed on schedule" apart from every other
/// failure, which is treated as a lost connection.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("operation timed out")]
    Timeout,

    #[error("vm driver backend {0:?} is not available in this build")]
    Unsupported(&'static str),

    #[error("vm driver error: {0}")]
    Other(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VmError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, VmError::Timeout)
    }
}
