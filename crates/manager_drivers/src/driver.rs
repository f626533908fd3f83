use std::path::Path;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::VmError;

/// Channels a running command streams its output and terminal result
/// through. The supervisor's monitor loop selects over both.
pub struct RunHandle {
    pub stdout: mpsc::Receiver<Vec<u8>>,
    pub done: oneshot::Receiver<Result<(), VmError>>,
}

/// One live VM (or VM-like) instance. Scoped to a single supervisor
/// iteration; `close` is called on every exit path.
#[async_trait::async_trait]
pub trait VmInstance: Send {
    /// Sets up port forwarding from the instance to `port` on the manager's
    /// host, returning the address the in-VM fuzzer should dial.
    async fn forward(&mut self, port: u16) -> Result<String, VmError>;

    /// Copies `local_path` into the instance, returning the remote path.
    async fn copy(&mut self, local_path: &Path) -> Result<String, VmError>;

    /// Launches `cmd` inside the instance with a wall-clock `timeout`.
    async fn run(&mut self, timeout: Duration, cmd: &str) -> Result<RunHandle, VmError>;

    /// Releases whatever resources back the instance. Always called.
    async fn close(&mut self);

    /// Best-effort dump of kernel state (sysrq triggers, or equivalent) used
    /// by the supervisor before giving up on a non-responsive instance.
    /// Backends that can't support this are a no-op.
    async fn dump_state(&mut self) {}

    /// Local instances skip the no-output/no-progress watchdogs (debugging
    /// convenience, see spec §4.4).
    fn is_local(&self) -> bool {
        false
    }
}

/// Factory for VM instances of one backend ("qemu", "kvm", "adb", "local").
#[async_trait::async_trait]
pub trait VmPool: Send + Sync {
    async fn create(&self) -> Result<Box<dyn VmInstance>, VmError>;
}
