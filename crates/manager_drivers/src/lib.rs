//! The VM driver contract the manager depends on, plus a `local` backend
//! that actually runs (spawns a subprocess) and `qemu`/`kvm`/`adb` stubs for
//! the backends that are real VM drivers in the source system and out of
//! scope here.

pub mod driver;
pub mod error;
pub mod local;
pub mod stub;

pub use driver::{RunHandle, VmInstance, VmPool};
pub use error::VmError;

/// Resolves a backend name (as found in `Config::vm_type`) to its pool
/// factory.
pub fn pool_for(vm_type: &str) -> Result<Box<dyn VmPool>, VmError> {
    match vm_type {
        "local" => Ok(Box::new(local::LocalPool)),
        "qemu" => Ok(Box::new(stub::QemuPool)),
        "kvm" => Ok(Box::new(stub::KvmPool)),
        "adb" => Ok(Box::new(stub::AdbPool)),
        other => Err(VmError::Other(format!("unknown vm type {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_backend_runs_a_process() {
        let pool = pool_for("local").unwrap();
        let mut instance = pool.create().await.unwrap();
        let mut handle = instance
            .run(std::time::Duration::from_secs(5), "echo hello")
            .await
            .unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = handle.stdout.recv().await {
            collected.extend(chunk);
        }
        assert!(String::from_utf8_lossy(&collected).contains("hello"));
        assert!(handle.done.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unsupported_backend_fails_fast() {
        let pool = pool_for("qemu").unwrap();
        let err = pool.create().await.unwrap_err();
        assert!(!err.is_timeout());
    }

    #[test]
    fn unknown_backend_name_rejected() {
        assert!(pool_for("made-up").is_err());
    }
}
