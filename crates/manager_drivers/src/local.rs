//! The only backend that actually works without a hypervisor: it runs the
//! fuzzer binary as a plain child process on the manager's own host. Useful
//! for local debugging, and it is what the test suite and the demo binary
//! exercise end-to-end.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::driver::{RunHandle, VmInstance, VmPool};
use crate::error::VmError;

#[derive(Debug, Default)]
pub struct LocalPool;

#[async_trait::async_trait]
impl VmPool for LocalPool {
    async fn create(&self) -> Result<Box<dyn VmInstance>, VmError> {
        Ok(Box::new(LocalInstance))
    }
}

#[derive(Debug, Default)]
pub struct LocalInstance;

#[async_trait::async_trait]
impl VmInstance for LocalInstance {
    async fn forward(&mut self, port: u16) -> Result<String, VmError> {
        Ok(format!("127.0.0.1:{port}"))
    }

    async fn copy(&mut self, local_path: &Path) -> Result<String, VmError> {
        // Already on the same filesystem; nothing to copy.
        Ok(local_path.display().to_string())
    }

    async fn run(&mut self, timeout: Duration, cmd: &str) -> Result<RunHandle, VmError> {
        let mut parts = cmd.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| VmError::Other("empty command".to_string()))?;
        log::debug!("local instance: running {cmd:?}");

        let mut child = Command::new(program)
            .args(parts)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = mpsc::channel(64);
        let (done_tx, done_rx) = oneshot::channel();

        let out_tx = tx.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if out_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, child.wait()).await;
            let outcome = match result {
                Ok(Ok(_status)) => Ok(()),
                Ok(Err(e)) => Err(VmError::Io(e)),
                Err(_elapsed) => {
                    let _ = child.start_kill();
                    Err(VmError::Timeout)
                }
            };
            let _ = done_tx.send(outcome);
        });

        Ok(RunHandle { stdout: rx, done: done_rx })
    }

    async fn close(&mut self) {}

    fn is_local(&self) -> bool {
        true
    }
}
