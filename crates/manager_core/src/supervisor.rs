//! One task per configured VM slot: boot, launch the fuzzer, watch its
//! console for crashes and stalls, tear down, repeat. See spec §4.4.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use manager_bolts::Suppressions;
use manager_drivers::{RunHandle, VmError, VmInstance, VmPool};

use crate::corpus::CorpusEngine;

/// Empirical constants from spec §9; kept as fields rather than literals so
/// tests can shrink them instead of waiting on real-world timescales.
#[derive(Debug, Clone)]
pub struct SupervisorTuning {
    pub pre_context: usize,
    pub post_context: usize,
    pub scan_overlap: usize,
    pub post_crash_drain: Duration,
    pub no_output_watchdog: Duration,
    pub no_progress_watchdog: Duration,
    pub restart_backoff: Duration,
    pub fuzzer_timeout: Duration,
}

impl Default for SupervisorTuning {
    fn default() -> Self {
        Self {
            pre_context: 256 * 1024,
            post_context: 128 * 1024,
            scan_overlap: 128,
            post_crash_drain: Duration::from_secs(10),
            no_output_watchdog: Duration::from_secs(60),
            no_progress_watchdog: Duration::from_secs(180),
            restart_backoff: Duration::from_secs(10),
            fuzzer_timeout: Duration::from_secs(3600),
        }
    }
}

pub struct Supervisor {
    name: String,
    pool: Arc<dyn VmPool>,
    rpc_addr: String,
    rpc_port: u16,
    procs: u32,
    leak: bool,
    cover: bool,
    sandbox: String,
    debug: bool,
    syzkaller_bin_dir: PathBuf,
    crashes_dir: PathBuf,
    suppressions: Arc<Suppressions>,
    engine: Arc<CorpusEngine>,
    /// Only the first supervisor slot enables leak detection; it's expensive.
    first: bool,
    shutdown: Arc<AtomicBool>,
    tuning: SupervisorTuning,
}

#[allow(clippy::too_many_arguments)]
impl Supervisor {
    pub fn new(
        name: String,
        pool: Arc<dyn VmPool>,
        rpc_addr: String,
        procs: u32,
        leak: bool,
        cover: bool,
        sandbox: String,
        debug: bool,
        syzkaller_bin_dir: PathBuf,
        crashes_dir: PathBuf,
        suppressions: Arc<Suppressions>,
        engine: Arc<CorpusEngine>,
        first: bool,
        shutdown: Arc<AtomicBool>,
        tuning: SupervisorTuning,
    ) -> Self {
        let rpc_port = rpc_addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);
        Self {
            name,
            pool,
            rpc_addr,
            rpc_port,
            procs,
            leak,
            cover,
            sandbox,
            debug,
            syzkaller_bin_dir,
            crashes_dir,
            suppressions,
            engine,
            first,
            shutdown,
            tuning,
        }
    }

    /// Runs forever: create VM, run fuzzer, observe, tear down, backoff if
    /// the iteration failed, repeat until shutdown.
    pub async fn run(&self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.run_iteration().await;
        }
    }

    async fn run_iteration(&self) {
        let mut instance = match self.pool.create().await {
            Ok(inst) => inst,
            Err(e) => {
                log::warn!("{}: failed to create VM instance: {e}", self.name);
                tokio::time::sleep(self.tuning.restart_backoff).await;
                return;
            }
        };

        if let Err(e) = self.run_setup(instance.as_mut()).await {
            log::warn!("{}: setup failed: {e}", self.name);
            instance.close().await;
            tokio::time::sleep(self.tuning.restart_backoff).await;
            return;
        }

        let handle = match self.launch_fuzzer(instance.as_mut()).await {
            Ok(h) => h,
            Err(e) => {
                log::warn!("{}: failed to launch fuzzer: {e}", self.name);
                instance.close().await;
                tokio::time::sleep(self.tuning.restart_backoff).await;
                return;
            }
        };

        self.monitor(instance.as_mut(), handle).await;
        instance.close().await;
    }

    async fn run_setup(&self, instance: &mut dyn VmInstance) -> Result<(), VmError> {
        instance.forward(self.rpc_port).await?;
        instance
            .copy(&self.syzkaller_bin_dir.join("syz-fuzzer"))
            .await?;
        instance
            .copy(&self.syzkaller_bin_dir.join("syz-executor"))
            .await?;
        self.run_precommands(instance).await;
        Ok(())
    }

    /// Best-effort housekeeping (disabling exception-trace noise); failures
    /// here never abort the iteration.
    async fn run_precommands(&self, instance: &mut dyn VmInstance) {
        let precommands = ["echo 0 > /proc/sys/kernel/ftrace_dump_on_oops"];
        for cmd in precommands {
            match instance.run(Duration::from_secs(10), cmd).await {
                Ok(mut handle) => {
                    let _ = handle.done.await;
                }
                Err(e) => log::debug!("{}: precommand {cmd:?} failed: {e}", self.name),
            }
        }
    }

    async fn launch_fuzzer(&self, instance: &mut dyn VmInstance) -> Result<RunHandle, VmError> {
        let leak = self.leak && self.first;
        let cmd = format!(
            "./syz-fuzzer -manager={} -name={} -procs={} -leak={} -cover={} -sandbox={} -debug={}",
            self.rpc_addr, self.name, self.procs, leak, self.cover, self.sandbox, self.debug
        );
        instance.run(self.tuning.fuzzer_timeout, &cmd).await
    }

    /// Consumes console output until the fuzzer exits or a watchdog fires.
    async fn monitor(&self, instance: &mut dyn VmInstance, mut handle: RunHandle) {
        let is_local = instance.is_local();
        let mut output: Vec<u8> = Vec::new();
        let mut match_pos: usize = 0;
        let mut last_output = Instant::now();
        let mut last_execute = Instant::now();
        let mut descriptions: Vec<String> = Vec::new();
        let started = Instant::now();

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }

            let no_output_wait = self.tuning.no_output_watchdog.saturating_sub(last_output.elapsed());
            let no_progress_wait = self
                .tuning
                .no_progress_watchdog
                .saturating_sub(last_execute.elapsed());

            tokio::select! {
                chunk = handle.stdout.recv() => {
                    let Some(bytes) = chunk else {
                        // Driver closed the stdout channel without a `done`
                        // signal yet; keep waiting on `done`.
                        continue;
                    };
                    last_output = Instant::now();
                    output.extend_from_slice(&bytes);

                    if contains_marker(&output[match_pos..], b"executing program") {
                        last_execute = Instant::now();
                    }

                    if let Some(span) = manager_bolts::find_crash(&output[match_pos..]) {
                        tokio::time::sleep(self.tuning.post_crash_drain).await;
                        while let Ok(Some(more)) =
                            tokio::time::timeout(Duration::from_millis(0), handle.stdout.recv()).await
                        {
                            output.extend_from_slice(&more);
                        }

                        let (abs_start, abs_end, description) =
                            match manager_bolts::find_crash(&output[match_pos..]) {
                                Some(rescanned) => (
                                    match_pos + rescanned.start,
                                    match_pos + rescanned.end,
                                    rescanned.description,
                                ),
                                None => (match_pos + span.start, match_pos + span.end, span.description),
                            };

                        self.write_dossier(
                            &output,
                            abs_start,
                            abs_end,
                            &description,
                            &descriptions,
                            started.elapsed(),
                        )
                        .await;
                        descriptions.push(description);

                        if output.len() > 2 * self.tuning.pre_context {
                            let drop_from = output.len() - self.tuning.pre_context;
                            output.drain(..drop_from);
                        }
                    }

                    match_pos = output.len().saturating_sub(self.tuning.scan_overlap);
                }
                result = &mut handle.done => {
                    match result {
                        Ok(Ok(())) => log::info!("{}: fuzzer exited cleanly", self.name),
                        Ok(Err(e)) if e.is_timeout() => {
                            log::info!("{}: running long enough", self.name);
                        }
                        Ok(Err(_)) => {
                            self.write_dossier(
                                &output,
                                output.len(),
                                output.len(),
                                "lost connection",
                                &descriptions,
                                started.elapsed(),
                            )
                            .await;
                        }
                        Err(_) => {
                            self.write_dossier(
                                &output,
                                output.len(),
                                output.len(),
                                "lost connection",
                                &descriptions,
                                started.elapsed(),
                            )
                            .await;
                        }
                    }
                    return;
                }
                () = tokio::time::sleep(no_output_wait), if !is_local => {
                    instance.dump_state().await;
                    self.write_dossier(
                        &output,
                        output.len(),
                        output.len(),
                        "no output",
                        &descriptions,
                        started.elapsed(),
                    )
                    .await;
                    return;
                }
                () = tokio::time::sleep(no_progress_wait), if !is_local => {
                    instance.dump_state().await;
                    self.write_dossier(
                        &output,
                        output.len(),
                        output.len(),
                        "not executing programs",
                        &descriptions,
                        started.elapsed(),
                    )
                    .await;
                    return;
                }
            }
        }
    }

    /// Extracts the context window around `[start, end)`, checks it against
    /// the suppression list, and writes it to `crashes_dir`. A no-op if
    /// shutdown has already been requested: a shutdown-induced "lost
    /// connection" is not a real bug.
    async fn write_dossier(
        &self,
        output: &[u8],
        start: usize,
        end: usize,
        description: &str,
        previous: &[String],
        elapsed: Duration,
    ) {
        if self.shutdown.load(Ordering::Relaxed) {
            return;
        }

        let window_start = start.saturating_sub(self.tuning.pre_context);
        let window_end = (end + self.tuning.post_context).min(output.len());
        let window = &output[window_start..window_end];

        if self.suppressions.matches(window) {
            self.engine.record_stat("suppressed", 1);
            return;
        }

        let mut contents = window.to_vec();
        contents.extend_from_slice(
            format!(
                "\n\n-- elapsed: {elapsed:?}\n-- crash: {description}\n-- previous crashes this iteration: {previous:?}\n"
            )
            .as_bytes(),
        );

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = self.crashes_dir.join(format!("crash-{}-{nanos}", self.name));
        if let Err(e) = std::fs::write(&path, &contents) {
            log::warn!("{}: failed to write crash dossier {path:?}: {e}", self.name);
            return;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o660)) {
                log::warn!("{}: failed to set permissions on {path:?}: {e}", self.name);
            }
        }
        self.engine.record_stat("crashes", 1);
    }
}

fn contains_marker(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tuning_matches_documented_constants() {
        let tuning = SupervisorTuning::default();
        assert_eq!(tuning.pre_context, 256 * 1024);
        assert_eq!(tuning.post_context, 128 * 1024);
        assert_eq!(tuning.scan_overlap, 128);
        assert_eq!(tuning.post_crash_drain, Duration::from_secs(10));
        assert_eq!(tuning.no_output_watchdog, Duration::from_secs(60));
        assert_eq!(tuning.no_progress_watchdog, Duration::from_secs(180));
        assert_eq!(tuning.restart_backoff, Duration::from_secs(10));
    }

    #[test]
    fn marker_search_finds_substring_after_cursor() {
        let buf = b"booting...\nexecuting program 3\n";
        assert!(contains_marker(buf, b"executing program"));
        assert!(!contains_marker(b"booting...", b"executing program"));
    }

    #[test]
    fn rpc_port_parsed_from_address() {
        let engine_dir = tempfile::tempdir().unwrap();
        let (store, _) = crate::store::PersistentStore::open(engine_dir.path(), |_| true).unwrap();
        let calls = crate::call_table::CallTable::new(&[], &Default::default());
        let engine = Arc::new(CorpusEngine::new(
            store,
            calls,
            true,
            Arc::new(crate::external::LineProgramDeserializer),
            Arc::new(crate::external::UniformPriorityModel),
        ));
        let supervisor = Supervisor::new(
            "vm0".to_string(),
            Arc::new(manager_drivers::local::LocalPool),
            "127.0.0.1:1234".to_string(),
            1,
            false,
            true,
            "none".to_string(),
            false,
            PathBuf::from("/bin"),
            PathBuf::from("/tmp"),
            Arc::new(Suppressions::compile(&[]).unwrap()),
            engine,
            true,
            Arc::new(AtomicBool::new(false)),
            SupervisorTuning::default(),
        );
        assert_eq!(supervisor.rpc_port, 1234);
    }
}
