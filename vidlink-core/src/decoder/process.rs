//! Child-process supervision for the selected pipeline.
//!
//! Selection walks the ordered catalog: infeasible candidates are
//! skipped, each remaining one is spawned and given a short
//! confirmation window to prove it can stay alive. The first survivor
//! wins; a candidate that exits during the window has its stderr
//! excerpt logged and the next one is tried. Once running, a watcher
//! task drains stderr for diagnostics — it never restarts the process.
//! A failed frame write means the decoder died, which ends the whole
//! stream session; reselection happens on the next session, not here.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::decoder::pipeline::{DisplayProbe, PipelineDescriptor};
use crate::error::StreamError;

// ── SupervisorConfig ─────────────────────────────────────────────

/// Tunables for pipeline selection and teardown.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long a freshly spawned pipeline must survive to be selected.
    pub confirm_window: Duration,
    /// Grace period between terminate and kill.
    pub grace: Duration,
    /// Maximum stderr bytes logged for a failed candidate.
    pub stderr_excerpt: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            confirm_window: Duration::from_millis(750),
            grace: Duration::from_secs(3),
            stderr_excerpt: 200,
        }
    }
}

// ── Selection ────────────────────────────────────────────────────

/// Walk `catalog` in order and return the first pipeline that is
/// feasible for `probe` and survives its confirmation window.
pub async fn select_and_start(
    catalog: &[PipelineDescriptor],
    probe: &DisplayProbe,
    config: &SupervisorConfig,
) -> Result<DecoderProcess, StreamError> {
    let mut tried = 0usize;

    for desc in catalog {
        if !desc.requirement.satisfied_by(probe) {
            debug!(pipeline = %desc.name, "skipping infeasible pipeline");
            continue;
        }

        tried += 1;
        info!(pipeline = %desc.name, "trying decoder pipeline");

        let mut child = match spawn_candidate(desc) {
            Ok(child) => child,
            Err(e) => {
                warn!(pipeline = %desc.name, "spawn failed: {e}");
                continue;
            }
        };

        tokio::time::sleep(config.confirm_window).await;

        match child.try_wait() {
            Ok(None) => {
                // Still alive past the window: selected. No further
                // candidates are tried.
                return DecoderProcess::adopt(desc.name.clone(), child);
            }
            Ok(Some(status)) => {
                let excerpt = stderr_excerpt(child, config.stderr_excerpt).await;
                warn!(
                    pipeline = %desc.name,
                    %status,
                    "pipeline exited during confirmation: {excerpt}"
                );
            }
            Err(e) => {
                warn!(pipeline = %desc.name, "wait failed: {e}");
                let _ = child.start_kill();
            }
        }
    }

    Err(StreamError::AllPipelinesFailed { tried })
}

fn spawn_candidate(desc: &PipelineDescriptor) -> std::io::Result<Child> {
    let (program, args) = desc
        .argv
        .split_first()
        .ok_or_else(|| std::io::Error::other("empty argv"))?;

    Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

/// Collect up to `limit` bytes of stderr from an exited candidate.
async fn stderr_excerpt(mut child: Child, limit: usize) -> String {
    drop(child.stdin.take());
    match child.wait_with_output().await {
        Ok(output) => {
            let text = String::from_utf8_lossy(&output.stderr);
            let mut excerpt: String = text.chars().take(limit).collect();
            if text.len() > excerpt.len() {
                excerpt.push('…');
            }
            excerpt.trim().to_string()
        }
        Err(e) => format!("(stderr unavailable: {e})"),
    }
}

// ── DecoderProcess ───────────────────────────────────────────────

/// A live, selected pipeline process.
///
/// Owns the child and its stdin; a background watcher drains stderr.
/// The process never outlives its stream session: the session calls
/// [`terminate`](Self::terminate) on teardown.
#[derive(Debug)]
pub struct DecoderProcess {
    name: String,
    child: Child,
    stdin: ChildStdin,
    watcher: JoinHandle<()>,
}

impl DecoderProcess {
    fn adopt(name: String, mut child: Child) -> Result<Self, StreamError> {
        let stdin = child.stdin.take().ok_or_else(|| StreamError::DecoderIo {
            pipeline: name.clone(),
            reason: "stdin not piped".into(),
        })?;

        let stderr = child.stderr.take();
        let watcher_name = name.clone();
        let watcher = tokio::spawn(async move {
            let Some(stderr) = stderr else { return };
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.contains("ERROR") || line.contains("WARN") {
                    warn!(pipeline = %watcher_name, "decoder: {line}");
                } else {
                    debug!(pipeline = %watcher_name, "decoder: {line}");
                }
            }
        });

        info!(pipeline = %name, pid = child.id(), "decoder pipeline started");

        Ok(Self {
            name,
            child,
            stdin,
            watcher,
        })
    }

    /// Pipeline name, for logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forward one frame payload to the decoder's stdin.
    ///
    /// Synchronous with respect to the session: frames go out strictly
    /// in arrival order, bounded by the child's own backpressure. A
    /// broken pipe or write failure is fatal for the session.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), StreamError> {
        let write = async {
            self.stdin.write_all(payload).await?;
            self.stdin.flush().await
        };
        write.await.map_err(|e| StreamError::DecoderIo {
            pipeline: self.name.clone(),
            reason: e.to_string(),
        })
    }

    /// Whether the child has exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Terminate gracefully, then kill after the grace period.
    pub async fn terminate(mut self, grace: Duration) {
        // Closing stdin lets a well-behaved pipeline drain and exit.
        drop(self.stdin);

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!(pipeline = %self.name, %status, "decoder exited"),
            Ok(Err(e)) => warn!(pipeline = %self.name, "decoder wait failed: {e}"),
            Err(_) => {
                warn!(pipeline = %self.name, "decoder did not exit in {grace:?}, killing");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }

        self.watcher.abort();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::decoder::pipeline::Feasibility;

    fn sh(name: &str, script: &str, requirement: Feasibility) -> PipelineDescriptor {
        PipelineDescriptor::new(name, &["sh", "-c", script], requirement)
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            confirm_window: Duration::from_millis(150),
            grace: Duration::from_millis(500),
            stderr_excerpt: 200,
        }
    }

    #[tokio::test]
    async fn selects_first_surviving_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("fourth-was-spawned");
        let catalog = vec![
            sh("infeasible", "cat", Feasibility::Never),
            sh("dies-at-once", "echo boom >&2; exit 1", Feasibility::Always),
            sh("survivor", "cat", Feasibility::Always),
            sh(
                "never-reached",
                &format!("touch {} && cat", marker.display()),
                Feasibility::Always,
            ),
        ];

        let decoder = select_and_start(&catalog, &DisplayProbe::default(), &fast_config())
            .await
            .unwrap();
        assert_eq!(decoder.name(), "survivor");
        assert!(!marker.exists(), "candidate after the survivor was spawned");
        decoder.terminate(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn all_failing_candidates_yield_error() {
        let catalog = vec![
            sh("a", "exit 1", Feasibility::Always),
            sh("b", "exit 2", Feasibility::Always),
            sh("c", "cat", Feasibility::Never),
        ];

        let err = select_and_start(&catalog, &DisplayProbe::default(), &fast_config())
            .await
            .expect_err("selection should fail");
        // Only the two feasible candidates count as tried.
        assert!(matches!(err, StreamError::AllPipelinesFailed { tried: 2 }));
    }

    #[tokio::test]
    async fn write_frame_reaches_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("sink");
        let catalog = vec![sh(
            "tee",
            &format!("cat > {}", out.display()),
            Feasibility::Always,
        )];

        let mut decoder = select_and_start(&catalog, &DisplayProbe::default(), &fast_config())
            .await
            .unwrap();
        decoder.write_frame(b"HELLO").await.unwrap();
        decoder.write_frame(b"BYE").await.unwrap();
        decoder.terminate(Duration::from_secs(1)).await;

        assert_eq!(std::fs::read(&out).unwrap(), b"HELLOBYE");
    }

    #[tokio::test]
    async fn write_to_dead_decoder_is_decoder_io() {
        // `exec` so the shell is replaced and the killed pid is the one
        // holding the pipe (dash may fork instead of exec'ing `cat`).
        let catalog = vec![sh("short-lived", "exec cat", Feasibility::Always)];
        let mut decoder = select_and_start(&catalog, &DisplayProbe::default(), &fast_config())
            .await
            .unwrap();

        // Kill it behind the supervisor's back, then write until the
        // broken pipe surfaces.
        assert!(decoder.is_alive());
        unsafe {
            libc::kill(decoder.child.id().unwrap() as libc::pid_t, libc::SIGKILL);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut saw_error = false;
        for _ in 0..32 {
            if let Err(e) = decoder.write_frame(&[0u8; 65536]).await {
                assert!(matches!(e, StreamError::DecoderIo { .. }));
                saw_error = true;
                break;
            }
        }
        assert!(saw_error, "broken pipe never surfaced");
        decoder.terminate(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn terminate_kills_stubborn_process() {
        // Ignores SIGTERM; must be killed after the grace period.
        let catalog = vec![sh(
            "stubborn",
            "trap '' TERM; while true; do sleep 1; done",
            Feasibility::Always,
        )];
        let decoder = select_and_start(&catalog, &DisplayProbe::default(), &fast_config())
            .await
            .unwrap();
        let started = std::time::Instant::now();
        decoder.terminate(Duration::from_millis(300)).await;
        // Returned, and did not hang for more than grace + slack.
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
