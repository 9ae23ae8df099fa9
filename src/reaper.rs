//! Log streaming and container reaping
//!
//! Every container started by the runner ends in `Reaper::reap`, which waits
//! for it, resolves an exit code and removes it. Stop and remove failures are
//! logged and swallowed so they never hide the run's result.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::exit_code::ExitStatus;
use crate::engine::ContainerEngine;
use crate::interrupt::Interrupt;

/// Destination for live container output
pub type LogSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Request a bounded stop; never fails
pub async fn stop_container(engine: &dyn ContainerEngine, id: &str, timeout: Duration) {
    info!(
        "Stopping container {} (timeout {}s)",
        short_id(id),
        timeout.as_secs()
    );
    if let Err(e) = engine.stop(id, timeout).await {
        warn!("Failed to stop container {}: {}", short_id(id), e);
    }
}

/// Force-remove a container; never fails
pub async fn remove_container(engine: &dyn ContainerEngine, id: &str) {
    match engine.remove(id, true).await {
        Ok(()) => debug!("Removed container {}", short_id(id)),
        Err(e) => warn!("Failed to remove container {}: {}", short_id(id), e),
    }
}

pub(crate) fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

/// Forwards a container's combined output as it arrives
#[derive(Clone)]
pub struct LogStreamer {
    engine: Arc<dyn ContainerEngine>,
    sink: Arc<Mutex<LogSink>>,
    interrupt: Interrupt,
    stop_timeout: Duration,
}

impl LogStreamer {
    /// Streams to the process's stdout
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        interrupt: Interrupt,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            sink: Arc::new(Mutex::new(Box::new(tokio::io::stdout()))),
            interrupt,
            stop_timeout,
        }
    }

    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = Arc::new(Mutex::new(sink));
        self
    }

    /// Follow the container's output until it ends.
    ///
    /// Returns `true` if the user interrupted; the container has then been
    /// asked to stop.
    pub async fn stream(&self, id: &str) -> bool {
        let mut logs = self.engine.logs(id);
        let mut sink = self.sink.lock().await;

        loop {
            tokio::select! {
                biased;
                _ = self.interrupt.triggered() => {
                    info!("Interrupted by user");
                    stop_container(self.engine.as_ref(), id, self.stop_timeout).await;
                    return true;
                }
                chunk = logs.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if let Err(e) = sink.write_all(&bytes).await {
                            warn!("Failed to forward container output: {}", e);
                        }
                        let _ = sink.flush().await;
                    }
                    Some(Err(e)) => {
                        warn!("Log stream for {} ended early: {}", short_id(id), e);
                        return false;
                    }
                    None => return false,
                },
            }
        }
    }
}

/// Outcome of a reaped container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    pub exit_code: i64,
    pub interrupted: bool,
}

/// Waits for, and then removes, a container
#[derive(Clone)]
pub struct Reaper {
    engine: Arc<dyn ContainerEngine>,
    interrupt: Interrupt,
    stop_timeout: Duration,
}

impl Reaper {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        interrupt: Interrupt,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            interrupt,
            stop_timeout,
        }
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Wait for the container to stop and resolve its exit code.
    ///
    /// An interrupt while waiting issues a stop and keeps waiting. If the wait
    /// itself fails (some engines remove finished containers on their own),
    /// the code is `ExitStatus::FAILURE`. The container is not removed.
    pub async fn wait(&self, id: &str) -> Reaped {
        let mut interrupted = false;
        let wait = self.engine.wait(id);
        tokio::pin!(wait);

        let result = tokio::select! {
            biased;
            result = &mut wait => result,
            _ = self.interrupt.triggered() => {
                info!("Interrupted by user");
                interrupted = true;
                stop_container(self.engine.as_ref(), id, self.stop_timeout).await;
                wait.await
            }
        };

        let exit_code = match result {
            Ok(code) => code,
            Err(e) => {
                warn!(
                    "Could not wait for container {}: {}; reporting failure",
                    short_id(id),
                    e
                );
                ExitStatus::FAILURE as i64
            }
        };

        Reaped {
            exit_code,
            interrupted,
        }
    }

    /// Wait, then remove unconditionally
    pub async fn reap(&self, id: &str) -> Reaped {
        let reaped = self.wait(id).await;
        remove_container(self.engine.as_ref(), id).await;
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::{Call, FakeEngine};
    use crate::engine::ContainerRunSpec;
    use tokio::io::AsyncReadExt;

    async fn started(engine: &FakeEngine) -> String {
        let spec = ContainerRunSpec::new("base:latest", "/worksrc").with_command(["true"]);
        engine.run_detached(&spec).await.unwrap()
    }

    fn parts() -> (Arc<FakeEngine>, Interrupt) {
        (
            Arc::new(FakeEngine::new().with_image("base:latest")),
            Interrupt::new(),
        )
    }

    #[tokio::test]
    async fn test_stream_forwards_output() {
        let (engine, interrupt) = parts();
        let id = started(&engine).await;
        let (sink, mut reader) = tokio::io::duplex(4096);

        let streamer = LogStreamer::new(engine.clone(), interrupt, Duration::from_secs(5))
            .with_sink(Box::new(sink));
        let interrupted = streamer.stream(&id).await;
        drop(streamer);

        assert!(!interrupted);
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello from container\n");
    }

    #[tokio::test]
    async fn test_interrupt_during_stream_stops_container() {
        let (engine, interrupt) = parts();
        engine.hang_logs();
        let id = started(&engine).await;

        let streamer = LogStreamer::new(engine.clone(), interrupt.clone(), Duration::from_secs(5))
            .with_sink(Box::new(tokio::io::sink()));
        interrupt.trigger();
        let interrupted = streamer.stream(&id).await;

        assert!(interrupted);
        assert!(engine.calls().contains(&Call::Stop(id)));
    }

    #[tokio::test]
    async fn test_reap_removes_container() {
        let (engine, interrupt) = parts();
        engine.set_task_exit_code(3);
        let id = started(&engine).await;

        let reaped = Reaper::new(engine.clone(), interrupt, Duration::from_secs(5))
            .reap(&id)
            .await;

        assert_eq!(reaped.exit_code, 3);
        assert!(!reaped.interrupted);
        assert!(engine.leaked_containers().is_empty());
    }

    #[tokio::test]
    async fn test_wait_failure_defaults_and_still_removes() {
        let (engine, interrupt) = parts();
        engine.fail_wait();
        let id = started(&engine).await;

        let reaped = Reaper::new(engine.clone(), interrupt, Duration::from_secs(5))
            .reap(&id)
            .await;

        assert_eq!(reaped.exit_code, ExitStatus::FAILURE as i64);
        assert!(engine.calls().contains(&Call::Remove(id)));
        assert!(engine.leaked_containers().is_empty());
    }

    #[tokio::test]
    async fn test_remove_failure_is_swallowed() {
        let (engine, _) = parts();
        remove_container(engine.as_ref(), "does-not-exist").await;
        assert!(engine
            .calls()
            .contains(&Call::Remove("does-not-exist".to_string())));
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("c1"), "c1");
    }
}
