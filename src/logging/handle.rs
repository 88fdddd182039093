use std::time::{Duration, Instant};

use tracing_appender::non_blocking::WorkerGuard;

const SLOW_SHUTDOWN: Duration = Duration::from_secs(5);

/// Keeps file logging alive; flushes it on shutdown or drop.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self { file_guard }
    }

    pub fn has_file_output(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Flushes and closes the file writer.
    pub fn shutdown(mut self) {
        let start = Instant::now();
        tracing::info!("logging shutdown");
        drop(self.file_guard.take());
        let elapsed = start.elapsed();
        if elapsed > SLOW_SHUTDOWN {
            eprintln!("WARNING: logging shutdown took {}ms", elapsed.as_millis());
        }
    }

    /// Shutdown for async contexts; the flush runs on a blocking thread.
    pub async fn shutdown_async(
        mut self,
        timeout: Duration,
    ) {
        let guard = self.file_guard.take();
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || drop(guard))).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("logging shutdown task failed: {e}"),
            Err(_) => eprintln!(
                "WARNING: logging shutdown exceeded {}ms",
                timeout.as_millis()
            ),
        }
    }
}
