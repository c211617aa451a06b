use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Handle to the limiter's long-running tasks
///
/// Dropping the handle leaves the tasks running; call `shutdown` to stop
/// and join them.
#[derive(Debug)]
pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new(token: CancellationToken, handles: Vec<JoinHandle<()>>) -> Self {
        Self { token, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every task and wait for all of them to finish
    pub async fn shutdown(self) {
        self.token.cancel();

        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        info!("Rate limit background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_cancels_and_joins() {
        let token = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));

        let handle = {
            let token = token.clone();
            let finished = finished.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                finished.store(true, Ordering::SeqCst);
            })
        };

        let tasks = BackgroundTasks::new(token, vec![handle]);
        assert_eq!(tasks.len(), 1);

        tasks.shutdown().await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
