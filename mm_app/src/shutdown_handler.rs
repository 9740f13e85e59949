use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Sets up a Ctrl+C handler that sets the running flag to false on shutdown signal
pub fn setup(running: Arc<AtomicBool>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received");
        running.store(false, Ordering::Relaxed);
    })
}

/// Waits until the running flag is cleared, checking every `poll`
pub async fn wait(running: &AtomicBool, poll: Duration) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_once_flag_cleared() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flag.store(false, Ordering::Relaxed);
        });

        tokio::time::timeout(Duration::from_secs(2), wait(&running, Duration::from_millis(5))).await.expect("flag never cleared");
    }
}
