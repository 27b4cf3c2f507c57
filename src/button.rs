use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio::time::{Instant, sleep};

/// Handler run on the button's release edge.
///
/// It runs in interrupt context and must restrict itself to raising signals.
pub type InterruptHandler = Arc<dyn Fn() + Send + Sync>;

/// Wake button collaborator.
pub trait Button: Send + Sync {
    /// Current sampled level.
    fn is_pressed(&self) -> bool;
    /// Call `handler` on every release edge from now on.
    fn attach_release_interrupt(&self, handler: InterruptHandler) -> Result<()>;
}

/// Polls the button level while the interrupt path is not armed yet.
#[derive(Clone)]
pub struct ButtonMonitor {
    button: Arc<dyn Button>,
    poll_interval: Duration,
}

impl ButtonMonitor {
    pub fn new(button: Arc<dyn Button>, poll_interval: Duration) -> Self {
        Self {
            button,
            poll_interval,
        }
    }

    pub fn button(&self) -> &dyn Button {
        self.button.as_ref()
    }

    pub async fn wait_while_pressed(&self) {
        while self.button.is_pressed() {
            sleep(self.poll_interval).await;
        }
    }

    /// True once the button stayed pressed for `threshold`, false on the first
    /// sample that sees it released.
    pub async fn held_longer_than(&self, threshold: Duration) -> bool {
        let start = Instant::now();

        loop {
            if !self.button.is_pressed() {
                return false;
            }

            if start.elapsed() >= threshold {
                return true;
            }

            sleep(self.poll_interval).await;
        }
    }
}
