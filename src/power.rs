use crate::{
    button::Button, connectivity::ConnectivityManager, signal::Signal, store::Store,
};
use anyhow::{Context, Result};
use log::{error, info};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Deep-sleep collaborator.
pub trait PowerControl: Send + Sync {
    /// Configure the wake button's pressed level as wake trigger.
    fn arm_wake_source(&self) -> Result<()>;
    /// Enter deep sleep. On hardware this never returns.
    fn enter_deep_sleep(&self);
}

/// Owner of the sleep request and the transition into deep sleep.
#[derive(Clone)]
pub struct PowerLifecycle {
    sleep_request: Arc<Signal>,
    control: Arc<dyn PowerControl>,
}

impl PowerLifecycle {
    pub fn new(control: Arc<dyn PowerControl>) -> Self {
        Self {
            sleep_request: Arc::new(Signal::new()),
            control,
        }
    }

    /// Ask the sleep loop to put the device to sleep. Safe in interrupt context.
    pub fn request_sleep(&self) {
        self.sleep_request.raise();
    }

    pub fn sleep_requested(&self) -> bool {
        self.sleep_request.is_pending()
    }

    /// Let a release of `button` request sleep early.
    pub fn attach_early_wake(&self, button: &dyn Button) -> Result<()> {
        let sleep_request = self.sleep_request.clone();

        button
            .attach_release_interrupt(Arc::new(move || sleep_request.raise()))
            .context("failed to attach early wake interrupt")
    }

    /// Spawn the loop that waits for one sleep request and goes to sleep.
    pub fn spawn_sleep_loop(
        &self,
        store: Store,
        connectivity: ConnectivityManager,
    ) -> JoinHandle<()> {
        let sleep_request = self.sleep_request.clone();
        let control = self.control.clone();

        tokio::spawn(async move {
            sleep_request.wait().await;
            info!("going to sleep");

            if let Err(e) = store.close() {
                error!("failed to close store: {e:#}");
            }

            if let Err(e) = connectivity.power_down() {
                error!("failed to power down wifi: {e:#}");
            }

            if let Err(e) = control.arm_wake_source() {
                error!("failed to arm wake source: {e:#}");
            }

            control.enter_deep_sleep();
        })
    }
}
