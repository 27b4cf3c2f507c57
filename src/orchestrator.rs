//! Boot-time mode selection.
//!
//! Every boot runs the same fixed sequence from the top; nothing carries
//! over from a previous wake except what the store persisted.

use crate::{
    account_client::AccountService,
    button::ButtonMonitor,
    config::BootTiming,
    connectivity::ConnectivityManager,
    models::DeviceMode,
    power::PowerLifecycle,
    provisioning::Provisioner,
    status::{DisplayMode, StatusIndicator},
    store::Store,
};
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootStage {
    BootCheck,
    ArmSleepInterrupt,
    ConnectOrProvisionRouter,
    UpdateOrProvisionRegistration,
    Sleeping,
}

/// Outcome of one boot cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootReport {
    pub mode: DeviceMode,
    /// The button was held long enough to drop the account binding.
    pub reset_requested: bool,
}

/// Everything the orchestrator drives.
pub struct Collaborators<A, P> {
    pub timing: BootTiming,
    pub button: ButtonMonitor,
    pub status: StatusIndicator,
    pub connectivity: ConnectivityManager,
    pub power: PowerLifecycle,
    pub store: Store,
    pub account: Arc<A>,
    pub provisioner: Arc<P>,
}

pub struct Orchestrator<A, P> {
    c: Collaborators<A, P>,
    stage: BootStage,
}

impl<A, P> Orchestrator<A, P>
where
    A: AccountService,
    P: Provisioner,
{
    pub fn new(collaborators: Collaborators<A, P>) -> Self {
        Self {
            c: collaborators,
            stage: BootStage::BootCheck,
        }
    }

    pub fn stage(&self) -> BootStage {
        self.stage
    }

    fn enter(&mut self, stage: BootStage) {
        info!("boot stage: {stage:?}");
        self.stage = stage;
    }

    fn select_mode(&self, mode: DeviceMode) {
        info!("entering {mode}");
        self.c.status.set_display(DisplayMode::from(mode));
    }

    /// Run one boot cycle up to the transition into deep sleep.
    pub async fn run(&mut self) -> Result<BootReport> {
        self.enter(BootStage::BootCheck);
        let reset_requested = self.boot_check().await?;

        self.enter(BootStage::ArmSleepInterrupt);
        let sleep_loop = self.arm_sleep_interrupt().await?;

        self.enter(BootStage::ConnectOrProvisionRouter);
        let mode = if self.connect_or_provision_router().await? {
            self.enter(BootStage::UpdateOrProvisionRegistration);
            self.update_or_provision_registration().await?
        } else {
            DeviceMode::Router
        };

        self.enter(BootStage::Sleeping);
        self.c.power.request_sleep();
        sleep_loop.await.context("sleep loop failed")?;

        Ok(BootReport {
            mode,
            reset_requested,
        })
    }

    async fn boot_check(&self) -> Result<bool> {
        if !self.c.button.held_longer_than(self.c.timing.reset_hold).await {
            return Ok(false);
        }

        info!("reset requested, clearing account binding");
        self.c.store.clear_account_binding()?;
        self.c
            .status
            .set_display(DisplayMode::from(DeviceMode::Registration));

        Ok(true)
    }

    async fn arm_sleep_interrupt(&self) -> Result<JoinHandle<()>> {
        self.c.button.wait_while_pressed().await;
        tokio::time::sleep(self.c.timing.release_settle).await;

        self.c.power.attach_early_wake(self.c.button.button())?;

        Ok(self
            .c
            .power
            .spawn_sleep_loop(self.c.store.clone(), self.c.connectivity.clone()))
    }

    /// Returns whether the station link is up. Otherwise router credentials
    /// were collected and stored for the next boot.
    async fn connect_or_provision_router(&self) -> Result<bool> {
        let credentials = self.c.store.wifi_credentials()?;

        if self
            .c
            .connectivity
            .connect(&credentials, self.c.timing.connect_timeout)
            .await?
        {
            return Ok(true);
        }

        match self.c.connectivity.last_failure() {
            Some(e) => warn!("connect failed: {e}"),
            None => warn!("connect failed"),
        }

        self.select_mode(DeviceMode::Router);

        let credentials = self.c.provisioner.run_router_session().await?;
        self.c.store.save_wifi_credentials(&credentials)?;

        info!("router credentials stored, connecting on next wake");
        Ok(false)
    }

    async fn update_or_provision_registration(&self) -> Result<DeviceMode> {
        let binding = self.c.store.account_binding()?;

        let updated = match self.c.account.update(&binding).await {
            Ok(updated) => updated,
            Err(e) => {
                error!("update failed: {e:#}");
                false
            }
        };

        if updated {
            self.select_mode(DeviceMode::Update);
            info!("watering event reported");
            return Ok(DeviceMode::Update);
        }

        self.select_mode(DeviceMode::Registration);

        let binding = self.c.provisioner.run_registration_session().await?;
        self.c.store.save_account_binding(&binding)?;

        Ok(DeviceMode::Registration)
    }
}
