//! Station/access-point lifecycle of the wifi interface.
//!
//! All driver events are handled by one event task. Reconnects after a
//! qualifying disconnect happen there, never in the task blocked in
//! [`ConnectivityManager::connect`].

use crate::{error::ConnectError, models::WifiCredentials, signal::Signal};
use anyhow::{Context, Result, ensure};
use log::{debug, error, info, warn};
use std::{
    fmt,
    net::Ipv4Addr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::mpsc;

/// Disconnect cause as numbered by the radio driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    AuthExpire,
    AssocLeave,
    NoApFound,
    Other(u8),
}

impl DisconnectReason {
    const AUTH_EXPIRE: u8 = 2;
    const ASSOC_LEAVE: u8 = 8;
    const NO_AP_FOUND: u8 = 201;

    pub fn from_code(code: u8) -> Self {
        match code {
            Self::AUTH_EXPIRE => DisconnectReason::AuthExpire,
            Self::ASSOC_LEAVE => DisconnectReason::AssocLeave,
            Self::NO_AP_FOUND => DisconnectReason::NoApFound,
            other => DisconnectReason::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            DisconnectReason::AuthExpire => Self::AUTH_EXPIRE,
            DisconnectReason::AssocLeave => Self::ASSOC_LEAVE,
            DisconnectReason::NoApFound => Self::NO_AP_FOUND,
            DisconnectReason::Other(code) => *code,
        }
    }

    /// Only these reasons are worth another connect attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DisconnectReason::AuthExpire | DisconnectReason::AssocLeave | DisconnectReason::NoApFound
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::AuthExpire => write!(f, "authentication expired"),
            DisconnectReason::AssocLeave => write!(f, "left association"),
            DisconnectReason::NoApFound => write!(f, "access point not found"),
            DisconnectReason::Other(code) => write!(f, "reason code {code}"),
        }
    }
}

/// Events delivered by the driver after [`WifiDriver::init`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WifiEvent {
    StationStarted,
    StationConnected,
    StationDisconnected { reason: DisconnectReason },
    GotIp(Ipv4Addr),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectivityState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Failed(ConnectError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(2500),
        }
    }
}

/// Radio driver collaborator.
pub trait WifiDriver: Send + Sync {
    /// Bring up the interface; events are reported on `events` from now on.
    fn init(&self, events: mpsc::UnboundedSender<WifiEvent>) -> Result<()>;
    /// Configure station mode and start it; a [`WifiEvent::StationStarted`] follows.
    fn start_station(&self, credentials: &WifiCredentials) -> Result<()>;
    fn connect(&self) -> Result<()>;
    fn start_access_point(&self, name: &str, password: &str) -> Result<()>;
    fn stop(&self) -> Result<()>;
    /// Release the interface handle.
    fn destroy(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct Link {
    initialized: bool,
    state: ConnectivityState,
    retries: u32,
    intentional_disconnect: bool,
    access_point: bool,
    last_error: Option<ConnectError>,
}

struct Inner {
    driver: Arc<dyn WifiDriver>,
    link: Mutex<Link>,
    resolved: Signal,
    policy: RetryPolicy,
}

#[derive(Clone)]
pub struct ConnectivityManager {
    inner: Arc<Inner>,
}

impl ConnectivityManager {
    pub fn new(driver: Arc<dyn WifiDriver>, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver,
                link: Mutex::new(Link::default()),
                resolved: Signal::new(),
                policy,
            }),
        }
    }

    /// Initialize the driver and start the event task. Repeated calls are no-ops.
    pub fn init(&self) -> Result<()> {
        let mut link = self.inner.link();

        if link.initialized {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .driver
            .init(tx)
            .context("failed to initialize wifi driver")?;
        tokio::spawn(handle_events(self.inner.clone(), rx));
        link.initialized = true;

        debug!("wifi initialized");
        Ok(())
    }

    /// Connect as station and wait until the link resolved or `timeout` elapsed.
    ///
    /// A timeout leaves the state untouched and is only recorded in
    /// [`Self::last_failure`].
    pub async fn connect(&self, credentials: &WifiCredentials, timeout: Duration) -> Result<bool> {
        self.init()?;

        if !credentials.is_valid() {
            let mut link = self.inner.link();
            link.state = ConnectivityState::Failed(ConnectError::MissingCredentials);
            link.last_error = Some(ConnectError::MissingCredentials);
            warn!("connect skipped: {}", ConnectError::MissingCredentials);
            return Ok(false);
        }

        {
            let mut link = self.inner.link();
            link.state = ConnectivityState::Connecting;
            link.retries = 0;
            link.intentional_disconnect = false;
            link.access_point = false;
            link.last_error = None;
        }
        self.inner.resolved.clear();

        info!("connecting to {}", credentials.ssid);

        if let Err(e) = self.inner.driver.start_station(credentials) {
            self.inner.link().state = ConnectivityState::Idle;
            return Err(e).context("failed to start station");
        }

        match tokio::time::timeout(timeout, self.inner.resolved.wait()).await {
            Ok(()) => Ok(self.is_connected()),
            Err(_) => {
                warn!("connect timed out after {timeout:?}");
                self.inner.link().last_error = Some(ConnectError::Timeout(timeout));
                Ok(false)
            }
        }
    }

    /// Disconnect on purpose; the resulting disconnect event is not retried.
    pub fn disconnect(&self) -> Result<()> {
        self.inner.link().intentional_disconnect = true;
        self.inner
            .driver
            .stop()
            .context("failed to stop wifi")?;
        self.inner.link().state = ConnectivityState::Idle;

        info!("wifi disconnected");
        Ok(())
    }

    /// Release the interface handle.
    pub fn shutdown(&self) -> Result<()> {
        let state = self.state();
        ensure!(
            state != ConnectivityState::Connecting,
            "cannot release wifi while connecting"
        );

        self.inner
            .driver
            .destroy()
            .context("failed to release wifi")?;

        debug!("wifi released");
        Ok(())
    }

    /// Tear the interface down before sleep, if it is up.
    pub fn power_down(&self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }

        self.disconnect()?;
        self.shutdown()
    }

    /// Switch to access-point mode for router provisioning.
    pub fn connect_as_access_point(&self, name: &str, password: &str) -> Result<()> {
        self.init()?;

        let station_active = {
            let mut link = self.inner.link();
            link.intentional_disconnect = true;
            matches!(
                link.state,
                ConnectivityState::Connecting | ConnectivityState::Connected
            )
        };

        if station_active {
            self.inner
                .driver
                .stop()
                .context("failed to stop station")?;
        }

        self.inner
            .driver
            .start_access_point(name, password)
            .context("failed to start access point")?;

        let mut link = self.inner.link();
        link.state = ConnectivityState::Idle;
        link.access_point = true;

        info!("access point {name} started");
        Ok(())
    }

    pub fn state(&self) -> ConnectivityState {
        self.inner.link().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectivityState::Connected
    }

    pub fn is_access_point(&self) -> bool {
        self.inner.link().access_point
    }

    pub fn retries(&self) -> u32 {
        self.inner.link().retries
    }

    /// Most recent reason a connect call returned `false`.
    pub fn last_failure(&self) -> Option<ConnectError> {
        self.inner.link().last_error
    }
}

impl Inner {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finalize(&self, state: ConnectivityState) {
        {
            let mut link = self.link();
            link.state = state;
            if let ConnectivityState::Failed(e) = state {
                link.last_error = Some(e);
            }
        }
        self.resolved.raise();
    }

    async fn handle(&self, event: WifiEvent) {
        match event {
            WifiEvent::StationStarted => {
                debug!("station started");
                if let Err(e) = self.driver.connect() {
                    error!("failed to connect: {e:#}");
                }
            }
            WifiEvent::StationConnected => {
                debug!("station associated");
                self.link().retries = 0;
            }
            WifiEvent::StationDisconnected { reason } => self.handle_disconnect(reason).await,
            WifiEvent::GotIp(ip) => {
                info!("connected with address {ip}");
                self.link().retries = 0;
                self.finalize(ConnectivityState::Connected);
            }
        }
    }

    async fn handle_disconnect(&self, reason: DisconnectReason) {
        let attempt = {
            let mut link = self.link();

            if link.intentional_disconnect {
                debug!("ignoring intentional disconnect ({reason})");
                return;
            }

            if !reason.is_retryable() {
                drop(link);
                warn!("disconnected: {reason}, not retrying");
                self.finalize(ConnectivityState::Failed(ConnectError::NonRetryable(
                    reason,
                )));
                return;
            }

            if link.retries >= self.policy.max_retries {
                let retries = link.retries;
                drop(link);
                warn!("disconnected: {reason}, giving up after {retries} retries");
                self.finalize(ConnectivityState::Failed(
                    ConnectError::RetriesExhausted(retries),
                ));
                return;
            }

            link.retries += 1;
            link.retries
        };

        info!(
            "disconnected: {reason}, retry {attempt}/{} in {:?}",
            self.policy.max_retries, self.policy.backoff
        );
        tokio::time::sleep(self.policy.backoff).await;

        if self.link().intentional_disconnect {
            debug!("retry dropped, disconnect was requested meanwhile");
            return;
        }

        if let Err(e) = self.driver.connect() {
            error!("failed to reconnect: {e:#}");
        }
    }
}

async fn handle_events(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<WifiEvent>) {
    while let Some(event) = events.recv().await {
        inner.handle(event).await;
    }

    debug!("wifi event channel closed");
}
