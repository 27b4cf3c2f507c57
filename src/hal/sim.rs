//! Host simulation of the device hardware.

use crate::{
    button::{Button, InterruptHandler},
    config::SimulationConfig,
    connectivity::{DisconnectReason, WifiDriver, WifiEvent},
    models::WifiCredentials,
    power::PowerControl,
    provisioning::NameService,
    status::StatusLine,
};
use anyhow::{Context, Result};
use log::{debug, info, trace};
use std::{
    net::Ipv4Addr,
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};
use tokio::sync::mpsc;

const MARKER_POLL_INTERVAL: Duration = Duration::from_millis(20);
// handshake timeout, reported for a wrong password
const HANDSHAKE_FAILED: u8 = 15;
const STATION_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 42);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Button that is pressed while a marker file exists.
pub struct MarkerButton {
    marker: PathBuf,
}

impl MarkerButton {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Button for MarkerButton {
    fn is_pressed(&self) -> bool {
        self.marker.exists()
    }

    fn attach_release_interrupt(&self, handler: InterruptHandler) -> Result<()> {
        let marker = self.marker.clone();
        // sampled before spawning so a release right after attaching is an edge
        let mut pressed = marker.exists();

        thread::Builder::new()
            .name("button-edge".to_string())
            .spawn(move || {
                loop {
                    thread::sleep(MARKER_POLL_INTERVAL);
                    let now_pressed = marker.exists();
                    if pressed && !now_pressed {
                        handler();
                    }
                    pressed = now_pressed;
                }
            })
            .context("failed to spawn button edge watcher")?;

        debug!("release interrupt attached to {:?}", self.marker);
        Ok(())
    }
}

pub struct LogStatusLine;

impl StatusLine for LogStatusLine {
    fn set_level(&self, high: bool) {
        trace!("status line {}", if high { "high" } else { "low" });
    }
}

#[derive(Default)]
struct Radio {
    events: Option<mpsc::UnboundedSender<WifiEvent>>,
    credentials: Option<WifiCredentials>,
}

/// Radio with one simulated access point in range.
pub struct SimWifi {
    network: Option<WifiCredentials>,
    radio: Mutex<Radio>,
}

impl SimWifi {
    pub fn new(config: &SimulationConfig) -> Self {
        let network = match (&config.network_ssid, &config.network_password) {
            (Some(ssid), Some(password)) => Some(WifiCredentials::new(ssid, password)),
            _ => None,
        };

        Self {
            network,
            radio: Mutex::new(Radio::default()),
        }
    }

    fn emit(radio: &Radio, event: WifiEvent) {
        if let Some(events) = &radio.events {
            // the receiver is gone once the manager was dropped
            let _ = events.send(event);
        }
    }
}

impl WifiDriver for SimWifi {
    fn init(&self, events: mpsc::UnboundedSender<WifiEvent>) -> Result<()> {
        lock(&self.radio).events = Some(events);
        debug!("simulated radio initialized");
        Ok(())
    }

    fn start_station(&self, credentials: &WifiCredentials) -> Result<()> {
        let mut radio = lock(&self.radio);
        radio.credentials = Some(credentials.clone());
        Self::emit(&radio, WifiEvent::StationStarted);
        Ok(())
    }

    fn connect(&self) -> Result<()> {
        let radio = lock(&self.radio);
        let credentials = radio
            .credentials
            .as_ref()
            .context("station not started")?;

        let event = match &self.network {
            Some(network) if network.ssid != credentials.ssid => WifiEvent::StationDisconnected {
                reason: DisconnectReason::NoApFound,
            },
            None => WifiEvent::StationDisconnected {
                reason: DisconnectReason::NoApFound,
            },
            Some(network) if network.password != credentials.password => {
                WifiEvent::StationDisconnected {
                    reason: DisconnectReason::from_code(HANDSHAKE_FAILED),
                }
            }
            Some(_) => {
                Self::emit(&radio, WifiEvent::StationConnected);
                WifiEvent::GotIp(STATION_ADDRESS)
            }
        };

        Self::emit(&radio, event);
        Ok(())
    }

    fn start_access_point(&self, name: &str, _password: &str) -> Result<()> {
        info!("simulated access point {name} up");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut radio = lock(&self.radio);

        if radio.credentials.take().is_some() {
            Self::emit(
                &radio,
                WifiEvent::StationDisconnected {
                    reason: DisconnectReason::AssocLeave,
                },
            );
        }
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        lock(&self.radio).events = None;
        debug!("simulated radio released");
        Ok(())
    }
}

pub struct LogNameService;

impl NameService for LogNameService {
    fn register_hostname(&self, hostname: &str) -> Result<()> {
        info!("reachable as {hostname}.local");
        Ok(())
    }
}

pub struct SimPower;

impl PowerControl for SimPower {
    fn arm_wake_source(&self) -> Result<()> {
        info!("wake on button press armed");
        Ok(())
    }

    fn enter_deep_sleep(&self) {
        info!("entering deep sleep");
        log::logger().flush();
        std::process::exit(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        fs,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use tempfile::TempDir;

    fn sim_wifi() -> (SimWifi, mpsc::UnboundedReceiver<WifiEvent>) {
        let wifi = SimWifi::new(&SimulationConfig {
            network_ssid: Some("net".to_string()),
            network_password: Some("pw".to_string()),
            ..Default::default()
        });
        let (tx, rx) = mpsc::unbounded_channel();
        wifi.init(tx).expect("should init");
        (wifi, rx)
    }

    fn connect_with(credentials: WifiCredentials) -> Vec<WifiEvent> {
        let (wifi, mut rx) = sim_wifi();
        wifi.start_station(&credentials).expect("should start");
        wifi.connect().expect("should connect");

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn matching_credentials_acquire_address() {
        assert_eq!(
            connect_with(WifiCredentials::new("net", "pw")),
            vec![
                WifiEvent::StationStarted,
                WifiEvent::StationConnected,
                WifiEvent::GotIp(STATION_ADDRESS)
            ]
        );
    }

    #[test]
    fn unknown_network_is_not_found() {
        assert_eq!(
            connect_with(WifiCredentials::new("other", "pw")).last(),
            Some(&WifiEvent::StationDisconnected {
                reason: DisconnectReason::NoApFound
            })
        );
    }

    #[test]
    fn wrong_password_is_not_retryable() {
        let events = connect_with(WifiCredentials::new("net", "wrong"));
        let Some(WifiEvent::StationDisconnected { reason }) = events.last() else {
            panic!("expected disconnect, got {events:?}");
        };
        assert!(!reason.is_retryable());
    }

    #[test]
    fn stopping_station_leaves_association() {
        let (wifi, mut rx) = sim_wifi();
        wifi.start_station(&WifiCredentials::new("net", "pw"))
            .expect("should start");
        wifi.stop().expect("should stop");

        assert_eq!(rx.try_recv().ok(), Some(WifiEvent::StationStarted));
        assert_eq!(
            rx.try_recv().ok(),
            Some(WifiEvent::StationDisconnected {
                reason: DisconnectReason::AssocLeave
            })
        );
    }

    #[test]
    fn marker_release_fires_interrupt() {
        let dir = TempDir::new().expect("should create temp dir");
        let marker = dir.path().join("pressed");
        fs::write(&marker, "").expect("should create marker");

        let button = MarkerButton::new(&marker);
        assert!(button.is_pressed());

        let releases = Arc::new(AtomicUsize::new(0));
        button
            .attach_release_interrupt({
                let releases = releases.clone();
                Arc::new(move || {
                    releases.fetch_add(1, Ordering::SeqCst);
                })
            })
            .expect("should attach");

        fs::remove_file(&marker).expect("should remove marker");
        thread::sleep(Duration::from_millis(200));

        assert!(!button.is_pressed());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
