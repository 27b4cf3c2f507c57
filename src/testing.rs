//! In-memory hardware collaborators for unit tests.

use crate::{
    button::{Button, InterruptHandler},
    connectivity::{DisconnectReason, WifiDriver, WifiEvent},
    models::WifiCredentials,
    power::PowerControl,
    provisioning::NameService,
    status::StatusLine,
};
use anyhow::Result;
use std::{
    collections::VecDeque,
    net::Ipv4Addr,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};

/// What the fake radio reports after each connect call.
#[derive(Clone, Copy, Debug)]
pub enum WifiOutcome {
    GotIp,
    Disconnect(DisconnectReason),
    /// Associates, then drops before an address is assigned.
    AssociateThenDisconnect(DisconnectReason),
    Silent,
}

pub struct FakeWifi {
    outcome: WifiOutcome,
    script: Mutex<VecDeque<WifiOutcome>>,
    events: Mutex<Option<mpsc::UnboundedSender<WifiEvent>>>,
    station: Mutex<bool>,
    access_point: Mutex<Option<(String, String)>>,
    init_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
}

impl FakeWifi {
    pub fn new(outcome: WifiOutcome) -> Self {
        Self {
            outcome,
            script: Mutex::new(VecDeque::new()),
            events: Mutex::new(None),
            station: Mutex::new(false),
            access_point: Mutex::new(None),
            init_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
        }
    }

    /// Play `outcomes` on successive connect calls, then fall back to `last`.
    pub fn scripted(outcomes: impl IntoIterator<Item = WifiOutcome>, last: WifiOutcome) -> Self {
        let wifi = Self::new(last);
        *wifi.script.lock().unwrap() = outcomes.into_iter().collect();
        wifi
    }

    fn emit(&self, event: WifiEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn access_point(&self) -> Option<(String, String)> {
        self.access_point.lock().unwrap().clone()
    }
}

impl WifiDriver for FakeWifi {
    fn init(&self, events: mpsc::UnboundedSender<WifiEvent>) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn start_station(&self, _credentials: &WifiCredentials) -> Result<()> {
        *self.station.lock().unwrap() = true;
        self.emit(WifiEvent::StationStarted);
        Ok(())
    }

    fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.outcome);

        match outcome {
            WifiOutcome::GotIp => {
                self.emit(WifiEvent::StationConnected);
                self.emit(WifiEvent::GotIp(Ipv4Addr::new(192, 168, 1, 50)));
            }
            WifiOutcome::Disconnect(reason) => {
                self.emit(WifiEvent::StationDisconnected { reason })
            }
            WifiOutcome::AssociateThenDisconnect(reason) => {
                self.emit(WifiEvent::StationConnected);
                self.emit(WifiEvent::StationDisconnected { reason });
            }
            WifiOutcome::Silent => {}
        }
        Ok(())
    }

    fn start_access_point(&self, name: &str, password: &str) -> Result<()> {
        *self.access_point.lock().unwrap() = Some((name.to_string(), password.to_string()));
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);

        let was_station = std::mem::replace(&mut *self.station.lock().unwrap(), false);
        if was_station {
            self.emit(WifiEvent::StationDisconnected {
                reason: DisconnectReason::AssocLeave,
            });
        }
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Button pressed until a fixed point in (virtual) time.
pub struct FakeButton {
    released_at: Instant,
    handler: Mutex<Option<InterruptHandler>>,
}

impl FakeButton {
    pub fn held_for(duration: Duration) -> Self {
        Self {
            released_at: Instant::now() + duration,
            handler: Mutex::new(None),
        }
    }

    pub fn released() -> Self {
        Self::held_for(Duration::ZERO)
    }

    pub fn fire_release(&self) {
        if let Some(handler) = self.handler.lock().unwrap().as_ref() {
            handler();
        }
    }
}

impl Button for FakeButton {
    fn is_pressed(&self) -> bool {
        Instant::now() < self.released_at
    }

    fn attach_release_interrupt(&self, handler: InterruptHandler) -> Result<()> {
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingLine {
    levels: Mutex<Vec<(bool, Instant)>>,
}

impl RecordingLine {
    pub fn levels(&self) -> Vec<(bool, Instant)> {
        self.levels.lock().unwrap().clone()
    }

    pub fn last_level(&self) -> Option<bool> {
        self.levels.lock().unwrap().last().map(|(level, _)| *level)
    }
}

impl StatusLine for RecordingLine {
    fn set_level(&self, high: bool) {
        self.levels.lock().unwrap().push((high, Instant::now()));
    }
}

#[derive(Default)]
pub struct FakePower {
    armed: AtomicUsize,
    deep_sleeps: AtomicUsize,
}

impl FakePower {
    pub fn armed(&self) -> usize {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn deep_sleeps(&self) -> usize {
        self.deep_sleeps.load(Ordering::SeqCst)
    }
}

impl PowerControl for FakePower {
    fn arm_wake_source(&self) -> Result<()> {
        self.armed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn enter_deep_sleep(&self) {
        self.deep_sleeps.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeNames {
    registered: Mutex<Vec<String>>,
}

impl FakeNames {
    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }
}

impl NameService for FakeNames {
    fn register_hostname(&self, hostname: &str) -> Result<()> {
        self.registered.lock().unwrap().push(hostname.to_string());
        Ok(())
    }
}
