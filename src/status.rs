//! Status indicator driven by a single display task.
//!
//! Producers publish the wanted [`DisplayMode`] on a watch channel. The
//! display task owns the indicator line and runs one pattern routine at a
//! time: the current routine is aborted and joined before the next starts.

use crate::models::DeviceMode;
use log::{debug, info};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::sleep};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayMode {
    /// Line held high; the device is awake.
    #[default]
    Steady,
    SingleBlink,
    DoubleBlink,
}

impl DisplayMode {
    /// Levels and hold times of one period, empty for a steady line.
    fn pattern(&self) -> &'static [(bool, u64)] {
        match self {
            DisplayMode::Steady => &[],
            DisplayMode::SingleBlink => &[(false, 500), (true, 500)],
            DisplayMode::DoubleBlink => &[(true, 100), (false, 100), (true, 100), (false, 700)],
        }
    }
}

impl From<DeviceMode> for DisplayMode {
    fn from(mode: DeviceMode) -> Self {
        match mode {
            DeviceMode::Update => DisplayMode::Steady,
            DeviceMode::Registration => DisplayMode::SingleBlink,
            DeviceMode::Router => DisplayMode::DoubleBlink,
        }
    }
}

/// Digital output driving the indicator.
pub trait StatusLine: Send + Sync {
    fn set_level(&self, high: bool);
}

#[derive(Clone)]
pub struct StatusIndicator {
    tx: Arc<watch::Sender<DisplayMode>>,
}

impl StatusIndicator {
    /// Spawn the display task; it ends once every indicator handle is dropped.
    pub fn start(line: Arc<dyn StatusLine>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = watch::channel(DisplayMode::default());
        let handle = tokio::spawn(display_loop(line, rx));

        (Self { tx: Arc::new(tx) }, handle)
    }

    pub fn set_display(&self, mode: DisplayMode) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == mode {
                return false;
            }
            *current = mode;
            true
        });

        if changed {
            info!("status display: {mode:?}");
        }
    }

    pub fn display(&self) -> DisplayMode {
        *self.tx.borrow()
    }
}

struct Routine {
    mode: DisplayMode,
    handle: JoinHandle<()>,
}

impl Routine {
    fn start(line: Arc<dyn StatusLine>, mode: DisplayMode) -> Self {
        Self {
            mode,
            handle: tokio::spawn(run_pattern(line, mode)),
        }
    }

    /// Returns once the routine no longer touches the line.
    async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
        debug!("display routine {:?} stopped", self.mode);
    }
}

async fn run_pattern(line: Arc<dyn StatusLine>, mode: DisplayMode) {
    let pattern = mode.pattern();

    if pattern.is_empty() {
        line.set_level(true);
        return;
    }

    loop {
        for (level, hold) in pattern {
            line.set_level(*level);
            sleep(Duration::from_millis(*hold)).await;
        }
    }
}

async fn display_loop(line: Arc<dyn StatusLine>, mut rx: watch::Receiver<DisplayMode>) {
    let mut routine = Routine::start(line.clone(), *rx.borrow_and_update());

    while rx.changed().await.is_ok() {
        let mode = *rx.borrow_and_update();
        routine.stop().await;
        routine = Routine::start(line.clone(), mode);
    }

    routine.stop().await;
}
