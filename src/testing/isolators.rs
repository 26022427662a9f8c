//! Scripted stem isolators for coordinator tests.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::audio::AudioBuffer;
use crate::error::IsolationError;
use crate::generation::cancel::CancellationToken;
use crate::separation::StemIsolator;

/// Token poll interval while sleeping
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Sleep for `duration`, returning early with `Cancelled` once the token fires
fn sleep_cancellable(duration: Duration, token: &CancellationToken) -> Result<(), IsolationError> {
    let deadline = Instant::now() + duration;
    loop {
        if token.is_cancelled() {
            return Err(IsolationError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Passthrough isolator that takes its time
///
/// `started` is notified when isolation begins, so a test can cancel while
/// the run is known to sit in the separation stage.
#[derive(Debug, Clone)]
pub struct SlowIsolator {
    load_delay: Duration,
    isolate_delay: Duration,
    started: Arc<Notify>,
}

impl SlowIsolator {
    pub fn new(load_delay: Duration, isolate_delay: Duration) -> Self {
        Self {
            load_delay,
            isolate_delay,
            started: Arc::new(Notify::new()),
        }
    }

    /// Fires once per `isolate` call
    pub fn started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }
}

impl StemIsolator for SlowIsolator {
    fn name(&self) -> &str {
        "slow"
    }

    fn load_model(&self, token: &CancellationToken) -> Result<(), IsolationError> {
        sleep_cancellable(self.load_delay, token)
    }

    fn isolate(
        &self,
        mix: &AudioBuffer,
        token: &CancellationToken,
    ) -> Result<AudioBuffer, IsolationError> {
        // notify_one stores a permit when nobody is waiting yet
        self.started.notify_one();
        sleep_cancellable(self.isolate_delay, token)?;
        Ok(mix.clone())
    }
}

/// How a [`FailingIsolator`] misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// `load_model` reports the model missing
    ModelUnavailable,
    /// `isolate` reports a separation failure
    SeparationFailed,
    /// `isolate` panics
    Panic,
}

#[derive(Debug, Clone, Copy)]
pub struct FailingIsolator {
    mode: FailureMode,
}

impl FailingIsolator {
    pub fn new(mode: FailureMode) -> Self {
        Self { mode }
    }
}

impl StemIsolator for FailingIsolator {
    fn name(&self) -> &str {
        "failing"
    }

    fn load_model(&self, _token: &CancellationToken) -> Result<(), IsolationError> {
        match self.mode {
            FailureMode::ModelUnavailable => Err(IsolationError::ModelUnavailable {
                reason: "scripted: weights missing".to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn isolate(
        &self,
        mix: &AudioBuffer,
        _token: &CancellationToken,
    ) -> Result<AudioBuffer, IsolationError> {
        match self.mode {
            FailureMode::SeparationFailed => Err(IsolationError::Failed {
                reason: "scripted: separation diverged".to_string(),
            }),
            FailureMode::Panic => panic!("scripted isolator panic"),
            FailureMode::ModelUnavailable => Ok(mix.clone()),
        }
    }
}
