//! Cooperative shutdown.
//!
//! The session loop polls a `ShutdownFlag`; signals only ever flip that flag
//! or end the process. `ShutdownController` is the signal policy and touches
//! nothing outside the flag, so it can be driven directly in tests.

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

/// Signals that ask for a graceful stop on first delivery.
pub const GRACEFUL_SIGNALS: [Signal; 4] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGQUIT,
    Signal::SIGABRT,
];

/// Signals the agent listens for but does not survive.
pub const FATAL_SIGNALS: [Signal; 3] = [Signal::SIGHUP, Signal::SIGUSR1, Signal::SIGUSR2];

/// Cooperative stop flag shared by the signal handlers, the dispatcher and the
/// session loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sets the flag. Returns true if it was already set.
    pub fn set(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Stopping,
}

/// What to do about a delivered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// The flag was set; the loop stops at its next check
    BeginShutdown,
    /// Exit immediately with a failure status
    Terminate,
}

pub struct ShutdownController {
    flag: ShutdownFlag,
}

impl ShutdownController {
    pub fn new(flag: ShutdownFlag) -> Self {
        Self { flag }
    }

    pub fn state(&self) -> ShutdownState {
        if self.flag.is_set() {
            ShutdownState::Stopping
        } else {
            ShutdownState::Running
        }
    }

    /// Applies one signal delivery.
    ///
    /// A graceful signal while running starts the stop. The same signal again
    /// while stopping, or any other signal, terminates.
    pub fn on_signal(&self, signal: Signal) -> SignalAction {
        if !GRACEFUL_SIGNALS.contains(&signal) {
            return SignalAction::Terminate;
        }
        if self.flag.set() {
            SignalAction::Terminate
        } else {
            SignalAction::BeginShutdown
        }
    }
}

/// Routes OS signals to a `ShutdownController` for `flag`.
///
/// One listener task per signal; a `Terminate` decision exits the process
/// with status 1.
pub fn install_signal_handlers(flag: ShutdownFlag) -> Result<()> {
    let controller = Arc::new(ShutdownController::new(flag));

    for sig in GRACEFUL_SIGNALS.into_iter().chain(FATAL_SIGNALS) {
        let mut stream = signal(SignalKind::from_raw(sig as i32))
            .with_context(|| format!("Failed to create {} handler", sig.as_str()))?;
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                match controller.on_signal(sig) {
                    SignalAction::BeginShutdown => {
                        tracing::info!(
                            signal = sig.as_str(),
                            state = ?controller.state(),
                            "Signal received, stopping"
                        );
                    }
                    SignalAction::Terminate => {
                        if GRACEFUL_SIGNALS.contains(&sig) {
                            tracing::error!(
                                signal = sig.as_str(),
                                "Signal received while already stopping, exiting now"
                            );
                        } else {
                            tracing::error!(signal = sig.as_str(), "Exiting on signal");
                        }
                        std::process::exit(1);
                    }
                }
            }
        });
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/shutdown_tests.rs"]
mod tests;
