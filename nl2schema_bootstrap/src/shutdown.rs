// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shutdown Coordination
//!
//! Signal-driven cooperative shutdown. The coordinator owns a watch channel;
//! installing the signal handlers spawns a task that flips it on SIGINT or
//! SIGTERM (Ctrl-C only on non-Unix). Listeners are cheap clones that the
//! binary races against the pipeline future with `select!`.

use tokio::sync::watch;

/// Owner of the shutdown flag.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A listener observing this coordinator.
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Triggers shutdown programmatically.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Spawns the signal-handling task. Idempotent in effect: the first
    /// signal wins, later signals are no-ops on an already-flipped flag.
    pub fn install_signal_handlers(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Shutdown signal received");
            let _ = tx.send(true);
        });
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt =
        signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Observer side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// True once shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when shutdown is requested (immediately if it already was).
    pub async fn wait(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
        // Channel closed without a trigger: treat as shutdown so callers
        // never hang on a dead coordinator.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_listener() {
        let coordinator = ShutdownCoordinator::new();
        let mut listener = coordinator.listener();
        assert!(!listener.is_triggered());

        coordinator.trigger();
        tokio::time::timeout(Duration::from_secs(1), listener.wait())
            .await
            .expect("listener should wake");
        assert!(listener.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_triggered() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger();
        let mut listener = coordinator.listener();
        tokio::time::timeout(Duration::from_millis(50), listener.wait())
            .await
            .expect("already-triggered wait must not block");
    }

    #[tokio::test]
    async fn test_dropped_coordinator_releases_waiters() {
        let coordinator = ShutdownCoordinator::new();
        let mut listener = coordinator.listener();
        drop(coordinator);
        tokio::time::timeout(Duration::from_secs(1), listener.wait())
            .await
            .expect("closed channel should release the waiter");
    }
}
