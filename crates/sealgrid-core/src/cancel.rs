//! Cancellation scopes.
//!
//! A `CancelScope` is handed down through every blocking call (resource
//! admission, single-flight waits, network transfers). It resolves when its
//! `CancelHandle` fires or its deadline passes, whichever comes first.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a scoped operation stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Cancelled {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation signal plus optional deadline, cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelScope {
    signal: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Fires the scope(s) created alongside it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace succeeds even when every scope has been dropped.
        self.tx.send_replace(true);
    }
}

impl CancelScope {
    /// A scope that is never cancelled and has no deadline.
    pub fn background() -> Self {
        let (_tx, signal) = watch::channel(false);
        Self {
            signal,
            deadline: None,
        }
    }

    /// A fresh scope together with the handle that cancels it.
    pub fn new() -> (Self, CancelHandle) {
        let (tx, signal) = watch::channel(false);
        (
            Self {
                signal,
                deadline: None,
            },
            CancelHandle { tx },
        )
    }

    /// Derive a scope that additionally expires after `timeout`.
    ///
    /// The earlier of the existing and the new deadline wins.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };
        Self {
            signal: self.signal.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check.
    pub fn check(&self) -> Result<(), Cancelled> {
        if *self.signal.borrow() {
            return Err(Cancelled::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Cancelled::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolve once the scope is cancelled or its deadline passes.
    pub async fn cancelled(&self) -> Cancelled {
        let mut signal = self.signal.clone();
        let fired = async move {
            loop {
                if *signal.borrow_and_update() {
                    return;
                }
                if signal.changed().await.is_err() {
                    // Handle dropped without cancelling: never fires.
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = fired => Cancelled::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Cancelled::DeadlineExceeded,
                }
            }
            None => {
                fired.await;
                Cancelled::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the scope ends first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        self.check()?;
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(reason),
            out = fut => Ok(out),
        }
    }
}
