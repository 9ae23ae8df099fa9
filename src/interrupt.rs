//! User interrupt (Ctrl-C) delivery
//!
//! Once `listen_for_ctrl_c` is called, SIGINT no longer kills the process;
//! it is delivered here so the active container can be stopped first.
//!
//! A request is sticky: once made, no new container may be started. The
//! wake-up itself is consumed by whichever waiter stops the active container.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{ContainerError, Result};

#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    notify: Arc<Notify>,
    requested: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every Ctrl-C to this handle
    pub fn listen_for_ctrl_c(&self) {
        let interrupt = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                debug!("Received Ctrl-C");
                interrupt.trigger();
            }
        });
    }

    /// Request an interrupt; a pending request is kept until consumed
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether an interrupt has ever been requested
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Fail with `ContainerError::Interrupted` once an interrupt was requested
    pub fn check(&self) -> Result<()> {
        if self.is_requested() {
            Err(ContainerError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Resolves when an interrupt has been requested
    pub async fn triggered(&self) {
        self.notify.notified().await;
    }
}
