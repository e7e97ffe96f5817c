//! Run-wide interrupt signal.
//!
//! One `InterruptHandle` fires, any number of `Interrupt` clones observe.
//! Once fired it stays fired for the rest of the run.

use tokio::sync::watch;

/// Firing side of the interrupt.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: watch::Sender<bool>,
}

/// Observing side of the interrupt.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

impl Interrupt {
    /// Create a connected handle and observer.
    pub fn channel() -> (InterruptHandle, Interrupt) {
        let (tx, rx) = watch::channel(false);
        (InterruptHandle { tx }, Interrupt { rx })
    }

    /// An observer that never fires.
    pub fn never() -> Interrupt {
        let (_handle, interrupt) = Interrupt::channel();
        interrupt
    }

    /// Whether the interrupt has fired.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the interrupt fires.
    ///
    /// Pends forever if every handle is dropped without firing.
    pub async fn triggered(&mut self) {
        let fired = self.rx.wait_for(|fired| *fired).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}

impl InterruptHandle {
    /// Fire the interrupt.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the interrupt has fired.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}
