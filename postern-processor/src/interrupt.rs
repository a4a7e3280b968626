//! Cooperative cancellation of running mailets.

use tokio::sync::watch;

/// Raised by the spooler when in-flight work must stop.
#[derive(Debug)]
pub struct InterruptHandle(watch::Sender<bool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.send_replace(true);
    }
}

/// Observed by the action executor while a mailet runs.
///
/// The default value is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Option<watch::Receiver<bool>>);

impl Interrupt {
    pub fn channel() -> (InterruptHandle, Self) {
        let (sender, receiver) = watch::channel(false);
        (InterruptHandle(sender), Self(Some(receiver)))
    }

    pub const fn never() -> Self {
        Self(None)
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.as_ref().is_some_and(|receiver| *receiver.borrow())
    }

    /// Completes once an interrupt is raised. Never completes for
    /// [`Interrupt::never`], or if the handle is dropped without interrupting.
    pub async fn interrupted(&mut self) {
        let Some(receiver) = self.0.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}
