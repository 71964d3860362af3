//! Ctrl+C handling: the first press asks the driver to drain gracefully,
//! a second within 5 seconds forces an immediate exit ("stuck process,
//! kill it now"). Uses an `AtomicU8` + channel pattern, swapping the
//! `tokio::signal` task for the `ctrlc` crate and an `mpsc`/`broadcast`
//! pair for a `crossbeam_channel`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

/// Tracks how many times Ctrl+C has been pressed, and when.
#[derive(Debug)]
pub struct ShutdownController {
    forced: AtomicU8,
    first_press: std::sync::Mutex<Option<Instant>>,
}

/// One shutdown request delivered to the driver's main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    /// Stop feeding new work and drain in-flight work before exiting.
    Graceful,
    /// Exit immediately without waiting for in-flight work.
    Immediate,
}

/// A second press within this window forces an immediate exit rather than
/// counting as an unrelated, later graceful request.
const DOUBLE_PRESS_WINDOW: Duration = Duration::from_secs(5);

impl ShutdownController {
    /// Build a controller with no presses recorded yet.
    pub fn new() -> Self {
        Self { forced: AtomicU8::new(0), first_press: std::sync::Mutex::new(None) }
    }

    /// Record one press, returning the appropriate event.
    fn record_press(&self) -> ShutdownEvent {
        let now = Instant::now();
        let mut first = self.first_press.lock().unwrap();
        match *first {
            Some(t) if now.duration_since(t) <= DOUBLE_PRESS_WINDOW => {
                self.forced.fetch_add(1, Ordering::SeqCst);
                ShutdownEvent::Immediate
            }
            _ => {
                *first = Some(now);
                self.forced.fetch_add(1, Ordering::SeqCst);
                ShutdownEvent::Graceful
            }
        }
    }

    /// Total number of Ctrl+C presses observed so far.
    pub fn press_count(&self) -> u8 {
        self.forced.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a Ctrl+C handler that reports [`ShutdownEvent`]s on `tx`. Returns
/// an error if a handler is already installed (the process supports only
/// one).
pub fn install_ctrl_c_handler(
    controller: Arc<ShutdownController>,
    tx: Sender<ShutdownEvent>,
) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        let event = controller.record_press();
        let _ = tx.send(event);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_press_is_graceful_second_is_immediate() {
        let controller = ShutdownController::new();
        assert_eq!(controller.record_press(), ShutdownEvent::Graceful);
        assert_eq!(controller.record_press(), ShutdownEvent::Immediate);
        assert_eq!(controller.press_count(), 2);
    }
}
