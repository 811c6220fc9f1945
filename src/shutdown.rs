//! Two-phase stop handshake shared by every long-running loop.
//!
//! The stopping side posts a finish request (or closes the loop's input
//! queue) and then blocks until the loop drops its [`DoneGuard`]. A loop that
//! never started is treated as already done, so `stop` cannot hang on it.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

pub struct StopSignal {
    finish_tx: Sender<()>,
    finish_rx: Receiver<()>,
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

/// Held by a running loop; dropping it is the done signal.
#[must_use]
pub struct DoneGuard {
    _tx: Sender<()>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (finish_tx, finish_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(0);
        Self {
            finish_tx,
            finish_rx,
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
        }
    }

    /// Claim the loop. `None` means `stop` already ran and the loop must not
    /// start.
    pub fn start(&self) -> Option<DoneGuard> {
        self.done_tx.lock().take().map(|tx| DoneGuard { _tx: tx })
    }

    /// Non-blocking check for a pending finish request.
    pub fn finish_requested(&self) -> bool {
        matches!(
            self.finish_rx.try_recv(),
            Ok(()) | Err(TryRecvError::Disconnected)
        )
    }

    /// For loops that `select!` on the finish request.
    pub fn finish_receiver(&self) -> &Receiver<()> {
        &self.finish_rx
    }

    /// Post the finish request. Repeated requests collapse into one.
    pub fn request(&self) {
        let _ = self.finish_tx.try_send(());
    }

    /// Block until the loop has exited (or release it if it never started).
    pub fn wait(&self) {
        drop(self.done_tx.lock().take());
        // Disconnected once every guard is gone.
        let _ = self.done_rx.recv();
    }

    pub fn stop(&self) {
        self.request();
        self.wait();
    }

    /// True once the loop has exited or was released before starting.
    pub fn is_done(&self) -> bool {
        self.done_tx.lock().is_none()
            && matches!(self.done_rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_stop_waits_for_loop_exit() {
        let sig = Arc::new(StopSignal::new());
        let guard = sig.start().expect("first start claims the loop");
        let loop_sig = Arc::clone(&sig);
        let handle = std::thread::spawn(move || {
            let _guard = guard;
            while !loop_sig.finish_requested() {
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        sig.stop();
        assert!(sig.is_done());
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_before_start_does_not_block() {
        let sig = StopSignal::new();
        sig.stop();
        assert!(sig.start().is_none(), "a stopped loop must not start");
        assert!(sig.is_done());
    }

    #[test]
    fn test_repeated_stop_is_harmless() {
        let sig = StopSignal::new();
        drop(sig.start());
        sig.stop();
        sig.stop();
        assert!(sig.is_done());
    }
}
