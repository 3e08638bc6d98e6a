//! Background worker driving one daemon connection's event loop.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::daemon::DaemonConnection;

/// Poll interval for the daemon socket; bounds stop-signal latency.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long teardown waits for the worker before declaring the process
/// unrecoverable.
pub(crate) const SHUTDOWN_DEADLINE: Duration = Duration::from_millis(1000);

/// Pumps one daemon connection on a dedicated worker thread.
///
/// The worker polls the connection's socket with a bounded timeout and
/// calls `process_result` whenever data is ready, which fires the reply
/// callback registered with the daemon. The connection is owned by the
/// worker and dropped there once the loop exits, so no reply callback
/// can fire after teardown returns.
pub(crate) struct EventPump {
    stop: Arc<AtomicBool>,
    done_rx: mpsc::Receiver<()>,
    worker: Option<JoinHandle<()>>,
}

impl EventPump {
    /// Spawns a pump with its own stop flag.
    pub(crate) fn spawn(connection: Box<dyn DaemonConnection>) -> io::Result<Self> {
        Self::spawn_with_stop(connection, Arc::new(AtomicBool::new(false)))
    }

    /// Spawns a pump controlled by `stop`.
    ///
    /// Reply callbacks running on the worker may set the flag to end
    /// the loop from inside, as resolve does after its single expected
    /// reply.
    pub(crate) fn spawn_with_stop(
        mut connection: Box<dyn DaemonConnection>,
        stop: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let (done_tx, done_rx) = mpsc::channel();
        let stop_flag = stop.clone();
        let worker = thread::Builder::new()
            .name("dnssd-pump".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    match connection.wait_readable(POLL_INTERVAL) {
                        Ok(true) => {
                            if stop_flag.load(Ordering::Acquire) {
                                break;
                            }
                            connection.process_result();
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!("daemon socket wait failed: {e}");
                            break;
                        }
                    }
                }
                // Release the daemon handle strictly after the last
                // possible reply callback.
                drop(connection);
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            stop,
            done_rx,
            worker: Some(worker),
        })
    }

    /// Signals the worker to stop without waiting for it.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.request_stop();
        match self.done_rx.recv_timeout(SHUTDOWN_DEADLINE) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.take() {
                    let _ = worker.join();
                }
                debug!("event pump stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                // A reply callback is stuck in caller code; the daemon
                // handle can never be released safely.
                error!("event pump worker did not stop within {SHUTDOWN_DEADLINE:?}");
                panic!("event pump worker did not stop within {SHUTDOWN_DEADLINE:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct StubConnection {
        readable_rx: mpsc::Receiver<()>,
        processed: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    impl DaemonConnection for StubConnection {
        fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
            Ok(self.readable_rx.recv_timeout(timeout).is_ok())
        }

        fn process_result(&mut self) {
            self.processed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Drop for StubConnection {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn stub() -> (mpsc::Sender<()>, StubConnection, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel();
        let processed = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let connection = StubConnection {
            readable_rx: rx,
            processed: processed.clone(),
            released: released.clone(),
        };
        (tx, connection, processed, released)
    }

    #[test]
    fn processes_results_when_readable() {
        let (tx, connection, processed, _released) = stub();
        let pump = EventPump::spawn(Box::new(connection)).unwrap();

        tx.send(()).unwrap();
        tx.send(()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while processed.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(processed.load(Ordering::SeqCst), 2);
        drop(pump);
    }

    #[test]
    fn drop_stops_worker_and_releases_connection() {
        let (_tx, connection, _processed, released) = stub();
        let pump = EventPump::spawn(Box::new(connection)).unwrap();

        let start = Instant::now();
        drop(pump);
        // One poll interval of latency at most, plus margin.
        assert!(start.elapsed() < SHUTDOWN_DEADLINE);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn idle_pump_does_not_process() {
        let (_tx, connection, processed, _released) = stub();
        let pump = EventPump::spawn(Box::new(connection)).unwrap();
        thread::sleep(Duration::from_millis(250));
        assert_eq!(processed.load(Ordering::SeqCst), 0);
        drop(pump);
    }

    #[test]
    fn stop_flag_set_from_outside_ends_loop() {
        let (_tx, connection, _processed, released) = stub();
        let stop = Arc::new(AtomicBool::new(false));
        let pump = EventPump::spawn_with_stop(Box::new(connection), stop.clone()).unwrap();

        // Simulates a reply callback requesting stop from the worker.
        stop.store(true, Ordering::Release);

        let deadline = Instant::now() + Duration::from_secs(1);
        while !released.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(released.load(Ordering::SeqCst));
        drop(pump);
    }
}
