//! Worker pool and the periodic broadcast loop.
//!
//! The simulation runs two long-lived units of work on a fixed pool of
//! threads: the broadcast loop below and the operator command loop
//! (`control::handler::command_loop`). Both take the single network lock for
//! one step at a time and never hold it while blocked.
//!
//! Cancellation goes through a `StopHandle`. The broadcast loop waits on it
//! between rounds, so setting it wakes the loop instead of waiting out the
//! full interval.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::network::Network;

/// The network shared between the broadcast loop and the command loop.
pub type SharedNetwork = Arc<Mutex<Network>>;

/// Lock the shared network for one simulation step.
///
/// A panic in another holder cannot leave a merge half applied (merges are
/// computed before they are applied), so a poisoned lock is taken over.
pub fn lock_network(network: &SharedNetwork) -> MutexGuard<'_, Network> {
    network.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, set-once cancellation flag.
///
/// Stopping drops the only sender of an empty channel, so every receiver
/// clone sees the disconnect at once.
#[derive(Clone)]
pub struct StopHandle {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    stopped: Receiver<()>,
}

impl Default for StopHandle {
    fn default() -> Self {
        let (trigger, stopped) = crossbeam_channel::bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(trigger))),
            stopped,
        }
    }
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter. Returns `true` for the call that set it.
    pub fn stop(&self) -> bool {
        let trigger = self.trigger.lock().unwrap_or_else(PoisonError::into_inner).take();
        trigger.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.stopped.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for up to `timeout`, returning early once stopped.
    /// Returns `true` if the flag is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.stopped.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            _ => self.is_stopped(),
        }
    }

    /// Guard that sets the flag when dropped, unwinding included.
    pub fn stop_on_drop(&self) -> StopOnDrop {
        StopOnDrop(self.clone())
    }
}

pub struct StopOnDrop(StopHandle);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if self.0.stop() && thread::panicking() {
            log::warn!("Stopping simulation after a worker panic");
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads executing posted jobs in FIFO order.
pub struct WorkerPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` named worker threads.
    pub fn start(size: usize) -> std::io::Result<Self> {
        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let jobs_rx = jobs_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("mesh-worker-{}", index))
                .spawn(move || {
                    // Queued jobs are still handed out after the sender is gone.
                    for job in jobs_rx.iter() {
                        job();
                    }
                })?;
            workers.push(handle);
        }
        log::debug!("Worker pool started with {} threads", size);
        Ok(Self {
            jobs: Some(jobs_tx),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a unit of work.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(jobs) = &self.jobs else {
            return;
        };
        if jobs.send(Box::new(job)).is_err() {
            log::error!("Worker pool has no live workers, job dropped");
        }
    }

    /// Let the workers drain the queue, then join them all.
    ///
    /// Returns the number of workers that panicked.
    pub fn shutdown(mut self) -> usize {
        self.jobs = None;
        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                log::error!("Worker {} panicked", name);
                panicked += 1;
            }
        }
        log::debug!("Worker pool stopped");
        panicked
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.jobs = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Run a broadcast round every `interval` until `stop` is set.
///
/// The stop flag is checked before every round; the lock is released before
/// sleeping. A failed round is logged and the loop carries on.
/// Returns the number of rounds run.
pub fn broadcast_loop(network: SharedNetwork, stop: StopHandle, interval: Duration) -> usize {
    log::info!("Broadcast loop started, interval {:?}", interval);
    let mut rounds = 0;
    loop {
        if stop.is_stopped() {
            break;
        }
        {
            let mut network = lock_network(&network);
            if let Err(err) = network.broadcast_round() {
                log::error!("Broadcast round failed: {}", err);
            }
        }
        rounds += 1;
        if stop.wait_timeout(interval) {
            break;
        }
    }
    log::info!("Broadcast loop stopped after {} rounds", rounds);
    rounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::network::ObstructionPolicy;
    use crate::simulation::signal_calculations::SignalModel;
    use crate::simulation::terrain::HeightMap;
    use crate::simulation::types::Position;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn shared_line_network() -> SharedNetwork {
        let mut network = Network::new(Box::new(HeightMap::flat(50, 50, 0)), SignalModel::default(), ObstructionPolicy::Strict);
        for (id, x) in [(0, 0), (1, 10), (2, 20)] {
            network.add_node(id, Position::new(x, 0, 0), 200.0).unwrap();
        }
        Arc::new(Mutex::new(network))
    }

    #[test]
    fn pool_runs_every_posted_job_before_shutdown_returns() {
        let pool = WorkerPool::start(3).unwrap();
        assert_eq!(pool.size(), 3);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(pool.shutdown(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn pool_runs_jobs_in_parallel() {
        let pool = WorkerPool::start(2).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded::<()>();
        // The first job blocks until the second one has run.
        pool.post(move || {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        });
        pool.post(move || {
            tx.send(()).unwrap();
            reply_tx.send(()).unwrap();
        });
        assert!(reply_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(pool.shutdown(), 0);
    }

    #[test]
    fn shutdown_reports_panicked_workers() {
        let pool = WorkerPool::start(1).unwrap();
        pool.post(|| panic!("boom"));
        assert_eq!(pool.shutdown(), 1);
    }

    #[test]
    fn stop_is_set_once_and_wakes_waiters() {
        let stop = StopHandle::new();
        assert!(!stop.is_stopped());
        assert!(!stop.wait_timeout(Duration::from_millis(1)));

        let waiter = stop.clone();
        let handle = thread::spawn(move || {
            let started = Instant::now();
            let stopped = waiter.wait_timeout(Duration::from_secs(30));
            (stopped, started.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        assert!(stop.stop());
        assert!(!stop.stop());

        let (stopped, waited) = handle.join().unwrap();
        assert!(stopped);
        assert!(waited < Duration::from_secs(30));
    }

    #[test]
    fn stop_guard_fires_when_a_job_panics() {
        let stop = StopHandle::new();
        let pool = WorkerPool::start(2).unwrap();
        let failing = stop.clone();
        pool.post(move || {
            let _guard = failing.stop_on_drop();
            panic!("command source failed");
        });
        let waiter = stop.clone();
        let started = Instant::now();
        pool.post(move || {
            waiter.wait_timeout(Duration::from_secs(30));
        });

        assert_eq!(pool.shutdown(), 1);
        assert!(stop.is_stopped());
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn broadcast_loop_skips_rounds_once_stopped() {
        let network = shared_line_network();
        let stop = StopHandle::new();
        stop.stop();
        assert_eq!(broadcast_loop(Arc::clone(&network), stop, Duration::from_millis(1)), 0);
        assert_eq!(lock_network(&network).node(0).unwrap().sequence_number(), 0);
    }

    #[test]
    fn broadcast_loop_converges_the_network_and_exits_on_stop() {
        let network = shared_line_network();
        let stop = StopHandle::new();
        let pool = WorkerPool::start(2).unwrap();
        {
            let network = Arc::clone(&network);
            let stop = stop.clone();
            pool.post(move || {
                broadcast_loop(network, stop, Duration::from_millis(5));
            });
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while lock_network(&network).node(0).unwrap().route_to(2).is_none() {
            assert!(Instant::now() < deadline, "network did not converge");
            thread::sleep(Duration::from_millis(5));
        }
        stop.stop();
        assert_eq!(pool.shutdown(), 0);

        let network = lock_network(&network);
        assert_eq!(network.node(0).unwrap().route_to(2).unwrap().next_hop, 1);
    }
}
