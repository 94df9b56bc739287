use log::{debug, error};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A single-worker FIFO execution lane.
///
/// Work submitted to a lane runs one unit at a time, in submission order.
/// Submitting never blocks; the returned [`LaneHandle`] is awaited for the
/// outcome. Each component that talks to the network owns its own lane so a
/// slow request in one task class never holds up another.
pub struct Lane {
    name: &'static str,
    tx: mpsc::UnboundedSender<Job>,
    token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// The eventual outcome of a unit of work submitted to a [`Lane`].
#[must_use = "a lane handle does nothing unless joined"]
pub struct LaneHandle<T> {
    lane: &'static str,
    rx: oneshot::Receiver<Result<T, Error>>,
}

impl Lane {
    /// Spawns the lane's worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let worker = tokio::spawn(drive(name, rx, token.clone()));

        Self {
            name,
            tx,
            token,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queues `work` behind everything already submitted to this lane.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LaneClosed`] if the lane has been shut down.
    pub fn submit<F, Fut, T>(&self, work: F) -> Result<LaneHandle<T>, Error>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        if self.token.is_cancelled() {
            return Err(Error::LaneClosed(self.name));
        }

        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // The caller may have stopped waiting, that's fine.
            let _ = result_tx.send(work().await);
        });

        self.tx
            .send(job)
            .map_err(|_| Error::LaneClosed(self.name))?;

        Ok(LaneHandle {
            lane: self.name,
            rx: result_rx,
        })
    }

    /// Stops accepting work. Queued work that has not started is dropped and
    /// its handles resolve to [`Error::LaneClosed`]; the unit currently
    /// running is left to finish.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Closes the lane and waits for the in-flight unit of work to finish.
    pub async fn shutdown(&self) {
        self.close();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("The {} lane worker failed: {e}", self.name);
            }
        }
    }
}

impl<T> LaneHandle<T> {
    /// Waits for the unit of work to run and returns its result.
    ///
    /// # Errors
    ///
    /// Returns the work's own error, or [`Error::LaneClosed`] if the lane shut
    /// down before the work could run.
    pub async fn join(self) -> Result<T, Error> {
        self.rx.await.map_err(|_| Error::LaneClosed(self.lane))?
    }
}

async fn drive(
    name: &'static str,
    mut rx: mpsc::UnboundedReceiver<Job>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            job = rx.recv() => {
                let Some(job) = job else { break };
                // Run in its own task so a panicking job doesn't take the lane down
                if let Err(e) = tokio::spawn(job).await {
                    error!("A task on the {name} lane panicked: {e}");
                }
            }
        }
    }

    rx.close();
    let mut rejected = 0usize;
    while rx.try_recv().is_ok() {
        rejected += 1;
    }
    debug!("The {name} lane stopped, {rejected} queued task(s) rejected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_work_runs_in_submission_order() {
        let lane = Lane::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                lane.submit(move || async move {
                    // Later submissions finish their sleep first if run in parallel
                    tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                    order.lock().unwrap().push(i);
                    Ok(i)
                })
                .unwrap()
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().await.unwrap(), i as u64);
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_one_unit_in_flight() {
        let lane = Lane::new("test");
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                lane.submit(move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap()
            })
            .collect();

        for handle in handles {
            handle.join().await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_surface_through_handle() {
        let lane = Lane::new("test");
        let handle = lane
            .submit(|| async { Err::<(), _>(Error::ConfigInvalid("boom".to_string())) })
            .unwrap();

        assert!(matches!(handle.join().await, Err(Error::ConfigInvalid(_))));

        // The lane keeps working after a failed unit
        let handle = lane.submit(|| async { Ok(7) }).unwrap();
        assert_eq!(handle.join().await.unwrap(), 7);
    }

    #[tokio::test]
    #[allow(unreachable_code)]
    async fn test_panicking_work_does_not_kill_lane() {
        let lane = Lane::new("test");
        let handle = lane
            .submit(|| async {
                panic!("unit of work exploded");
                Ok(())
            })
            .unwrap();

        assert!(matches!(handle.join().await, Err(Error::LaneClosed("test"))));

        let handle = lane.submit(|| async { Ok("still alive") }).unwrap();
        assert_eq!(handle.join().await.unwrap(), "still alive");
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let lane = Lane::new("test");
        lane.shutdown().await;

        let result = lane.submit(|| async { Ok(()) });
        assert!(matches!(result, Err(Error::LaneClosed("test"))));
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_and_rejects_queued() {
        let lane = Lane::new("test");
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let first = {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            lane.submit(move || async move {
                started.notify_one();
                release.notified().await;
                Ok("finished")
            })
            .unwrap()
        };
        let second = lane.submit(|| async { Ok("never runs") }).unwrap();

        started.notified().await;
        lane.close();
        release.notify_one();

        assert_eq!(first.join().await.unwrap(), "finished");
        assert!(matches!(second.join().await, Err(Error::LaneClosed("test"))));
        lane.shutdown().await;
    }
}
