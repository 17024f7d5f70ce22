//! job/executor — fixed worker pool running jobs off the submission path.
//!
//! - schedule(): enqueue, never blocks; fails only after shutdown (job handed back).
//! - flush():    wait until every job scheduled so far has finished.
//! - shutdown(): flush, close the queue, join the workers. Also run on Drop.
//!
//! In-flight accounting follows the Mutex + Condvar pattern: the counter is
//! bumped before enqueue and dropped after the job returns (or panics).

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::error::{CowError, CowResult};

/// Unit of work executed on a worker thread.
pub trait Job: Send + 'static {
    fn run(self);
}

struct InFlight {
    count: Mutex<usize>,
    cv: Condvar,
}

impl InFlight {
    fn inc(&self) {
        *self.count.lock() += 1;
    }

    fn dec(&self) {
        let mut n = self.count.lock();
        *n = n.saturating_sub(1);
        if *n == 0 {
            self.cv.notify_all();
        }
    }
}

pub struct JobExecutor<J: Job> {
    tx: Mutex<Option<Sender<J>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    inflight: Arc<InFlight>,
}

impl<J: Job> JobExecutor<J> {
    pub fn start(workers: usize, name: &str) -> CowResult<Self> {
        if workers == 0 {
            return Err(CowError::Config("executor needs at least one worker".into()));
        }
        let (tx, rx) = mpsc::channel::<J>();
        let rx = Arc::new(Mutex::new(rx));
        let inflight = Arc::new(InFlight {
            count: Mutex::new(0),
            cv: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let rx = Arc::clone(&rx);
            let inflight = Arc::clone(&inflight);
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{}", name, i))
                .spawn(move || worker_loop(rx, inflight));
            match spawned {
                Ok(h) => handles.push(h),
                Err(e) => {
                    // Closing the channel stops the workers already started.
                    drop(tx);
                    for h in handles {
                        let _ = h.join();
                    }
                    return Err(CowError::Config(format!("spawn worker {}: {}", i, e)));
                }
            }
        }
        debug!("{}: started {} workers", name, workers);

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            inflight,
        })
    }

    /// Enqueue a job. Returns the job back if the executor is shut down.
    pub fn schedule(&self, job: J) -> Result<(), J> {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(job);
        };
        self.inflight.inc();
        match tx.send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::SendError(job)) => {
                self.inflight.dec();
                Err(job)
            }
        }
    }

    /// Jobs scheduled and not yet finished.
    pub fn in_flight(&self) -> usize {
        *self.inflight.count.lock()
    }

    /// Block until all scheduled jobs finished.
    pub fn flush(&self) {
        let mut n = self.inflight.count.lock();
        while *n > 0 {
            self.inflight.cv.wait(&mut n);
        }
    }

    pub fn shutdown(&self) {
        self.flush();
        let tx = self.tx.lock().take();
        drop(tx);
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for h in handles {
            if h.join().is_err() {
                error!("worker thread terminated abnormally");
            }
        }
    }
}

impl<J: Job> Drop for JobExecutor<J> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<J: Job>(rx: Arc<Mutex<Receiver<J>>>, inflight: Arc<InFlight>) {
    loop {
        let next = rx.lock().recv();
        let Ok(job) = next else {
            break;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
            error!("job panicked; worker continues");
        }
        inflight.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Sleepy(Arc<AtomicUsize>);

    impl Job for Sleepy {
        fn run(self) {
            thread::sleep(Duration::from_millis(5));
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Boom;

    impl Job for Boom {
        fn run(self) {
            panic!("boom");
        }
    }

    #[test]
    fn flush_waits_for_every_scheduled_job() {
        let done = Arc::new(AtomicUsize::new(0));
        let ex = JobExecutor::start(3, "t").unwrap();
        for _ in 0..20 {
            assert!(ex.schedule(Sleepy(Arc::clone(&done))).is_ok());
        }
        ex.flush();
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert_eq!(ex.in_flight(), 0);
    }

    #[test]
    fn schedule_after_shutdown_hands_job_back() {
        let done = Arc::new(AtomicUsize::new(0));
        let ex = JobExecutor::start(1, "t").unwrap();
        ex.shutdown();
        assert!(ex.schedule(Sleepy(Arc::clone(&done))).is_err());
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_job_does_not_wedge_flush() {
        let ex = JobExecutor::start(1, "t").unwrap();
        assert!(ex.schedule(Boom).is_ok());
        ex.flush();
        assert_eq!(ex.in_flight(), 0);
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(JobExecutor::<Boom>::start(0, "t").is_err());
    }
}
