//! # Serial Workers
//!
//! A `SerialWorker` is a logically single-threaded execution context: one tokio
//! task draining a queue of jobs, running each to completion before starting
//! the next. Delayed and periodic scheduling never block the worker; a timer
//! task enqueues the job when it is due.
//!
//! Stopping a worker lets the job in progress finish and drops everything still
//! queued or waiting on a timer. Further scheduling is rejected.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info_span, Instrument};

pub type Job = BoxFuture<'static, ()>;

#[derive(Debug)]
pub struct SerialWorker {
    name: &'static str,
    sender: mpsc::UnboundedSender<Job>,
    stopped: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SerialWorker {
    /// Spawn the worker task on the current tokio runtime
    pub fn spawn(name: &'static str) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let (stopped, mut stop_signal) = watch::channel(false);

        let handle = tokio::spawn(
            async move {
                debug!("Worker started");
                loop {
                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut stop_signal) => break,
                        job = receiver.recv() => match job {
                            Some(job) => job.await,
                            None => break,
                        },
                    }
                }
                debug!("Worker stopped");
            }
            .instrument(info_span!("worker", name)),
        );

        Self {
            name,
            sender,
            stopped,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Enqueue `job` to run after everything already queued. Returns false once stopped.
    pub fn schedule<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            return false;
        }
        self.sender.send(Box::pin(job)).is_ok()
    }

    /// Enqueue `job` once `delay` has elapsed. Returns false once stopped.
    pub fn schedule_after<F>(&self, delay: Duration, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if delay.is_zero() {
            return self.schedule(job);
        }
        if self.is_stopped() {
            return false;
        }

        let sender = self.sender.clone();
        let mut stop_signal = self.stopped.subscribe();
        let stop_check = self.stopped.subscribe();
        let job: Job = Box::pin(job);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let stopped = *stop_check.borrow();
                    if !stopped {
                        let _ = sender.send(job);
                    }
                }
                _ = stop_requested(&mut stop_signal) => {}
            }
        });
        true
    }

    /// Enqueue a fresh job from `make_job` every `period`, first after one period
    pub fn schedule_periodically<M>(&self, period: Duration, make_job: M) -> bool
    where
        M: Fn() -> Job + Send + 'static,
    {
        if self.is_stopped() || period.is_zero() {
            return false;
        }

        let sender = self.sender.clone();
        let mut stop_signal = self.stopped.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if sender.send(make_job()).is_err() {
                            break;
                        }
                    }
                    _ = stop_requested(&mut stop_signal) => break,
                }
            }
        });
        true
    }

    /// Stop accepting work; queued and delayed jobs are dropped
    pub fn stop(&self) {
        if !self.stopped.send_replace(true) {
            debug!(worker = self.name, "Stopping worker");
        }
    }

    /// Wait for the worker task to exit after [`stop`](Self::stop)
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Resolves once the stop flag is set or the worker is gone
async fn stop_requested(stop_signal: &mut watch::Receiver<bool>) {
    let _ = stop_signal.wait_for(|stopped| *stopped).await;
}

impl Drop for SerialWorker {
    fn drop(&mut self) {
        self.stopped.send_replace(true);
    }
}
