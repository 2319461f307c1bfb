//! Background worker
//!
//! Runs one session job at a time on a dedicated thread. A job submitted
//! while another is in flight is rejected with [`AlignError::Busy`], so an
//! alignment never observes a half-applied load or edit.

use image::DynamicImage;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::events::{AlignmentRequest, Event, Warning};
use super::AlignmentSession;
use crate::compositor::CompositeStack;
use crate::logging::{clear_correlation_id, new_correlation_id};
use crate::{AlignError, Result};

#[derive(Debug)]
pub enum Job {
    /// Replace the loaded set with these files.
    Load(Vec<PathBuf>),
    Align(AlignmentRequest),
    /// Swap in an edited copy of one image.
    Replace { index: usize, image: DynamicImage },
    /// Reopen a composite as the only input.
    ReuseComposite(CompositeStack),
}

enum WorkerMessage {
    Run(Job),
    Exit,
}

pub struct Worker {
    tx: Sender<WorkerMessage>,
    thread_handle: Option<JoinHandle<()>>,
    busy: Arc<AtomicBool>,
}

impl Worker {
    /// Starts the worker thread. `loading_delay` is waited before each job
    /// begins, after `Event::LoadingStarted` has been sent.
    pub fn spawn(session: Arc<Mutex<AlignmentSession>>, events: Sender<Event>, loading_delay: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<WorkerMessage>();
        let busy = Arc::new(AtomicBool::new(false));
        let thread_handle = std::thread::spawn({
            let busy = busy.clone();
            move || worker_loop(rx, session, events, busy, loading_delay)
        });

        Self {
            tx,
            thread_handle: Some(thread_handle),
            busy,
        }
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        if self.busy.swap(true, Ordering::AcqRel) {
            tracing::warn!(?job, "job rejected, worker busy");
            return Err(AlignError::Busy);
        }
        if self.tx.send(WorkerMessage::Run(job)).is_err() {
            self.busy.store(false, Ordering::Release);
            return Err(AlignError::Config("worker has stopped".to_string()));
        }
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Lets the current job finish, then stops the thread.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(WorkerMessage::Exit);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Clears the busy flag when a job ends, unwinding included.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn worker_loop(
    rx: Receiver<WorkerMessage>,
    session: Arc<Mutex<AlignmentSession>>,
    events: Sender<Event>,
    busy: Arc<AtomicBool>,
    loading_delay: Duration,
) {
    while let Ok(message) = rx.recv() {
        let job = match message {
            WorkerMessage::Run(job) => job,
            WorkerMessage::Exit => break,
        };

        let guard = BusyGuard(busy.clone());
        let correlation_id = new_correlation_id();
        tracing::info!(%correlation_id, "worker job started");
        let _ = events.send(Event::LoadingStarted);
        if !loading_delay.is_zero() {
            std::thread::sleep(loading_delay);
        }

        let results = {
            let mut session = session.lock();
            run_job(&mut session, job)
        };
        for event in results {
            if events.send(event).is_err() {
                tracing::debug!("event receiver dropped");
            }
        }

        drop(guard);
        let _ = events.send(Event::LoadingFinished);
        clear_correlation_id();
    }
    tracing::debug!("worker stopped");
}

fn run_job(session: &mut AlignmentSession, job: Job) -> Vec<Event> {
    let mut events = Vec::new();
    match job {
        Job::Load(paths) => match session.initialize(&paths) {
            Ok(report) => {
                events.extend(report.warnings.into_iter().map(Event::Warning));
                events.extend(report.errors.into_iter().map(Event::Error));
            }
            Err(error) => events.push(Event::Error(error)),
        },
        Job::Align(request) => match session.align(&request) {
            Ok(outcome) => events.push(Event::AlignmentFinished(outcome)),
            Err(error) => events.push(Event::Error(error)),
        },
        Job::Replace { index, image } => match session.replace_image(index, &image) {
            Ok((old, new)) => events.push(Event::ImageReplaced { old, new }),
            Err(error) => events.push(Event::Error(error)),
        },
        Job::ReuseComposite(stack) => match session.reuse_composite(&stack) {
            Ok((path, report)) => {
                events.extend(report.warnings.into_iter().filter(|w| *w != Warning::SingleImage).map(Event::Warning));
                events.extend(report.errors.into_iter().map(Event::Error));
                events.push(Event::CompositeReused { path });
            }
            Err(error) => events.push(Event::Error(error)),
        },
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn worker(delay_ms: u64) -> (Worker, Receiver<Event>) {
        let session = Arc::new(Mutex::new(AlignmentSession::new(Config::default())));
        let (tx, rx) = mpsc::channel();
        (Worker::spawn(session, tx, Duration::from_millis(delay_ms)), rx)
    }

    #[test]
    fn test_second_job_rejected_while_busy() {
        let (worker, rx) = worker(300);
        worker.submit(Job::Load(Vec::new())).unwrap();
        assert!(worker.is_busy());
        assert!(matches!(worker.submit(Job::Load(Vec::new())), Err(AlignError::Busy)));

        assert!(matches!(rx.recv().unwrap(), Event::LoadingStarted));
        assert!(matches!(rx.recv().unwrap(), Event::Error(AlignError::Config(_))));
        assert!(matches!(rx.recv().unwrap(), Event::LoadingFinished));
        assert!(!worker.is_busy());
        worker.submit(Job::Load(Vec::new())).unwrap();
    }

    #[test]
    fn test_busy_flag_cleared_when_job_panics() {
        let busy = Arc::new(AtomicBool::new(true));
        let flag = busy.clone();
        let job = std::thread::spawn(move || {
            let _guard = BusyGuard(flag);
            panic!("job failed");
        });
        assert!(job.join().is_err());
        assert!(!busy.load(Ordering::Acquire));
    }

    #[test]
    fn test_submit_after_worker_stopped_is_not_busy() {
        let (mut worker, _rx) = worker(0);
        worker.shutdown();
        assert!(matches!(worker.submit(Job::Load(Vec::new())), Err(AlignError::Config(_))));
        assert!(!worker.is_busy());
    }

    #[test]
    fn test_align_without_images_reports_error() {
        let (worker, rx) = worker(0);
        worker
            .submit(Job::Align(AlignmentRequest {
                mode: crate::AlignmentMode::Manual,
                rotate: false,
                keep_original_pixels: true,
            }))
            .unwrap();
        let events: Vec<Event> = rx.iter().take(3).collect();
        assert!(matches!(events[1], Event::Error(AlignError::NotEnoughImages { count: 0 })));
    }
}
