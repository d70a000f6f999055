use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::engine::domain::decode_callback::DecodeCallback;
use crate::engine::domain::decode_engine::EngineError;
use crate::engine::domain::job::{Job, ProcessedImage, RawFrame, Rejected, UserData};
use crate::shared::resource_format::ResourceFormat;

/// What a finished job reports to the callback.
pub enum Completion {
    Read(Result<Box<dyn RawFrame>, EngineError>),
    Process(Result<Box<dyn ProcessedImage>, EngineError>),
    /// The engine lost the job; it is released without a callback.
    Discard,
}

/// Work a job performs on an engine worker thread.
pub type Work = Box<dyn FnOnce() -> Completion + Send>;

/// Job counters shared by every job of one engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub jobs_created: usize,
    pub jobs_submitted: usize,
    pub jobs_released: usize,
    /// Submitted jobs whose callback has not returned yet.
    pub jobs_pending: usize,
    pub callbacks_delivered: usize,
}

struct Task {
    job: Box<dyn Job>,
    work: Work,
}

enum Message {
    Run(Task),
    Shutdown,
}

#[derive(Default)]
struct Shared {
    callback: RwLock<Option<Arc<dyn DecodeCallback>>>,
    pending: Mutex<usize>,
    idle: Condvar,
    created: AtomicUsize,
    submitted: AtomicUsize,
    released: AtomicUsize,
    delivered: AtomicUsize,
}

impl Shared {
    fn begin(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending += 1;
        }
    }

    fn end(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = pending.saturating_sub(1);
            if *pending == 0 {
                self.idle.notify_all();
            }
        }
    }

    fn pending(&self) -> usize {
        self.pending.lock().map(|p| *p).unwrap_or(0)
    }

    fn callback(&self) -> Option<Arc<dyn DecodeCallback>> {
        self.callback.read().ok().and_then(|slot| slot.clone())
    }
}

/// Marks one submitted job as finished, even if its callback panics.
struct PendingGuard<'a>(&'a Shared);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Worker pool and callback dispatch shared by the in-process engines.
///
/// Jobs are queued on a crossbeam channel and run by a fixed set of worker
/// threads. Each finished job is handed to the registered callback on the
/// worker that ran it.
pub struct EngineCore {
    queue: JobQueue,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EngineCore {
    pub fn new(worker_threads: usize, thread_name: &str) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Message>();
        let shared = Arc::new(Shared::default());

        let workers = (0..worker_threads.max(1))
            .filter_map(|i| {
                let rx = rx.clone();
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("{thread_name}-{i}"))
                    .spawn(move || worker_loop(rx, shared))
                    .map_err(|e| log::error!("Failed to spawn engine worker {i}: {e}"))
                    .ok()
            })
            .collect();

        Self {
            queue: JobQueue { tx, shared },
            workers: Mutex::new(workers),
        }
    }

    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub fn set_callback(&self, callback: Arc<dyn DecodeCallback>) -> Result<(), EngineError> {
        let mut slot = self
            .queue
            .shared
            .callback
            .write()
            .map_err(|_| EngineError::Callback("callback slot poisoned".to_string()))?;
        *slot = Some(callback);
        Ok(())
    }

    /// Blocks until every submitted job has been through its callback.
    pub fn flush(&self) {
        let shared = &self.queue.shared;
        let Ok(mut pending) = shared.pending.lock() else {
            return;
        };
        while *pending > 0 {
            pending = match shared.idle.wait(pending) {
                Ok(guard) => guard,
                Err(_) => return,
            };
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.queue.stats()
    }
}

impl Drop for EngineCore {
    fn drop(&mut self) {
        let Ok(mut workers) = self.workers.lock() else {
            return;
        };
        for _ in workers.iter() {
            let _ = self.queue.tx.send(Message::Shutdown);
        }
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Engine worker panicked");
            }
        }
    }
}

fn worker_loop(rx: Receiver<Message>, shared: Arc<Shared>) {
    for message in rx {
        let Message::Run(Task { job, work }) = message else {
            break;
        };
        let _pending = PendingGuard(&shared);
        let completion = work();

        let callback = match completion {
            Completion::Discard => {
                log::debug!("Engine discarded a job without reporting it");
                drop(job);
                continue;
            }
            _ => shared.callback(),
        };
        let Some(callback) = callback else {
            log::warn!("Job finished with no callback registered, releasing it");
            drop(job);
            continue;
        };

        shared.delivered.fetch_add(1, Ordering::AcqRel);
        match completion {
            Completion::Read(result) => callback.read_complete(job, result),
            Completion::Process(result) => callback.process_complete(job, result),
            Completion::Discard => {}
        }
    }
}

/// Submission handle jobs keep to reach their engine's workers.
#[derive(Clone)]
pub struct JobQueue {
    tx: Sender<Message>,
    shared: Arc<Shared>,
}

impl JobQueue {
    pub fn create_job(&self, work: Work) -> Box<EngineJob> {
        self.shared.created.fetch_add(1, Ordering::AcqRel);
        Box::new(EngineJob {
            queue: self.clone(),
            work: Some(work),
            user_data: None,
            rejection: None,
        })
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            jobs_created: self.shared.created.load(Ordering::Acquire),
            jobs_submitted: self.shared.submitted.load(Ordering::Acquire),
            jobs_released: self.shared.released.load(Ordering::Acquire),
            jobs_pending: self.shared.pending(),
            callbacks_delivered: self.shared.delivered.load(Ordering::Acquire),
        }
    }
}

/// A job run by [`EngineCore`]. Released when dropped.
pub struct EngineJob {
    queue: JobQueue,
    work: Option<Work>,
    user_data: Option<UserData>,
    rejection: Option<EngineError>,
}

impl EngineJob {
    /// Makes the next `submit` fail with `error`.
    pub fn reject_with(mut self: Box<Self>, error: EngineError) -> Box<Self> {
        self.rejection = Some(error);
        self
    }
}

impl Job for EngineJob {
    fn set_user_data(&mut self, data: UserData) {
        self.user_data = Some(data);
    }

    fn take_user_data(&mut self) -> Option<UserData> {
        self.user_data.take()
    }

    fn submit(mut self: Box<Self>) -> Result<(), Rejected> {
        if let Some(error) = self.rejection.take() {
            return Err(Rejected { job: self, error });
        }
        let Some(work) = self.work.take() else {
            let error = EngineError::Submission("job was already submitted".to_string());
            return Err(Rejected { job: self, error });
        };

        let queue = self.queue.clone();
        queue.shared.begin();
        match queue.tx.send(Message::Run(Task { job: self, work })) {
            Ok(()) => {
                queue.shared.submitted.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Err(crossbeam_channel::SendError(message)) => {
                queue.shared.end();
                let error = EngineError::Submission("engine has shut down".to_string());
                match message {
                    Message::Run(task) => Err(Rejected {
                        job: task.job,
                        error,
                    }),
                    Message::Shutdown => Ok(()),
                }
            }
        }
    }
}

impl Drop for EngineJob {
    fn drop(&mut self) {
        self.queue.shared.released.fetch_add(1, Ordering::AcqRel);
    }
}

/// Processed pixels held in memory.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedImage {
    pub width: u32,
    pub height: u32,
    pub format: ResourceFormat,
    pub pixels: Vec<u8>,
    /// Size the image reports, normally `pixels.len()`.
    pub reported_size: usize,
}

impl OwnedImage {
    pub fn new(width: u32, height: u32, format: ResourceFormat, pixels: Vec<u8>) -> Self {
        let reported_size = pixels.len();
        Self {
            width,
            height,
            format,
            pixels,
            reported_size,
        }
    }
}

impl ProcessedImage for OwnedImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn resource_format(&self) -> ResourceFormat {
        self.format
    }

    fn resource(&self) -> &[u8] {
        &self.pixels
    }

    fn resource_size_bytes(&self) -> usize {
        self.reported_size
    }
}
