//! Bounded-concurrency batching.
//!
//! [`BatchQueue::push`] hands items to a background task over an unbounded
//! channel, so callers never wait. The task groups items into batches of at
//! most `batch_size` in push order and runs each batch on its own spawned
//! task, holding one of `concurrency` semaphore permits for the duration. A
//! batch is cut when it is full, when `max_wait` has passed since the first
//! pending item arrived, or when a flush is requested.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, warn};

/// Batching limits for a [`BatchQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_wait: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 2,
            max_wait: Duration::from_secs(1),
        }
    }
}

/// Consumer of the batches cut by a [`BatchQueue`].
///
/// `handle` owns the batch; the queue never sees it again, whatever the
/// outcome.
#[async_trait]
pub trait BatchHandler<T>: Send + Sync {
    async fn handle(&self, batch: Vec<T>);
}

/// Counters describing what went through a queue.
#[derive(Debug, Default)]
pub struct QueueStats {
    pushed: AtomicU64,
    dispatched_items: AtomicU64,
    dispatched_batches: AtomicU64,
    rejected: AtomicU64,
}

impl QueueStats {
    /// Items accepted by [`BatchQueue::push`].
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Items handed to the batch handler.
    pub fn dispatched_items(&self) -> u64 {
        self.dispatched_items.load(Ordering::Relaxed)
    }

    pub fn dispatched_batches(&self) -> u64 {
        self.dispatched_batches.load(Ordering::Relaxed)
    }

    /// Items pushed after the background task had stopped.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

enum Command<T> {
    Push(T),
    Flush(oneshot::Sender<()>),
}

/// Handle to a background batching task.
pub struct BatchQueue<T> {
    sender: mpsc::UnboundedSender<Command<T>>,
    stats: Arc<QueueStats>,
}

impl<T: Send + 'static> BatchQueue<T> {
    /// Spawn the background task on the current Tokio runtime.
    ///
    /// The task stops once every `BatchQueue` handle has been dropped,
    /// after flushing whatever was still pending.
    pub fn new(config: QueueConfig, handler: Arc<dyn BatchHandler<T>>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(QueueStats::default());

        let worker = Worker {
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            max_wait: config.max_wait,
            handler,
            slots: Arc::new(Semaphore::new(config.concurrency.max(1))),
            pending: VecDeque::new(),
            stats: Arc::clone(&stats),
        };

        let handle = tokio::spawn(worker.run(rx));

        (BatchQueue { sender: tx, stats }, handle)
    }

    /// Append an item. Never blocks, regardless of how many batches are in
    /// flight.
    pub fn push(&self, item: T) {
        if self.sender.send(Command::Push(item)).is_ok() {
            self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            warn!("batch queue stopped, dropping item");
        }
    }

    /// Cut batches from everything pushed so far and wait until every
    /// in-flight batch, including those, has been handled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Command::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

struct Worker<T> {
    batch_size: usize,
    concurrency: usize,
    max_wait: Duration,
    handler: Arc<dyn BatchHandler<T>>,
    slots: Arc<Semaphore>,
    pending: VecDeque<T>,
    stats: Arc<QueueStats>,
}

impl<T: Send + 'static> Worker<T> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<T>>) {
        let mut deadline: Option<Instant> = None;

        loop {
            let command = match deadline {
                Some(at) => {
                    tokio::select! {
                        command = rx.recv() => command,
                        _ = sleep_until(at) => {
                            deadline = None;
                            debug!(pending = self.pending.len(), "max wait elapsed, flushing partial batch");
                            self.dispatch_all().await;
                            continue;
                        }
                    }
                }
                None => rx.recv().await,
            };

            match command {
                Some(Command::Push(item)) => {
                    if self.pending.is_empty() {
                        deadline = Some(Instant::now() + self.max_wait);
                    }
                    self.pending.push_back(item);

                    while self.pending.len() >= self.batch_size {
                        self.dispatch_one().await;
                    }
                    if self.pending.is_empty() {
                        deadline = None;
                    }
                }
                Some(Command::Flush(done)) => {
                    deadline = None;
                    self.dispatch_all().await;
                    self.wait_idle().await;
                    let _ = done.send(());
                }
                None => {
                    self.dispatch_all().await;
                    self.wait_idle().await;
                    debug!("batch queue closed");
                    return;
                }
            }
        }
    }

    async fn dispatch_all(&mut self) {
        while !self.pending.is_empty() {
            self.dispatch_one().await;
        }
    }

    /// Take up to `batch_size` items off the front and run them once a slot
    /// is free.
    async fn dispatch_one(&mut self) {
        let take = self.pending.len().min(self.batch_size);
        let batch: Vec<T> = self.pending.drain(..take).collect();

        // The semaphore is never closed.
        let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await else {
            return;
        };

        self.stats
            .dispatched_items
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.stats.dispatched_batches.fetch_add(1, Ordering::Relaxed);

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            handler.handle(batch).await;
            drop(permit);
        });
    }

    /// Wait until no batch is in flight.
    async fn wait_idle(&mut self) {
        let permits = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        if let Ok(all) = Arc::clone(&self.slots).acquire_many_owned(permits).await {
            drop(all);
        }
    }
}
