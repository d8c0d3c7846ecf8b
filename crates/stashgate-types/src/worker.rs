//! Worker pool. Runs synchronous, CPU bound jobs (exclusion pipelines) on
//! dedicated threads with 3 priority lanes.
//!
//! Query misses run in the `Query` lane so a browsing request never waits
//! behind a full-catalog batch recompute, which runs in the `Batch` lane.

use flume::{Receiver, Sender};
use futures::channel::oneshot;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
	/// Recompute blocking a visibility query
	Query,
	/// Incremental hide/unhide and single-user rule updates
	Update,
	/// Background recompute sweeps
	Batch,
}

type Job = Box<dyn FnOnce() + Send>;
type JobQueue = Arc<Receiver<Job>>;

#[derive(Debug)]
pub struct WorkerPool {
	query: Sender<Job>,
	update: Sender<Job>,
	batch: Sender<Job>,
	pending: Arc<AtomicUsize>,
}

impl WorkerPool {
	/// `n_query` threads serve only the query lane, `n_update` serve query and
	/// update, `n_batch` serve all three lanes.
	pub fn new(n_query: usize, n_update: usize, n_batch: usize) -> Self {
		let (query, rx_query) = flume::unbounded();
		let (update, rx_update) = flume::unbounded();
		let (batch, rx_batch) = flume::unbounded();

		let rx_query = Arc::new(rx_query);
		let rx_update = Arc::new(rx_update);
		let rx_batch = Arc::new(rx_batch);
		let pending = Arc::new(AtomicUsize::new(0));

		for _ in 0..n_query {
			let lanes = [Arc::clone(&rx_query)];
			let pending = Arc::clone(&pending);
			thread::spawn(move || worker_loop(&lanes, &pending));
		}

		for _ in 0..n_update {
			let lanes = [Arc::clone(&rx_query), Arc::clone(&rx_update)];
			let pending = Arc::clone(&pending);
			thread::spawn(move || worker_loop(&lanes, &pending));
		}

		for _ in 0..n_batch.max(1) {
			let lanes = [Arc::clone(&rx_query), Arc::clone(&rx_update), Arc::clone(&rx_batch)];
			let pending = Arc::clone(&pending);
			thread::spawn(move || worker_loop(&lanes, &pending));
		}

		Self { query, update, batch, pending }
	}

	/// Number of jobs submitted but not yet finished
	pub fn pending(&self) -> usize {
		self.pending.load(Ordering::Relaxed)
	}

	/// Submit a closure → returns a Future for the result
	pub fn spawn<F, T>(
		&self,
		priority: Priority,
		f: F,
	) -> impl std::future::Future<Output = ClResult<T>>
	where
		F: FnOnce() -> T + Send + 'static,
		T: Send + 'static,
	{
		let (res_tx, res_rx) = oneshot::channel();

		let job: Job = Box::new(move || {
			let result = f();
			let _ignore = res_tx.send(result);
		});

		let lane = match priority {
			Priority::Query => &self.query,
			Priority::Update => &self.update,
			Priority::Batch => &self.batch,
		};
		self.pending.fetch_add(1, Ordering::Relaxed);
		if lane.send(job).is_err() {
			self.pending.fetch_sub(1, Ordering::Relaxed);
			error!("Failed to send job to {:?} worker queue", priority);
		}

		async move {
			res_rx.await.map_err(|_| {
				error!("Worker dropped result channel (job may have panicked)");
				Error::Internal("worker job failed".into())
			})
		}
	}

	/// Like `spawn`, but flattens `ClResult<ClResult<T>>` into `ClResult<T>`.
	/// Use when the closure itself returns `ClResult<T>`.
	pub fn try_spawn<F, T>(
		&self,
		priority: Priority,
		f: F,
	) -> impl std::future::Future<Output = ClResult<T>>
	where
		F: FnOnce() -> ClResult<T> + Send + 'static,
		T: Send + 'static,
	{
		let fut = self.spawn(priority, f);
		async move { fut.await? }
	}
}

fn run_job(job: Job, pending: &AtomicUsize) {
	if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
		error!("Worker thread caught panic: {:?}", e);
	}
	pending.fetch_sub(1, Ordering::Relaxed);
}

fn worker_loop(lanes: &[JobQueue], pending: &AtomicUsize) {
	loop {
		// Try higher-priority lanes first (non-blocking)
		let mut job = None;
		for rx in lanes {
			if let Ok(j) = rx.try_recv() {
				job = Some(j);
				break;
			}
		}

		if let Some(job) = job {
			run_job(job, pending);
			continue;
		}

		// Wait for next job
		let mut selector = flume::Selector::new();
		for rx in lanes {
			selector = selector.recv(rx, |res| res);
		}

		match selector.wait() {
			Ok(job) => run_job(job, pending),
			// All senders gone: the pool was dropped
			Err(flume::RecvError::Disconnected) => break,
		}
	}
}


// vim: ts=4
