//! Periodic background tasks.
//!
//! Every reconciliation loop in the broker runs as a [`PeriodicTask`]. A
//! task can be started and cancelled repeatedly; starting a running task is
//! a no-op, which lets monitors restart lazily whenever new work appears.
//! Each tick body runs in its own spawned task so a panicking tick never
//! kills the schedule.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct PeriodicTask {
	name: &'static str,
	running: AtomicBool,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
	pub fn new(name: &'static str) -> Self {
		Self {
			name,
			running: AtomicBool::new(false),
			handle: Mutex::new(None),
		}
	}

	/// Starts the task if it is not already running. The first tick fires
	/// after one full period.
	pub fn start<F, Fut>(&self, period: Duration, tick: F)
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		if self.running.swap(true, Ordering::SeqCst) {
			return;
		}
		debug!(task = self.name, ?period, "starting periodic task");
		let name = self.name;
		let handle = tokio::spawn(async move {
			let start = tokio::time::Instant::now() + period;
			let mut interval = tokio::time::interval_at(start, period);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				// Fault isolation: a slow or panicking tick must not block
				// or kill the schedule.
				let body = tokio::spawn(tick());
				if let Err(e) = body.await {
					warn!(task = name, error = %e, "periodic tick aborted");
				}
			}
		});
		*self.handle.lock().expect("task handle poisoned") = Some(handle);
	}

	/// Stops the task. Safe to call from inside a tick or when not running.
	pub fn cancel(&self) {
		if !self.running.swap(false, Ordering::SeqCst) {
			return;
		}
		debug!(task = self.name, "cancelling periodic task");
		if let Some(handle) = self.handle.lock().expect("task handle poisoned").take() {
			handle.abort();
		}
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}
}

impl Drop for PeriodicTask {
	fn drop(&mut self) {
		self.cancel();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicU32;
	use std::sync::Arc;

	#[tokio::test]
	async fn ticks_until_cancelled() {
		let task = PeriodicTask::new("test");
		let counter = Arc::new(AtomicU32::new(0));
		let ticks = counter.clone();
		task.start(Duration::from_millis(10), move || {
			let ticks = ticks.clone();
			async move {
				ticks.fetch_add(1, Ordering::SeqCst);
			}
		});
		assert!(task.is_running());

		tokio::time::sleep(Duration::from_millis(55)).await;
		task.cancel();
		assert!(!task.is_running());

		let seen = counter.load(Ordering::SeqCst);
		assert!(seen >= 2, "expected at least two ticks, saw {}", seen);

		tokio::time::sleep(Duration::from_millis(30)).await;
		assert_eq!(counter.load(Ordering::SeqCst), seen);
	}

	#[tokio::test]
	async fn start_is_idempotent() {
		let task = PeriodicTask::new("test");
		let counter = Arc::new(AtomicU32::new(0));
		for _ in 0..3 {
			let ticks = counter.clone();
			task.start(Duration::from_millis(10), move || {
				let ticks = ticks.clone();
				async move {
					ticks.fetch_add(1, Ordering::SeqCst);
				}
			});
		}
		tokio::time::sleep(Duration::from_millis(35)).await;
		task.cancel();
		// One schedule only; three loops would have tripled the count.
		assert!(counter.load(Ordering::SeqCst) <= 4);
	}

	#[tokio::test]
	async fn panicking_tick_does_not_stop_the_schedule() {
		let task = PeriodicTask::new("test");
		let counter = Arc::new(AtomicU32::new(0));
		let ticks = counter.clone();
		task.start(Duration::from_millis(10), move || {
			let ticks = ticks.clone();
			async move {
				if ticks.fetch_add(1, Ordering::SeqCst) == 0 {
					panic!("first tick fails");
				}
			}
		});
		tokio::time::sleep(Duration::from_millis(45)).await;
		task.cancel();
		assert!(counter.load(Ordering::SeqCst) >= 2);
	}
}
