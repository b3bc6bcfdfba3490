// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for refresh cycles.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	waiters: AtomicU64,
	short_circuits: AtomicU64,
	handoffs: AtomicU64,
}
impl RefreshMetrics {
	/// Returns the number of refresh calls issued to the backend.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of refresh calls that produced a new access token.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of refresh calls that failed.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Returns the number of callers that waited on another caller's refresh.
	pub fn waiters(&self) -> u64 {
		self.waiters.load(Ordering::Relaxed)
	}

	/// Returns the number of recoveries answered without a refresh call.
	pub fn short_circuits(&self) -> u64 {
		self.short_circuits.load(Ordering::Relaxed)
	}

	/// Returns the number of times leadership passed to a waiter after the leader was dropped.
	pub fn handoffs(&self) -> u64 {
		self.handoffs.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_waiter(&self) {
		self.waiters.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_short_circuit(&self) {
		self.short_circuits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_handoff(&self) {
		self.handoffs.fetch_add(1, Ordering::Relaxed);
	}
}
