use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The length of the sliding window used to bound short-term bursts against
/// the peak rate. Not specified by the wire contract; chosen short enough to
/// catch sub-second bursts without tracking per-byte history.
const PEAK_WINDOW: Duration = Duration::from_millis(50);

struct Inner {
	tokens: f64,
	last_refill: Instant,
	peak_window_start: Instant,
	peak_window_bytes: u64,
}

/// A token bucket over a sustained rate (steady-state tokens/sec, up to a
/// burst capacity) and a peak rate (a secondary cap measured over a short
/// sliding window, preventing a full burst from landing in a single instant).
///
/// Guarded by a single mutex (spec.md §4.2: "thread-safe (single mutex)").
pub struct RateLimiter {
	sustained_rate: f64,
	peak_rate: f64,
	burst: f64,
	inner: Mutex<Inner>,
}

impl RateLimiter {
	pub fn new(sustained_rate: u64, peak_rate: u64, burst: u64, now: Instant) -> Self {
		Self {
			sustained_rate: sustained_rate as f64,
			peak_rate: peak_rate as f64,
			burst: burst as f64,
			inner: Mutex::new(Inner {
				tokens: burst as f64,
				last_refill: now,
				peak_window_start: now,
				peak_window_bytes: 0,
			}),
		}
	}

	fn refill(&self, inner: &mut Inner, now: Instant) {
		let elapsed = now.saturating_duration_since(inner.last_refill).as_secs_f64();
		inner.tokens = (inner.tokens + elapsed * self.sustained_rate).min(self.burst);
		inner.last_refill = now;

		if now.saturating_duration_since(inner.peak_window_start) >= PEAK_WINDOW {
			inner.peak_window_start = now;
			inner.peak_window_bytes = 0;
		}
	}

	fn peak_capacity(&self) -> u64 {
		(self.peak_rate * PEAK_WINDOW.as_secs_f64()) as u64
	}

	/// Whether admitting `bytes` at `now` would exceed either rate.
	pub fn would_exceed(&self, now: Instant, bytes: u64) -> bool {
		let mut inner = self.inner.lock().expect("rate limiter mutex poisoned");
		self.refill(&mut inner, now);

		bytes as f64 > inner.tokens || inner.peak_window_bytes + bytes > self.peak_capacity()
	}

	/// Records that `bytes` were admitted at `now`. Callers should check
	/// `would_exceed` first; `submit` does not itself refuse admission.
	pub fn submit(&self, now: Instant, bytes: u64) {
		let mut inner = self.inner.lock().expect("rate limiter mutex poisoned");
		self.refill(&mut inner, now);

		inner.tokens = (inner.tokens - bytes as f64).max(0.0);
		inner.peak_window_bytes += bytes;
	}

	/// How long the caller must wait before `bytes` would be admitted. Zero
	/// when `would_exceed(now, bytes)` is already false.
	pub fn estimate_time_until(&self, now: Instant, bytes: u64) -> Duration {
		let mut inner = self.inner.lock().expect("rate limiter mutex poisoned");
		self.refill(&mut inner, now);

		if bytes as f64 <= inner.tokens && inner.peak_window_bytes + bytes <= self.peak_capacity() {
			return Duration::ZERO;
		}

		let sustained_wait = if bytes as f64 > inner.tokens {
			Duration::from_secs_f64(((bytes as f64 - inner.tokens) / self.sustained_rate).max(0.0))
		} else {
			Duration::ZERO
		};

		let peak_wait = if inner.peak_window_bytes + bytes > self.peak_capacity() {
			PEAK_WINDOW.saturating_sub(now.saturating_duration_since(inner.peak_window_start))
		} else {
			Duration::ZERO
		};

		sustained_wait.max(peak_wait)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sustained_bound_holds_over_long_interval() {
		let start = Instant::now();
		let limiter = RateLimiter::new(1000, 100_000, 2000, start);

		let mut admitted = 0u64;
		let mut now = start;

		for _ in 0..20 {
			now += Duration::from_millis(100);

			if !limiter.would_exceed(now, 100) {
				limiter.submit(now, 100);
				admitted += 100;
			}
		}

		let elapsed = now.saturating_duration_since(start).as_secs_f64();
		assert!(admitted as f64 <= 1000.0 * elapsed + 2000.0);
	}

	#[test]
	fn non_negative_reservation() {
		let start = Instant::now();
		let limiter = RateLimiter::new(10, 10, 10, start);

		assert!(!limiter.would_exceed(start, 5));
		assert_eq!(limiter.estimate_time_until(start, 5), Duration::ZERO);
	}

	#[test]
	fn exceeding_burst_reports_nonzero_wait() {
		let start = Instant::now();
		let limiter = RateLimiter::new(10, 1_000_000, 10, start);

		limiter.submit(start, 10);
		assert!(limiter.would_exceed(start, 10));
		assert!(limiter.estimate_time_until(start, 10) > Duration::ZERO);
	}
}
