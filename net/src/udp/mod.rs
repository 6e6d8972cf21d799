use std::collections::VecDeque;
use std::io;
use std::net::UdpSocket as StdUdpSocket;
use std::sync::Arc;
use std::time::{Duration, Instant};

use collections::queue::{Priority, PriorityFifo};
use log::{debug, info, warn};
use runtime::{Event, Io};
use stakker::{fwd_to, FixedTimerKey, Ret, CX};
use utils::error::Kind;

use crate::context::Context;
use crate::ratelimit::RateLimiter;
use crate::socket::{SocketAddr, Transport};

/// Default ceiling on a single decoded datagram (spec.md §6: "maximum UDP
/// payload 65527").
const DEFAULT_MAX_DATAGRAM: usize = 65_527;
const DEFAULT_HIGH_WATERMARK: usize = 256 * 1024;
const DEFAULT_LOW_WATERMARK: usize = 64 * 1024;

/// Why send- or receive-side flow control is currently applied
/// (spec.md §4.9 flow-control state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
	Manual,
	Backpressure,
	RateLimit,
	Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
	Relaxed,
	Applied(Reason),
	Locked,
}

impl Flow {
	fn apply(&mut self, reason: Reason) {
		if *self != Flow::Locked {
			*self = Flow::Applied(reason);
		}
	}

	/// Relaxes flow control unless it is currently locked, or applied for a
	/// reason other than the one being cleared.
	fn relax(&mut self, reason: Reason) {
		if *self == Flow::Applied(reason) {
			*self = Flow::Relaxed;
		}
	}

	fn lock(&mut self) {
		*self = Flow::Locked;
	}

	fn is_relaxed(&self) -> bool {
		matches!(self, Flow::Relaxed)
	}
}

/// spec.md §4.9 shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
	Open,
	SendShut,
	ReceiveShut,
	SendReceiveShut,
	Detaching,
	Closed,
}

/// spec.md §4.9 detach state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detach {
	Attached,
	DetachRequested,
	Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Send,
	Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Graceful,
	Immediate,
}

struct Watermark {
	low: usize,
	high: usize,
	/// Whether the high-watermark event has fired without a matching low
	/// event yet (spec.md: "High and low watermark events strictly
	/// alternate").
	latched: bool,
}

impl Watermark {
	fn new(low: usize, high: usize) -> Self {
		Self { low, high, latched: false }
	}

	/// Returns the watermark event to announce, if any, for a queue that now
	/// holds `depth` bytes.
	fn observe(&mut self, depth: usize) -> Option<bool> {
		if !self.latched && depth >= self.high {
			self.latched = true;
			Some(true)
		} else if self.latched && depth <= self.low {
			self.latched = false;
			Some(false)
		} else {
			None
		}
	}
}

struct SendOp {
	id: u64,
	data: Vec<u8>,
	dest: Option<SocketAddr>,
	token: Option<u64>,
	deadline: Option<FixedTimerKey>,
	cb: Option<Ret<Context>>,
}

struct ReceiveOp {
	id: u64,
	token: Option<u64>,
	deadline: Option<FixedTimerKey>,
	cb: Ret<(SocketAddr, Vec<u8>, Context)>,
}

struct Inbound {
	src: SocketAddr,
	data: Vec<u8>,
	context: Context,
}

/// A reactor-driven, OS-backed UDP datagram socket (spec.md §4.9).
///
/// `open` only allocates the handle's bookkeeping; the real OS socket is
/// created lazily by the first `bind`/`connect`, since separating
/// `socket(2)` from `bind(2)` would require raw fd plumbing this crate
/// doesn't otherwise need.
pub struct Socket {
	transport: Transport,
	io: Option<Io<StdUdpSocket>>,
	local: Option<SocketAddr>,
	remote: Option<SocketAddr>,

	send_queue: PriorityFifo<SendOp>,
	send_queue_bytes: usize,
	recv_queue: VecDeque<Inbound>,
	recv_queue_bytes: usize,
	pending_receive: Option<ReceiveOp>,

	send_flow: Flow,
	recv_flow: Flow,
	send_watermark: Watermark,
	recv_watermark: Watermark,

	send_limiter: Option<Arc<RateLimiter>>,
	recv_limiter: Option<Arc<RateLimiter>>,
	rate_limit_timer: Option<FixedTimerKey>,

	shutdown: Shutdown,
	detach: Detach,

	max_datagram: usize,
	next_token: u64,

	close_cb: Option<Ret<()>>,
}

impl Socket {
	pub fn init(_cx: CX![], transport: Transport) -> Option<Self> {
		Some(Self {
			transport,
			io: None,
			local: None,
			remote: None,

			send_queue: PriorityFifo::new(),
			send_queue_bytes: 0,
			recv_queue: VecDeque::new(),
			recv_queue_bytes: 0,
			pending_receive: None,

			send_flow: Flow::Relaxed,
			recv_flow: Flow::Relaxed,
			send_watermark: Watermark::new(DEFAULT_LOW_WATERMARK, DEFAULT_HIGH_WATERMARK),
			recv_watermark: Watermark::new(DEFAULT_LOW_WATERMARK, DEFAULT_HIGH_WATERMARK),

			send_limiter: None,
			recv_limiter: None,
			rate_limit_timer: None,

			shutdown: Shutdown::Open,
			detach: Detach::Attached,

			max_datagram: DEFAULT_MAX_DATAGRAM,
			next_token: 1,

			close_cb: None,
		})
	}

	fn check_open(&self) -> Result<(), Kind> {
		if matches!(self.shutdown, Shutdown::Closed | Shutdown::Detaching) {
			Err(Kind::Invalid)
		} else {
			Ok(())
		}
	}

	fn next_token(&mut self) -> u64 {
		let t = self.next_token;
		self.next_token += 1;
		t
	}

	fn register(&mut self, cx: CX![], sock: StdUdpSocket) -> Result<(), Kind> {
		sock.set_nonblocking(true).map_err(|e| Kind::from(e.kind()))?;
		let actor = cx.access_actor().clone();
		self.io = Some(Io::new(sock, fwd_to!([actor], on_event() as Event)));
		Ok(())
	}

	pub fn bind(&mut self, cx: CX![], endpoint: SocketAddr, cb: Ret<Result<(), Kind>>) {
		if self.io.is_some() {
			cb.ret(Err(Kind::Invalid));
			return;
		}

		match StdUdpSocket::bind(std::net::SocketAddr::from(endpoint)) {
			Ok(sock) => {
				let local = sock.local_addr().ok().map(SocketAddr::from).unwrap_or(endpoint);

				match self.register(cx, sock) {
					Ok(()) => {
						self.local = Some(local);
						cb.ret(Ok(()))
					}
					Err(err) => cb.ret(Err(err)),
				}
			}
			Err(err) => cb.ret(Err(Kind::from(err.kind()))),
		}
	}

	pub fn connect(&mut self, cx: CX![], endpoint: SocketAddr, cb: Ret<Result<(), Kind>>) {
		if self.io.is_none() {
			let wildcard = self.transport.wildcard();

			match StdUdpSocket::bind(wildcard) {
				Ok(sock) => {
					if let Err(err) = self.register(cx, sock) {
						cb.ret(Err(err));
						return;
					}
				}
				Err(err) => {
					cb.ret(Err(Kind::from(err.kind())));
					return;
				}
			}
		}

		let sock = self.io.as_ref().expect("just registered").get_ref();

		match sock.connect(std::net::SocketAddr::from(endpoint)) {
			Ok(()) => {
				self.local = sock.local_addr().ok().map(SocketAddr::from);
				self.remote = Some(endpoint);
				cb.ret(Ok(()));
			}
			Err(err) => cb.ret(Err(Kind::from(err.kind()))),
		}
	}

	/// Attempts a direct, synchronous send. Returns `Ok(n)` on success,
	/// `Err(WouldBlock)` if the caller should enqueue instead.
	fn send_now(&self, data: &[u8], dest: Option<SocketAddr>) -> Result<usize, Kind> {
		let io = self.io.as_ref().ok_or(Kind::Invalid)?;
		let sock = io.get_ref();

		let result = match dest.or(self.remote) {
			Some(addr) => sock.send_to(data, std::net::SocketAddr::from(addr)),
			None => sock.send(data),
		};

		result.map_err(|e| Kind::from(e.kind()))
	}

	/// Synchronous send (spec.md §4.9 `send(data, opts)`).
	pub fn send(&mut self, cx: CX![], data: Vec<u8>, dest: Option<SocketAddr>) -> Result<usize, Kind> {
		self.check_open()?;

		if matches!(self.shutdown, Shutdown::SendShut | Shutdown::SendReceiveShut) {
			return Err(Kind::Invalid);
		}

		if self.send_queue_bytes >= self.send_watermark.high {
			return Err(Kind::WouldBlock);
		}

		let now = Instant::now();

		if let Some(limiter) = &self.send_limiter {
			if limiter.would_exceed(now, data.len() as u64) {
				self.arm_rate_limit_retry(cx, limiter.estimate_time_until(now, data.len() as u64));
				self.send_flow.apply(Reason::RateLimit);
				return Err(Kind::WouldBlock);
			}
		}

		if self.send_flow.is_relaxed() {
			match self.send_now(&data, dest) {
				Ok(n) => {
					if let Some(limiter) = &self.send_limiter {
						limiter.submit(now, data.len() as u64);
					}
					return Ok(n);
				}
				Err(Kind::WouldBlock) => {}
				Err(err) => return Err(err),
			}
		}

		self.enqueue_send(data, dest, None, None);
		Err(Kind::WouldBlock)
	}

	/// Asynchronous send (spec.md §4.9 `send(data, opts, cb)`).
	pub fn send_async(&mut self, cx: CX![], data: Vec<u8>, dest: Option<SocketAddr>, token: Option<u64>, deadline: Option<Duration>, cb: Ret<Context>) {
		if let Err(kind) = self.check_open() {
			cb.ret(Context::err(kind));
			return;
		}

		let now = Instant::now();

		if self.send_flow.is_relaxed() && self.send_queue.is_empty() {
			let allowed = self.send_limiter.as_ref().map(|l| !l.would_exceed(now, data.len() as u64)).unwrap_or(true);

			if allowed {
				match self.send_now(&data, dest) {
					Ok(n) => {
						if let Some(limiter) = &self.send_limiter {
							limiter.submit(now, data.len() as u64);
						}
						cb.ret(Context::ok(n));
						return;
					}
					Err(Kind::WouldBlock) => {}
					Err(err) => {
						cb.ret(Context::err(err));
						return;
					}
				}
			}
		}

		let id = self.next_token();
		let deadline_key = deadline.map(|d| self.arm_deadline(cx, id, Direction::Send, d));
		self.enqueue_send(id, data, dest, token, deadline_key.map(|k| (k, cb)));
	}

	fn enqueue_send(&mut self, id: u64, data: Vec<u8>, dest: Option<SocketAddr>, token: Option<u64>, deadline_and_cb: Option<(FixedTimerKey, Ret<Context>)>) {
		let (deadline, cb) = match deadline_and_cb {
			Some((k, cb)) => (Some(k), Some(cb)),
			None => (None, None),
		};

		self.send_queue_bytes += data.len();
		self.send_queue.push(Priority::Normal, SendOp { id, data, dest, token, deadline, cb });

		if let Some(breach) = self.send_watermark.observe(self.send_queue_bytes) {
			info!("send queue {} watermark breached ({} bytes)", if breach { "high" } else { "low" }, self.send_queue_bytes);
		}

		self.send_flow.apply(Reason::Backpressure);

		if let Some(io) = &self.io {
			io.set_write_interest(true);
		}
	}

	fn arm_rate_limit_retry(&mut self, cx: CX![], wait: Duration) {
		let actor = cx.access_actor().clone();
		self.rate_limit_timer = Some(cx.after(wait, move |s| actor.apply(s, |this, cx| this.relax_rate_limit(cx))));
	}

	fn relax_rate_limit(&mut self, cx: CX![]) {
		self.rate_limit_timer = None;
		self.send_flow.relax(Reason::RateLimit);
		self.flush_send_queue(cx);
	}

	fn arm_recv_rate_limit_retry(&mut self, cx: CX![], wait: Duration) {
		let actor = cx.access_actor().clone();
		cx.after(wait, move |s| {
			actor.apply(s, |this, cx| {
				this.recv_flow.relax(Reason::RateLimit);
				if let Some(io) = &this.io {
					io.set_read_interest(true);
				}
				this.drain_kernel(cx);
			});
		});
	}

	/// `id` is an internal per-operation identity minted from the same
	/// counter as cancellation tokens, but kept independent of them: a
	/// `send_async`/`receive_async` call may omit a cancellation token while
	/// still carrying a deadline, and the deadline timer must still be able
	/// to find its operation when it fires.
	fn arm_deadline(&mut self, cx: CX![], id: u64, dir: Direction, deadline: Duration) -> FixedTimerKey {
		let actor = cx.access_actor().clone();
		cx.after(deadline, move |s| {
			actor.apply(s, move |this, cx| this.deadline_fired(cx, dir, id));
		})
	}

	fn deadline_fired(&mut self, _cx: CX![], dir: Direction, id: u64) {
		match dir {
			Direction::Send => {
				if let Some(op) = self.send_queue.remove_first(|op| op.id == id) {
					self.send_queue_bytes -= op.data.len();
					if let Some(cb) = op.cb {
						cb.ret(Context::err(Kind::DeadlineExceeded));
					}
				}
			}
			Direction::Receive => {
				if self.pending_receive.as_ref().map(|p| p.id) == Some(id) {
					if let Some(op) = self.pending_receive.take() {
						op.cb.ret((self.local.unwrap_or(self.transport.wildcard().into()), Vec::new(), Context::err(Kind::DeadlineExceeded)));
					}
				}
			}
		}
	}

	/// Queues a receive request (spec.md §4.9 `receive(opts, cb)`).
	pub fn receive_async(&mut self, cx: CX![], token: Option<u64>, deadline: Option<Duration>, cb: Ret<(SocketAddr, Vec<u8>, Context)>) {
		if let Err(kind) = self.check_open() {
			cb.ret((self.transport.wildcard().into(), Vec::new(), Context::err(kind)));
			return;
		}

		if let Some(inbound) = self.recv_queue.pop_front() {
			self.recv_queue_bytes -= inbound.data.len();
			self.observe_recv_watermark();
			cb.ret((inbound.src, inbound.data, inbound.context));
			return;
		}

		let id = self.next_token();
		let deadline_key = deadline.map(|d| self.arm_deadline(cx, id, Direction::Receive, d));
		self.pending_receive = Some(ReceiveOp { id, token, deadline: deadline_key, cb });
	}

	/// Synchronous receive (spec.md §4.9 `receive(ctx, out, opts)`).
	pub fn receive(&mut self) -> Result<(SocketAddr, Vec<u8>), Kind> {
		self.check_open()?;

		if let Some(inbound) = self.recv_queue.pop_front() {
			self.recv_queue_bytes -= inbound.data.len();
			self.observe_recv_watermark();
			return Ok((inbound.src, inbound.data));
		}

		Err(Kind::WouldBlock)
	}

	fn observe_recv_watermark(&mut self) {
		if let Some(breach) = self.recv_watermark.observe(self.recv_queue_bytes) {
			if !breach {
				self.recv_flow.relax(Reason::Backpressure);
				if let Some(io) = &self.io {
					io.set_read_interest(true);
				}
			}
		}
	}

	fn on_event(&mut self, cx: CX![], event: Event) {
		match event {
			Event::Error => self.fail(cx, Kind::OsError(0)),
			Event::Writable => self.flush_send_queue(cx),
			Event::Readable => self.drain_kernel(cx),
		}
	}

	fn flush_send_queue(&mut self, cx: CX![]) {
		while self.send_flow.is_relaxed() {
			let Some(op) = self.send_queue.peek() else { break };

			let now = Instant::now();
			if let Some(limiter) = &self.send_limiter {
				if limiter.would_exceed(now, op.data.len() as u64) {
					let wait = limiter.estimate_time_until(now, op.data.len() as u64);
					self.send_flow.apply(Reason::RateLimit);
					self.arm_rate_limit_retry(cx, wait);
					break;
				}
			}

			// Attempt the send against the still-queued entry before popping
			// it, so a `WouldBlock` leaves the op in place at its original
			// priority and sequence, with its deadline timer still armed.
			let result = self.send_now(&op.data, op.dest);
			if matches!(result, Err(Kind::WouldBlock)) {
				break;
			}

			let op = self.send_queue.pop().expect("peeked above");
			self.send_queue_bytes -= op.data.len();

			if let Some(breach) = self.send_watermark.observe(self.send_queue_bytes) {
				if !breach {
					self.send_flow.relax(Reason::Backpressure);
				}
			}

			if let Some(key) = op.deadline {
				cx.timer_del(key);
			}

			match result {
				Ok(n) => {
					if let Some(limiter) = &self.send_limiter {
						limiter.submit(now, op.data.len() as u64);
					}
					if let Some(cb) = op.cb {
						cb.ret(Context::ok(n));
					}
				}
				Err(Kind::WouldBlock) => unreachable!("handled above"),
				Err(err) => {
					if let Some(cb) = op.cb {
						cb.ret(Context::err(err));
					}
				}
			}
		}

		if self.send_queue.is_empty() {
			if let Some(io) = &self.io {
				io.set_write_interest(false);
			}
		}
	}

	fn drain_kernel(&mut self, cx: CX![]) {
		let mut buf = vec![0u8; self.max_datagram];

		loop {
			let now = Instant::now();
			if let Some(limiter) = &self.recv_limiter {
				if limiter.would_exceed(now, self.max_datagram as u64) {
					let wait = limiter.estimate_time_until(now, self.max_datagram as u64);
					self.recv_flow.apply(Reason::RateLimit);
					if let Some(io) = &self.io {
						io.set_read_interest(false);
					}
					self.arm_recv_rate_limit_retry(cx, wait);
					break;
				}
			}

			let Some(io) = &self.io else { break };
			let sock = io.get_ref();

			let result = match self.remote {
				Some(_) => sock.recv(&mut buf).map(|n| (n, self.remote.unwrap())),
				None => sock.recv_from(&mut buf).map(|(n, addr)| (n, SocketAddr::from(addr))),
			};

			match result {
				Ok((n, src)) => {
					if let Some(limiter) = &self.recv_limiter {
						limiter.submit(now, n as u64);
					}

					let data = buf[..n].to_vec();
					let context = Context::ok(n);

					if let Some(pending) = self.pending_receive.take() {
						if let Some(key) = pending.deadline {
							cx.timer_del(key);
						}
						pending.cb.ret((src, data, context));
					} else {
						self.recv_queue_bytes += data.len();
						self.recv_queue.push_back(Inbound { src, data, context });

						if let Some(breach) = self.recv_watermark.observe(self.recv_queue_bytes) {
							if breach {
								self.recv_flow.apply(Reason::Backpressure);
								if let Some(io) = &self.io {
									io.set_read_interest(false);
								}
							}
						}
					}
				}
				Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
				Err(e) => {
					warn!("udp socket read error: {e}");
					self.fail(cx, Kind::from(e.kind()));
					break;
				}
			}

			if self.recv_flow != Flow::Relaxed {
				break;
			}
		}
	}

	fn fail(&mut self, cx: CX![], kind: Kind) {
		for op in std::iter::from_fn(|| self.send_queue.pop()) {
			if let Some(cb) = op.cb {
				cb.ret(Context::err(kind));
			}
		}
		self.send_queue_bytes = 0;

		if let Some(pending) = self.pending_receive.take() {
			pending.cb.ret((self.local.unwrap_or(self.transport.wildcard().into()), Vec::new(), Context::err(kind)));
		}

		self.shutdown = Shutdown::SendReceiveShut;
		self.begin_detach(cx);
	}

	/// `shutdown(dir, mode)` (spec.md §4.9).
	pub fn shutdown(&mut self, cx: CX![], dir: Direction, mode: Mode) {
		match mode {
			Mode::Immediate => {
				if dir == Direction::Send {
					for op in std::iter::from_fn(|| self.send_queue.pop()) {
						if let Some(cb) = op.cb {
							cb.ret(Context::err(Kind::Cancelled));
						}
					}
					self.send_queue_bytes = 0;
				}
			}
			Mode::Graceful if dir == Direction::Send => {
				self.flush_send_queue(cx);
			}
			Mode::Graceful => {}
		}

		self.shutdown = match (self.shutdown, dir) {
			(Shutdown::Open, Direction::Send) => Shutdown::SendShut,
			(Shutdown::Open, Direction::Receive) => Shutdown::ReceiveShut,
			(Shutdown::SendShut, Direction::Receive) | (Shutdown::ReceiveShut, Direction::Send) => Shutdown::SendReceiveShut,
			(other, _) => other,
		};

		debug!("udp socket shutdown -> {:?}", self.shutdown);
	}

	/// `close()` / `close(cb)` (spec.md §4.9 two-phase close).
	pub fn close(&mut self, cx: CX![], cb: Option<Ret<()>>) {
		if matches!(self.shutdown, Shutdown::Closed | Shutdown::Detaching) {
			if let Some(cb) = cb {
				cb.ret(());
			}
			return;
		}

		self.send_flow.lock();
		self.recv_flow.lock();
		self.shutdown = Shutdown::SendReceiveShut;
		self.close_cb = cb;
		self.begin_detach(cx);
	}

	fn begin_detach(&mut self, cx: CX![]) {
		if self.detach != Detach::Attached {
			return;
		}

		self.detach = Detach::DetachRequested;
		self.shutdown = Shutdown::Detaching;

		// Dropping `Io` deregisters the fd; the reactor confirms detachment
		// synchronously since polling is cooperative on this thread.
		self.io = None;
		self.detach = Detach::Detached;
		self.shutdown = Shutdown::Closed;

		if let Some(cb) = self.close_cb.take() {
			cb.ret(());
		}

		let _ = cx;
	}

	/// `cancel(token)` (spec.md §4.9/§5).
	pub fn cancel(&mut self, cx: CX![], token: u64) -> Result<(), Kind> {
		if let Some(op) = self.send_queue.remove_first(|op| op.token == Some(token)) {
			self.send_queue_bytes -= op.data.len();
			if let Some(key) = op.deadline {
				cx.timer_del(key);
			}
			if let Some(cb) = op.cb {
				cb.ret(Context::err(Kind::Cancelled));
			}
			return Ok(());
		}

		if self.pending_receive.as_ref().map(|p| p.token) == Some(Some(token)) {
			let op = self.pending_receive.take().expect("checked above");
			if let Some(key) = op.deadline {
				cx.timer_del(key);
			}
			op.cb.ret((self.local.unwrap_or(self.transport.wildcard().into()), Vec::new(), Context::err(Kind::Cancelled)));
			return Ok(());
		}

		Err(Kind::NotFound)
	}

	pub fn allocate_token(&mut self) -> u64 {
		self.next_token()
	}

	pub fn set_send_rate_limiter(&mut self, limiter: Option<Arc<RateLimiter>>) {
		self.send_limiter = limiter;
	}

	pub fn set_recv_rate_limiter(&mut self, limiter: Option<Arc<RateLimiter>>) {
		self.recv_limiter = limiter;
	}

	pub fn set_send_watermark(&mut self, low: usize, high: usize) {
		self.send_watermark = Watermark::new(low, high);
	}

	pub fn set_recv_watermark(&mut self, low: usize, high: usize) {
		self.recv_watermark = Watermark::new(low, high);
	}

	/// Kernel timestamp correlation (spec.md §4.9) requires raw
	/// `SO_TIMESTAMPING`/`MSG_ZEROCOPY` socket-option plumbing that
	/// `std::net::UdpSocket` doesn't expose, so this is never actually
	/// enabled.
	pub fn timestamp_outgoing(&mut self, _on: bool) -> Result<(), Kind> {
		Err(Kind::Unsupported)
	}

	pub fn timestamp_incoming(&mut self, _on: bool) -> Result<(), Kind> {
		Err(Kind::Unsupported)
	}

	pub fn local_addr(&self) -> Option<SocketAddr> {
		self.local
	}

	pub fn remote_addr(&self) -> Option<SocketAddr> {
		self.remote
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn watermark_alternates_high_then_low() {
		let mut wm = Watermark::new(10, 100);

		assert_eq!(wm.observe(50), None);
		assert_eq!(wm.observe(150), Some(true));
		assert_eq!(wm.observe(150), None);
		assert_eq!(wm.observe(5), Some(false));
		assert_eq!(wm.observe(5), None);
	}

	#[test]
	fn flow_relax_requires_matching_reason() {
		let mut flow = Flow::Relaxed;
		flow.apply(Reason::Backpressure);
		flow.relax(Reason::RateLimit);
		assert_eq!(flow, Flow::Applied(Reason::Backpressure));
		flow.relax(Reason::Backpressure);
		assert_eq!(flow, Flow::Relaxed);
	}

	#[test]
	fn locked_flow_ignores_apply() {
		let mut flow = Flow::Relaxed;
		flow.lock();
		flow.apply(Reason::Manual);
		assert_eq!(flow, Flow::Locked);
	}
}
