extern crate alloc;

use core::cell::RefCell;
use core::time::Duration;
use std::io;

use stakker::Fwd;

mod logger;
mod rt;
pub mod time;

pub use logger::Logger;
pub use rt::*;

#[cfg(target_family = "unix")]
mod sys {
	pub use std::os::fd::{AsRawFd, RawFd};

	pub use libc::{poll, pollfd as Poll, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_fd()
	}
}

#[cfg(target_family = "windows")]
mod sys {
	pub use std::os::windows::io::AsRawSocket as AsRawFd;

	pub use windows_sys::Win32::Networking::WinSock::{
		WSAPoll as poll, POLLERR, POLLHUP, POLLNVAL, POLLRDNORM as POLLIN, POLLWRNORM as POLLOUT, SOCKET as RawFd, WSAPOLLFD as Poll,
	};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_socket() as _
	}
}

pub use sys::AsRawFd;
use sys::*;

fn as_timeout(t: Option<Duration>) -> i32 {
	t.and_then(|d| d.as_millis().try_into().ok()).unwrap_or(-1)
}

/// An event delivered by the reactor to a registered file descriptor.
///
/// `Error` is delivered for `POLLERR`/`POLLHUP`/`POLLNVAL` alike; the
/// registrant queries `SO_ERROR` itself if it needs the underlying cause.
/// The reactor never panics on a remote condition, only on API misuse
/// (double registration, polling after drop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
	Readable,
	Writable,
	Error,
}

thread_local! {
	static GLOBAL: RefCell<State> = const {
		RefCell::new(State {
			fds: Vec::new(),
			entries: Vec::new(),
		})
	};
}

struct State {
	fds: Vec<Poll>,
	entries: Vec<Fwd<Event>>,
}

impl State {
	fn with<X, F: FnOnce(&mut Self) -> X>(f: F) -> X {
		GLOBAL.with(|x| f(&mut x.borrow_mut()))
	}

	fn idx_of<T: AsRawFd>(&mut self, socket: &T) -> usize {
		let raw = as_raw(socket);
		self.fds.iter().position(|f| f.fd == raw).expect("socket is registered with the reactor")
	}

	/// Returns whether any more I/O is waiting.
	fn is_io(&self) -> bool {
		!self.fds.is_empty()
	}

	fn log_stats(&self) {
		log::debug!("reactor shutting down with {} descriptor(s) still registered", self.fds.len());
	}

	/// Polls the fds once, dispatching one event per ready descriptor.
	/// Returns whether any file descriptors were ready for I/O.
	fn poll(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
		let ret = unsafe {
			poll(
				self.fds.as_mut_ptr(),
				self.fds.len().try_into().expect("fewer than u32::MAX fds"),
				as_timeout(timeout),
			)
		};

		if ret < 0 {
			return Err(io::Error::last_os_error());
		}

		let mut pending = ret as u32;

		if pending == 0 {
			return Ok(false);
		}

		for idx in 0..self.fds.len() {
			let revents = self.fds[idx].revents;

			if revents == 0 {
				continue;
			}

			self.fds[idx].revents = 0;
			pending -= 1;

			let fwd = &self.entries[idx];

			if revents & (POLLERR | POLLHUP | POLLNVAL) != 0 {
				fwd.fwd(Event::Error);
			} else {
				if revents & POLLIN != 0 {
					fwd.fwd(Event::Readable);
				}

				if revents & POLLOUT != 0 {
					fwd.fwd(Event::Writable);
				}
			}

			if pending == 0 {
				break;
			}
		}

		Ok(true)
	}
}

/// A file descriptor registered with the process-wide reactor.
///
/// Interest in writability starts disabled (most sockets are read-first)
/// and is toggled with [`Io::set_write_interest`]; interest in readability
/// can likewise be paused with [`Io::set_read_interest`] to apply
/// receive-side flow control. Dropping an `Io` deregisters the descriptor.
pub struct Io<T: AsRawFd> {
	inner: T,
}

impl<T: AsRawFd> Io<T> {
	pub fn new(inner: T, events: Fwd<Event>) -> Self {
		State::with(|s| {
			s.fds.push(Poll { fd: as_raw(&inner), events: POLLIN, revents: 0 });
			s.entries.push(events);
		});

		Self { inner }
	}

	pub fn get_ref(&self) -> &T {
		&self.inner
	}

	pub fn set_read_interest(&self, on: bool) {
		State::with(|s| {
			let idx = s.idx_of(&self.inner);
			let events = &mut s.fds[idx].events;

			if on {
				*events |= POLLIN;
			} else {
				*events &= !POLLIN;
			}
		});
	}

	pub fn set_write_interest(&self, on: bool) {
		State::with(|s| {
			let idx = s.idx_of(&self.inner);
			let events = &mut s.fds[idx].events;

			if on {
				*events |= POLLOUT;
			} else {
				*events &= !POLLOUT;
			}
		});
	}
}

impl<T: AsRawFd> Drop for Io<T> {
	fn drop(&mut self) {
		State::with(|s| {
			let idx = s.idx_of(&self.inner);
			s.fds.swap_remove(idx);
			s.entries.swap_remove(idx);
		});
	}
}

/// Returns whether the reactor still has descriptors registered.
pub fn is_io() -> bool {
	State::with(State::is_io)
}

/// Polls all registered descriptors once, blocking for at most `timeout`.
pub fn poll_once(timeout: Option<Duration>) -> io::Result<bool> {
	State::with(|s| s.poll(timeout))
}
