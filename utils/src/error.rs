use core::fmt::{self, Display};

/// The taxonomy of outcomes an asynchronous or fallible operation can produce.
///
/// `Ok` is included so that completion contexts (see `net::Context`) can carry
/// a uniform `Kind` even on success; functions returning `Result<T, Kind>`
/// never use `Kind::Ok` as their error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
	Ok,
	WouldBlock,
	Interrupted,
	EndOfInput,
	Invalid,
	Unsupported,
	Cancelled,
	DeadlineExceeded,
	NotFound,
	NotAuthorized,
	OsError(i32),
}

impl Kind {
	#[inline]
	pub fn is_ok(self) -> bool {
		matches!(self, Kind::Ok)
	}

	/// Whether this kind represents a transient condition worth retrying
	/// rather than failing the owning operation outright.
	#[inline]
	pub fn is_transient(self) -> bool {
		matches!(self, Kind::WouldBlock | Kind::Interrupted)
	}
}

impl Display for Kind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Kind::Ok => write!(f, "ok"),
			Kind::WouldBlock => write!(f, "would block"),
			Kind::Interrupted => write!(f, "interrupted"),
			Kind::EndOfInput => write!(f, "end of input"),
			Kind::Invalid => write!(f, "invalid"),
			Kind::Unsupported => write!(f, "unsupported"),
			Kind::Cancelled => write!(f, "cancelled"),
			Kind::DeadlineExceeded => write!(f, "deadline exceeded"),
			Kind::NotFound => write!(f, "not found"),
			Kind::NotAuthorized => write!(f, "not authorized"),
			Kind::OsError(code) => write!(f, "os error {code}"),
		}
	}
}

impl std::error::Error for Kind {}

impl From<std::io::ErrorKind> for Kind {
	fn from(kind: std::io::ErrorKind) -> Self {
		use std::io::ErrorKind as E;

		match kind {
			E::WouldBlock => Kind::WouldBlock,
			E::Interrupted => Kind::Interrupted,
			E::NotFound => Kind::NotFound,
			E::PermissionDenied => Kind::NotAuthorized,
			E::UnexpectedEof => Kind::EndOfInput,
			E::InvalidInput | E::InvalidData => Kind::Invalid,
			_ => Kind::OsError(0),
		}
	}
}

pub type Result<T = (), E = Kind> = core::result::Result<T, E>;

#[doc(hidden)]
pub trait Ext<T, E> {
	fn ok_or(self, f: impl FnOnce(E)) -> Option<T>;
}

impl<T, E> Ext<T, E> for core::result::Result<T, E> {
	fn ok_or(self, f: impl FnOnce(E)) -> Option<T> {
		match self {
			Ok(v) => Some(v),
			Err(e) => {
				f(e);
				None
			}
		}
	}
}

#[doc(hidden)]
pub trait ExtOpaque<T> {
	fn some_or(self, f: impl FnOnce()) -> Option<T>;
}

impl<T> ExtOpaque<T> for Option<T> {
	fn some_or(self, f: impl FnOnce()) -> Option<T> {
		if self.is_none() {
			f();
		}

		self
	}
}

pub use Ext as _;
