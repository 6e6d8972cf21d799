use utils::error::Kind;

/// Which resolution layer produced a resolver result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
	Override,
	HostDatabase,
	Cache,
	Client,
	System,
}

/// Accompanies every asynchronous completion callback: the outcome, where it
/// came from (for resolver completions), and how much data was transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
	pub kind: Kind,
	pub source: Option<Source>,
	pub bytes: usize,
}

impl Context {
	pub fn ok(bytes: usize) -> Self {
		Self { kind: Kind::Ok, source: None, bytes }
	}

	pub fn err(kind: Kind) -> Self {
		Self { kind, source: None, bytes: 0 }
	}

	pub fn with_source(mut self, source: Source) -> Self {
		self.source = Some(source);
		self
	}
}
