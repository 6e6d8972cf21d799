use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket as StdUdpSocket};
use std::time::{Duration, Instant};

use log::{info, warn};
use runtime::{Event, Io};
use stakker::{fwd_to, FixedTimerKey, Ret, CX};
use utils::error::Kind;

use super::cache::{self, Cache};
use super::codec::{Message, RData, TY_A, TY_AAAA, TY_PTR};
use crate::context::{Context, Source};
use crate::socket::Transport;

const DNS_PORT: u16 = 53;

/// Which address families an A/AAAA lookup should collect (spec.md §4.7
/// "Answer processing (A/AAAA operation): ... filter by requested address
/// family (if any)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
	V4,
	V6,
}

#[derive(Debug, Clone)]
pub enum Answer {
	Addresses(Vec<IpAddr>),
	Name(String),
}

pub struct Options {
	pub family: Option<Family>,
	pub selector: Option<usize>,
	pub timeout: Duration,
	/// Full passes over the configured server list before giving up
	/// (spec.md §6 `client_attempts`).
	pub attempts: usize,
}

impl Default for Options {
	fn default() -> Self {
		Self { family: None, selector: None, timeout: Duration::from_secs(5), attempts: 2 }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
	Address,
	Ptr,
}

struct Operation {
	names: Vec<String>,
	name_idx: usize,
	qtype: u16,
	kind: OperationKind,
	family: Option<Family>,
	selector: Option<usize>,
	user_name: String,
	original_qname: String,
	server_idx: usize,
	attempts_left: usize,
	timeout: Duration,
	deadline: Option<FixedTimerKey>,
	cb: Ret<(Result<Answer, Kind>, Context)>,
}

struct Server {
	addr: IpAddr,
	io: Option<Io<StdUdpSocket>>,
	in_flight: HashMap<u16, Operation>,
	next_id: u16,
}

impl Server {
	fn new(addr: IpAddr) -> Self {
		Self { addr, io: None, in_flight: HashMap::new(), next_id: 1 }
	}

	/// Allocates the next transaction id, skipping 0 and any id already in
	/// flight on this server (spec.md §4.7 "Transaction-id collision
	/// policy").
	fn alloc_id(&mut self) -> Option<u16> {
		let start = self.next_id;

		loop {
			let id = self.next_id;
			self.next_id = self.next_id.wrapping_add(1);
			if self.next_id == 0 {
				self.next_id = 1;
			}

			if !self.in_flight.contains_key(&id) {
				return Some(id);
			}

			if self.next_id == start {
				return None;
			}
		}
	}
}

/// Expands the search list for a user-supplied name (spec.md §4.7
/// "Search-list expansion").
fn expand_search_list(name: &str, suffixes: &[String]) -> Vec<String> {
	if name.ends_with('.') {
		return vec![name.trim_end_matches('.').to_string()];
	}

	let mut names = Vec::new();

	if name.contains('.') {
		names.push(name.to_string());
	}

	for suffix in suffixes {
		names.push(format!("{name}.{suffix}"));
	}

	if names.is_empty() {
		names.push(name.to_string());
	}

	names
}

/// Owns one socket, operation queue, and transaction map per configured
/// nameserver (spec.md §4.7).
pub struct Client {
	servers: Vec<Server>,
	search_list: Vec<String>,
	cache: Cache,
	cache_opts: cache::Options,
}

impl Client {
	pub fn init(_cx: CX![], nameservers: Vec<IpAddr>, search_list: Vec<String>, cache_opts: cache::Options) -> Option<Self> {
		if nameservers.is_empty() {
			return None;
		}
		Some(Self { servers: nameservers.into_iter().map(Server::new).collect(), search_list, cache: Cache::new(), cache_opts })
	}

	/// Looks up a previously cached address answer without issuing a query
	/// (spec.md §4.6; the client's cache is consulted ahead of dispatch by
	/// [`Client::resolve_address`]).
	pub fn cached_addresses(&mut self, name: &str) -> Option<Vec<IpAddr>> {
		self.cache.get_addresses(name, &self.cache_opts, Instant::now())
	}

	pub fn cached_name(&mut self, addr: IpAddr) -> Option<String> {
		self.cache.get_name(addr, Instant::now())
	}

	fn ensure_open(&mut self, cx: CX![], idx: usize) -> Result<(), Kind> {
		if self.servers[idx].io.is_some() {
			return Ok(());
		}

		let transport = match self.servers[idx].addr {
			IpAddr::V4(_) => Transport::UdpV4,
			IpAddr::V6(_) => Transport::UdpV6,
		};

		let sock = StdUdpSocket::bind(transport.wildcard()).map_err(|e| Kind::from(e.kind()))?;
		sock.set_nonblocking(true).map_err(|e| Kind::from(e.kind()))?;

		let actor = cx.access_actor().clone();
		let io = Io::new(sock, fwd_to!([actor], on_event(idx) as Event));
		self.servers[idx].io = Some(io);

		Ok(())
	}

	fn send_query(&mut self, cx: CX![], server_idx: usize, id: u16, name: &str, qtype: u16) -> io::Result<()> {
		let msg = Message::query(id, name, qtype);
		let buf = msg.encode();

		let server = &self.servers[server_idx];
		let sock = server.io.as_ref().expect("opened by caller").get_ref();

		sock.send_to(&buf, std::net::SocketAddr::new(server.addr, DNS_PORT))?;

		let _ = cx;
		Ok(())
	}

	fn start(&mut self, cx: CX![], kind: OperationKind, user_name: String, qtype: u16, opts: Options, cb: Ret<(Result<Answer, Kind>, Context)>) {
		let names = if kind == OperationKind::Ptr { vec![user_name.clone()] } else { expand_search_list(&user_name, &self.search_list) };

		let op = Operation {
			names,
			name_idx: 0,
			qtype,
			kind,
			family: opts.family,
			selector: opts.selector,
			user_name: user_name.clone(),
			original_qname: user_name,
			server_idx: 0,
			attempts_left: opts.attempts.max(1),
			timeout: opts.timeout,
			deadline: None,
			cb,
		};

		self.dispatch(cx, op);
	}

	/// Issues (or re-issues, on search-list advance or failover) a query for
	/// `op` against its current server, installing it in that server's
	/// transaction map and arming its per-attempt timeout.
	fn dispatch(&mut self, cx: CX![], mut op: Operation) {
		loop {
			if op.server_idx >= self.servers.len() {
				if op.attempts_left <= 1 {
					op.cb.ret((Err(Kind::EndOfInput), Context::err(Kind::EndOfInput).with_source(Source::Client)));
					return;
				}
				op.attempts_left -= 1;
				op.server_idx = 0;
			}

			if let Err(err) = self.ensure_open(cx, op.server_idx) {
				warn!("failed to open DNS socket: {err}");
				op.server_idx += 1;
				continue;
			}

			let server_idx = op.server_idx;
			let Some(id) = self.servers[server_idx].alloc_id() else {
				op.cb.ret((Err(Kind::Invalid), Context::err(Kind::Invalid).with_source(Source::Client)));
				return;
			};

			let name = op.names[op.name_idx].clone();

			match self.send_query(cx, server_idx, id, &name, op.qtype) {
				Ok(()) => {
					let actor = cx.access_actor().clone();
					let timeout = op.timeout;
					op.deadline = Some(cx.after(timeout, move |s| {
						actor.apply(s, move |this, cx| this.timed_out(cx, server_idx, id));
					}));
					self.servers[server_idx].in_flight.insert(id, op);
					return;
				}
				Err(err) => {
					warn!("DNS send to {} failed: {err}", self.servers[server_idx].addr);
					op.server_idx += 1;
				}
			}
		}
	}

	fn timed_out(&mut self, cx: CX![], server_idx: usize, id: u16) {
		if let Some(mut op) = self.servers[server_idx].in_flight.remove(&id) {
			op.deadline = None;
			op.server_idx += 1;
			info!("DNS query to {} timed out, failing over", self.servers[server_idx].addr);
			self.dispatch(cx, op);
		}
	}

	fn on_event(&mut self, cx: CX![], idx: usize, event: Event) {
		match event {
			Event::Readable => self.drain(cx, idx),
			Event::Error | Event::Writable => {}
		}
	}

	fn drain(&mut self, cx: CX![], idx: usize) {
		let mut buf = [0u8; 512];

		loop {
			let Some(io) = &self.servers[idx].io else { break };

			let (n, src) = match io.get_ref().recv_from(&mut buf) {
				Ok(v) => v,
				Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
				Err(e) => {
					warn!("DNS socket read error: {e}");
					break;
				}
			};

			if src.ip() != self.servers[idx].addr {
				continue;
			}

			let Ok(msg) = Message::decode(&buf[..n]) else {
				continue;
			};

			let Some(op) = self.servers[idx].in_flight.remove(&msg.id) else {
				continue;
			};

			self.handle_response(cx, idx, op, msg);
		}
	}

	fn handle_response(&mut self, cx: CX![], idx: usize, mut op: Operation, msg: Message) {
		if let Some(key) = op.deadline.take() {
			cx.timer_del(key);
		}

		match (msg.flags.rcode, msg.flags.tc) {
			(0, false) => self.deliver(op, msg),
			(0, true) => {
				op.server_idx += 1;
				self.dispatch(cx, op);
			}
			(3, _) => {
				// NAME_ERROR
				if op.name_idx + 1 < op.names.len() {
					op.name_idx += 1;
				} else {
					op.server_idx += 1;
				}
				self.dispatch(cx, op);
			}
			(2, _) | (4, _) | (5, _) => {
				op.server_idx += 1;
				self.dispatch(cx, op);
			}
			_ => op.cb.ret((Err(Kind::Invalid), Context::err(Kind::Invalid).with_source(Source::Client))),
		}

		let _ = idx;
	}

	/// Delivers a successful answer to the operation's caller, updating the
	/// cache for both the name actually queried and the original name the
	/// caller asked about (spec.md §4.7 "updates cache for both the queried
	/// name and the original name").
	fn deliver(&mut self, op: Operation, msg: Message) {
		let server_addr = self.servers.get(op.server_idx).map(|s| s.addr).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
		let now = Instant::now();

		match op.kind {
			OperationKind::Address => {
				let mut addrs = Vec::new();
				let mut ttl = u32::MAX;

				for rr in &msg.answers {
					match (&rr.rdata, op.family) {
						(RData::A(addr), None | Some(Family::V4)) => addrs.push(IpAddr::V4(*addr)),
						(RData::Aaaa(addr), None | Some(Family::V6)) => addrs.push(IpAddr::V6(*addr)),
						_ => continue,
					}

					ttl = ttl.min(rr.ttl);
				}

				if addrs.is_empty() {
					self.cache.update_negative(&op.original_qname, &self.cache_opts, now);
					op.cb.ret((Err(Kind::NotFound), Context::err(Kind::NotFound).with_source(Source::Client)));
					return;
				}

				let ttl = Duration::from_secs(ttl as u64);
				self.cache.update_host(&op.names[op.name_idx], addrs.clone(), server_addr, ttl, &self.cache_opts, now);
				if op.names[op.name_idx] != op.original_qname {
					self.cache.update_host(&op.original_qname, addrs.clone(), server_addr, ttl, &self.cache_opts, now);
				}

				if let Some(selector) = op.selector {
					let chosen = addrs[selector % addrs.len()];
					addrs = vec![chosen];
				}

				op.cb.ret((Ok(Answer::Addresses(addrs)), Context::ok(0).with_source(Source::Client)));
			}
			OperationKind::Ptr => {
				let name = msg.answers.iter().find_map(|rr| match &rr.rdata {
					RData::Ptr(name) => Some(name.clone()),
					_ => None,
				});

				match name {
					Some(name) => op.cb.ret((Ok(Answer::Name(name)), Context::ok(0).with_source(Source::Client))),
					None => op.cb.ret((Err(Kind::NotFound), Context::err(Kind::NotFound).with_source(Source::Client))),
				}
			}
		}
	}

	/// Resolves `name` to its configured addresses, consulting the client's
	/// own cache before issuing a query.
	pub fn resolve_address(&mut self, cx: CX![], name: String, opts: Options, cb: Ret<(Result<Answer, Kind>, Context)>) {
		if let Some(addrs) = self.cached_addresses(&name) {
			if addrs.is_empty() {
				cb.ret((Err(Kind::NotFound), Context::ok(0).with_source(Source::Cache)));
			} else {
				cb.ret((Ok(Answer::Addresses(addrs)), Context::ok(0).with_source(Source::Cache)));
			}
			return;
		}

		let qtype = match opts.family {
			Some(Family::V6) => TY_AAAA,
			Some(Family::V4) | None => TY_A,
		};
		self.start(cx, OperationKind::Address, name, qtype, opts, cb);
	}

	/// IPv6 reverse lookups are not supported; the search-list/failover
	/// machinery below assumes a reversible in-addr.arpa name.
	pub fn resolve_ptr(&mut self, cx: CX![], addr: IpAddr, opts: Options, cb: Ret<(Result<Answer, Kind>, Context)>) {
		let IpAddr::V4(_) = addr else {
			cb.ret((Err(Kind::Unsupported), Context::err(Kind::Unsupported).with_source(Source::Client)));
			return;
		};

		if let Some(name) = self.cached_name(addr) {
			cb.ret((Ok(Answer::Name(name)), Context::ok(0).with_source(Source::Cache)));
			return;
		}

		self.start(cx, OperationKind::Ptr, ptr_name(addr), TY_PTR, opts, cb);
	}
}

fn ptr_name(addr: IpAddr) -> String {
	match addr {
		IpAddr::V4(v4) => {
			let o = v4.octets();
			format!("{}.{}.{}.{}.in-addr.arpa", o[3], o[2], o[1], o[0])
		}
		IpAddr::V6(_) => unreachable!("resolve_ptr rejects IPv6 before calling ptr_name"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn search_list_includes_bare_name_first_when_dotted() {
		let names = expand_search_list("host.internal", &["example.com".to_string()]);
		assert_eq!(names, vec!["host.internal", "host.internal.example.com"]);
	}

	#[test]
	fn absolute_name_skips_search_list() {
		let names = expand_search_list("host.internal.", &["example.com".to_string()]);
		assert_eq!(names, vec!["host.internal"]);
	}

	#[test]
	fn bare_name_without_dots_appends_each_suffix() {
		let names = expand_search_list("host", &["a.com".to_string(), "b.com".to_string()]);
		assert_eq!(names, vec!["host.a.com", "host.b.com"]);
	}

	#[test]
	fn ipv4_ptr_name_is_reversed_octets() {
		assert_eq!(ptr_name(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))), "34.216.184.93.in-addr.arpa");
	}
}
