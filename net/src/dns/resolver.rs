use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use stakker::{Ret, CX};
use utils::error::Kind;

use super::cache;
use super::client::{self, Answer, Client, Family};
use super::hostdb::{HostDatabase, PortDatabase, Proto};
use crate::context::{Context, Source};

/// The knobs from spec.md §6's resolver configuration table. `client_*`
/// fields only take effect while `client_enabled` is set and at least one
/// remote endpoint is configured, since the transaction client is
/// constructed once at [`Resolver::init`].
pub struct Options {
	pub client_enabled: bool,
	pub host_database_enabled: bool,
	pub positive_cache_enabled: bool,
	pub negative_cache_enabled: bool,
	pub positive_cache_min_ttl: Duration,
	pub positive_cache_max_ttl: Duration,
	pub system_enabled: bool,
	pub client_remote_endpoint_list: Vec<IpAddr>,
	pub client_domain_search_list: Vec<String>,
	pub client_attempts: usize,
	pub client_timeout: Duration,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			client_enabled: true,
			host_database_enabled: true,
			positive_cache_enabled: true,
			negative_cache_enabled: true,
			positive_cache_min_ttl: Duration::from_secs(1),
			positive_cache_max_ttl: Duration::from_secs(86_400),
			system_enabled: true,
			client_remote_endpoint_list: Vec::new(),
			client_domain_search_list: Vec::new(),
			client_attempts: 2,
			client_timeout: Duration::from_secs(5),
		}
	}
}

type AddressReply = Ret<(Result<Answer, Kind>, Context)>;

struct SystemResult {
	name: String,
	outcome: Result<Vec<IpAddr>, Kind>,
}

/// A small fixed pool of blocking worker threads that shell out to the
/// platform's own getaddrinfo via `std::net::ToSocketAddrs`, so a slow or
/// hung system resolver never blocks the reactor thread. Nothing in this
/// crate demonstrates waking a stakker actor from a foreign thread, so
/// completions are drained by polling `results` from the actor's own timer
/// loop instead of pushing a wakeup.
struct SystemPool {
	jobs: mpsc::Sender<String>,
	results: mpsc::Receiver<SystemResult>,
}

const SYSTEM_POOL_WORKERS: usize = 2;

impl SystemPool {
	fn new() -> Self {
		let (job_tx, job_rx) = mpsc::channel::<String>();
		let job_rx = Arc::new(Mutex::new(job_rx));
		let (result_tx, result_rx) = mpsc::channel::<SystemResult>();

		for _ in 0..SYSTEM_POOL_WORKERS {
			let job_rx = job_rx.clone();
			let result_tx = result_tx.clone();
			thread::spawn(move || loop {
				let name = {
					let rx = job_rx.lock().expect("system resolver job queue poisoned");
					rx.recv()
				};
				let Ok(name) = name else { break };

				let outcome = (name.as_str(), 0u16)
					.to_socket_addrs()
					.map(|it| it.map(|addr| addr.ip()).collect::<Vec<_>>())
					.map_err(|e| Kind::from(e.kind()));

				if result_tx.send(SystemResult { name, outcome }).is_err() {
					break;
				}
			});
		}

		Self { jobs: job_tx, results: result_rx }
	}

	fn submit(&self, name: String) {
		let _ = self.jobs.send(name);
	}

	fn poll(&self) -> Vec<SystemResult> {
		self.results.try_iter().collect()
	}
}

/// Ties together overrides, the static host database, the DNS transaction
/// client (which owns its own response cache, see [`Client`]), and the
/// system resolver in the fixed lookup order from spec.md §4.8.
pub struct Resolver {
	overrides_fwd: HashMap<String, Vec<IpAddr>>,
	overrides_rev: HashMap<IpAddr, String>,

	host_database_enabled: bool,
	host_db: Option<HostDatabase>,
	port_db: Option<PortDatabase>,

	client: Option<Client>,
	client_opts: client::Options,

	system: Option<SystemPool>,
	system_pending: HashMap<String, Vec<AddressReply>>,
}

impl Resolver {
	pub fn init(cx: CX![], opts: Options) -> Option<Self> {
		let cache_opts = cache::Options {
			positive_enabled: opts.positive_cache_enabled,
			negative_enabled: opts.negative_cache_enabled,
			min_ttl: opts.positive_cache_min_ttl,
			max_ttl: opts.positive_cache_max_ttl,
		};

		let client = (opts.client_enabled && !opts.client_remote_endpoint_list.is_empty())
			.then(|| Client::init(cx, opts.client_remote_endpoint_list.clone(), opts.client_domain_search_list.clone(), cache_opts))
			.flatten();

		let client_opts =
			client::Options { family: None, selector: None, timeout: opts.client_timeout, attempts: opts.client_attempts.max(1) };

		Some(Self {
			overrides_fwd: HashMap::new(),
			overrides_rev: HashMap::new(),
			host_database_enabled: opts.host_database_enabled,
			host_db: None,
			port_db: None,
			client,
			client_opts,
			system: opts.system_enabled.then(SystemPool::new),
			system_pending: HashMap::new(),
		})
	}

	pub fn set_override(&mut self, name: String, addrs: Vec<IpAddr>) {
		for addr in &addrs {
			self.overrides_rev.insert(*addr, name.clone());
		}
		self.overrides_fwd.insert(name, addrs);
	}

	pub fn load_host_database(&mut self, text: &str) {
		self.host_db = Some(HostDatabase::parse(text));
	}

	fn host_db(&self) -> Option<&HostDatabase> {
		if self.host_database_enabled { self.host_db.as_ref() } else { None }
	}

	pub fn load_port_database(&mut self, text: &str) {
		self.port_db = Some(PortDatabase::parse(text));
	}

	/// Drains any system-resolver jobs that finished since the last call.
	/// Callers on a reactor loop should invoke this from a short recurring
	/// timer, the way `udp::Socket` arms its own retry timers with `cx.after`.
	pub fn poll_system(&mut self, _cx: CX![]) {
		let Some(pool) = &self.system else { return };

		for result in pool.poll() {
			let Some(waiters) = self.system_pending.remove(&result.name) else { continue };

			let answer = result.outcome.map(Answer::Addresses);

			for cb in waiters {
				let ctx = match &answer {
					Ok(_) => Context::ok(0).with_source(Source::System),
					Err(err) => Context::err(*err).with_source(Source::System),
				};
				cb.ret((answer.clone(), ctx));
			}
		}
	}

	/// Resolves `name` to its configured addresses, in lookup order
	/// Overrides → host database → DNS client (which consults its own cache
	/// before querying) → system resolver.
	pub fn get_ip_address(&mut self, cx: CX![], name: String, family: Option<Family>, cb: AddressReply) {
		if let Some(addrs) = self.overrides_fwd.get(&name) {
			cb.ret((Ok(Answer::Addresses(addrs.clone())), Context::ok(0).with_source(Source::Override)));
			return;
		}

		if let Some(addrs) = self.host_db().and_then(|db| db.get_addresses(&name)) {
			cb.ret((Ok(Answer::Addresses(addrs.to_vec())), Context::ok(0).with_source(Source::HostDatabase)));
			return;
		}

		if let Some(client) = &mut self.client {
			let opts = client::Options { family, ..copy_options(&self.client_opts) };
			client.resolve_address(cx, name, opts, cb);
			return;
		}

		self.fall_back_to_system(name, cb);
	}

	fn fall_back_to_system(&mut self, name: String, cb: AddressReply) {
		let Some(pool) = &self.system else {
			cb.ret((Err(Kind::NotFound), Context::err(Kind::NotFound)));
			return;
		};

		self.system_pending.entry(name.clone()).or_default().push(cb);
		pool.submit(name);
	}

	/// Resolves `addr` to a domain name, in lookup order Overrides → host
	/// database → DNS client.
	pub fn get_domain_name(&mut self, cx: CX![], addr: IpAddr, cb: AddressReply) {
		if let Some(name) = self.overrides_rev.get(&addr) {
			cb.ret((Ok(Answer::Name(name.clone())), Context::ok(0).with_source(Source::Override)));
			return;
		}

		if let Some(name) = self.host_db().and_then(|db| db.get_name(addr)) {
			cb.ret((Ok(Answer::Name(name.to_string())), Context::ok(0).with_source(Source::HostDatabase)));
			return;
		}

		if let Some(client) = &mut self.client {
			client.resolve_ptr(cx, addr, copy_options(&self.client_opts), cb);
			return;
		}

		cb.ret((Err(Kind::NotFound), Context::err(Kind::NotFound)));
	}

	pub fn get_port(&self, service: &str, proto: Proto) -> Option<u16> {
		self.port_db.as_ref().and_then(|db| db.get_port(service, proto))
	}

	pub fn get_service_name(&self, port: u16, proto: Proto) -> Option<&str> {
		self.port_db.as_ref().and_then(|db| db.get_service_name(port, proto))
	}

	/// Parses `host[:port]` per spec.md §4.8's `get_endpoint` state machine,
	/// resolving a missing host against `default_host` and a missing port
	/// against `default_port`.
	pub fn get_endpoint(&self, spec: &str, default_host: Option<&str>, default_port: Option<u16>) -> Result<(String, Option<u16>), Kind> {
		if spec.is_empty() {
			return match default_host {
				Some(host) => Ok((host.to_string(), default_port)),
				None => Err(Kind::Invalid),
			};
		}

		if spec.chars().all(|c| c.is_ascii_digit()) {
			let port: u16 = spec.parse().map_err(|_| Kind::Invalid)?;
			let host = default_host.ok_or(Kind::Invalid)?;
			return Ok((host.to_string(), Some(port)));
		}

		if let Some(rest) = spec.strip_prefix('[') {
			let (host, rest) = rest.split_once(']').ok_or(Kind::Invalid)?;
			let rest = rest.strip_prefix(':').ok_or(Kind::Invalid)?;
			let port: u16 = rest.parse().map_err(|_| Kind::Invalid)?;
			return Ok((host.to_string(), Some(port)));
		}

		let colon_count = spec.matches(':').count();

		match colon_count {
			0 => Ok((spec.to_string(), default_port)),
			1 => {
				let (host, port) = spec.split_once(':').expect("checked colon_count == 1");
				let port: u16 = port.parse().map_err(|_| Kind::Invalid)?;
				Ok((host.to_string(), Some(port)))
			}
			// More than one colon with no brackets: the whole string is an
			// IPv6 literal, not a host:port pair.
			_ => Ok((spec.to_string(), default_port)),
		}
	}
}

fn copy_options(opts: &client::Options) -> client::Options {
	client::Options { family: opts.family, selector: opts.selector, timeout: opts.timeout, attempts: opts.attempts }
}

#[cfg(test)]
mod tests {
	use super::*;

	fn resolver_for_endpoint_tests() -> Resolver {
		Resolver {
			overrides_fwd: HashMap::new(),
			overrides_rev: HashMap::new(),
			host_database_enabled: false,
			host_db: None,
			port_db: None,
			client: None,
			client_opts: client::Options::default(),
			system: None,
			system_pending: HashMap::new(),
		}
	}

	#[test]
	fn endpoint_all_digits_is_port_only() {
		let r = resolver_for_endpoint_tests();
		assert_eq!(r.get_endpoint("8080", Some("localhost"), None).unwrap(), ("localhost".to_string(), Some(8080)));
	}

	#[test]
	fn endpoint_bracketed_ipv6_with_port() {
		let r = resolver_for_endpoint_tests();
		assert_eq!(r.get_endpoint("[::1]:53", None, None).unwrap(), ("::1".to_string(), Some(53)));
	}

	#[test]
	fn endpoint_host_colon_port() {
		let r = resolver_for_endpoint_tests();
		assert_eq!(r.get_endpoint("example.com:53", None, None).unwrap(), ("example.com".to_string(), Some(53)));
	}

	#[test]
	fn endpoint_bare_ipv6_literal_has_no_brackets() {
		let r = resolver_for_endpoint_tests();
		assert_eq!(r.get_endpoint("2001:db8::1", None, Some(53)).unwrap(), ("2001:db8::1".to_string(), Some(53)));
	}

	#[test]
	fn endpoint_host_only_falls_back_to_default_port() {
		let r = resolver_for_endpoint_tests();
		assert_eq!(r.get_endpoint("example.com", None, Some(80)).unwrap(), ("example.com".to_string(), Some(80)));
	}

	#[test]
	fn endpoint_empty_uses_fallback_host() {
		let r = resolver_for_endpoint_tests();
		assert_eq!(r.get_endpoint("", Some("localhost"), Some(80)).unwrap(), ("localhost".to_string(), Some(80)));
	}

	#[test]
	fn endpoint_empty_with_no_fallback_is_invalid() {
		let r = resolver_for_endpoint_tests();
		assert!(matches!(r.get_endpoint("", None, None), Err(Kind::Invalid)));
	}
}
