use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Clamp/enable knobs for the positive and negative caches (spec.md §4.6,
/// §6 `positive_cache_{min,max}_ttl`).
#[derive(Debug, Clone, Copy)]
pub struct Options {
	pub positive_enabled: bool,
	pub negative_enabled: bool,
	pub min_ttl: Duration,
	pub max_ttl: Duration,
}

impl Default for Options {
	fn default() -> Self {
		Self { positive_enabled: true, negative_enabled: true, min_ttl: Duration::from_secs(1), max_ttl: Duration::from_secs(86_400) }
	}
}

impl Options {
	fn clamp(&self, ttl: Duration) -> Duration {
		ttl.clamp(self.min_ttl, self.max_ttl)
	}
}

struct Forward {
	addrs: Vec<IpAddr>,
	source: IpAddr,
	expiry: Instant,
}

struct Reverse {
	name: String,
	source: IpAddr,
	expiry: Instant,
}

/// The symmetric name→addresses / address→name mapping described in
/// spec.md §4.6. Entries past their expiry are treated as absent and
/// opportunistically swept on lookup.
#[derive(Default)]
pub struct Cache {
	forward: HashMap<String, Forward>,
	reverse: HashMap<IpAddr, Reverse>,
	negative: HashMap<String, Instant>,
}

impl Cache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get_addresses(&mut self, name: &str, opts: &Options, now: Instant) -> Option<Vec<IpAddr>> {
		if let Some(expiry) = self.negative.get(name).copied() {
			if expiry <= now {
				self.negative.remove(name);
			} else {
				return Some(Vec::new());
			}
		}

		match self.forward.get(name) {
			Some(entry) if entry.expiry > now => Some(entry.addrs.clone()),
			Some(_) => {
				self.forward.remove(name);
				None
			}
			None => None,
		}
	}

	pub fn get_name(&mut self, addr: IpAddr, now: Instant) -> Option<String> {
		match self.reverse.get(&addr) {
			Some(entry) if entry.expiry > now => Some(entry.name.clone()),
			Some(_) => {
				self.reverse.remove(&addr);
				None
			}
			None => None,
		}
	}

	pub fn update_host(&mut self, name: &str, addrs: Vec<IpAddr>, source: IpAddr, ttl: Duration, opts: &Options, now: Instant) {
		if !opts.positive_enabled {
			return;
		}

		let expiry = now + opts.clamp(ttl);

		for addr in &addrs {
			self.reverse.insert(*addr, Reverse { name: name.to_string(), source, expiry });
		}

		self.forward.insert(name.to_string(), Forward { addrs, source, expiry });
	}

	pub fn update_negative(&mut self, name: &str, opts: &Options, now: Instant) {
		if !opts.negative_enabled {
			return;
		}

		self.negative.insert(name.to_string(), now + opts.clamp(Duration::from_secs(60)));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn expired_entries_are_not_returned() {
		let mut cache = Cache::new();
		let opts = Options { min_ttl: Duration::from_secs(0), ..Options::default() };
		let now = Instant::now();

		cache.update_host("example.com", vec!["1.2.3.4".parse().unwrap()], "8.8.8.8".parse().unwrap(), Duration::from_secs(0), &opts, now);

		assert!(cache.get_addresses("example.com", &opts, now + Duration::from_secs(2)).is_none());
	}

	#[test]
	fn ttl_is_clamped_to_minimum() {
		let mut cache = Cache::new();
		let opts = Options { min_ttl: Duration::from_secs(30), ..Options::default() };
		let now = Instant::now();

		cache.update_host("example.com", vec!["1.2.3.4".parse().unwrap()], "8.8.8.8".parse().unwrap(), Duration::from_secs(1), &opts, now);

		assert!(cache.get_addresses("example.com", &opts, now + Duration::from_secs(20)).is_some());
	}

	#[test]
	fn negative_entry_reports_empty_result() {
		let mut cache = Cache::new();
		let opts = Options::default();
		let now = Instant::now();

		cache.update_negative("nx.example.com", &opts, now);

		assert_eq!(cache.get_addresses("nx.example.com", &opts, now), Some(Vec::new()));
	}
}
