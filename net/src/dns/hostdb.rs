use std::collections::HashMap;
use std::net::IpAddr;

/// A parsed static hosts file (spec.md §6 host database text format).
#[derive(Default, Debug)]
pub struct HostDatabase {
	by_name: HashMap<String, Vec<IpAddr>>,
	by_addr: HashMap<IpAddr, String>,
}

impl HostDatabase {
	pub fn parse(text: &str) -> Self {
		let mut db = Self::default();

		for line in text.lines() {
			let line = line.trim();

			if line.is_empty() || line.starts_with('#') {
				continue;
			}

			let mut fields = line.split_whitespace();

			let Some(addr) = fields.next().and_then(|f| f.parse::<IpAddr>().ok()) else {
				continue;
			};

			for name in fields {
				db.by_addr.entry(addr).or_insert_with(|| name.to_string());
				db.by_name.entry(name.to_string()).or_default().push(addr);
			}
		}

		db
	}

	pub fn get_addresses(&self, name: &str) -> Option<&[IpAddr]> {
		self.by_name.get(name).map(Vec::as_slice)
	}

	pub fn get_name(&self, addr: IpAddr) -> Option<&str> {
		self.by_addr.get(&addr).map(String::as_str)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proto {
	Tcp,
	Udp,
}

/// A parsed static services file (spec.md §6 port database text format).
#[derive(Default, Debug)]
pub struct PortDatabase {
	by_service: HashMap<(String, Proto), u16>,
	by_port: HashMap<(u16, Proto), String>,
}

impl PortDatabase {
	pub fn parse(text: &str) -> Self {
		let mut db = Self::default();

		for line in text.lines() {
			let line = line.trim();

			if line.is_empty() || line.starts_with('#') {
				continue;
			}

			let mut fields = line.split_whitespace();

			let (Some(service), Some(spec)) = (fields.next(), fields.next()) else {
				continue;
			};

			let Some((port, proto)) = spec.split_once('/') else {
				continue;
			};

			let Ok(port) = port.parse::<u16>() else {
				continue;
			};

			let proto = match proto {
				"tcp" => Proto::Tcp,
				"udp" => Proto::Udp,
				_ => continue,
			};

			db.by_service.insert((service.to_string(), proto), port);
			db.by_port.entry((port, proto)).or_insert_with(|| service.to_string());
		}

		db
	}

	pub fn get_port(&self, service: &str, proto: Proto) -> Option<u16> {
		self.by_service.get(&(service.to_string(), proto)).copied()
	}

	pub fn get_service_name(&self, port: u16, proto: Proto) -> Option<&str> {
		self.by_port.get(&(port, proto)).map(String::as_str)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_hosts_file_ignoring_comments_and_blanks() {
		let text = "# comment\n\n127.0.0.1 localhost loopback\n::1 localhost6\n";
		let db = HostDatabase::parse(text);

		assert_eq!(db.get_addresses("localhost"), Some(["127.0.0.1".parse().unwrap()].as_slice()));
		assert_eq!(db.get_name("127.0.0.1".parse().unwrap()), Some("localhost"));
		assert_eq!(db.get_name("::1".parse().unwrap()), Some("localhost6"));
	}

	#[test]
	fn parses_services_file() {
		let text = "http 80/tcp\ndomain 53/udp\n";
		let db = PortDatabase::parse(text);

		assert_eq!(db.get_port("http", Proto::Tcp), Some(80));
		assert_eq!(db.get_service_name(53, Proto::Udp), Some("domain"));
		assert_eq!(db.get_port("http", Proto::Udp), None);
	}
}
