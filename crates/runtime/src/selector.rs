//! Rotation over ensemble members.

use rand::seq::SliceRandom;

use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 2181;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCandidate {
	pub address: String,
	pub last_known_reachable: bool,
}

/// The next server to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
	pub address: String,
	/// Every candidate has failed since the last successful connection and
	/// this one starts another pass; callers back off before dialing it.
	pub retry_start: bool,
}

/// Hands out ensemble members round-robin.
///
/// The list is fixed at construction (optionally shuffled so that clients
/// spread over the ensemble). Rotation always moves on to the next member,
/// so a reconnect after a failure tries a different server first.
#[derive(Debug)]
pub struct HostSelector {
	candidates: Vec<ServerCandidate>,
	next: usize,
	last: Option<usize>,
	current: Option<usize>,
	attempts_since_connect: usize,
}

impl HostSelector {
	pub fn new<I, S>(addresses: I, shuffle: bool) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut candidates: Vec<ServerCandidate> = Vec::new();
		for raw in addresses {
			let address = normalize_address(raw.as_ref())?;
			if candidates.iter().all(|c| c.address != address) {
				candidates.push(ServerCandidate {
					address,
					last_known_reachable: true,
				});
			}
		}
		if candidates.is_empty() {
			return Err(Error::NoServers);
		}
		if shuffle {
			candidates.shuffle(&mut rand::thread_rng());
		}

		Ok(Self {
			candidates,
			next: 0,
			last: None,
			current: None,
			attempts_since_connect: 0,
		})
	}

	pub fn len(&self) -> usize {
		self.candidates.len()
	}

	pub fn is_empty(&self) -> bool {
		self.candidates.is_empty()
	}

	pub fn candidates(&self) -> &[ServerCandidate] {
		&self.candidates
	}

	pub fn next(&mut self) -> Candidate {
		let index = self.next;
		self.next = (self.next + 1) % self.candidates.len();
		self.last = Some(index);

		let retry_start = self.attempts_since_connect > 0 && self.attempts_since_connect % self.candidates.len() == 0;
		self.attempts_since_connect += 1;

		Candidate {
			address: self.candidates[index].address.clone(),
			retry_start,
		}
	}

	/// Records that the most recently returned candidate accepted a session.
	pub fn connected(&mut self) {
		if let Some(index) = self.last {
			self.candidates[index].last_known_reachable = true;
			self.current = Some(index);
		}
		self.attempts_since_connect = 0;
	}

	/// Records that the most recently returned candidate could not be used.
	pub fn failed(&mut self) {
		if let Some(index) = self.last {
			self.candidates[index].last_known_reachable = false;
		}
	}

	/// Forgets the current server after its connection dropped.
	pub fn disconnected(&mut self) {
		self.current = None;
	}

	pub fn current(&self) -> Option<&str> {
		self.current.map(|index| self.candidates[index].address.as_str())
	}
}

/// Appends the default port when an address has none.
pub fn normalize_address(raw: &str) -> Result<String> {
	let raw = raw.trim();
	if raw.is_empty() {
		return Err(Error::InvalidAddress(raw.to_string()));
	}

	// Bracketed IPv6 literal without a port.
	if raw.ends_with(']') {
		return Ok(format!("{raw}:{DEFAULT_PORT}"));
	}

	match raw.rsplit_once(':') {
		Some((host, port)) => {
			if host.is_empty() || port.parse::<u16>().is_err() {
				return Err(Error::InvalidAddress(raw.to_string()));
			}
			Ok(raw.to_string())
		}
		None => Ok(format!("{raw}:{DEFAULT_PORT}")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_port_is_added() {
		assert_eq!(normalize_address("zk1").unwrap(), "zk1:2181");
		assert_eq!(normalize_address("zk1:2182").unwrap(), "zk1:2182");
		assert_eq!(normalize_address(" 10.0.0.1:3000 ").unwrap(), "10.0.0.1:3000");
		assert_eq!(normalize_address("[::1]").unwrap(), "[::1]:2181");
		assert_eq!(normalize_address("[::1]:2182").unwrap(), "[::1]:2182");
	}

	#[test]
	fn malformed_addresses_are_rejected() {
		assert!(matches!(normalize_address(""), Err(Error::InvalidAddress(_))));
		assert!(matches!(normalize_address("zk1:notaport"), Err(Error::InvalidAddress(_))));
		assert!(matches!(normalize_address(":2181"), Err(Error::InvalidAddress(_))));
	}

	#[test]
	fn empty_list_is_an_error() {
		let none: Vec<&str> = Vec::new();
		assert!(matches!(HostSelector::new(none, false), Err(Error::NoServers)));
	}

	#[test]
	fn duplicates_are_collapsed() {
		let selector = HostSelector::new(["a:1", "a:1", "b:1"], false).unwrap();
		assert_eq!(selector.len(), 2);
	}

	#[test]
	fn rotation_signals_a_full_failed_pass() {
		let mut selector = HostSelector::new(["a:1", "b:1", "c:1"], false).unwrap();

		let first: Vec<Candidate> = (0..3).map(|_| selector.next()).collect();
		assert_eq!(first.iter().map(|c| c.address.as_str()).collect::<Vec<_>>(), ["a:1", "b:1", "c:1"]);
		assert!(first.iter().all(|c| !c.retry_start));

		let again = selector.next();
		assert_eq!(again.address, "a:1");
		assert!(again.retry_start);
	}

	#[test]
	fn connecting_resets_the_pass_and_tracks_current() {
		let mut selector = HostSelector::new(["a:1", "b:1"], false).unwrap();
		selector.next();
		selector.failed();
		selector.next();
		selector.connected();
		assert_eq!(selector.current(), Some("b:1"));
		assert!(!selector.candidates()[0].last_known_reachable);

		selector.disconnected();
		assert_eq!(selector.current(), None);

		// After a drop the next dial moves on to a different member.
		let next = selector.next();
		assert_eq!(next.address, "a:1");
		assert!(!next.retry_start);
	}

	#[test]
	fn shuffle_keeps_every_member() {
		let addrs = ["a:1", "b:1", "c:1", "d:1", "e:1"];
		let selector = HostSelector::new(addrs, true).unwrap();
		let mut got: Vec<_> = selector.candidates().iter().map(|c| c.address.clone()).collect();
		got.sort();
		assert_eq!(got, addrs);
	}
}
