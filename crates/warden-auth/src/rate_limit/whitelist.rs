//! CIDR whitelist exempting addresses from rate limiting.

use crate::error::ConfigError;
use ipnet::IpNet;
use parking_lot::RwLock;
use std::net::IpAddr;
use tracing::info;

/// Parse a bare address or a CIDR literal into a normalized network.
///
/// Bare IPv4 addresses become `/32`, bare IPv6 addresses `/128`. Host bits in
/// a CIDR literal are cleared.
pub fn parse_entry(entry: &str) -> Result<IpNet, ConfigError> {
    let entry = entry.trim();

    if let Ok(net) = entry.parse::<IpNet>() {
        return Ok(net.trunc());
    }

    entry
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| ConfigError::InvalidCidr(entry.to_string()))
}

/// Collapse IPv4-mapped IPv6 addresses to plain IPv4.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

/// Set of whitelisted ranges.
#[derive(Debug, Default)]
pub struct IpWhitelist {
    ranges: RwLock<Vec<IpNet>>,
}

impl IpWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a whitelist from configuration entries, failing on the first bad one.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, ConfigError> {
        let whitelist = Self::new();
        for entry in entries {
            whitelist.add(entry.as_ref())?;
        }
        Ok(whitelist)
    }

    /// Add an address or range. Adding an existing range is a no-op.
    pub fn add(&self, entry: &str) -> Result<(), ConfigError> {
        let net = parse_entry(entry)?;
        let mut ranges = self.ranges.write();
        if !ranges.contains(&net) {
            info!(range = %net, "Whitelisted range added");
            ranges.push(net);
        }
        Ok(())
    }

    /// Remove an address or range. Returns whether it was present.
    pub fn remove(&self, entry: &str) -> Result<bool, ConfigError> {
        let net = parse_entry(entry)?;
        let mut ranges = self.ranges.write();
        let before = ranges.len();
        ranges.retain(|r| *r != net);
        let removed = ranges.len() != before;
        if removed {
            info!(range = %net, "Whitelisted range removed");
        }
        Ok(removed)
    }

    /// Whether `ip` falls inside any whitelisted range.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = canonical(ip);
        self.ranges.read().iter().any(|net| net.contains(&ip))
    }

    /// Same as [`contains`](Self::contains) for an unparsed address.
    /// Unparseable input is never whitelisted.
    pub fn contains_str(&self, ip: &str) -> bool {
        ip.trim()
            .parse::<IpAddr>()
            .map(|ip| self.contains(ip))
            .unwrap_or(false)
    }

    /// Current ranges in CIDR notation.
    pub fn list(&self) -> Vec<String> {
        self.ranges.read().iter().map(ToString::to_string).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.read().is_empty()
    }
}
