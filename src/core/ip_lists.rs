use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::threat::ThreatLevel;

/// Loopback and private-network addresses admitted without accounting
const DEFAULT_TRUSTED: [&str; 5] = ["127.0.0.1", "::1", "10.", "172.16.", "192.168."];

/// Addresses that bypass all accounting
#[derive(Debug, Clone)]
pub struct IpWhitelist {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl IpWhitelist {
    /// Build from the default trusted ranges plus `extra` entries.
    ///
    /// Entries ending in `.`, `:` or `*` match as prefixes, all others exactly.
    pub fn new<S: AsRef<str>>(extra: &[S]) -> Self {
        let mut whitelist = Self {
            exact: HashSet::new(),
            prefixes: Vec::new(),
        };
        for entry in DEFAULT_TRUSTED.iter().copied().chain(extra.iter().map(|entry| entry.as_ref())) {
            whitelist.add(entry);
        }
        whitelist
    }

    fn add(&mut self, entry: &str) {
        let entry = entry.trim();
        if entry.is_empty() {
            return;
        }
        if let Some(prefix) = entry.strip_suffix('*') {
            self.prefixes.push(prefix.to_string());
        } else if entry.ends_with('.') || entry.ends_with(':') {
            self.prefixes.push(entry.to_string());
        } else {
            self.exact.insert(entry.to_string());
        }
    }

    pub fn is_whitelisted(&self, address: &str) -> bool {
        self.exact.contains(address)
            || self
                .prefixes
                .iter()
                .any(|prefix| address.starts_with(prefix.as_str()))
    }
}

impl Default for IpWhitelist {
    fn default() -> Self {
        Self::new::<&str>(&[])
    }
}

/// A blacklisted address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistEntry {
    pub severity: ThreatLevel,
    /// `None` blocks until removed
    pub expires_at: Option<Instant>,
    pub reason: String,
}

impl BlacklistEntry {
    pub fn is_active(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expiry| expiry > now)
    }
}

/// Static and dynamically added address blocks
#[derive(Debug, Default)]
pub struct IpBlacklist {
    entries: RwLock<HashMap<String, BlacklistEntry>>,
}

impl IpBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permanent critical entries for each configured address
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S]) -> Self {
        let blacklist = Self::new();
        {
            let mut entries = blacklist.entries.write();
            for address in addresses {
                let address = address.as_ref().trim();
                if address.is_empty() {
                    continue;
                }
                entries.insert(
                    address.to_string(),
                    BlacklistEntry {
                        severity: ThreatLevel::Critical,
                        expires_at: None,
                        reason: "configured".to_string(),
                    },
                );
            }
        }
        blacklist
    }

    /// Add or replace an entry; `ttl` of `None` never expires
    pub fn add(
        &self,
        address: &str,
        severity: ThreatLevel,
        ttl: Option<Duration>,
        reason: impl Into<String>,
        now: Instant,
    ) {
        self.entries.write().insert(
            address.to_string(),
            BlacklistEntry {
                severity,
                expires_at: ttl.map(|ttl| now + ttl),
                reason: reason.into(),
            },
        );
    }

    pub fn remove(&self, address: &str) -> bool {
        self.entries.write().remove(address).is_some()
    }

    /// Active entry for `address`, if any
    pub fn lookup(&self, address: &str, now: Instant) -> Option<BlacklistEntry> {
        self.entries
            .read()
            .get(address)
            .filter(|entry| entry.is_active(now))
            .cloned()
    }

    pub fn is_blacklisted(&self, address: &str, now: Instant) -> bool {
        self.lookup(address, now).is_some()
    }

    /// Remove expired entries; returns how many were removed
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_active(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_private_ranges() {
        let whitelist = IpWhitelist::default();
        for address in ["127.0.0.1", "::1", "10.1.2.3", "172.16.0.9", "192.168.1.1"] {
            assert!(whitelist.is_whitelisted(address), "{} should be trusted", address);
        }
        for address in ["8.8.8.8", "172.17.0.1", "127.0.0.2", "203.0.113.1"] {
            assert!(!whitelist.is_whitelisted(address), "{} should not be trusted", address);
        }
    }

    #[test]
    fn test_extra_entries() {
        let whitelist = IpWhitelist::new(&["203.0.113.5", "198.51.100.*", "2001:db8:"]);
        assert!(whitelist.is_whitelisted("203.0.113.5"));
        assert!(!whitelist.is_whitelisted("203.0.113.50"));
        assert!(whitelist.is_whitelisted("198.51.100.77"));
        assert!(whitelist.is_whitelisted("2001:db8::1"));
    }

    #[test]
    fn test_blacklist_expiry() {
        let now = Instant::now();
        let blacklist = IpBlacklist::from_addresses(&["203.0.113.9"]);
        blacklist.add(
            "198.51.100.4",
            ThreatLevel::High,
            Some(Duration::from_secs(60)),
            "probing",
            now,
        );

        assert!(blacklist.is_blacklisted("203.0.113.9", now + Duration::from_secs(86400)));
        assert!(blacklist.is_blacklisted("198.51.100.4", now + Duration::from_secs(59)));
        assert!(!blacklist.is_blacklisted("198.51.100.4", now + Duration::from_secs(60)));

        assert_eq!(blacklist.sweep_expired(now + Duration::from_secs(61)), 1);
        assert_eq!(blacklist.len(), 1);
        assert!(blacklist.remove("203.0.113.9"));
        assert!(blacklist.is_empty());
    }

    #[test]
    fn test_configured_entries_are_critical() {
        let blacklist = IpBlacklist::from_addresses(&["203.0.113.9"]);
        let entry = blacklist.lookup("203.0.113.9", Instant::now()).unwrap();
        assert_eq!(entry.severity, ThreatLevel::Critical);
        assert!(entry.expires_at.is_none());
    }
}
