use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use tracing::debug;

type Resolver = dyn Fn(IpAddr) -> Option<String> + Send + Sync;

pub struct HostnameCache {
    entries: Mutex<LruCache<IpAddr, Option<String>>>,
    resolver: Box<Resolver>,
}

impl HostnameCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_resolver(capacity, Box::new(reverse_lookup))
    }

    pub fn with_resolver(capacity: usize, resolver: Box<Resolver>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            resolver,
        }
    }

    /// `fqdn/ip` when a distinct name is known and lookups are enabled, the
    /// bare address otherwise.
    pub fn display_name(&self, ip: IpAddr, enabled: bool) -> String {
        if !enabled {
            return ip.to_string();
        }
        format_client(ip, self.lookup(ip).as_deref())
    }

    fn lookup(&self, ip: IpAddr) -> Option<String> {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(cached) = entries.get(&ip) {
                return cached.clone();
            }
        }
        // Resolve without holding the lock, lookups can take seconds.
        let resolved = (self.resolver)(ip);
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(ip, resolved.clone());
        }
        resolved
    }
}

impl std::fmt::Debug for HostnameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.entries.lock().map(|entries| entries.len()).unwrap_or(0);
        f.debug_struct("HostnameCache").field("cached", &cached).finish()
    }
}

pub fn format_client(ip: IpAddr, hostname: Option<&str>) -> String {
    let address = ip.to_string();
    match hostname {
        Some(name) if !name.is_empty() && name != address => format!("{name}/{address}"),
        _ => address,
    }
}

fn reverse_lookup(ip: IpAddr) -> Option<String> {
    match dns_lookup::lookup_addr(&ip) {
        Ok(name) => Some(name),
        Err(err) => {
            debug!(%ip, "reverse lookup failed: {err}");
            None
        }
    }
}
