//! Hostname remapping shared by every concrete resolver.
//!
//! The table is an immutable [`RemappingTable`] behind an [`ArcSwap`].
//! Writers build the next table off to the side under a mutex and swap it
//! in; readers load the current snapshot without locking, so they always
//! see either the old or the new table in full.

use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::resolver::{AdvancedHostResolver, CacheTimeout, HostResolver, RemappingTable};

/// An atomically replaced remapping table.
#[derive(Debug)]
pub struct HostRemapper {
    table: ArcSwap<RemappingTable>,
    writer: Mutex<()>,
}

impl Default for HostRemapper {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRemapper {
    /// Creates a remapper with an empty table.
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(RemappingTable::new()),
            writer: Mutex::new(()),
        }
    }

    /// The hostname to actually resolve for `host`.
    ///
    /// Remapping is a single step; replacements are not remapped again.
    pub fn apply<'a>(&self, host: &'a str) -> Cow<'a, str> {
        match self.table.load().get(host) {
            Some(replacement) => Cow::Owned(replacement.clone()),
            None => Cow::Borrowed(host),
        }
    }

    /// Returns the current table.
    pub fn snapshot(&self) -> Arc<RemappingTable> {
        self.table.load_full()
    }

    /// Replaces the whole table in one step.
    pub fn replace(&self, remappings: RemappingTable) {
        let _guard = self.writer.lock();
        self.table.store(Arc::new(remappings));
    }

    /// Maps `original` to `replacement`, moving it to the end of the order.
    ///
    /// ```
    /// use tapwire_resolve::HostRemapper;
    ///
    /// let remapper = HostRemapper::new();
    /// remapper.remap("api.example.com", "staging.example.com");
    /// assert_eq!(remapper.apply("api.example.com"), "staging.example.com");
    /// assert_eq!(remapper.apply("www.example.com"), "www.example.com");
    /// ```
    pub fn remap(&self, original: &str, replacement: &str) {
        self.update(|table| {
            table.shift_remove(original);
            table.insert(original.to_string(), replacement.to_string());
        });
    }

    /// Removes the remapping of `original`, if any.
    pub fn remove(&self, original: &str) {
        self.update(|table| {
            table.shift_remove(original);
        });
    }

    /// Removes every remapping.
    pub fn clear(&self) {
        self.replace(RemappingTable::new());
    }

    /// Returns every hostname remapped to `remapped`, in table order.
    pub fn original_hostnames(&self, remapped: &str) -> Vec<String> {
        self.table
            .load()
            .iter()
            .filter(|(_, replacement)| replacement.as_str() == remapped)
            .map(|(original, _)| original.clone())
            .collect()
    }

    fn update(&self, change: impl FnOnce(&mut RemappingTable)) {
        let _guard = self.writer.lock();
        let mut next = RemappingTable::clone(&self.table.load());
        change(&mut next);
        self.table.store(Arc::new(next));
    }
}

/// The lookup half of a resolver, fed hostnames after remapping.
pub trait ResolverBackend: Send + Sync {
    /// Looks up an already remapped hostname. Failures are an empty list.
    fn resolve_remapped(&self, host: &str) -> Vec<IpAddr>;

    fn clear_dns_cache(&self);

    fn set_positive_dns_cache_timeout(&self, timeout: CacheTimeout);

    fn set_negative_dns_cache_timeout(&self, timeout: CacheTimeout);
}

/// Applies a remapping table in front of a lookup backend.
#[derive(Debug, Default)]
pub struct RemappingResolver<B> {
    remapper: HostRemapper,
    backend: B,
}

impl<B: ResolverBackend> RemappingResolver<B> {
    /// Puts an empty remapping table in front of `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            remapper: HostRemapper::new(),
            backend,
        }
    }

    /// Returns the lookup backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the remapping table.
    pub fn remapper(&self) -> &HostRemapper {
        &self.remapper
    }
}

impl<B: ResolverBackend> HostResolver for RemappingResolver<B> {
    fn resolve(&self, host: &str) -> Vec<IpAddr> {
        let effective = self.remapper.apply(host);
        if effective != host {
            tracing::debug!("Remapped {} to {}", host, effective);
        }
        self.backend.resolve_remapped(&effective)
    }
}

impl<B: ResolverBackend> AdvancedHostResolver for RemappingResolver<B> {
    fn remap_hosts(&self, remappings: RemappingTable) {
        self.remapper.replace(remappings);
    }

    fn remap_host(&self, original: &str, replacement: &str) {
        self.remapper.remap(original, replacement);
    }

    fn remove_host_remapping(&self, original: &str) {
        self.remapper.remove(original);
    }

    fn clear_host_remappings(&self) {
        self.remapper.clear();
    }

    fn host_remappings(&self) -> Arc<RemappingTable> {
        self.remapper.snapshot()
    }

    fn original_hostnames(&self, remapped: &str) -> Vec<String> {
        self.remapper.original_hostnames(remapped)
    }

    fn clear_dns_cache(&self) {
        self.backend.clear_dns_cache();
    }

    fn set_positive_dns_cache_timeout(&self, timeout: CacheTimeout) {
        self.backend.set_positive_dns_cache_timeout(timeout);
    }

    fn set_negative_dns_cache_timeout(&self, timeout: CacheTimeout) {
        self.backend.set_negative_dns_cache_timeout(timeout);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;

    /// Backend answering from a fixed table and recording what it was asked.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedBackend {
        answers: HashMap<String, Vec<IpAddr>>,
        pub(crate) asked: Mutex<Vec<String>>,
        pub(crate) cache_clears: AtomicUsize,
    }

    impl ScriptedBackend {
        pub(crate) fn answering(answers: &[(&str, &str)]) -> Self {
            let mut table: HashMap<String, Vec<IpAddr>> = HashMap::new();
            for (host, ip) in answers {
                table
                    .entry(host.to_string())
                    .or_default()
                    .push(ip.parse().unwrap());
            }
            Self {
                answers: table,
                ..Self::default()
            }
        }
    }

    impl ResolverBackend for ScriptedBackend {
        fn resolve_remapped(&self, host: &str) -> Vec<IpAddr> {
            self.asked.lock().push(host.to_string());
            self.answers.get(host).cloned().unwrap_or_default()
        }

        fn clear_dns_cache(&self) {
            self.cache_clears.fetch_add(1, Ordering::SeqCst);
        }

        fn set_positive_dns_cache_timeout(&self, _timeout: CacheTimeout) {}

        fn set_negative_dns_cache_timeout(&self, _timeout: CacheTimeout) {}
    }

    fn pairs(table: &RemappingTable) -> Vec<(&str, &str)> {
        table.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    // ==================== Remapper Tests ====================

    #[test]
    fn remapping_again_moves_entry_to_end() {
        let remapper = HostRemapper::new();
        remapper.remap("a", "x");
        remapper.remap("b", "y");
        remapper.remap("a", "z");

        assert_eq!(pairs(&remapper.snapshot()), vec![("b", "y"), ("a", "z")]);
    }

    #[test]
    fn reverse_lookup_follows_current_table() {
        let remapper = HostRemapper::new();
        remapper.remap("a", "x");
        remapper.remap("b", "y");
        remapper.remap("a", "z");

        assert_eq!(remapper.original_hostnames("z"), vec!["a"]);
        assert_eq!(remapper.original_hostnames("y"), vec!["b"]);
        assert!(remapper.original_hostnames("x").is_empty());
    }

    #[test]
    fn reverse_lookup_lists_every_original_in_order() {
        let remapper = HostRemapper::new();
        remapper.remap("one", "shared");
        remapper.remap("other", "elsewhere");
        remapper.remap("two", "shared");

        assert_eq!(remapper.original_hostnames("shared"), vec!["one", "two"]);
    }

    #[test]
    fn replace_uses_supplied_order() {
        let remapper = HostRemapper::new();
        remapper.remap("stale", "gone");

        let mut table = RemappingTable::new();
        table.insert("m".into(), "1".into());
        table.insert("c".into(), "2".into());
        remapper.replace(table);

        assert_eq!(pairs(&remapper.snapshot()), vec![("m", "1"), ("c", "2")]);
    }

    #[test]
    fn remove_and_clear() {
        let remapper = HostRemapper::new();
        remapper.remap("a", "x");
        remapper.remap("b", "y");

        remapper.remove("absent");
        remapper.remove("a");
        assert_eq!(pairs(&remapper.snapshot()), vec![("b", "y")]);

        remapper.clear();
        assert!(remapper.snapshot().is_empty());
    }

    #[test]
    fn remapping_is_single_step() {
        let remapper = HostRemapper::new();
        remapper.remap("a", "b");
        remapper.remap("b", "c");

        assert_eq!(remapper.apply("a"), "b");
        assert_eq!(remapper.apply("b"), "c");
        assert_eq!(remapper.apply("untouched"), "untouched");
    }

    #[test]
    fn old_snapshots_are_unaffected_by_writes() {
        let remapper = HostRemapper::new();
        remapper.remap("a", "x");
        let before = remapper.snapshot();

        remapper.remap("a", "y");
        assert_eq!(before.get("a").map(String::as_str), Some("x"));
        assert_eq!(remapper.snapshot().get("a").map(String::as_str), Some("y"));
    }

    #[test]
    fn readers_never_observe_half_built_table() {
        const KEYS: usize = 50;
        let remapper = Arc::new(HostRemapper::new());
        let table_for = |value: &str| -> RemappingTable {
            (0..KEYS)
                .map(|i| (format!("host{}", i), value.to_string()))
                .collect()
        };
        remapper.replace(table_for("A"));

        let barrier = Arc::new(Barrier::new(4));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let remapper = Arc::clone(&remapper);
                let barrier = Arc::clone(&barrier);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    barrier.wait();
                    loop {
                        let snapshot = remapper.snapshot();
                        assert_eq!(snapshot.len(), KEYS);
                        let first = snapshot.get("host0").cloned().unwrap();
                        assert!(snapshot.values().all(|v| *v == first));
                        if done.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                })
            })
            .collect();

        barrier.wait();
        for round in 0..200 {
            remapper.replace(table_for(if round % 2 == 0 { "B" } else { "A" }));
        }
        done.store(true, Ordering::SeqCst);

        for reader in readers {
            reader.join().unwrap();
        }
    }

    // ==================== Remapping Resolver Tests ====================

    #[test]
    fn resolver_delegates_remapped_host() {
        let resolver =
            RemappingResolver::new(ScriptedBackend::answering(&[("target.test", "10.0.0.1")]));
        resolver.remap_host("origin.test", "target.test");

        assert_eq!(resolver.resolve("origin.test"), vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(*resolver.backend().asked.lock(), vec!["target.test"]);
    }

    #[test]
    fn unmapped_host_passes_through() {
        let resolver =
            RemappingResolver::new(ScriptedBackend::answering(&[("plain.test", "10.0.0.2")]));
        assert_eq!(resolver.resolve("plain.test").len(), 1);
        assert!(resolver.resolve("missing.test").is_empty());
    }

    #[test]
    fn cache_controls_reach_backend() {
        let resolver = RemappingResolver::new(ScriptedBackend::default());
        resolver.clear_dns_cache();
        assert_eq!(resolver.backend().cache_clears.load(Ordering::SeqCst), 1);
    }
}
