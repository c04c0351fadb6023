//! A fixed chain of resolvers with one atomic configuration surface.
//!
//! Configuration writes take the chain's write lock and are applied to
//! every backend in order. `resolve` holds the read lock for the whole
//! walk, so it sees every backend either before or after a write.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::resolver::{AdvancedHostResolver, CacheTimeout, HostResolver, RemappingTable};

/// Tries each backend in order and returns the first non-empty answer.
pub struct ChainedHostResolver {
    resolvers: Vec<Arc<dyn AdvancedHostResolver>>,
    lock: RwLock<()>,
}

impl ChainedHostResolver {
    /// Chains `resolvers` in lookup order. An empty chain resolves nothing.
    pub fn new(resolvers: Vec<Arc<dyn AdvancedHostResolver>>) -> Self {
        Self {
            resolvers,
            lock: RwLock::new(()),
        }
    }

    /// Returns the chained resolvers in lookup order.
    pub fn resolvers(&self) -> &[Arc<dyn AdvancedHostResolver>] {
        &self.resolvers
    }

    fn for_each(&self, apply: impl Fn(&dyn AdvancedHostResolver)) {
        let _guard = self.lock.write();
        for resolver in &self.resolvers {
            apply(resolver.as_ref());
        }
    }
}

impl std::fmt::Debug for ChainedHostResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedHostResolver")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

impl HostResolver for ChainedHostResolver {
    fn resolve(&self, host: &str) -> Vec<IpAddr> {
        let _guard = self.lock.read();
        for resolver in &self.resolvers {
            let addresses = resolver.resolve(host);
            if !addresses.is_empty() {
                return addresses;
            }
        }
        Vec::new()
    }
}

impl AdvancedHostResolver for ChainedHostResolver {
    fn remap_hosts(&self, remappings: RemappingTable) {
        self.for_each(|r| r.remap_hosts(remappings.clone()));
    }

    fn remap_host(&self, original: &str, replacement: &str) {
        self.for_each(|r| r.remap_host(original, replacement));
    }

    fn remove_host_remapping(&self, original: &str) {
        self.for_each(|r| r.remove_host_remapping(original));
    }

    fn clear_host_remappings(&self) {
        self.for_each(|r| r.clear_host_remappings());
    }

    /// Answered by the first backend; an empty chain has no remappings.
    fn host_remappings(&self) -> Arc<RemappingTable> {
        match self.resolvers.first() {
            Some(first) => first.host_remappings(),
            None => Arc::new(RemappingTable::new()),
        }
    }

    fn original_hostnames(&self, remapped: &str) -> Vec<String> {
        match self.resolvers.first() {
            Some(first) => first.original_hostnames(remapped),
            None => Vec::new(),
        }
    }

    fn clear_dns_cache(&self) {
        self.for_each(|r| r.clear_dns_cache());
    }

    fn set_positive_dns_cache_timeout(&self, timeout: CacheTimeout) {
        self.for_each(|r| r.set_positive_dns_cache_timeout(timeout));
    }

    fn set_negative_dns_cache_timeout(&self, timeout: CacheTimeout) {
        self.for_each(|r| r.set_negative_dns_cache_timeout(timeout));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remap::tests::ScriptedBackend;
    use crate::remap::RemappingResolver;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn scripted(answers: &[(&str, &str)]) -> Arc<RemappingResolver<ScriptedBackend>> {
        Arc::new(RemappingResolver::new(ScriptedBackend::answering(answers)))
    }

    // ==================== Resolution Tests ====================

    #[test]
    fn falls_through_to_later_backend() {
        let first = scripted(&[]);
        let second = scripted(&[("x", "1.2.3.4")]);
        let chain = ChainedHostResolver::new(vec![first, second]);

        assert_eq!(chain.resolve("x"), vec![ip("1.2.3.4")]);
    }

    #[test]
    fn first_match_wins() {
        let first = scripted(&[("x", "5.6.7.8")]);
        let second = scripted(&[("x", "1.2.3.4")]);
        let chain = ChainedHostResolver::new(vec![first, second.clone()]);

        assert_eq!(chain.resolve("x"), vec![ip("5.6.7.8")]);
        assert!(second.backend().asked.lock().is_empty());
    }

    #[test]
    fn empty_when_every_backend_misses() {
        let chain = ChainedHostResolver::new(vec![scripted(&[]), scripted(&[])]);
        assert!(chain.resolve("nowhere").is_empty());
    }

    #[test]
    fn empty_chain_resolves_nothing() {
        let chain = ChainedHostResolver::new(Vec::new());
        assert!(chain.resolve("x").is_empty());
        assert!(chain.host_remappings().is_empty());
        assert!(chain.original_hostnames("x").is_empty());
        chain.remap_host("a", "b");
    }

    // ==================== Configuration Tests ====================

    #[test]
    fn writes_reach_every_backend() {
        let first = scripted(&[]);
        let second = scripted(&[]);
        let chain = ChainedHostResolver::new(vec![first.clone(), second.clone()]);

        chain.remap_host("a", "b");
        chain.remap_host("c", "d");
        chain.remove_host_remapping("c");
        chain.clear_dns_cache();

        for backend in [&first, &second] {
            let table = backend.host_remappings();
            assert_eq!(table.len(), 1);
            assert_eq!(table.get("a").map(String::as_str), Some("b"));
            assert_eq!(backend.backend().cache_clears.load(Ordering::SeqCst), 1);
        }

        chain.clear_host_remappings();
        assert!(first.host_remappings().is_empty());
        assert!(second.host_remappings().is_empty());
    }

    #[test]
    fn reads_come_from_first_backend() {
        let first = scripted(&[]);
        let second = scripted(&[]);
        let chain = ChainedHostResolver::new(vec![first.clone(), second.clone()]);

        second.remap_host("only-second", "target");
        first.remap_host("only-first", "target");

        assert_eq!(chain.original_hostnames("target"), vec!["only-first"]);
        assert!(chain.host_remappings().contains_key("only-first"));
        assert!(!chain.host_remappings().contains_key("only-second"));
    }

    #[test]
    fn remapping_applies_through_chain() {
        let first = scripted(&[("real.test", "10.9.8.7")]);
        let chain = ChainedHostResolver::new(vec![first]);
        chain.remap_host("alias.test", "real.test");

        assert_eq!(chain.resolve("alias.test"), vec![ip("10.9.8.7")]);
    }

    // ==================== Atomicity Tests ====================

    thread_local! {
        static SEEN_GENERATION: Cell<Option<u64>> = const { Cell::new(None) };
    }

    /// Records the generation of the last table it was given.
    ///
    /// A missing backend parks its generation in a thread-local; an
    /// answering backend compares its own generation against it.
    struct GenerationCheck {
        generation: AtomicU64,
        answers: bool,
        mismatches: Arc<AtomicUsize>,
    }

    impl GenerationCheck {
        fn new(answers: bool, mismatches: Arc<AtomicUsize>) -> Self {
            Self {
                generation: AtomicU64::new(0),
                answers,
                mismatches,
            }
        }
    }

    impl HostResolver for GenerationCheck {
        fn resolve(&self, _host: &str) -> Vec<IpAddr> {
            let generation = self.generation.load(Ordering::SeqCst);
            if !self.answers {
                SEEN_GENERATION.with(|seen| seen.set(Some(generation)));
                return Vec::new();
            }
            if let Some(seen) = SEEN_GENERATION.with(|seen| seen.take()) {
                if seen != generation {
                    self.mismatches.fetch_add(1, Ordering::SeqCst);
                }
            }
            vec![ip("127.0.0.1")]
        }
    }

    impl AdvancedHostResolver for GenerationCheck {
        fn remap_hosts(&self, remappings: RemappingTable) {
            let generation = remappings
                .get("generation")
                .and_then(|g| g.parse().ok())
                .unwrap_or(0);
            self.generation.store(generation, Ordering::SeqCst);
            std::thread::yield_now();
        }

        fn remap_host(&self, _original: &str, _replacement: &str) {}
        fn remove_host_remapping(&self, _original: &str) {}
        fn clear_host_remappings(&self) {}

        fn host_remappings(&self) -> Arc<RemappingTable> {
            Arc::new(RemappingTable::new())
        }

        fn original_hostnames(&self, _remapped: &str) -> Vec<String> {
            Vec::new()
        }

        fn clear_dns_cache(&self) {}
        fn set_positive_dns_cache_timeout(&self, _timeout: CacheTimeout) {}
        fn set_negative_dns_cache_timeout(&self, _timeout: CacheTimeout) {}
    }

    #[test]
    fn resolve_never_sees_partial_write() {
        let mismatches = Arc::new(AtomicUsize::new(0));
        let chain = Arc::new(ChainedHostResolver::new(vec![
            Arc::new(GenerationCheck::new(false, Arc::clone(&mismatches))),
            Arc::new(GenerationCheck::new(true, Arc::clone(&mismatches))),
        ]));

        let barrier = Arc::new(Barrier::new(5));
        let done = Arc::new(AtomicBool::new(false));
        let resolved = Arc::new(AtomicUsize::new(0));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let chain = Arc::clone(&chain);
                let barrier = Arc::clone(&barrier);
                let done = Arc::clone(&done);
                let resolved = Arc::clone(&resolved);
                std::thread::spawn(move || {
                    barrier.wait();
                    loop {
                        assert_eq!(chain.resolve("reader.test").len(), 1);
                        resolved.fetch_add(1, Ordering::SeqCst);
                        if done.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                })
            })
            .collect();

        barrier.wait();
        for generation in 1..=500u64 {
            let mut table = RemappingTable::new();
            table.insert("generation".into(), generation.to_string());
            chain.remap_hosts(table);
        }
        done.store(true, Ordering::SeqCst);

        for reader in readers {
            reader.join().unwrap();
        }
        assert!(resolved.load(Ordering::SeqCst) >= 4);
        assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    }
}
