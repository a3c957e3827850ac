//! Resource resolution across bundles.
//!
//! Lookups try each bundle in registration order and stop at the first hit.
//! A path opened by an [`IndirectHandle`] carries one indirection segment and
//! is fetched straight from the container instead.

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use crate::container::ResourceStore;
use crate::handle::IndirectHandle;
use crate::registry::BundleRegistry;
use crate::security::{privileged, Privileged};
use crate::unit::UNIT_SUFFIX;

/// Leading segment marking a path that already names a container location.
pub const INDIRECTION_SEGMENT: &str = "$$satchel$$/";

/// Outcome of a successful lookup. Transient: produced per lookup.
pub struct ResolvedResource {
    /// Bundle that served the resource; `None` when it came from outside
    /// any registered bundle
    pub bundle_index: Option<usize>,
    /// Lazy stream over the resource bytes
    pub stream: Box<dyn Read + Send>,
}

impl fmt::Debug for ResolvedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedResource")
            .field("bundle_index", &self.bundle_index)
            .finish_non_exhaustive()
    }
}

/// First-match resolver over a bundle registry and its embedding container.
pub struct ResourceResolver {
    registry: Arc<BundleRegistry>,
    store: Arc<dyn ResourceStore>,
    fallback: Option<Arc<dyn ResourceStore>>,
}

impl fmt::Debug for ResourceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceResolver")
            .field("registry", &self.registry)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl ResourceResolver {
    /// Create a resolver over `store`, routing through `registry`.
    pub fn new(registry: Arc<BundleRegistry>, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            registry,
            store,
            fallback: None,
        }
    }

    /// Consult `fallback` for units and resources that no bundle holds.
    pub fn with_fallback(mut self, fallback: Arc<dyn ResourceStore>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// The registry lookups are routed through
    pub fn registry(&self) -> &Arc<BundleRegistry> {
        &self.registry
    }

    /// Resolve `path` to the first bundle holding it.
    ///
    /// Runs inside the loader's privileged scope regardless of the caller.
    pub fn resolve(&self, path: &str) -> Option<ResolvedResource> {
        privileged("resolve", |token| self.resolve_privileged(token, path))
    }

    /// Core routing, callable only from inside a privileged scope.
    pub(crate) fn resolve_privileged(
        &self,
        _token: &Privileged,
        path: &str,
    ) -> Option<ResolvedResource> {
        if let Some(storage_path) = path.strip_prefix(INDIRECTION_SEGMENT) {
            return self.open_direct(storage_path);
        }

        for (index, bundle) in self.registry.iter().enumerate() {
            let candidate = format!("{}{}", bundle.namespace_prefix(), path);
            if let Some(stream) = self.store.open(&candidate) {
                tracing::debug!(path, bundle = bundle.identifier(), "resolved resource");
                return Some(ResolvedResource {
                    bundle_index: Some(index),
                    stream,
                });
            }
        }

        tracing::debug!(path, "resource not found in any bundle");
        None
    }

    /// Fetch a container-absolute path without iterating bundles.
    fn open_direct(&self, storage_path: &str) -> Option<ResolvedResource> {
        // Exactly one indirection segment is honoured.
        if storage_path.starts_with(INDIRECTION_SEGMENT) {
            tracing::debug!(storage_path, "rejected nested indirection");
            return None;
        }

        let stream = self.store.open(storage_path)?;
        Some(ResolvedResource {
            bundle_index: self.registry.index_for_storage_path(storage_path),
            stream,
        })
    }

    /// Open a plain (non-unit) resource for a caller.
    ///
    /// Unit images are never handed out as resources. Paths missing from
    /// every bundle fall through to the fallback store, if any.
    pub fn open_resource(&self, path: &str) -> Option<ResolvedResource> {
        if path.ends_with(UNIT_SUFFIX) {
            tracing::debug!(path, "unit images are not exposed as resources");
            return None;
        }

        privileged("open_resource", |token| {
            self.resolve_privileged(token, path)
                .or_else(|| self.open_fallback(token, path))
        })
    }

    /// Default lookup outside every bundle, used once bundle iteration
    /// misses.
    pub(crate) fn open_fallback(&self, _token: &Privileged, path: &str) -> Option<ResolvedResource> {
        if path.starts_with(INDIRECTION_SEGMENT) {
            return None;
        }
        let stream = self.fallback.as_ref()?.open(path)?;
        tracing::debug!(path, "resolved from fallback store");
        Some(ResolvedResource {
            bundle_index: None,
            stream,
        })
    }

    /// Find the first bundle holding `path` and return a lazy handle to it.
    ///
    /// Paths already carrying the indirection segment name a container
    /// location, not a bundle resource, and yield `None`.
    pub fn locate(self: &Arc<Self>, path: &str) -> Option<IndirectHandle> {
        if path.starts_with(INDIRECTION_SEGMENT) {
            return None;
        }
        let index = privileged("locate", |token| {
            self.resolve_privileged(token, path)
                .and_then(|resolved| resolved.bundle_index)
        })?;
        self.handle_for(index, path)
    }

    /// Build a handle to `path` inside the bundle at `index` without
    /// touching the container.
    pub fn handle_for(self: &Arc<Self>, index: usize, path: &str) -> Option<IndirectHandle> {
        let bundle = self.registry.descriptor(index)?;
        Some(IndirectHandle::new(Arc::clone(self), bundle, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;

    fn resolver(bundles: &[&str], entries: &[(&str, &str)]) -> ResourceResolver {
        let registry = Arc::new(BundleRegistry::new(bundles.iter().copied()).unwrap());
        let container = Container::from_entries(
            entries
                .iter()
                .map(|(path, data)| (path.to_string(), data.as_bytes().to_vec())),
        );
        ResourceResolver::new(registry, Arc::new(container))
    }

    fn read(resolved: ResolvedResource) -> Vec<u8> {
        let mut stream = resolved.stream;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_indirection_segment_is_bare_marker() {
        assert_eq!(INDIRECTION_SEGMENT, format!("{}/", crate::registry::RESERVED_MARKER));
    }

    #[test]
    fn test_first_bundle_wins() {
        let resolver = resolver(
            &["libA", "libB"],
            &[
                ("$$satchel$$libA/shared.txt", "from A"),
                ("$$satchel$$libB/shared.txt", "from B"),
                ("$$satchel$$libB/only-b.txt", "only B"),
            ],
        );

        let shared = resolver.resolve("shared.txt").unwrap();
        assert_eq!(shared.bundle_index, Some(0));
        assert_eq!(read(shared), b"from A");

        let only_b = resolver.resolve("only-b.txt").unwrap();
        assert_eq!(only_b.bundle_index, Some(1));
        assert_eq!(read(only_b), b"only B");
    }

    #[test]
    fn test_miss_is_repeatable() {
        let resolver = resolver(&["libA"], &[("$$satchel$$libA/a.txt", "a")]);
        for _ in 0..3 {
            assert!(resolver.resolve("missing.txt").is_none());
        }
    }

    #[test]
    fn test_indirection_fetches_directly() {
        let resolver = resolver(&["libA", "libB"], &[("$$satchel$$libB/x.txt", "x")]);

        let resolved = resolver.resolve("$$satchel$$/$$satchel$$libB/x.txt").unwrap();
        assert_eq!(resolved.bundle_index, Some(1));
        assert_eq!(read(resolved), b"x");

        // Nested indirection is not unwrapped twice
        assert!(resolver
            .resolve("$$satchel$$/$$satchel$$/$$satchel$$libB/x.txt")
            .is_none());
    }

    #[test]
    fn test_open_resource_hides_units_and_uses_fallback() {
        let registry = Arc::new(BundleRegistry::new(["libA"]).unwrap());
        let container = Container::from_entries(vec![(
            "$$satchel$$libA/com/example/Main.unit".to_string(),
            b"unit".to_vec(),
        )]);
        let host = Container::from_entries(vec![("host.txt".to_string(), b"host".to_vec())]);
        let resolver =
            ResourceResolver::new(registry, Arc::new(container)).with_fallback(Arc::new(host));

        assert!(resolver.resolve("com/example/Main.unit").is_some());
        assert!(resolver.open_resource("com/example/Main.unit").is_none());

        let from_host = resolver.open_resource("host.txt").unwrap();
        assert_eq!(from_host.bundle_index, None);
        assert_eq!(read(from_host), b"host");
    }

    #[test]
    fn test_locate_returns_handle_to_first_bundle() {
        let resolver = Arc::new(resolver(
            &["libA", "libB"],
            &[("$$satchel$$libB/conf/app.toml", "key = 1")],
        ));

        let handle = resolver.locate("conf/app.toml").unwrap();
        assert_eq!(handle.bundle(), "libB");
        assert_eq!(handle.path(), "conf/app.toml");
        assert!(resolver.locate("conf/missing.toml").is_none());
    }

    #[test]
    fn test_locate_refuses_indirect_paths() {
        let resolver = Arc::new(resolver(
            &["libA", "libB"],
            &[("$$satchel$$libB/conf/app.toml", "key = 1")],
        ));

        // Resolvable directly, but not a bundle-relative path
        assert!(resolver.resolve("$$satchel$$/$$satchel$$libB/conf/app.toml").is_some());
        assert!(resolver
            .locate("$$satchel$$/$$satchel$$libB/conf/app.toml")
            .is_none());
    }
}
