//! Lazy handles to bundle resources.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use crate::registry::BundleDescriptor;
use crate::resolver::{ResolvedResource, ResourceResolver, INDIRECTION_SEGMENT};
use crate::security::privileged;

/// A deferred reference to one resource inside one bundle.
///
/// Creating a handle performs no I/O. Opening it routes back through the
/// resolver with an indirection path, so the fetch goes straight to the
/// container and never re-enters bundle iteration. The handle carries no
/// mutable state and can be opened from any thread, any number of times.
#[derive(Clone)]
pub struct IndirectHandle {
    resolver: Arc<ResourceResolver>,
    bundle: String,
    path: String,
    indirect_path: String,
}

impl IndirectHandle {
    pub(crate) fn new(
        resolver: Arc<ResourceResolver>,
        bundle: &BundleDescriptor,
        path: &str,
    ) -> Self {
        Self {
            resolver,
            bundle: bundle.identifier().to_string(),
            path: path.to_string(),
            indirect_path: format!("{}{}{}", INDIRECTION_SEGMENT, bundle.namespace_prefix(), path),
        }
    }

    /// Identifier of the bundle holding the resource
    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    /// Bundle-relative resource path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Open a stream over the resource.
    ///
    /// Always runs under the loader's own privilege; the privilege of
    /// whoever obtained the handle does not matter.
    pub fn open(&self) -> Option<ResolvedResource> {
        privileged("open_handle", |token| {
            self.resolver.resolve_privileged(token, &self.indirect_path)
        })
    }

    /// Open the resource and read it to the end.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let resolved = self.open().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} is no longer available", self))
        })?;
        let mut stream = resolved.stream;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Display for IndirectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!/{}", self.bundle, self.path)
    }
}

impl fmt::Debug for IndirectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndirectHandle")
            .field("bundle", &self.bundle)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Container, ResourceStore};
    use crate::registry::BundleRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that counts every open.
    struct CountingStore {
        inner: Container,
        opens: AtomicUsize,
    }

    impl ResourceStore for CountingStore {
        fn open(&self, path: &str) -> Option<Box<dyn Read + Send>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.inner.open(path)
        }
    }

    fn setup() -> (Arc<ResourceResolver>, Arc<CountingStore>) {
        let registry = Arc::new(BundleRegistry::new(["libA", "libB"]).unwrap());
        let store = Arc::new(CountingStore {
            inner: Container::from_entries(vec![(
                "$$satchel$$libB/assets/logo.svg".to_string(),
                b"<svg/>".to_vec(),
            )]),
            opens: AtomicUsize::new(0),
        });
        let resolver = Arc::new(ResourceResolver::new(registry, store.clone()));
        (resolver, store)
    }

    #[test]
    fn test_handle_construction_is_lazy() {
        let (resolver, store) = setup();

        let handle = resolver.handle_for(1, "assets/logo.svg").unwrap();
        assert_eq!(store.opens.load(Ordering::SeqCst), 0);
        assert_eq!(handle.to_string(), "libB!/assets/logo.svg");

        assert_eq!(handle.read_all().unwrap(), b"<svg/>");
        assert_eq!(store.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_reports_owning_bundle() {
        let (resolver, _store) = setup();
        let handle = resolver.handle_for(1, "assets/logo.svg").unwrap();
        assert_eq!(handle.open().unwrap().bundle_index, Some(1));
    }

    #[test]
    fn test_handle_to_absent_resource() {
        let (resolver, _store) = setup();
        let handle = resolver.handle_for(0, "assets/logo.svg").unwrap();
        assert!(handle.open().is_none());
        assert_eq!(handle.read_all().unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_handle_opens_from_other_threads() {
        let (resolver, _store) = setup();
        let handle = resolver.locate("assets/logo.svg").unwrap();

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || handle.read_all().unwrap())
            })
            .collect();

        for t in threads {
            assert_eq!(t.join().unwrap(), b"<svg/>");
        }
    }
}
