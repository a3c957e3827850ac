//! Code unit loading
//!
//! Translates qualified names to bundle paths, resolves them through the
//! [`ResourceResolver`], and defines each unit at most once under the
//! isolation domain of the bundle that served it.

use std::io::{self, Read};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use url::Url;

use crate::error::RuntimeError;
use crate::registry::{BundleRegistry, IsolationDomain};
use crate::resolver::ResourceResolver;
use crate::security::{privileged, Privileged};
use crate::unit::{namespace_of, unit_path, CodeUnit, UnitImage};

/// Size of the intermediate buffer used to drain unit streams.
pub const COPY_BUFFER_SIZE: usize = 1024;

/// Provenance recorded for a namespace the first time a unit in it loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceMetadata {
    name: String,
    origin: Url,
    bundle: Option<String>,
}

impl NamespaceMetadata {
    /// Namespace name (e.g. `com.example`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Origin of the bundle that first served a unit in this namespace
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Identifier of that bundle; `None` when the host served it
    pub fn bundle(&self) -> Option<&str> {
        self.bundle.as_deref()
    }
}

type UnitSlot = Arc<OnceCell<Arc<CodeUnit>>>;

/// Why a slot was left empty.
enum SlotFailure {
    /// The slot was dropped from the table by a failed load; fetch a fresh one
    Retired,
    Load(RuntimeError),
}

/// Loads and caches code units from a set of bundles.
///
/// Thread-safe. Each name gets its own slot, so loads of different names
/// never wait on each other and concurrent loads of one name observe a
/// single definition.
pub struct CodeUnitLoader {
    resolver: Arc<ResourceResolver>,
    /// Per-name define-once cells
    slots: DashMap<String, UnitSlot>,
    /// Defined units by qualified name
    defined: DashMap<String, Arc<CodeUnit>>,
    namespaces: DashMap<String, NamespaceMetadata>,
}

impl std::fmt::Debug for CodeUnitLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeUnitLoader")
            .field("resolver", &self.resolver)
            .field("loaded", &self.defined.len())
            .field("namespaces", &self.namespaces.len())
            .finish()
    }
}

impl CodeUnitLoader {
    /// Create a loader with an empty cache.
    pub fn new(resolver: Arc<ResourceResolver>) -> Self {
        Self {
            resolver,
            slots: DashMap::new(),
            defined: DashMap::new(),
            namespaces: DashMap::new(),
        }
    }

    /// Resolver the loader reads through
    pub fn resolver(&self) -> &Arc<ResourceResolver> {
        &self.resolver
    }

    /// Registry of bundles the loader reads from
    pub fn registry(&self) -> &Arc<BundleRegistry> {
        self.resolver.registry()
    }

    /// Load the unit named `qualified_name`, defining it on first request.
    ///
    /// Bundles are searched in priority order, then the resolver's fallback
    /// store. A failed load defines nothing and keeps no slot; a later
    /// request tries again.
    pub fn load_unit(&self, qualified_name: &str) -> Result<Arc<CodeUnit>, RuntimeError> {
        let path = unit_path(qualified_name)
            .ok_or_else(|| RuntimeError::UnitNotFound(qualified_name.to_string()))?;

        loop {
            let slot = self.slot(qualified_name);
            if let Some(unit) = slot.get() {
                return Ok(Arc::clone(unit));
            }

            match slot.get_or_try_init(|| self.fill_slot(qualified_name, &path, &slot)) {
                Ok(unit) => return Ok(Arc::clone(unit)),
                Err(SlotFailure::Retired) => continue,
                Err(SlotFailure::Load(error)) => return Err(error),
            }
        }
    }

    /// Check if `qualified_name` has been defined
    pub fn is_loaded(&self, qualified_name: &str) -> bool {
        self.defined.contains_key(qualified_name)
    }

    /// Number of defined units
    pub fn loaded_count(&self) -> usize {
        self.defined.len()
    }

    /// Metadata registered for `namespace`, if any unit in it has been requested
    pub fn namespace(&self, namespace: &str) -> Option<NamespaceMetadata> {
        self.namespaces.get(namespace).map(|m| m.value().clone())
    }

    /// Number of registered namespaces
    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    /// Get or create the slot for `qualified_name`. The map guard is
    /// released before returning.
    fn slot(&self, qualified_name: &str) -> UnitSlot {
        if let Some(slot) = self.slots.get(qualified_name) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.slots
                .entry(qualified_name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        )
    }

    /// Initialize `slot`, which runs while holding the slot's init.
    ///
    /// Only the slot currently in the table may define; one dropped by an
    /// earlier failure reports `Retired`. On failure the slot is dropped
    /// before the init is released.
    fn fill_slot(
        &self,
        qualified_name: &str,
        path: &str,
        slot: &UnitSlot,
    ) -> Result<Arc<CodeUnit>, SlotFailure> {
        let current = self
            .slots
            .get(qualified_name)
            .map_or(false, |entry| Arc::ptr_eq(entry.value(), slot));
        if !current {
            return Err(SlotFailure::Retired);
        }

        privileged("load_unit", |token| self.define(token, qualified_name, path)).map_err(
            |error| {
                self.slots
                    .remove_if(qualified_name, |_, entry| Arc::ptr_eq(entry, slot));
                SlotFailure::Load(error)
            },
        )
    }

    fn define(
        &self,
        token: &Privileged,
        qualified_name: &str,
        path: &str,
    ) -> Result<Arc<CodeUnit>, RuntimeError> {
        let not_found = || RuntimeError::UnitNotFound(qualified_name.to_string());

        let resolved = self
            .resolver
            .resolve_privileged(token, path)
            .or_else(|| self.resolver.open_fallback(token, path))
            .ok_or_else(not_found)?;
        let domain = match resolved.bundle_index {
            Some(index) => self.registry().domain(index).cloned().ok_or_else(not_found)?,
            None => Arc::clone(self.registry().host_domain()),
        };

        self.register_namespace(qualified_name, &domain);

        let bytes = copy_stream(qualified_name, resolved.stream)?;
        let image = UnitImage::decode(&bytes).map_err(|source| RuntimeError::UnitFormat {
            name: qualified_name.to_string(),
            source,
        })?;
        let unit = CodeUnit::define(qualified_name, image, domain).map_err(|source| {
            RuntimeError::UnitFormat {
                name: qualified_name.to_string(),
                source,
            }
        })?;
        let unit = Arc::new(unit);

        self.record_definition(&unit)?;
        tracing::debug!(
            unit = qualified_name,
            bundle = unit.domain().bundle().unwrap_or("<host>"),
            digest = %unit.digest_hex(),
            "defined code unit"
        );
        Ok(unit)
    }

    /// Register namespace metadata once; the first bundle to serve a unit
    /// in a namespace is recorded.
    fn register_namespace(&self, qualified_name: &str, domain: &IsolationDomain) {
        let Some(namespace) = namespace_of(qualified_name) else {
            return;
        };
        if self.namespaces.contains_key(namespace) {
            return;
        }
        self.namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| NamespaceMetadata {
                name: namespace.to_string(),
                origin: domain.origin().clone(),
                bundle: domain.bundle().map(String::from),
            });
    }

    /// Insert a freshly defined unit into the cache. A different unit
    /// already cached under the same name is fatal.
    fn record_definition(&self, unit: &Arc<CodeUnit>) -> Result<(), RuntimeError> {
        match self.defined.entry(unit.name().to_string()) {
            Entry::Occupied(existing) => {
                if Arc::ptr_eq(existing.get(), unit) {
                    return Ok(());
                }
                tracing::warn!(unit = unit.name(), "second definition rejected");
                Err(RuntimeError::DuplicateDefinition(unit.name().to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(unit));
                Ok(())
            }
        }
    }
}

/// Drain `stream` into an owned buffer, `COPY_BUFFER_SIZE` bytes at a time.
fn copy_stream(name: &str, mut stream: Box<dyn Read + Send>) -> Result<Vec<u8>, RuntimeError> {
    let mut bytes = Vec::new();
    let mut buf = [0u8; COPY_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(bytes),
            Ok(n) => bytes.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(RuntimeError::StreamRead {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }
}
