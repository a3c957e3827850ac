//! Bundle registry
//!
//! Immutable, ordered list of bundle descriptors. Position in the list is the
//! resolution priority: index 0 is consulted first.

use std::sync::Arc;

use url::Url;

use crate::error::RuntimeError;

/// Marker that opens every bundle prefix inside the container.
///
/// It never appears in a legitimate resource path.
pub const RESERVED_MARKER: &str = "$$satchel$$";

/// Scheme of the synthetic origin attributed to each bundle.
pub const ORIGIN_SCHEME: &str = "satchel";

/// Provenance of code and resources loaded from one bundle, or from the
/// host's default lookup outside every bundle.
#[derive(Debug, PartialEq, Eq)]
pub struct IsolationDomain {
    bundle: Option<String>,
    index: Option<usize>,
    origin: Url,
}

impl IsolationDomain {
    /// Identifier of the bundle this domain belongs to; `None` for the host
    pub fn bundle(&self) -> Option<&str> {
        self.bundle.as_deref()
    }

    /// Registration index of the bundle; `None` for the host
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Check if this is the host domain
    pub fn is_host(&self) -> bool {
        self.bundle.is_none()
    }

    /// Synthetic origin: `satchel://container/<identifier>.bundle` for a
    /// bundle, `satchel://container/` for the host
    pub fn origin(&self) -> &Url {
        &self.origin
    }
}

/// One registered bundle.
#[derive(Debug)]
pub struct BundleDescriptor {
    identifier: String,
    namespace_prefix: String,
    domain: Arc<IsolationDomain>,
}

impl BundleDescriptor {
    /// Bundle identifier as given in the startup configuration
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Container path prefix, `RESERVED_MARKER + identifier + "/"`
    pub fn namespace_prefix(&self) -> &str {
        &self.namespace_prefix
    }

    /// Isolation domain shared by every unit defined from this bundle
    pub fn domain(&self) -> &Arc<IsolationDomain> {
        &self.domain
    }
}

/// Ordered, read-only set of bundles.
#[derive(Debug)]
pub struct BundleRegistry {
    bundles: Vec<BundleDescriptor>,
    host: Arc<IsolationDomain>,
}

impl BundleRegistry {
    /// Build a registry from bundle identifiers in priority order.
    ///
    /// Fails with `ConfigMalformed` if any identifier cannot form a
    /// well-formed origin. A repeated identifier is kept but never reached:
    /// its earlier copy answers every lookup first.
    pub fn new<I, S>(identifiers: I) -> Result<Self, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bundles: Vec<BundleDescriptor> = Vec::new();

        for (index, identifier) in identifiers.into_iter().enumerate() {
            let identifier = identifier.as_ref();
            validate_identifier(identifier)?;

            if bundles.iter().any(|b| b.identifier == identifier) {
                tracing::warn!(bundle = identifier, index, "bundle listed more than once");
            }

            let origin = synthetic_origin(identifier)?;
            bundles.push(BundleDescriptor {
                identifier: identifier.to_string(),
                namespace_prefix: format!("{}{}/", RESERVED_MARKER, identifier),
                domain: Arc::new(IsolationDomain {
                    bundle: Some(identifier.to_string()),
                    index: Some(index),
                    origin,
                }),
            });
        }

        let host = Arc::new(IsolationDomain {
            bundle: None,
            index: None,
            origin: host_origin()?,
        });

        tracing::debug!(bundles = bundles.len(), "bundle registry built");
        Ok(Self { bundles, host })
    }

    /// Number of registered bundles
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Check if no bundles are registered
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Descriptor at `index`
    pub fn descriptor(&self, index: usize) -> Option<&BundleDescriptor> {
        self.bundles.get(index)
    }

    /// Container path prefix of the bundle at `index`
    pub fn prefix(&self, index: usize) -> Option<&str> {
        self.bundles.get(index).map(|b| b.namespace_prefix.as_str())
    }

    /// Isolation domain of the bundle at `index`
    pub fn domain(&self, index: usize) -> Option<&Arc<IsolationDomain>> {
        self.bundles.get(index).map(|b| &b.domain)
    }

    /// Domain of units served by the host's default lookup
    pub fn host_domain(&self) -> &Arc<IsolationDomain> {
        &self.host
    }

    /// Iterate over bundles in priority order
    pub fn iter(&self) -> impl Iterator<Item = &BundleDescriptor> {
        self.bundles.iter()
    }

    /// Index of the bundle whose prefix opens a container-absolute path.
    pub fn index_for_storage_path(&self, storage_path: &str) -> Option<usize> {
        self.bundles
            .iter()
            .position(|b| storage_path.starts_with(&b.namespace_prefix))
    }
}

fn validate_identifier(identifier: &str) -> Result<(), RuntimeError> {
    let reason = if identifier.is_empty() {
        Some("identifier is empty")
    } else if identifier.contains(RESERVED_MARKER) {
        Some("identifier contains the reserved marker")
    } else if identifier
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
    {
        Some("identifier contains a separator, whitespace, or control character")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RuntimeError::ConfigMalformed(format!(
            "bundle '{}': {}",
            identifier.escape_debug(),
            reason
        ))),
        None => Ok(()),
    }
}

fn host_origin() -> Result<Url, RuntimeError> {
    let raw = format!("{}://container/", ORIGIN_SCHEME);
    Url::parse(&raw).map_err(|e| RuntimeError::ConfigMalformed(format!("origin {}: {}", raw, e)))
}

fn synthetic_origin(identifier: &str) -> Result<Url, RuntimeError> {
    let raw = format!("{}://container/{}.bundle", ORIGIN_SCHEME, identifier);
    let origin = Url::parse(&raw).map_err(|e| {
        RuntimeError::ConfigMalformed(format!("bundle '{}': origin {}: {}", identifier, raw, e))
    })?;

    // Characters such as `?` or `#` would silently move into the query or
    // fragment; the identifier must survive as the last path segment.
    let expected = format!("{}.bundle", identifier);
    if origin.path_segments().and_then(|mut s| s.next_back()) != Some(expected.as_str()) {
        return Err(RuntimeError::ConfigMalformed(format!(
            "bundle '{}' does not form a well-formed origin",
            identifier
        )));
    }
    Ok(origin)
}
