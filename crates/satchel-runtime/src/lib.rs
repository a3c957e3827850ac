//! Satchel Runtime
//!
//! Loads code units and resources from several independently packaged
//! bundles embedded in one container. Each bundle lives under its own
//! namespace prefix; lookups walk bundles in priority order and the first
//! hit wins. Units are defined once per loader under the isolation domain of
//! the bundle that served them.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use satchel_runtime::{launch, EntryTable, FailurePolicy};
//!
//! let store = Arc::new(satchel_runtime::Container::from_dir("app".as_ref())?);
//! let mut entries = EntryTable::new();
//! entries.register_fn("main", |ctx, args| {
//!     println!("{} started with {:?}", ctx.entry(), args);
//!     Ok(())
//! })?;
//! launch(store, Arc::new(entries), FailurePolicy::Propagate, &[])?;
//! ```

pub mod bootstrap;
pub mod config;
pub mod container;
pub mod error;
pub mod handle;
pub mod loader;
pub mod registry;
pub mod resolver;
pub mod security;
pub mod unit;

pub use bootstrap::{launch, Bootstrapper, EntryPoint, EntryTable, ExecutionContext, FailurePolicy};
pub use config::{StartupConfig, CONFIG_RESOURCE};
pub use container::detect::{detect_container, detect_container_at};
pub use container::{Container, ResourceStore};
pub use error::RuntimeError;
pub use handle::IndirectHandle;
pub use loader::{CodeUnitLoader, NamespaceMetadata};
pub use registry::{BundleDescriptor, BundleRegistry, IsolationDomain, RESERVED_MARKER};
pub use resolver::{ResolvedResource, ResourceResolver, INDIRECTION_SEGMENT};
pub use unit::{CodeUnit, UnitImage, UnitFormatError};
