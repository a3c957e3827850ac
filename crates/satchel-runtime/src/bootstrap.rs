//! Entry unit launch
//!
//! The bootstrapper loads the configured entry unit, binds the entry symbol
//! its image declares to a host-registered [`EntryPoint`], and runs it with
//! the launcher's arguments. The loader travels to the entry in an explicit
//! [`ExecutionContext`]; nothing is installed in thread-local state.

use std::any::Any;
use std::collections::HashMap;
use std::error::Error as _;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::StartupConfig;
use crate::container::ResourceStore;
use crate::error::RuntimeError;
use crate::handle::IndirectHandle;
use crate::loader::CodeUnitLoader;
use crate::registry::BundleRegistry;
use crate::resolver::{ResolvedResource, ResourceResolver};
use crate::security::{privileged, Privileged};
use crate::unit::CodeUnit;

/// Ambient state handed to a running entry.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    loader: Arc<CodeUnitLoader>,
    entry: String,
}

impl ExecutionContext {
    /// Loader that defined the entry unit
    pub fn loader(&self) -> &Arc<CodeUnitLoader> {
        &self.loader
    }

    /// Qualified name of the running entry unit
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Load another unit through the ambient loader.
    pub fn load_unit(&self, qualified_name: &str) -> Result<Arc<CodeUnit>, RuntimeError> {
        self.loader.load_unit(qualified_name)
    }

    /// Open a plain resource through the ambient loader.
    pub fn open_resource(&self, path: &str) -> Option<ResolvedResource> {
        self.loader.resolver().open_resource(path)
    }

    /// Lazy handle to the first bundle holding `path`.
    pub fn locate(&self, path: &str) -> Option<IndirectHandle> {
        self.loader.resolver().locate(path)
    }
}

/// A launchable entry capability.
pub trait EntryPoint: Send + Sync {
    /// Run the entry with the launcher's arguments, verbatim and in order.
    fn run(&self, ctx: &ExecutionContext, args: &[String]) -> anyhow::Result<()>;
}

impl<F> EntryPoint for F
where
    F: Fn(&ExecutionContext, &[String]) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, ctx: &ExecutionContext, args: &[String]) -> anyhow::Result<()> {
        self(ctx, args)
    }
}

/// Registration table binding entry symbols to entry capabilities.
///
/// Unit images name their entry by symbol; the host registers what each
/// symbol runs before launching.
#[derive(Default)]
pub struct EntryTable {
    by_symbol: HashMap<String, Arc<dyn EntryPoint>>,
}

impl EntryTable {
    /// Create a new empty entry table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry capability under `symbol`
    ///
    /// # Arguments
    /// * `symbol` - The entry symbol unit images refer to
    /// * `entry` - The capability to run
    ///
    /// # Returns
    /// * `Ok(())` - Entry registered successfully
    /// * `Err(String)` - The symbol is already bound
    pub fn register(
        &mut self,
        symbol: impl Into<String>,
        entry: Arc<dyn EntryPoint>,
    ) -> Result<(), String> {
        let symbol = symbol.into();
        if self.by_symbol.contains_key(&symbol) {
            return Err(format!("Entry symbol '{}' is already registered", symbol));
        }
        self.by_symbol.insert(symbol, entry);
        Ok(())
    }

    /// Register a closure as an entry capability
    pub fn register_fn<F>(&mut self, symbol: impl Into<String>, entry: F) -> Result<(), String>
    where
        F: Fn(&ExecutionContext, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(symbol, Arc::new(entry))
    }

    /// Get the capability bound to `symbol`
    pub fn get(&self, symbol: &str) -> Option<&Arc<dyn EntryPoint>> {
        self.by_symbol.get(symbol)
    }

    /// Check if `symbol` is bound
    pub fn contains(&self, symbol: &str) -> bool {
        self.by_symbol.contains_key(symbol)
    }

    /// Bound symbols, sorted
    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.by_symbol.keys().map(String::as_str).collect();
        symbols.sort_unstable();
        symbols
    }

    /// Number of bound symbols
    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    /// Check if no symbols are bound
    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

impl std::fmt::Debug for EntryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryTable")
            .field("symbols", &self.symbols())
            .finish()
    }
}

/// What to do when starting the entry fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Return the error to the caller.
    #[default]
    Propagate,
    /// Write a diagnostic and return normally.
    Report,
}

impl FailurePolicy {
    /// Apply the policy to `error`, writing to `sink` when reporting.
    pub fn settle(self, error: RuntimeError, sink: &mut dyn Write) -> Result<(), RuntimeError> {
        match self {
            FailurePolicy::Propagate => Err(error),
            FailurePolicy::Report => {
                tracing::error!(error = %error, "entry launch failed");
                // Best-effort
                let _ = write_diagnostic(&error, sink);
                Ok(())
            }
        }
    }
}

fn write_diagnostic(error: &RuntimeError, sink: &mut dyn Write) -> io::Result<()> {
    writeln!(sink, "satchel: {}", error)?;
    let mut source = error.source();
    while let Some(cause) = source {
        writeln!(sink, "  caused by: {}", cause)?;
        source = cause.source();
    }
    sink.flush()
}

/// Starts entry units on behalf of a launcher.
pub struct Bootstrapper {
    loader: Arc<CodeUnitLoader>,
    entries: Arc<EntryTable>,
    policy: FailurePolicy,
    diagnostics: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("loader", &self.loader)
            .field("entries", &self.entries)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Bootstrapper {
    /// Create a bootstrapper that propagates failures and reports to stderr.
    pub fn new(loader: Arc<CodeUnitLoader>, entries: Arc<EntryTable>) -> Self {
        Self {
            loader,
            entries,
            policy: FailurePolicy::default(),
            diagnostics: Mutex::new(Box::new(io::stderr())),
        }
    }

    /// Set the failure policy.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the diagnostic sink used by [`FailurePolicy::Report`].
    pub fn with_diagnostics(mut self, sink: impl Write + Send + 'static) -> Self {
        self.diagnostics = Mutex::new(Box::new(sink));
        self
    }

    /// The loader entries run against
    pub fn loader(&self) -> &Arc<CodeUnitLoader> {
        &self.loader
    }

    /// Load `qualified_entry_name` and run its entry capability with `args`.
    ///
    /// The whole launch runs in the loader's privileged scope. Under
    /// [`FailurePolicy::Report`] any failure is written to the diagnostic
    /// sink and this returns `Ok(())`.
    pub fn start_entry(&self, qualified_entry_name: &str, args: &[String]) -> Result<(), RuntimeError> {
        let result = privileged("start_entry", |token| {
            self.run_entry(token, qualified_entry_name, args)
        });

        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                let mut sink = self.diagnostics.lock();
                self.policy.settle(error, &mut **sink)
            }
        }
    }

    fn run_entry(
        &self,
        _token: &Privileged,
        name: &str,
        args: &[String],
    ) -> Result<(), RuntimeError> {
        let ctx = ExecutionContext {
            loader: Arc::clone(&self.loader),
            entry: name.to_string(),
        };
        let invocation = |reason: String| RuntimeError::EntryInvocation {
            name: name.to_string(),
            reason,
        };

        let unit = self.loader.load_unit(name)?;
        let symbol = unit
            .entry_symbol()
            .ok_or_else(|| invocation("unit declares no entry symbol".into()))?;
        let entry = self
            .entries
            .get(symbol)
            .ok_or_else(|| invocation(format!("entry symbol '{}' is not bound", symbol)))?;

        tracing::info!(entry = name, symbol, args = args.len(), "starting entry unit");
        match panic::catch_unwind(AssertUnwindSafe(|| entry.run(&ctx, args))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(invocation(format!("{:#}", e))),
            Err(payload) => Err(invocation(format!("panicked: {}", panic_message(&*payload)))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Launch the entry named by the container's startup configuration.
///
/// Reads [`crate::config::CONFIG_RESOURCE`] from `store`, builds the
/// registry, resolver, and loader, then starts the configured entry with
/// `args`. The container root serves as the fallback store for units and
/// resources outside every bundle. Setup failures follow `policy` too, reported to stderr.
pub fn launch(
    store: Arc<dyn ResourceStore>,
    entries: Arc<EntryTable>,
    policy: FailurePolicy,
    args: &[String],
) -> Result<(), RuntimeError> {
    let setup = StartupConfig::read_from(store.as_ref()).and_then(|config| {
        let registry = Arc::new(BundleRegistry::new(config.bundles())?);
        let resolver = Arc::new(
            ResourceResolver::new(registry, Arc::clone(&store)).with_fallback(store),
        );
        Ok((config, Arc::new(CodeUnitLoader::new(resolver))))
    });

    let (config, loader) = match setup {
        Ok(setup) => setup,
        Err(error) => return policy.settle(error, &mut io::stderr()),
    };

    Bootstrapper::new(loader, entries)
        .with_policy(policy)
        .start_entry(config.entry(), args)
}
