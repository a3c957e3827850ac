//! Satchel launcher
//!
//! Mounts the container this executable carries, reads its startup
//! configuration, and starts the configured entry unit. Every argument is
//! forwarded to the entry verbatim; the launcher has no flags of its own.
//!
//! Environment:
//! - `SATCHEL_CONTAINER`: container file or development directory to use
//!   instead of the running executable
//! - `RUST_LOG`: log filter

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use satchel_runtime::{
    detect_container, detect_container_at, launch, Container, EntryTable, ExecutionContext,
    FailurePolicy, ResourceStore, RuntimeError,
};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the container location.
const CONTAINER_ENV: &str = "SATCHEL_CONTAINER";

fn main() -> anyhow::Result<()> {
    init_tracing();

    let prepared = forwarded_args().and_then(|args| Ok((args, open_container()?)));
    let (args, store) = match prepared {
        Ok(prepared) => prepared,
        Err(error) => {
            FailurePolicy::Report.settle(error, &mut io::stderr())?;
            return Ok(());
        }
    };

    launch(store, Arc::new(builtin_entries()?), FailurePolicy::Report, &args)?;
    Ok(())
}

fn init_tracing() {
    // Logs are opt-in through RUST_LOG
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Launcher arguments, in order. Entries take UTF-8 strings.
fn forwarded_args() -> Result<Vec<String>, RuntimeError> {
    std::env::args_os()
        .skip(1)
        .map(|arg| {
            arg.into_string().map_err(|arg| {
                RuntimeError::InvalidArgument(format!("{:?} is not valid UTF-8", arg))
            })
        })
        .collect()
}

/// Locate the container: `SATCHEL_CONTAINER` if set, else the running executable.
fn open_container() -> Result<Arc<dyn ResourceStore>, RuntimeError> {
    if let Some(location) = std::env::var_os(CONTAINER_ENV) {
        let path = Path::new(&location);
        tracing::debug!(path = %path.display(), "using container from {}", CONTAINER_ENV);

        if path.is_dir() {
            return Ok(Arc::new(Container::from_dir(path)?));
        }
        return detect_container_at(path)?
            .map(|container| Arc::new(container) as Arc<dyn ResourceStore>)
            .ok_or_else(|| {
                RuntimeError::Container(format!("no container payload in {}", path.display()))
            });
    }

    detect_container()?
        .map(|container| Arc::new(container) as Arc<dyn ResourceStore>)
        .ok_or_else(|| {
            RuntimeError::Container(format!(
                "this executable carries no container payload; set {} to run one",
                CONTAINER_ENV
            ))
        })
}

/// Entry symbols the launcher can bind.
fn builtin_entries() -> anyhow::Result<EntryTable> {
    let mut entries = EntryTable::new();
    entries
        .register_fn("satchel:manifest", manifest)
        .map_err(anyhow::Error::msg)?;
    entries
        .register_fn("satchel:echo", echo)
        .map_err(anyhow::Error::msg)?;
    Ok(entries)
}

/// Print the entry unit and every registered bundle in priority order.
fn manifest(ctx: &ExecutionContext, _args: &[String]) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let entry = ctx.load_unit(ctx.entry())?;
    writeln!(out, "entry\t{}\t{}", entry.name(), entry.digest_hex())?;
    for bundle in ctx.loader().registry().iter() {
        writeln!(
            out,
            "bundle\t{}\t{}",
            bundle.identifier(),
            bundle.domain().origin()
        )?;
    }
    Ok(())
}

/// Print each forwarded argument on its own line.
fn echo(_ctx: &ExecutionContext, args: &[String]) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for arg in args {
        writeln!(out, "{}", arg)?;
    }
    Ok(())
}
