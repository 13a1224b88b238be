//! docgrab-patch - point an extractor checkout at a remote browser service.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use docgrab_patch::{PatchOptions, patch_tree};

#[derive(Debug, Parser)]
#[command(name = "docgrab-patch", version, about)]
struct Args {
    /// Root of the extractor checkout (the directory holding package.json).
    root: PathBuf,

    /// Hostname of the browser service.
    #[arg(long, default_value = "browser")]
    host: String,

    /// DevTools port on the browser host.
    #[arg(long, default_value_t = 9222)]
    port: u16,

    /// Version string to replace in package.json.
    #[arg(long = "from", default_value = "0.33.3")]
    from_version: String,

    /// Replacement version string.
    #[arg(long = "to", default_value = "0.33.5")]
    to_version: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let opts = PatchOptions {
        host: args.host,
        port: args.port,
        from_version: args.from_version,
        to_version: args.to_version,
    };

    let report = patch_tree(&args.root, &opts)
        .with_context(|| format!("failed to patch {}", args.root.display()))?;

    println!("launch routine: {}", report.launch);
    println!("package.json:   {}", report.manifest);
    Ok(())
}
