//! Command-line front end: reads a container file, decompiles it, and
//! prints the rendered pseudo-code to stdout.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use cellvm_decompile::adapter::{boc, render};
use cellvm_decompile::{lift_program, Catalog, Pipeline};

#[derive(Parser)]
#[clap(name = "cellvm-decompile", about = "Decompile a stack-machine bytecode container")]
struct Args {
    /// Path to the container file to decompile.
    path: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let Some(path) = args.path else {
        bail!("usage: cellvm-decompile <path>");
    };

    let bytes = fs::read(&path).with_context(|| format!("failed to read `{}`", path.display()))?;
    let root = boc::deserialize(&bytes).with_context(|| format!("failed to parse `{}`", path.display()))?;

    let catalog = Catalog::default();
    let program = lift_program(&catalog, root);
    let program = Pipeline::run(program);

    print!("{}", render::render_program(&program));
    Ok(())
}
