mod catalog;
mod cli;
mod config;
mod genes;
mod process;
mod summary;

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

use anyhow::Context;

fn main() -> anyhow::Result<()> {
    let cfg = cli::handle_cli().with_context(|| "Error processing command line arguments")?;
    process::process_groups(&cfg)?;
    Ok(())
}
