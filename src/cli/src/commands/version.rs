//! `a3s-stargz version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("a3s-stargz version {}", a3s_stargz_core::VERSION);
    Ok(())
}
