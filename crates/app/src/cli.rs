use std::path::PathBuf;

use clap::Parser;

use crate::config::DEFAULT_CONFIG_PATH;

/// Start the configured cameras, their streams and the vision loop.
#[derive(Debug, Parser)]
#[command(name = "camera-server", version)]
pub struct Args {
    /// Configuration document.
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}
