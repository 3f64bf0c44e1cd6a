use clap::Parser;
use proximity_mesh::config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "proximity-mesh")]
#[command(version)]
#[command(about = "Proximity-driven audio/video peer mesh", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "proximity-mesh.toml")]
    pub config: PathBuf,

    /// Raw session identity (a fresh id when omitted)
    #[arg(short, long)]
    pub identity: Option<String>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    /// Skip the silent prior-permission probe at startup
    #[arg(long, action)]
    pub no_probe: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    pub fn identity(&self) -> String {
        self.identity
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}
