pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use tomo_core::error::Result;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = handlers::load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Decode { plan, policy, rows } => {
            handlers::handle_decode(&config, plan, policy.map(Into::into), rows)
        }
        Commands::Timeline { plan } => handlers::handle_timeline(plan),
        Commands::Stage { inputs, solver } => {
            handlers::handle_stage(&config, inputs, (&solver).into())
        }
        Commands::Discover => handlers::handle_discover(config),
        Commands::Calc {
            inputs,
            solver,
            out,
        } => handlers::handle_calc(config, inputs, (&solver).into(), out),
    }
}
