//! chainprobe: blockchain RPC provider latency prober.
//!
//! Measures per-method latency of HTTP JSON-RPC and WebSocket endpoints
//! across providers and regions. Run `chainprobe --help` for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod collect;
mod config;
mod push;
mod serve;
mod update_state;

use cli::{Cli, Commands};
use collect::Target;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        let example = config::ProbeConfig::default_example();
        print!("{}", toml::to_string_pretty(&example)?);
        return Ok(());
    }

    let config = config::ProbeConfig::load_or_default(&cli.config)?;
    let env = config::Environment::from_env(cli.endpoints.as_deref())?;

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    rt.block_on(async {
        match cli.command {
            Commands::Collect { chain } => {
                let report = collect::run(&config, &env, Target::Chain(chain)).await?;
                println!("{}", report.summary());
                eprintln!("{}", report.push_status());
            }
            Commands::Land => {
                let report = collect::run(&config, &env, Target::Landing).await?;
                println!("{}", report.summary());
                eprintln!("{}", report.push_status());
            }
            Commands::UpdateState => {
                let outcome = update_state::StateManager::new(&config, &env)?.update().await?;
                println!("{outcome}");
            }
            Commands::Serve { listen } => {
                serve::serve(listen, serve::AppState { config, env }).await?;
            }
            Commands::Init => {}
        }
        Ok(())
    })
}
