mod analysis;
mod config;
mod engine;
mod manager;
mod market;
mod model;
mod record;
mod stats;

use crate::config::Template;
use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[arg(long)]
    sim_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write new pool and individual parameter files.
    Generate(GenerateArgs),

    /// Simulate the individual runs.
    Individual {
        #[arg(long)]
        force: bool,
    },

    /// Simulate the pooled runs in parallel.
    Pool {
        #[arg(long)]
        force: bool,
    },

    Analyze,

    APriori,

    Clean,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long, default_value_t = 1000)]
    n_sim: usize,

    #[arg(long, default_value_t = 100)]
    n_positions: usize,

    #[arg(long, default_value_t = 50)]
    n_prices: usize,

    #[arg(long, default_value_t = 1.0)]
    p_min: f64,

    #[arg(long, default_value_t = 10.0)]
    p_max: f64,

    #[arg(long, default_value_t = 100)]
    t_max: usize,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.sim_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Generate(gen_args) => {
            let template = Template {
                n_positions: gen_args.n_positions,
                n_prices: gen_args.n_prices,
                p_min: gen_args.p_min,
                p_max: gen_args.p_max,
                t_max: gen_args.t_max,
            };
            mgr.generate_params(&template, gen_args.n_sim)?
        }
        Command::Individual { force } => mgr.run_individual(force)?,
        Command::Pool { force } => mgr.run_pool(force)?,
        Command::Analyze => mgr.run_analysis()?,
        Command::APriori => mgr.run_a_priori()?,
        Command::Clean => mgr.clean_sim()?,
    }

    Ok(())
}
