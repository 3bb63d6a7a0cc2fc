mod config;
mod run;
mod stats;
mod status;

use std::process::ExitCode;

use structopt::StructOpt;
use thiserror::Error;

#[derive(StructOpt)]
enum Opt {
    /// Enable discovery and run a Link node until interrupted.
    Run(run::RunOpt),
    /// Poll another node's metrics endpoint and render it.
    Stats(stats::client::StatsOpt),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("spawning reactor thread: {0}")]
    Io(#[from] std::io::Error),
    #[error("starting metrics server: {0}")]
    Metrics(#[from] stats::server::StartError),
    #[error("querying stats endpoint: {0}")]
    Stats(#[from] stats::client::ClientError),
}

fn main() -> Result<(), ExitCode> {
    env_logger::init();

    if let Some(config) = config::read() {
        config::load_into_env(&config);
    }

    let opt = Opt::from_args();

    let result = match opt {
        Opt::Run(opt) => run::run(opt),
        Opt::Stats(opt) => stats::client::run(opt),
    };

    result.map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::FAILURE
    })
}
