//! MySQL endpoint for kitchen-sync replication.

use std::process::ExitCode;

use clap::Parser;
use kitchen_sync::adapter::MysqlAdapter;
use kitchen_sync_cli::{init_logging, run_endpoint, EndpointArgs};

const DEFAULT_PORT: u16 = 3306;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = EndpointArgs::parse();
    init_logging(&args.verbosity);

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &EndpointArgs) -> kitchen_sync::Result<()> {
    let params = args.connect_params(DEFAULT_PORT)?;
    let mut adapter = MysqlAdapter::connect(&params).await?;
    run_endpoint(&mut adapter, args).await
}
