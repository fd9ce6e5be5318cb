use std::sync::Arc;

use log::{error, info, warn};

use clap::Parser;
use hookdeploy_server::config::Config;
use hookdeploy_server::dispatch::Dispatcher;
use hookdeploy_server::execute::{Executor, ProcessRunner};
use hookdeploy_server::routes::routes;
use hookdeploy_server::verify::Verifier;
use hookdeploy_server::Hooks;
use warp::Filter;

/// Webhook deployment server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File path to the configuration
    #[arg(short, long)]
    config_path: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    pretty_env_logger::init();
    let config = Config::read(&args.config_path);
    match config {
        Ok(Config {
            address,
            workspace,
            secret,
            stage_timeout,
            max_body,
            routes: table,
        }) => {
            for path in table.unauthenticated() {
                warn!(
                    "Route {} accepts unsigned requests, flagged for operator review",
                    path
                );
            }
            info!("Loaded {} routes, workspace: {}", table.len(), workspace);
            let executor = Executor::new(workspace, Arc::new(ProcessRunner), stage_timeout);
            let hooks = Hooks {
                verifier: Verifier::new(secret),
                dispatcher: Dispatcher::new(table, executor),
                max_body,
            };
            info!("hookdeploy listening on {}", address);
            warp::serve(routes(hooks).with(warp::log("hookdeploy")))
                .run(address)
                .await;
        }
        Err(err) => {
            error!("Config error: {}", err);
            std::process::exit(1);
        }
    };
}
