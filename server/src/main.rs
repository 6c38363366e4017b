use clap::Parser;
use log::error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use server::config::{Config, DEFAULT_STORE_QUEUE, DatabaseLocation, MAX_UPLOAD_BYTES};
use server::run;

#[derive(Parser, Debug)]
#[command(version, about = "Highway transit and speeding fine service")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "TOLL_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// SQLite database file, or :memory:
    #[arg(long, env = "TOLL_DATABASE", default_value = ":memory:")]
    database: DatabaseLocation,

    /// Plate recognition endpoint for captured images
    #[arg(long, env = "TOLL_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Largest accepted plate image, in bytes
    #[arg(long, env = "TOLL_MAX_UPLOAD_BYTES", default_value_t = MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,

    #[arg(long, env = "TOLL_STORE_QUEUE", default_value_t = DEFAULT_STORE_QUEUE)]
    store_queue: usize,

    /// JSON file with gates, vehicle types, vehicles, routes and gate devices
    #[arg(long, env = "TOLL_SEED")]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = Config {
        bind: args.bind,
        database: args.database,
        ocr_endpoint: args.ocr_endpoint,
        max_upload_bytes: args.max_upload_bytes,
        store_queue: args.store_queue,
        seed: args.seed,
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
