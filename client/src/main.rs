use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::debug;
use std::path::PathBuf;
use std::process::ExitCode;

use client::{Client, ClientError, scan};
use toll_shared::messages::{FineQuery, TransitRequest};
use toll_shared::model::{Plate, Role, timestamp};

#[derive(Parser, Debug)]
#[command(version, about, long_about=None)]
struct Args {
    /// Address of the toll server
    #[arg(short = 'a', long, default_value_t = String::from("127.0.0.1"))]
    address: String,

    /// Port number for the toll server
    #[arg(short = 'p', long, default_value_t = 8080)]
    port: u16,

    /// Identity forwarded to the server
    #[arg(short = 'u', long, default_value_t = 1)]
    user_id: i64,

    /// operatore, varco or automobilista
    #[arg(short = 'r', long, default_value = "operatore")]
    role: Role,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a transit on a known route
    Submit {
        #[arg(long)]
        targa: Plate,
        #[arg(long)]
        tratta: i64,
        #[arg(long, value_parser = parse_timestamp)]
        data_in: DateTime<Utc>,
        #[arg(long, value_parser = parse_timestamp)]
        data_out: DateTime<Utc>,
    },
    /// Send a captured plate image as a gate device
    Image {
        file: PathBuf,
        #[arg(long, value_parser = parse_timestamp)]
        data_in: DateTime<Utc>,
    },
    /// List fines for plates in a time window
    Fines {
        #[arg(long, required = true)]
        targa: Vec<Plate>,
        #[arg(long, value_parser = parse_timestamp)]
        data_in: DateTime<Utc>,
        #[arg(long, value_parser = parse_timestamp)]
        data_out: DateTime<Utc>,
    },
    /// Download the payment document of a fine
    Document {
        id: i64,
        /// Defaults to bollettino_<id>.pdf
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Decode payment codes read from stdin
    Scan,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    timestamp::parse(value).ok_or_else(|| format!("invalid timestamp '{value}'"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ClientError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
    println!("{text}");
    Ok(())
}

async fn execute(client: &Client, command: Command) -> Result<(), ClientError> {
    match command {
        Command::Submit {
            targa,
            tratta,
            data_in,
            data_out,
        } => {
            let request = TransitRequest {
                plate: targa,
                route_id: tratta,
                entry_at: data_in,
                exit_at: data_out,
            };
            request
                .check()
                .map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
            print_json(&client.submit(&request).await?)
        }
        Command::Image { file, data_in } => print_json(&client.submit_image(&file, data_in).await?),
        Command::Fines {
            targa,
            data_in,
            data_out,
        } => {
            if data_out < data_in {
                return Err(ClientError::InvalidArgument(String::from(
                    "--data-out must not precede --data-in",
                )));
            }
            let query = FineQuery {
                plates: targa,
                from: data_in,
                to: data_out,
            };
            print_json(&client.fines(&query).await?)
        }
        Command::Document { id, output } => {
            let pdf = client.document(id).await?;
            let output = output.unwrap_or_else(|| PathBuf::from(format!("bollettino_{id}.pdf")));
            tokio::fs::write(&output, &pdf).await?;
            println!("Saved {} ({} bytes)", output.display(), pdf.len());
            Ok(())
        }
        Command::Scan => {
            for code in scan(tokio::io::stdin()).await? {
                println!(
                    "fine {} plate {} amount {:.2} payment {}",
                    code.fine_id, code.plate, code.amount, code.payment_id
                );
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();

    debug!("Toll server is at {}:{}", args.address, args.port);
    debug!("Acting as {} {}", args.role, args.user_id);

    let client = Client::new(&args.address, args.port, args.user_id, args.role);
    match execute(&client, args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
