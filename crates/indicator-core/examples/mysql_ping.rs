//! Example: Checking an Export Target
//!
//! This example connects to a MySQL or MariaDB server with the same client
//! the exporter uses and runs a trivial query.
//!
//! Run with: `cargo run --example mysql_ping -- <HOST> <USER> <PASSWORD> [DATABASE]`

use std::env;

use indicator_core::{ConnectOptions, MysqlClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <HOST> <USER> <PASSWORD> [DATABASE]", args[0]);
        std::process::exit(1);
    }

    let mut options = ConnectOptions::new(&args[1], 3306, &args[2], &args[3]);
    if let Some(database) = args.get(4) {
        options = options.database(database);
    }

    println!("Connecting to {}:3306...", args[1]);
    let mut client = MysqlClient::connect(&options).await?;
    println!("Connected to {}", client.server_version());

    client.query("SELECT 1").await?;
    println!("Query OK");

    client.close().await;
    Ok(())
}
