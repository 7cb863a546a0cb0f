//! Example: Reading Sensor Frames From a TCP Bridge
//!
//! This example connects to a serial-to-TCP bridge in front of the sensor
//! board, powers the board on and prints every accepted reading.
//!
//! Run with: `cargo run --example read_link -- <HOST:PORT>`

use std::env;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use time::UtcOffset;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio_util::codec::Framed;

use indicator_core::{
    Command, CurrentSnapshot, Dispatch, Dispatcher, EventDispatcher, FrameCodec, HistoryStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let addr = if args.len() > 1 {
        &args[1]
    } else {
        eprintln!("Usage: {} <HOST:PORT>", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} 192.168.1.50:4001", args[0]);
        std::process::exit(1);
    };

    println!("Connecting to {}...", addr);
    let stream = TcpStream::connect(addr.as_str()).await?;
    let mut link = Framed::new(stream, FrameCodec::new());
    link.send(Command::PowerOn.to_payload()).await?;
    println!("Connected, waiting for readings (Ctrl+C to stop)");
    println!();

    let dispatcher = Dispatcher::new(
        Arc::new(Mutex::new(HistoryStore::new(UtcOffset::UTC))),
        Arc::new(RwLock::new(CurrentSnapshot::default())),
        EventDispatcher::default(),
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            frame = link.next() => {
                let Some(frame) = frame else {
                    println!("Bridge closed the connection");
                    break;
                };
                if let Dispatch::Accepted(sample) = dispatcher.handle_frame(&frame?).await {
                    println!(
                        "  {:<22} {:>10.2} {}",
                        sample.quantity.to_string(),
                        sample.value,
                        sample.quantity.unit()
                    );
                }
            }
        }
    }

    link.send(Command::Shutdown.to_payload()).await?;
    println!("Dropped {} undecodable frames", link.codec().dropped());
    Ok(())
}
