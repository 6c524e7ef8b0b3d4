//! reactobus-sub: print every message published by an output
//!
//! ## Usage
//! ```text
//! reactobus-sub tcp://localhost:5556
//! ```

use clap::Parser;

use reactobus::transport::TransportError;
use reactobus::utils::bootstrap::init_cli_tracing;
use reactobus::{Context, Envelope};

#[derive(Parser)]
#[command(name = "reactobus-sub")]
#[command(about = "Subscribe to a ReactOBus output and print messages")]
#[command(version)]
struct Cli {
    /// Output address, e.g. tcp://localhost:5556
    url: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_cli_tracing();

    let ctx = Context::new();
    let mut source = ctx.connect_sub(&cli.url).await?;

    loop {
        let frames = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = source.recv() => match received {
                Ok(frames) => frames,
                Err(TransportError::Closed) => break,
                Err(e) => return Err(e.into()),
            },
        };

        match Envelope::decode(&frames) {
            Ok(envelope) => println!(
                "{} {} {} {} {}",
                envelope.timestamp(),
                envelope.topic(),
                envelope.uuid(),
                envelope.username(),
                String::from_utf8_lossy(envelope.payload())
            ),
            Err(_) => {
                let parts: Vec<_> = frames.iter().map(|f| String::from_utf8_lossy(f)).collect();
                println!("{}", parts.join(" "));
            }
        }
    }
    Ok(())
}
