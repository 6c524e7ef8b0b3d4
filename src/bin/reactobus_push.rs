//! reactobus-push: send test envelopes to a pull input
//!
//! ## Usage
//! ```text
//! reactobus-push tcp://localhost:5555 org.reactobus.test 10
//! ```

use bytes::Bytes;
use clap::Parser;
use tracing::debug;

use reactobus::envelope::now_timestamp;
use reactobus::utils::bootstrap::init_cli_tracing;
use reactobus::{Context, Envelope};

#[derive(Parser)]
#[command(name = "reactobus-push")]
#[command(about = "Push numbered messages to a ReactOBus input")]
#[command(version)]
struct Cli {
    /// Input address, e.g. tcp://localhost:5555
    url: String,
    /// Message topic
    topic: String,
    /// Number of messages to send
    count: u64,
}

fn current_user() -> String {
    #[cfg(unix)]
    {
        use nix::unistd::{Uid, User};

        if let Ok(Some(user)) = User::from_uid(Uid::effective()) {
            return user.name;
        }
    }
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_cli_tracing();

    let ctx = Context::new();
    let sink = ctx.connect_push(&cli.url).await?;
    let username = current_user();

    for i in 0..cli.count {
        let payload = serde_json::json!({ "id": i }).to_string();
        let envelope = Envelope::new(
            &cli.topic,
            uuid::Uuid::new_v4().to_string(),
            now_timestamp(),
            &username,
            Bytes::from(payload),
        );
        sink.send(envelope.encode()).await?;
        debug!(id = i, "Sent");
    }

    println!("Sent {} message(s) to {}", cli.count, cli.url);
    Ok(())
}
