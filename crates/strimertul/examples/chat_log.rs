//! Logs Twitch chat, raids and loyalty redeems from a strimertul instance.
//!
//! ```bash
//! RUST_LOG=debug cargo run --package strimertul --example chat_log -- \
//!     --address ws://localhost:4337/ws --password hunter2
//! ```
//!
//! Pass `--greet` to have the bot say hello once connected.

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kilovolt::DEFAULT_ADDRESS;
use strimertul::{Strimertul, StrimertulOptions};

#[derive(Debug, Parser)]
#[command(
    name = "chat_log",
    about = "Prints chat and channel events from a strimertul instance",
    version
)]
struct Cli {
    /// Kilovolt endpoint of the strimertul instance.
    #[arg(long, default_value = DEFAULT_ADDRESS, env = "STRIMERTUL_ADDRESS")]
    address: String,

    /// Password, if the instance requires one.
    #[arg(long, env = "STRIMERTUL_PASSWORD")]
    password: Option<String>,

    /// Ask the streamer to approve this client instead of using a password.
    #[arg(long, conflicts_with = "password")]
    interactive: bool,

    /// Message to send to chat once connected.
    #[arg(long)]
    greet: Option<String>,
}

impl From<Cli> for StrimertulOptions {
    fn from(cli: Cli) -> Self {
        StrimertulOptions {
            address: Some(cli.address),
            password: cli.password,
            interactive: cli.interactive,
            ..StrimertulOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let greet = cli.greet.clone();
    let options = StrimertulOptions::from(cli);
    info!("connecting to {}", options.address.as_deref().unwrap_or(DEFAULT_ADDRESS));

    let client = Strimertul::new(options);
    client
        .connect()
        .await
        .context("could not connect to strimertul")?;

    // ── Listeners ─────────────────────────────────────────────────────────────
    client
        .twitch
        .chat
        .on_message(|msg| info!("<{}> {}", msg.user.display_name, msg.message))
        .await?;
    client
        .twitch
        .event
        .on_raid(|ev| {
            info!(
                "raid from {} with {} viewers",
                ev.event.from_broadcaster_user_name, ev.event.viewers
            )
        })
        .await?;
    client
        .twitch
        .event
        .on_new_follow(|ev| info!("new follower: {}", ev.event.user_name))
        .await?;
    client
        .loyalty
        .on_redeem(|r| info!("{} redeemed {}", r.display_name, r.reward.name))
        .await?;

    if let Some(text) = greet {
        if let Err(e) = client.twitch.chat.write_message(&text).await {
            error!("failed to greet chat: {e}");
        }
    }

    info!("listening; press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("shutting down");
    client.close().await?;
    Ok(())
}
