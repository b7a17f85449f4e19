pub mod config;
pub mod conversation;
pub mod logging;
pub mod providers;
pub mod repl;
pub mod session;
pub mod streamer;

use anyhow::{Context, Result};
use reqwest::Client;
use std::env;
use tracing::info;

use config::Config;
use conversation::Conversation;
use repl::{StdoutSink, run_repl};
use session::run_cycle;
use streamer::GeminiStreamer;

pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    // Credential check happens before the HTTP client exists, so a missing
    // key can never reach the network.
    let cfg = Config::from_env()?;
    info!(
        model = %cfg.model,
        api_base_url = %cfg.api_base_url,
        "loaded runtime configuration"
    );

    let client = Client::builder()
        .build()
        .context("Failed to initialize HTTP client")?;

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        run_repl(&client, &cfg).await
    } else {
        let task = args.join(" ");
        let streamer = GeminiStreamer::new(&client, &cfg);
        let mut conversation = Conversation::new();
        run_cycle(&mut conversation, &streamer, &mut StdoutSink, &task).await?;
        Ok(())
    }
}
