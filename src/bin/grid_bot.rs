//! Grid Trading Bot Binary
//!
//! Runs the grid bot against the paper exchange, driven by a simulated
//! random-walk price.
//!
//! ## Setup
//!
//! 1. Copy `config.example.toml` to `config.toml` and adjust the `[grid]` section.
//!    Any key can be overridden from the environment or a `.env` file:
//!    ```
//!    GRID_BOT__GRID__LEVERAGE=3
//!    GRID_BOT__LOG__LEVEL=debug
//!    ```
//!
//! 2. Run the bot:
//!    ```bash
//!    cargo run --bin grid_bot -- --config config.toml
//!    ```

use std::env;
use std::path::Path;
use std::sync::Arc;

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use perp_grid_bot::config::Settings;
use perp_grid_bot::grid::{GridBot, PaperExchange};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before reading settings so it can override them
    let dotenv = dotenvy::dotenv();

    let args: Vec<String> = env::args().collect();
    let config_path = if args.len() > 2 && args[1] == "--config" {
        args[2].clone()
    } else {
        "config.toml".to_string()
    };
    if !Path::new(&config_path).exists() {
        eprintln!(
            "Config file '{}' not found. Copy config.example.toml to get started.",
            config_path
        );
        std::process::exit(1);
    }

    let settings = Settings::new(&config_path)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.log.level))
        .init();

    match dotenv {
        Ok(path) => info!("Loaded environment from: {}", path.display()),
        Err(_) => info!("No .env file found, using system environment variables"),
    }
    if settings.exchange.api_key.is_some() {
        warn!("Exchange credentials configured but unused: trading on the paper exchange");
    }

    let exchange = Arc::new(PaperExchange::new(
        settings.grid.symbol.clone(),
        settings.paper.initial_price,
    ));
    let bot = GridBot::new(settings.grid, exchange.clone())?;

    let shutdown = CancellationToken::new();
    let walk = exchange.spawn_random_walk(&settings.paper, shutdown.child_token());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        signal_token.cancel();
    });

    let result = bot.run(exchange.as_ref(), shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = walk.await {
        warn!("Price walk task ended abnormally: {}", e);
    }

    if let Err(e) = result {
        error!("Bot execution error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
