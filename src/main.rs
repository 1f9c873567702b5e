use std::net::SocketAddr;
use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::error_handlers::IgnoringErrorHandlerSafe;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks::{self, Options};
use tracing::level_filters;
use tracing_subscriber::fmt::format::FmtSpan;
use url::Url;

mod assets;
mod broadcast;
mod commands;
mod database;
mod errors;
mod keyboard;
mod onboarding;
mod schema;
mod steps;
mod targets;
mod wizard;

use assets::FsAssetStore;
use broadcast::TelegramMessenger;
use database::Connection;
use wizard::Wizard;

pub(crate) type BotWizard = Wizard<Connection, TelegramMessenger, FsAssetStore>;
pub(crate) type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let rust_log = std::env::var("LOG_LEVEL").unwrap_or("info".into());
    tracing_subscriber::fmt()
        .with_max_level(level_filters::LevelFilter::from_level(
            rust_log.parse().expect("LOG_LEVEL can't be parsed."),
        ))
        .json()
        .with_span_events(FmtSpan::ENTER)
        .log_internal_errors(true)
        .with_ansi(true)
        .with_line_number(true)
        .with_target(false)
        .init();

    let connection_string = std::env::var("DATABASE_URL").expect("DATABASE_URL should be set.");
    let connection =
        Arc::new(Connection::connect(std::borrow::Cow::Owned(connection_string)).await);

    let primary_admin = std::env::var("PRIMARY_ADMIN_ID")
        .expect("PRIMARY_ADMIN_ID should be set.")
        .parse::<i64>()
        .expect("PRIMARY_ADMIN_ID must be a numeric account id.");
    connection
        .ensure_schema(primary_admin)
        .await
        .expect("Schema setup failed.");

    let teloxide_token = std::env::var("TELOXIDE_TOKEN").expect("TELOXIDE_TOKEN should be set.");
    let bot = Bot::new(teloxide_token);
    log::info!("Starting minerbot...");

    let asset_dir = std::env::var("ASSET_DIR").unwrap_or("assets".into());
    let asset_base_url =
        std::env::var("ASSET_BASE_URL").unwrap_or("http://localhost/assets".into());
    let engine = Arc::new(Wizard::new(
        connection.clone(),
        TelegramMessenger::new(bot.clone()),
        FsAssetStore::new(asset_dir, asset_base_url),
    ));

    let webhook_url = std::env::var("WEBHOOK_URL").map(|d| d.parse::<Url>().expect("WEBHOOK_URL can't be parsed.")).ok();
    let webhook_addr = std::env::var("WEBHOOK_ADDR").map(|d| d.parse::<SocketAddr>().expect("WEBHOOK_ADDR can't be parsed.")).ok();

    let mut dispatcher = Dispatcher::builder(bot.clone(), schema::schema())
        .dependencies(dptree::deps![engine, connection])
        .enable_ctrlc_handler()
        .build();

    if let (Some(webhook_url), Some(webhook_addr)) = (webhook_url, webhook_addr) {
        let listener = webhooks::axum(bot, Options::new(webhook_addr, webhook_url))
            .await
            .expect("Failed to build a listener.");
        dispatcher
            .dispatch_with_listener(listener, Arc::new(IgnoringErrorHandlerSafe))
            .await
    } else {
        dispatcher.dispatch().await
    }
}
