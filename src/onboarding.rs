//! `/start` onboarding and the main-menu callbacks. The bot is the mining
//! app's front door: every `/start` upserts the user row, hands out the auth
//! key the mini app authenticates with, and credits the referrer when a
//! referral payload is present.

use std::sync::Arc;

use teloxide::payloads::{SendMessageSetters, SendPhotoSetters};
use teloxide::prelude::Requester;
use teloxide::types::{CallbackQuery, ChatId, InputFile, Message, ParseMode};
use teloxide::Bot;
use tracing::instrument;
use url::Url;
use uuid::Uuid;

use crate::database::connection::{ActivityLog, AdminDirectory, ConfigStore, UserDirectory};
use crate::database::models::Miner;
use crate::keyboard;
use crate::HandlerResult;

pub(crate) const BRAND: &str = "OreTap";
pub(crate) const DEFAULT_MINI_APP_URL: &str = "https://oretap.example.com/app/";
const DEFAULT_WELCOME_IMAGE: &str = "https://oretap.example.com/static/welcome.jpg";

pub(crate) fn new_auth_key() -> String {
    Uuid::new_v4().simple().to_string()
}

#[instrument(level = "info", skip(bot, connection, msg), fields(chat = msg.chat.id.0))]
pub(crate) async fn start<Db>(bot: Bot, msg: Message, connection: Arc<Db>) -> HandlerResult
where
    Db: UserDirectory + AdminDirectory + ConfigStore + ActivityLog,
{
    let chat = msg.chat.id;
    let from = msg.from();
    let first_name = from.map(|u| u.first_name.clone()).unwrap_or_default();
    let last_name = from.and_then(|u| u.last_name.clone()).unwrap_or_default();

    let miner = connection
        .upsert_miner(chat.0, &first_name, &last_name, &new_auth_key())
        .await?;
    if let Err(e) = connection.log_activity(chat.0, "start").await {
        log::warn!("failed to log start activity of {}: {}", chat.0, e);
    }

    // `/start <referrer-id>` deep links credit the referrer, first contact only
    let referrer = msg
        .text()
        .and_then(|t| t.split_whitespace().nth(1))
        .filter(|payload| !payload.is_empty() && payload.chars().all(|c| c.is_ascii_digit()))
        .filter(|_| miner.is_new())
        .map(str::to_owned);
    if let Some(referrer) = &referrer {
        log::info!("{} joined via referral from {}", chat.0, referrer);
    }

    let markup = main_menu_markup(&bot, connection.as_ref(), &miner, referrer.as_deref()).await?;
    let caption = if miner.is_new() {
        format!("🎉 Welcome to {}!\n\nUse the buttons below to get going:", BRAND)
    } else {
        format!("✨ Welcome back to {}!\n\nUse the buttons below:", BRAND)
    };

    let welcome_image = connection
        .setting("welcome_image")
        .await?
        .unwrap_or_else(|| DEFAULT_WELCOME_IMAGE.to_owned());
    let mut delivered = false;
    if let Some(photo) = Url::parse(&welcome_image).ok().map(InputFile::url) {
        match bot
            .send_photo(chat, photo)
            .caption(caption.clone())
            .parse_mode(ParseMode::Html)
            .reply_markup(markup.clone())
            .await
        {
            Ok(_) => delivered = true,
            // a broken welcome image must not block onboarding
            Err(e) => log::warn!("welcome photo failed for {}: {}", chat.0, e),
        }
    }
    if !delivered {
        bot.send_message(chat, caption)
            .parse_mode(ParseMode::Html)
            .reply_markup(markup)
            .await?;
    }

    Ok(())
}

/// `copy_ref` and `back_to_main` presses from the main menu.
pub(crate) async fn menu_callback<Db>(
    bot: Bot,
    q: CallbackQuery,
    connection: Arc<Db>,
) -> HandlerResult
where
    Db: UserDirectory + AdminDirectory + ConfigStore,
{
    let chat = ChatId(q.from.id.0 as i64);
    match q.data.as_deref() {
        Some("copy_ref") => {
            let me = bot.get_me().await?;
            bot.send_message(
                chat,
                format!(
                    "✅ Your referral link:\nhttps://t.me/{}?start={}",
                    me.username(),
                    chat.0
                ),
            )
            .await?;
        }
        Some("back_to_main") => {
            let last_name = q.from.last_name.clone().unwrap_or_default();
            let miner = connection
                .upsert_miner(chat.0, &q.from.first_name, &last_name, &new_auth_key())
                .await?;
            let markup = main_menu_markup(&bot, connection.as_ref(), &miner, None).await?;
            bot.send_message(chat, "🔻 Main menu:")
                .reply_markup(markup)
                .await?;
        }
        _ => {}
    }
    Ok(())
}

async fn main_menu_markup<Db>(
    bot: &Bot,
    connection: &Db,
    miner: &Miner,
    referrer: Option<&str>,
) -> Result<teloxide::types::InlineKeyboardMarkup, Box<dyn std::error::Error + Send + Sync>>
where
    Db: AdminDirectory + ConfigStore,
{
    let mini_app = connection
        .setting("mini_app_url")
        .await?
        .unwrap_or_else(|| DEFAULT_MINI_APP_URL.to_owned());
    let app_url = app_link(&mini_app, miner, referrer);
    let me = bot.get_me().await?;
    let is_admin = connection.role(miner.user_id).await?.is_some();
    Ok(keyboard::main_menu(miner.user_id, app_url, me.username(), is_admin))
}

fn app_link(mini_app: &str, miner: &Miner, referrer: Option<&str>) -> Url {
    let mut url = Url::parse(mini_app).unwrap_or_else(|_| {
        log::warn!("configured mini_app_url '{}' is invalid; using default", mini_app);
        Url::parse(DEFAULT_MINI_APP_URL).expect("default mini app URL is valid")
    });
    url.query_pairs_mut()
        .append_pair("id", &miner.user_id.to_string())
        .append_pair("authkey", &miner.auth_key);
    if let Some(referrer) = referrer {
        url.query_pairs_mut().append_pair("ref", referrer);
    }
    url
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn miner(id: i64) -> Miner {
        let now = Utc::now();
        Miner {
            user_id: id,
            first_name: "Ada".into(),
            last_name: String::new(),
            auth_key: "c0ffee".into(),
            joined_at: now,
            last_active: now,
        }
    }

    #[test]
    fn app_link_carries_identity_and_referrer() {
        let url = app_link("https://app.example/play", &miner(42), Some("77"));
        assert_eq!(url.host_str(), Some("app.example"));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("id".into(), "42".into())));
        assert!(pairs.contains(&("authkey".into(), "c0ffee".into())));
        assert!(pairs.contains(&("ref".into(), "77".into())));
    }

    #[test]
    fn bad_configured_url_falls_back_to_the_default() {
        let url = app_link("not a url", &miner(1), None);
        assert!(url.as_str().starts_with(DEFAULT_MINI_APP_URL));
    }
}
