//! Update routing: normalizes raw Telegram updates into the wizard engine's
//! inbound shape and renders the engine's outbound messages back through the
//! Bot API.

use std::io::Cursor;
use std::sync::Arc;

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::net::Download;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::Requester;
use teloxide::types::{CallbackQuery, ChatId, Message, ParseMode, PhotoSize, Update};
use teloxide::Bot;
use tracing::instrument;

use crate::commands::{self, Command};
use crate::database::connection::{ActivityLog, UserDirectory};
use crate::database::Connection;
use crate::errors::WizardError;
use crate::keyboard;
use crate::onboarding;
use crate::wizard::{Inbound, InboundBody, Outbound};
use crate::{BotWizard, HandlerResult};

pub(crate) fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    use teloxide::dptree::{self, case};

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(onboarding::start::<Connection>))
        .branch(case![Command::Help].endpoint(commands::help))
        .branch(case![Command::Admin].endpoint(commands::admin))
        .branch(case![Command::Podcast].endpoint(commands::podcast))
        .branch(case![Command::Cancel].endpoint(commands::cancel));

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .endpoint(wizard_message);

    dptree::entry()
        .branch(message_handler)
        .branch(Update::filter_callback_query().endpoint(wizard_callback))
}

#[instrument(level = "info", skip_all, fields(chat = msg.chat.id.0))]
async fn wizard_message(
    bot: Bot,
    msg: Message,
    engine: Arc<BotWizard>,
    connection: Arc<Connection>,
) -> HandlerResult {
    let chat = msg.chat.id;
    track_user(connection.as_ref(), &msg).await;

    let body = if let Some(text) = msg.text() {
        InboundBody::Text(text.to_owned())
    } else if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        InboundBody::Image(download_photo(&bot, photo).await?)
    } else {
        // stickers, voice notes and the like mean nothing to the wizards
        return Ok(());
    };

    run_engine(bot, chat, &engine, Inbound { sender: chat.0, body }).await
}

#[instrument(level = "info", skip_all, fields(sender = q.from.id.0))]
async fn wizard_callback(
    bot: Bot,
    q: CallbackQuery,
    engine: Arc<BotWizard>,
    connection: Arc<Connection>,
) -> HandlerResult {
    bot.answer_callback_query(q.id.clone()).await?;
    let Some(data) = q.data.clone() else {
        return Ok(());
    };
    let sender = q.from.id.0 as i64;
    match data.as_str() {
        "copy_ref" | "back_to_main" => onboarding::menu_callback(bot, q, connection).await,
        _ => {
            run_engine(
                bot,
                ChatId(sender),
                &engine,
                Inbound {
                    sender,
                    body: InboundBody::Pressed(data),
                },
            )
            .await
        }
    }
}

/// Runs one update through the engine and delivers whatever came back.
pub(crate) async fn run_engine(
    bot: Bot,
    chat: ChatId,
    engine: &BotWizard,
    inbound: Inbound,
) -> HandlerResult {
    match engine.handle(inbound).await {
        Ok(replies) => {
            deliver_all(&bot, replies).await;
            Ok(())
        }
        Err(e) => report_failure(&bot, chat, e).await,
    }
}

/// Sends every outbound message, best effort: a courtesy notification that
/// bounces must not fail the handler.
pub(crate) async fn deliver_all(bot: &Bot, replies: Vec<Outbound>) {
    for outbound in replies {
        let mut request = bot
            .send_message(ChatId(outbound.to), outbound.text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(markup) = keyboard::render(&outbound.menu) {
            request = request.reply_markup(markup);
        }
        if let Err(e) = request.await {
            log::warn!("failed to deliver reply to {}: {}", outbound.to, e);
        }
    }
}

pub(crate) async fn report_failure(bot: &Bot, chat: ChatId, error: WizardError) -> HandlerResult {
    log::error!("wizard failure in chat {}: {}", chat.0, error);
    bot.send_message(chat, "⚠️ Something went wrong. Please try again.")
        .await?;
    Ok(())
}

/// Every inbound message refreshes the sender's directory row and leaves an
/// activity trace; neither is allowed to fail the update.
async fn track_user(connection: &Connection, msg: &Message) {
    let Some(from) = msg.from() else {
        return;
    };
    let last_name = from.last_name.clone().unwrap_or_default();
    if let Err(e) = connection
        .upsert_miner(
            msg.chat.id.0,
            &from.first_name,
            &last_name,
            &onboarding::new_auth_key(),
        )
        .await
    {
        log::warn!("failed to upsert user {}: {}", msg.chat.id.0, e);
        return;
    }
    if let Err(e) = connection.log_activity(msg.chat.id.0, "message_received").await {
        log::warn!("failed to log activity of {}: {}", msg.chat.id.0, e);
    }
}

async fn download_photo(
    bot: &Bot,
    photo: &PhotoSize,
) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
    let file = bot.get_file(photo.file.id.clone()).await?;
    let mut buffer = Cursor::new(Vec::new());
    bot.download_file(&file.path, &mut buffer).await?;
    Ok(buffer.into_inner())
}
