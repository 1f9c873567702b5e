use std::sync::Arc;

use teloxide::{prelude::Requester, types::Message, utils::command::BotCommands, Bot};

use crate::steps::Action;
use crate::wizard::{Inbound, InboundBody};
use crate::{schema, BotWizard, HandlerResult};

#[derive(Debug, Clone, BotCommands)]
#[command(rename_rule = "lowercase")]
pub(crate) enum Command {
    #[command(description = "open the main menu.")]
    Start,
    #[command(description = "display help.")]
    Help,
    #[command(description = "open the admin panel.")]
    Admin,
    #[command(description = "compose and broadcast a podcast.")]
    Podcast,
    #[command(description = "cancel the active wizard.")]
    Cancel,
}

pub(crate) async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

pub(crate) async fn admin(bot: Bot, msg: Message, engine: Arc<BotWizard>) -> HandlerResult {
    let inbound = Inbound {
        sender: msg.chat.id.0,
        body: InboundBody::Pressed(Action::AdminPanel.to_string()),
    };
    schema::run_engine(bot, msg.chat.id, &engine, inbound).await
}

pub(crate) async fn podcast(bot: Bot, msg: Message, engine: Arc<BotWizard>) -> HandlerResult {
    let inbound = Inbound {
        sender: msg.chat.id.0,
        body: InboundBody::Pressed(Action::SendPodcast.to_string()),
    };
    schema::run_engine(bot, msg.chat.id, &engine, inbound).await
}

pub(crate) async fn cancel(bot: Bot, msg: Message, engine: Arc<BotWizard>) -> HandlerResult {
    match engine.cancel_all(msg.chat.id.0).await {
        Ok(replies) => {
            schema::deliver_all(&bot, replies).await;
            Ok(())
        }
        Err(e) => schema::report_failure(&bot, msg.chat.id, e).await,
    }
}
