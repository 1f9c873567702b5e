//! Podcast fan-out. One outbound message per resolved recipient, one attempt
//! each; a failed send is logged with its recipient and error detail and the
//! run continues. Callers only ever see the aggregate tally.

use teloxide::payloads::{SendMessageSetters, SendPhotoSetters};
use teloxide::prelude::Requester;
use teloxide::types::{ChatId, InputFile, ParseMode};
use teloxide::Bot;
use url::Url;

use crate::database::models::LinkButton;
use crate::errors::SendError;
use crate::keyboard;

/// Outbound messaging transport, one method per message shape.
pub(crate) trait Messenger {
    async fn send_text(
        &self,
        recipient: i64,
        text: &str,
        button: Option<&LinkButton>,
    ) -> Result<(), SendError>;

    async fn send_image(
        &self,
        recipient: i64,
        image_url: &str,
        caption: &str,
        button: Option<&LinkButton>,
    ) -> Result<(), SendError>;
}

/// What one broadcast run sends, assembled from a confirmed draft.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PodcastMessage {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub button: Option<LinkButton>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BroadcastReport {
    pub attempted: u32,
    pub failed: u32,
}

impl BroadcastReport {
    pub(crate) fn delivered(&self) -> u32 {
        self.attempted - self.failed
    }
}

/// Runs one broadcast. Per-recipient outcomes are collected first and only
/// then folded into the report, so isolation is the function's contract
/// rather than a side effect of catch-and-continue.
pub(crate) async fn dispatch<M: Messenger>(
    transport: &M,
    message: &PodcastMessage,
    recipients: &[i64],
) -> BroadcastReport {
    let text = format!("<b>{}</b>\n\n{}", message.title, message.body);

    let mut outcomes: Vec<(i64, Result<(), SendError>)> = Vec::with_capacity(recipients.len());
    for &recipient in recipients {
        let sent = match &message.image_url {
            Some(url) => {
                transport
                    .send_image(recipient, url, &text, message.button.as_ref())
                    .await
            }
            None => transport.send_text(recipient, &text, message.button.as_ref()).await,
        };
        if let Err(e) = &sent {
            log::warn!("podcast delivery to {} failed: {}", recipient, e);
        }
        outcomes.push((recipient, sent));
    }

    outcomes
        .iter()
        .fold(BroadcastReport::default(), |mut report, (_, outcome)| {
            report.attempted += 1;
            if outcome.is_err() {
                report.failed += 1;
            }
            report
        })
}

/// Production transport backed by the Telegram Bot API.
#[derive(Clone)]
pub(crate) struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub(crate) fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

impl Messenger for TelegramMessenger {
    async fn send_text(
        &self,
        recipient: i64,
        text: &str,
        button: Option<&LinkButton>,
    ) -> Result<(), SendError> {
        let mut request = self
            .bot
            .send_message(ChatId(recipient), text)
            .parse_mode(ParseMode::Html);
        if let Some(button) = button {
            request = request.reply_markup(keyboard::link_button(button));
        }
        request.await.map(|_| ()).map_err(|e| SendError(e.to_string()))
    }

    async fn send_image(
        &self,
        recipient: i64,
        image_url: &str,
        caption: &str,
        button: Option<&LinkButton>,
    ) -> Result<(), SendError> {
        let url = Url::parse(image_url).map_err(|e| SendError(e.to_string()))?;
        let mut request = self
            .bot
            .send_photo(ChatId(recipient), InputFile::url(url))
            .caption(caption)
            .parse_mode(ParseMode::Html);
        if let Some(button) = button {
            request = request.reply_markup(keyboard::link_button(button));
        }
        request.await.map(|_| ()).map_err(|e| SendError(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Recorded {
        pub recipient: i64,
        pub text: String,
        pub image_url: Option<String>,
        pub button: Option<LinkButton>,
    }

    /// In-memory transport: records every attempt, fails for listed ids.
    #[derive(Default)]
    pub(crate) struct RecordingMessenger {
        pub sent: Mutex<Vec<Recorded>>,
        pub failing: HashSet<i64>,
    }

    impl RecordingMessenger {
        pub(crate) fn failing_for(ids: impl IntoIterator<Item = i64>) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failing: ids.into_iter().collect(),
            }
        }
    }

    impl Messenger for RecordingMessenger {
        async fn send_text(
            &self,
            recipient: i64,
            text: &str,
            button: Option<&LinkButton>,
        ) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(Recorded {
                recipient,
                text: text.to_owned(),
                image_url: None,
                button: button.cloned(),
            });
            if self.failing.contains(&recipient) {
                Err(SendError("recipient unreachable".into()))
            } else {
                Ok(())
            }
        }

        async fn send_image(
            &self,
            recipient: i64,
            image_url: &str,
            caption: &str,
            button: Option<&LinkButton>,
        ) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(Recorded {
                recipient,
                text: caption.to_owned(),
                image_url: Some(image_url.to_owned()),
                button: button.cloned(),
            });
            if self.failing.contains(&recipient) {
                Err(SendError("recipient unreachable".into()))
            } else {
                Ok(())
            }
        }
    }

    fn message() -> PodcastMessage {
        PodcastMessage {
            title: "Update".into(),
            body: "New feature live".into(),
            image_url: None,
            button: None,
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_run() {
        let transport = RecordingMessenger::failing_for([3]);
        let recipients = [1, 2, 3, 4, 5];
        let report = dispatch(&transport, &message(), &recipients).await;

        assert_eq!(report.attempted, 5);
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered(), 4);
        // every recipient got exactly one attempt, in order
        let sent = transport.sent.lock().unwrap();
        let attempted: Vec<i64> = sent.iter().map(|r| r.recipient).collect();
        assert_eq!(attempted, recipients);
    }

    #[tokio::test]
    async fn image_drafts_go_out_as_captioned_photos() {
        let transport = RecordingMessenger::default();
        let mut with_image = message();
        with_image.image_url = Some("https://cdn.example/p/1.jpg".into());
        dispatch(&transport, &with_image, &[10]).await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].image_url.as_deref(), Some("https://cdn.example/p/1.jpg"));
        assert_eq!(sent[0].text, "<b>Update</b>\n\nNew feature live");
    }

    #[tokio::test]
    async fn button_rides_along_on_every_send() {
        let transport = RecordingMessenger::default();
        let mut with_button = message();
        with_button.button = Some(LinkButton {
            label: "Open".into(),
            url: "https://app.example/x".parse().unwrap(),
        });
        dispatch(&transport, &with_button, &[1, 2]).await;

        let sent = transport.sent.lock().unwrap();
        assert!(sent.iter().all(|r| r.button.as_ref().is_some_and(|b| b.label == "Open")));
    }

    #[tokio::test]
    async fn empty_recipient_set_reports_zero() {
        let transport = RecordingMessenger::default();
        let report = dispatch(&transport, &message(), &[]).await;
        assert_eq!(report, BroadcastReport::default());
    }
}
