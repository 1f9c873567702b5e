//! Static wizard step registry: for every step, the input shape it accepts,
//! the validation rule, the follow-up step, and the prompt to issue. Adding a
//! step is a data change here, not a new conditional in the engine.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::assets::{self, StagedAsset, MAX_IMAGE_BYTES};
use crate::targets::Target;

/// The two wizard families. An owner may hold one active session of each
/// kind at the same time; they never share state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum WizardKind {
    AdminAction,
    Podcast,
}

/// Every step of every wizard. The strum round-trip is what gets persisted
/// in the session row; a stored name that no longer parses means the session
/// is stale and gets discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum Step {
    // podcast composition chain
    Target,
    SpecificId,
    Image,
    ImageUpload,
    Title,
    Body,
    Button,
    ButtonText,
    ButtonUrl,
    Confirm,
    // single-input admin actions
    AddAdminId,
    RemoveAdminId,
    EditConfig,
}

impl Step {
    pub(crate) fn kind(self) -> WizardKind {
        match self {
            Step::AddAdminId | Step::RemoveAdminId | Step::EditConfig => WizardKind::AdminAction,
            _ => WizardKind::Podcast,
        }
    }
}

/// Button-press identifiers carried in callback data. Unknown data is a
/// malformed update and is acknowledged without touching any session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum Action {
    AdminPanel,
    SendPodcast,
    AddAdmin,
    RemoveAdmin,
    UpdateConfig,
    Stats,
    TargetAll,
    TargetDay,
    TargetWeek,
    TargetMonth,
    TargetUser,
    ChoiceYes,
    ChoiceNo,
    PodcastConfirm,
    PodcastCancel,
}

/// Runtime-editable settings accepted by the config wizard, in the order the
/// prompt shows them.
pub(crate) const CONFIG_KEYS: [&str; 3] = ["mini_app_url", "admin_web_url", "welcome_image"];

/// Input shape a step accepts.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Expect {
    Choice(&'static [Action]),
    Text(TextRule),
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextRule {
    NonEmpty,
    Digits,
    Link,
    ConfigPairs,
}

/// Normalized step input, after the transport layer stripped Telegram out of
/// the update.
#[derive(Debug, Clone)]
pub(crate) enum StepInput {
    Text(String),
    Image(Vec<u8>),
    Pressed(Action),
}

/// A validated value extracted from step input, ready to merge into the
/// wizard payload.
#[derive(Debug, Clone)]
pub(crate) enum StepValue {
    Choice(Action),
    Text(String),
    Id(i64),
    Link(Url),
    Settings(Vec<(String, String)>),
    Photo(Vec<u8>),
}

/// The podcast-session payload. A field is `Some` only once its owning step
/// validated input; later steps never look at an unset field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct PodcastDraft {
    pub target: Option<Target>,
    pub image: Option<StagedAsset>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub button_label: Option<String>,
    pub button_url: Option<Url>,
}

/// Reply keyboard to attach to an outbound prompt; rendered into Telegram
/// markup by the keyboard module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Menu {
    None,
    ForceReply,
    Targets,
    YesNoCancel,
    CancelOnly,
    Confirm,
    AdminPanel { primary: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Prompt {
    pub text: String,
    pub menu: Menu,
}

pub(crate) fn expected(step: Step) -> Expect {
    match step {
        Step::Target => Expect::Choice(&[
            Action::TargetAll,
            Action::TargetDay,
            Action::TargetWeek,
            Action::TargetMonth,
            Action::TargetUser,
        ]),
        Step::SpecificId | Step::AddAdminId | Step::RemoveAdminId => Expect::Text(TextRule::Digits),
        Step::Image | Step::Button => Expect::Choice(&[Action::ChoiceYes, Action::ChoiceNo]),
        Step::ImageUpload => Expect::Image,
        Step::Title | Step::Body | Step::ButtonText => Expect::Text(TextRule::NonEmpty),
        Step::ButtonUrl => Expect::Text(TextRule::Link),
        Step::Confirm => Expect::Choice(&[Action::PodcastConfirm]),
        Step::EditConfig => Expect::Text(TextRule::ConfigPairs),
    }
}

/// Checks one input against one step's rule. `Err(())` means re-prompt the
/// same step; nothing is extracted and nothing advances.
pub(crate) fn validate(step: Step, input: &StepInput) -> Result<StepValue, ()> {
    match (expected(step), input) {
        (Expect::Choice(allowed), StepInput::Pressed(action)) => {
            if allowed.contains(action) {
                Ok(StepValue::Choice(*action))
            } else {
                Err(())
            }
        }
        (Expect::Text(rule), StepInput::Text(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(());
            }
            match rule {
                TextRule::NonEmpty => Ok(StepValue::Text(trimmed.to_owned())),
                TextRule::Digits => {
                    if trimmed.chars().all(|c| c.is_ascii_digit()) {
                        trimmed.parse::<i64>().map(StepValue::Id).map_err(|_| ())
                    } else {
                        Err(())
                    }
                }
                TextRule::Link => parse_link(trimmed).map(StepValue::Link).ok_or(()),
                TextRule::ConfigPairs => parse_config_pairs(trimmed).map(StepValue::Settings),
            }
        }
        (Expect::Image, StepInput::Image(bytes)) => {
            if bytes.len() <= MAX_IMAGE_BYTES && assets::sniff_format(bytes).is_some() {
                Ok(StepValue::Photo(bytes.clone()))
            } else {
                Err(())
            }
        }
        _ => Err(()),
    }
}

fn parse_link(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// The config grammar: whitespace-delimited `key=value` tokens, each key one
/// of [`CONFIG_KEYS`], every key present exactly once, every value a URL.
fn parse_config_pairs(raw: &str) -> Result<Vec<(String, String)>, ()> {
    let mut pairs = Vec::with_capacity(CONFIG_KEYS.len());
    for token in raw.split_whitespace() {
        let (key, value) = token.split_once('=').ok_or(())?;
        if !CONFIG_KEYS.contains(&key) || pairs.iter().any(|(k, _)| k == key) {
            return Err(());
        }
        if parse_link(value).is_none() {
            return Err(());
        }
        pairs.push((key.to_owned(), value.to_owned()));
    }
    if pairs.len() == CONFIG_KEYS.len() {
        Ok(pairs)
    } else {
        Err(())
    }
}

/// Transition table. `None` marks a terminal step whose completion is a
/// commit, handled by the engine.
pub(crate) fn next(step: Step, value: &StepValue) -> Option<Step> {
    match (step, value) {
        (Step::Target, StepValue::Choice(Action::TargetUser)) => Some(Step::SpecificId),
        (Step::Target, _) => Some(Step::Image),
        (Step::SpecificId, _) => Some(Step::Image),
        (Step::Image, StepValue::Choice(Action::ChoiceYes)) => Some(Step::ImageUpload),
        (Step::Image, _) => Some(Step::Title),
        (Step::ImageUpload, _) => Some(Step::Title),
        (Step::Title, _) => Some(Step::Body),
        (Step::Body, _) => Some(Step::Button),
        (Step::Button, StepValue::Choice(Action::ChoiceYes)) => Some(Step::ButtonText),
        (Step::Button, _) => Some(Step::Confirm),
        (Step::ButtonText, _) => Some(Step::ButtonUrl),
        (Step::ButtonUrl, _) => Some(Step::Confirm),
        (Step::Confirm, _) => None,
        (Step::AddAdminId | Step::RemoveAdminId | Step::EditConfig, _) => None,
    }
}

pub(crate) fn prompt(step: Step, draft: &PodcastDraft) -> Prompt {
    let (text, menu) = match step {
        Step::Target => (
            "🎙 <b>New podcast</b>\n\nWho should receive it?".to_owned(),
            Menu::Targets,
        ),
        Step::SpecificId => (
            "💬 Enter the recipient's numeric id:".to_owned(),
            Menu::ForceReply,
        ),
        Step::Image => ("📷 <b>Attach an image?</b>".to_owned(), Menu::YesNoCancel),
        Step::ImageUpload => (
            "📷 Send the podcast image (JPEG or PNG, up to 5 MB):".to_owned(),
            Menu::CancelOnly,
        ),
        Step::Title => ("📝 Enter the podcast <b>title</b>:".to_owned(), Menu::ForceReply),
        Step::Body => ("📝 Enter the podcast <b>body</b>:".to_owned(), Menu::ForceReply),
        Step::Button => ("📌 <b>Add a link button?</b>".to_owned(), Menu::YesNoCancel),
        Step::ButtonText => ("📌 Enter the button label:".to_owned(), Menu::ForceReply),
        Step::ButtonUrl => ("🔗 Enter the button URL:".to_owned(), Menu::ForceReply),
        Step::Confirm => (summary(draft), Menu::Confirm),
        Step::AddAdminId => (
            "➕ Enter the new delegated admin's numeric id:".to_owned(),
            Menu::ForceReply,
        ),
        Step::RemoveAdminId => (
            "➖ Enter the numeric id of the delegated admin to remove:".to_owned(),
            Menu::ForceReply,
        ),
        Step::EditConfig => (
            format!(
                "⚙️ Send the new settings in one message:\n{}=https://… {}=https://… {}=https://…",
                CONFIG_KEYS[0], CONFIG_KEYS[1], CONFIG_KEYS[2]
            ),
            Menu::ForceReply,
        ),
    };
    Prompt { text, menu }
}

fn summary(draft: &PodcastDraft) -> String {
    let mut text = String::from("📢 <b>Podcast preview</b>\n\n");
    text.push_str(&format!(
        "<b>Title:</b> {}\n",
        draft.title.as_deref().unwrap_or("—")
    ));
    text.push_str(&format!(
        "<b>Body:</b> {}\n",
        draft.body.as_deref().unwrap_or("—")
    ));
    let audience = draft
        .target
        .as_ref()
        .map(Target::describe)
        .unwrap_or_else(|| "—".to_owned());
    text.push_str(&format!("<b>Audience:</b> {}\n", audience));
    text.push_str(&format!(
        "<b>Image:</b> {}\n",
        if draft.image.is_some() { "yes" } else { "no" }
    ));
    match (&draft.button_label, &draft.button_url) {
        (Some(label), Some(url)) => {
            text.push_str(&format!("<b>Button:</b> {} → {}\n", label, url));
        }
        _ => text.push_str("<b>Button:</b> none\n"),
    }
    text.push_str("\nSend it?");
    text
}
