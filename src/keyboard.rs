use teloxide::types::{ForceReply, InlineKeyboardButton, InlineKeyboardMarkup, ReplyMarkup};
use url::Url;

use crate::database::models::LinkButton;
use crate::steps::{Action, Menu};

fn callback(text: &str, action: Action) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, action.to_string())
}

pub(crate) fn render(menu: &Menu) -> Option<ReplyMarkup> {
    match menu {
        Menu::None => None,
        Menu::ForceReply => Some(ReplyMarkup::ForceReply(ForceReply::new())),
        Menu::Targets => Some(ReplyMarkup::InlineKeyboard(target_keyboard())),
        Menu::YesNoCancel => Some(ReplyMarkup::InlineKeyboard(yes_no_cancel_keyboard())),
        Menu::CancelOnly => Some(ReplyMarkup::InlineKeyboard(cancel_keyboard())),
        Menu::Confirm => Some(ReplyMarkup::InlineKeyboard(confirm_keyboard())),
        Menu::AdminPanel { primary } => {
            Some(ReplyMarkup::InlineKeyboard(admin_panel_keyboard(*primary)))
        }
    }
}

pub(crate) fn target_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![callback("👥 All users", Action::TargetAll)],
        vec![callback("📅 Active in the last day", Action::TargetDay)],
        vec![callback("📅 Active in the last week", Action::TargetWeek)],
        vec![callback("📅 Active in the last month", Action::TargetMonth)],
        vec![callback("👤 A specific user", Action::TargetUser)],
        vec![callback("❌ Cancel", Action::PodcastCancel)],
    ])
}

pub(crate) fn yes_no_cancel_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![callback("✅ Yes", Action::ChoiceYes)],
        vec![callback("❌ No", Action::ChoiceNo)],
        vec![callback("❌ Cancel", Action::PodcastCancel)],
    ])
}

pub(crate) fn cancel_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![callback("❌ Cancel", Action::PodcastCancel)]])
}

pub(crate) fn confirm_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![callback("✅ Send it", Action::PodcastConfirm)],
        vec![callback("❌ Cancel", Action::PodcastCancel)],
    ])
}

pub(crate) fn admin_panel_keyboard(primary: bool) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    if primary {
        rows.push(vec![callback("➕ Add delegated admin", Action::AddAdmin)]);
        rows.push(vec![callback("➖ Remove delegated admin", Action::RemoveAdmin)]);
        rows.push(vec![callback("⚙️ Update configuration", Action::UpdateConfig)]);
    }
    rows.push(vec![callback("📊 Statistics", Action::Stats)]);
    rows.push(vec![InlineKeyboardButton::callback("🔙 Back", "back_to_main")]);
    InlineKeyboardMarkup::new(rows)
}

/// One-row markup for the optional URL button under a broadcast message.
pub(crate) fn link_button(button: &LinkButton) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
        button.label.clone(),
        button.url.clone(),
    )]])
}

pub(crate) fn main_menu(
    user_id: i64,
    app_url: Url,
    bot_username: &str,
    is_admin: bool,
) -> InlineKeyboardMarkup {
    let share = format!(
        "Join me in the mine! ⛏\nhttps://t.me/{}?start={}",
        bot_username, user_id
    );
    let mut rows = vec![
        vec![InlineKeyboardButton::url("⛏ Open the app", app_url)],
        vec![
            InlineKeyboardButton::callback("📎 Referral link", "copy_ref"),
            InlineKeyboardButton::switch_inline_query("📤 Share", share),
        ],
    ];
    if is_admin {
        rows.push(vec![
            callback("📋 Admin panel", Action::AdminPanel),
            callback("🎙 Send podcast", Action::SendPodcast),
        ]);
    }
    InlineKeyboardMarkup::new(rows)
}
