//! The conversational workflow engine. Every webhook delivery is handled as
//! an isolated unit of work: the engine is a function of (stored session,
//! inbound update) to (new session or none, outbound messages). Wizard
//! progress crosses request boundaries only through the session store.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::assets::AssetStore;
use crate::broadcast::{self, Messenger, PodcastMessage};
use crate::database::connection::{
    ActivityLog, AdminDirectory, ConfigStore, PodcastArchive, RemoveOutcome, SessionStore,
    UserDirectory,
};
use crate::database::models::{AdminRole, LinkButton, PodcastRecord};
use crate::errors::WizardError;
use crate::steps::{self, Action, Menu, PodcastDraft, Step, StepInput, StepValue, WizardKind};
use crate::targets::{self, Target};

const ADMINS_ONLY: &str = "⛔ This action is for admins only.";
const PRIMARY_ONLY: &str = "⛔ Only the primary admin can do that.";

/// One normalized inbound update.
#[derive(Debug, Clone)]
pub(crate) struct Inbound {
    pub sender: i64,
    pub body: InboundBody,
}

#[derive(Debug, Clone)]
pub(crate) enum InboundBody {
    Text(String),
    Image(Vec<u8>),
    Pressed(String),
}

/// One message the engine wants delivered. The recipient is usually the
/// actor, but admin-management wizards also notify the affected account.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Outbound {
    pub to: i64,
    pub text: String,
    pub menu: Menu,
}

fn reply(to: i64, text: impl Into<String>, menu: Menu) -> Outbound {
    Outbound {
        to,
        text: text.into(),
        menu,
    }
}

pub(crate) struct Wizard<D, M, A> {
    db: Arc<D>,
    transport: M,
    assets: A,
}

impl<D, M, A> Wizard<D, M, A>
where
    D: SessionStore + UserDirectory + AdminDirectory + PodcastArchive + ConfigStore + ActivityLog,
    M: Messenger,
    A: AssetStore,
{
    pub(crate) fn new(db: Arc<D>, transport: M, assets: A) -> Self {
        Self {
            db,
            transport,
            assets,
        }
    }

    /// Entry point: consumes one update, returns the messages to send.
    #[instrument(level = "info", skip(self, update), fields(sender = update.sender))]
    pub(crate) async fn handle(&self, update: Inbound) -> Result<Vec<Outbound>, WizardError> {
        match update.body {
            InboundBody::Pressed(data) => self.on_pressed(update.sender, &data).await,
            InboundBody::Text(text) => self.on_input(update.sender, StepInput::Text(text)).await,
            InboundBody::Image(bytes) => {
                self.on_input(update.sender, StepInput::Image(bytes)).await
            }
        }
    }

    /// Cancels every active wizard of the sender, discarding staged assets.
    pub(crate) async fn cancel_all(&self, sender: i64) -> Result<Vec<Outbound>, WizardError> {
        let mut cancelled = false;
        if self.load_admin_step(sender).await?.is_some() {
            self.db.clear_session(sender, WizardKind::AdminAction).await?;
            cancelled = true;
        }
        if self.drop_podcast_session(sender).await? {
            cancelled = true;
        }
        let text = if cancelled {
            "❌ Cancelled."
        } else {
            "Nothing to cancel."
        };
        Ok(vec![reply(sender, text, Menu::None)])
    }

    async fn on_pressed(&self, sender: i64, data: &str) -> Result<Vec<Outbound>, WizardError> {
        let Ok(action) = Action::from_str(data) else {
            log::info!("ignoring unknown callback '{}' from {}", data, sender);
            return Ok(Vec::new());
        };
        let role = self.db.role(sender).await?;
        match action {
            Action::AdminPanel => self.open_admin_panel(sender, role).await,
            Action::SendPodcast => self.start_podcast(sender, role).await,
            Action::AddAdmin => self.start_admin_action(sender, role, Step::AddAdminId).await,
            Action::RemoveAdmin => {
                self.start_admin_action(sender, role, Step::RemoveAdminId).await
            }
            Action::UpdateConfig => self.start_admin_action(sender, role, Step::EditConfig).await,
            Action::Stats => self.stats(sender, role).await,
            Action::PodcastCancel => self.cancel_podcast(sender).await,
            _ => self.advance_podcast(sender, role, StepInput::Pressed(action)).await,
        }
    }

    async fn on_input(&self, sender: i64, input: StepInput) -> Result<Vec<Outbound>, WizardError> {
        let role = self.db.role(sender).await?;
        if role.is_none() {
            // only admins hold sessions; plain traffic has nothing to resume
            return Ok(Vec::new());
        }
        // an admin-action session takes the input first; the podcast session
        // only sees updates once no admin action is pending
        if let Some(step) = self.load_admin_step(sender).await? {
            return self.advance_admin(sender, role, step, input).await;
        }
        self.advance_podcast(sender, role, input).await
    }

    async fn open_admin_panel(
        &self,
        sender: i64,
        role: Option<AdminRole>,
    ) -> Result<Vec<Outbound>, WizardError> {
        let Some(role) = role else {
            return Ok(vec![reply(sender, ADMINS_ONLY, Menu::None)]);
        };
        // opening the panel abandons any half-done admin action
        self.db.clear_session(sender, WizardKind::AdminAction).await?;
        Ok(vec![reply(
            sender,
            "📋 <b>Admin panel</b>\n\nChoose an action:",
            Menu::AdminPanel {
                primary: role == AdminRole::Primary,
            },
        )])
    }

    async fn start_podcast(
        &self,
        sender: i64,
        role: Option<AdminRole>,
    ) -> Result<Vec<Outbound>, WizardError> {
        if role.is_none() {
            return Ok(vec![reply(sender, ADMINS_ONLY, Menu::None)]);
        }
        // restarting the wizard drops any earlier draft, staged image included
        self.drop_podcast_session(sender).await?;
        let draft = PodcastDraft::default();
        self.save_podcast(sender, Step::Target, &draft).await?;
        Ok(vec![self.prompt_reply(sender, Step::Target, &draft)])
    }

    async fn start_admin_action(
        &self,
        sender: i64,
        role: Option<AdminRole>,
        step: Step,
    ) -> Result<Vec<Outbound>, WizardError> {
        if role != Some(AdminRole::Primary) {
            return Ok(vec![reply(sender, PRIMARY_ONLY, Menu::None)]);
        }
        self.db
            .save_session(sender, WizardKind::AdminAction, step, "{}")
            .await?;
        Ok(vec![self.prompt_reply(sender, step, &PodcastDraft::default())])
    }

    async fn stats(
        &self,
        sender: i64,
        role: Option<AdminRole>,
    ) -> Result<Vec<Outbound>, WizardError> {
        if role.is_none() {
            return Ok(vec![reply(sender, ADMINS_ONLY, Menu::None)]);
        }
        let users = self.db.user_count().await?;
        let podcasts = self.db.podcast_count().await?;
        let admins = self.db.list_admins().await?;
        let recent = self.db.recent_activity(5).await?;

        let mut text = format!(
            "📊 <b>Statistics</b>\n\n<b>Users:</b> {}\n<b>Podcasts:</b> {}\n\n<b>Admins:</b>\n",
            users, podcasts
        );
        for admin in admins {
            text.push_str(&format!(
                "• {} ({}) since {}\n",
                admin.admin_id,
                admin.role,
                admin.added_at.format("%Y-%m-%d")
            ));
        }
        text.push_str("\n<b>Recent activity:</b>\n");
        for entry in recent {
            text.push_str(&format!(
                "• {} — {} at {}\n",
                entry.user_id,
                entry.kind,
                entry.at.format("%Y-%m-%d %H:%M")
            ));
        }
        Ok(vec![reply(sender, text, Menu::None)])
    }

    async fn advance_admin(
        &self,
        sender: i64,
        role: Option<AdminRole>,
        step: Step,
        input: StepInput,
    ) -> Result<Vec<Outbound>, WizardError> {
        // the role can change between updates; gate on the triggering action
        if role != Some(AdminRole::Primary) {
            return Ok(vec![reply(sender, PRIMARY_ONLY, Menu::None)]);
        }
        let Ok(value) = steps::validate(step, &input) else {
            return Ok(vec![self.prompt_reply(sender, step, &PodcastDraft::default())]);
        };

        let replies = match (step, value) {
            (Step::AddAdminId, StepValue::Id(id)) => {
                if self.db.add_admin(id, sender).await? {
                    log::info!("{} granted delegated admin to {}", sender, id);
                    vec![
                        reply(sender, format!("✅ Delegated admin {} added.", id), Menu::None),
                        reply(
                            id,
                            "🎉 You are now a delegated admin. Send /admin to open the panel.",
                            Menu::None,
                        ),
                    ]
                } else {
                    vec![reply(
                        sender,
                        format!("⚠️ {} is already an admin.", id),
                        Menu::None,
                    )]
                }
            }
            (Step::RemoveAdminId, StepValue::Id(id)) => match self.db.remove_admin(id).await? {
                RemoveOutcome::Removed => {
                    log::info!("{} revoked delegated admin from {}", sender, id);
                    vec![
                        reply(sender, format!("✅ Delegated admin {} removed.", id), Menu::None),
                        reply(id, "ℹ️ Your delegated admin access was revoked.", Menu::None),
                    ]
                }
                RemoveOutcome::NotFound => vec![reply(
                    sender,
                    format!("⚠️ {} is not a delegated admin.", id),
                    Menu::None,
                )],
                RemoveOutcome::PrimaryKept => vec![reply(
                    sender,
                    "⛔ The primary admin cannot be removed.",
                    Menu::None,
                )],
            },
            (Step::EditConfig, StepValue::Settings(pairs)) => {
                self.db.set_settings(&pairs, sender).await?;
                log::info!("{} updated {} runtime settings", sender, pairs.len());
                vec![reply(sender, "✅ Configuration updated.", Menu::None)]
            }
            _ => Vec::new(),
        };

        self.db.clear_session(sender, WizardKind::AdminAction).await?;
        Ok(replies)
    }

    async fn advance_podcast(
        &self,
        sender: i64,
        role: Option<AdminRole>,
        input: StepInput,
    ) -> Result<Vec<Outbound>, WizardError> {
        let Some((step, mut draft)) = self.load_podcast(sender).await? else {
            return Ok(Vec::new());
        };
        if role.is_none() {
            return Ok(vec![reply(sender, ADMINS_ONLY, Menu::None)]);
        }
        let Ok(value) = steps::validate(step, &input) else {
            return Ok(vec![self.prompt_reply(sender, step, &draft)]);
        };

        // merge the validated value into the draft at field level
        match (step, &value) {
            (Step::Target, StepValue::Choice(Action::TargetAll)) => {
                draft.target = Some(Target::All);
            }
            (Step::Target, StepValue::Choice(Action::TargetDay)) => {
                draft.target = Some(Target::RecentDay);
            }
            (Step::Target, StepValue::Choice(Action::TargetWeek)) => {
                draft.target = Some(Target::RecentWeek);
            }
            (Step::Target, StepValue::Choice(Action::TargetMonth)) => {
                draft.target = Some(Target::RecentMonth);
            }
            (Step::SpecificId, StepValue::Id(id)) => {
                draft.target = Some(Target::Specific(*id));
            }
            (Step::ImageUpload, StepValue::Photo(bytes)) => {
                draft.image = Some(self.assets.stage(sender, bytes).await?);
            }
            (Step::Title, StepValue::Text(text)) => draft.title = Some(text.clone()),
            (Step::Body, StepValue::Text(text)) => draft.body = Some(text.clone()),
            (Step::ButtonText, StepValue::Text(text)) => draft.button_label = Some(text.clone()),
            (Step::ButtonUrl, StepValue::Link(url)) => draft.button_url = Some(url.clone()),
            _ => {}
        }

        match steps::next(step, &value) {
            Some(next_step) => {
                self.save_podcast(sender, next_step, &draft).await?;
                Ok(vec![self.prompt_reply(sender, next_step, &draft)])
            }
            None => self.commit_podcast(sender, draft).await,
        }
    }

    async fn commit_podcast(
        &self,
        sender: i64,
        draft: PodcastDraft,
    ) -> Result<Vec<Outbound>, WizardError> {
        let (Some(target), Some(title), Some(body)) =
            (draft.target.clone(), draft.title.clone(), draft.body.clone())
        else {
            log::error!("confirmed podcast draft of {} is missing required fields", sender);
            self.abort_commit(sender, &draft).await?;
            return Ok(vec![reply(
                sender,
                "⚠️ The draft is incomplete. Podcast cancelled.",
                Menu::None,
            )]);
        };

        let now = Utc::now();
        let recipients = match targets::resolve(self.db.as_ref(), &target, now).await {
            Ok(recipients) => recipients,
            Err(e) => {
                self.abort_commit(sender, &draft).await?;
                return Err(e.into());
            }
        };
        let image_url = match &draft.image {
            Some(staged) => match self.assets.promote(staged).await {
                Ok(url) => Some(url),
                Err(e) => {
                    self.abort_commit(sender, &draft).await?;
                    return Err(e.into());
                }
            },
            None => None,
        };
        let button = match (draft.button_label.clone(), draft.button_url.clone()) {
            (Some(label), Some(url)) => Some(LinkButton { label, url }),
            _ => None,
        };

        let message = PodcastMessage {
            title,
            body,
            image_url,
            button,
        };
        let report = broadcast::dispatch(&self.transport, &message, &recipients).await;

        let record = PodcastRecord {
            title: message.title,
            body: message.body,
            image_url: message.image_url,
            button: message.button,
            sent_by: sender,
            target,
            attempted: report.attempted,
            failed: report.failed,
            created_at: now,
            sent_at: now,
        };
        if let Err(e) = self.db.record_podcast(&record).await {
            // the broadcast already went out: keep the promoted asset, but
            // the session must not survive a confirmed run
            self.db.clear_session(sender, WizardKind::Podcast).await?;
            return Err(e.into());
        }

        self.db.clear_session(sender, WizardKind::Podcast).await?;
        if let Err(e) = self.db.log_activity(sender, "podcast_sent").await {
            log::warn!("failed to log podcast activity of {}: {}", sender, e);
        }

        let mut summary = format!("✅ Podcast sent to {} recipient(s).", report.delivered());
        if report.failed > 0 {
            summary.push_str(&format!(
                "\n⚠️ {} delivery(ies) failed; details are in the log.",
                report.failed
            ));
        }
        Ok(vec![reply(sender, summary, Menu::None)])
    }

    async fn cancel_podcast(&self, sender: i64) -> Result<Vec<Outbound>, WizardError> {
        if self.drop_podcast_session(sender).await? {
            Ok(vec![reply(sender, "❌ Podcast cancelled.", Menu::None)])
        } else {
            Ok(Vec::new())
        }
    }

    /// Discards the staged image (if any) and clears the podcast session.
    /// Returns whether a session existed.
    async fn drop_podcast_session(&self, sender: i64) -> Result<bool, WizardError> {
        let Some((_, draft)) = self.load_podcast(sender).await? else {
            return Ok(false);
        };
        if let Some(image) = &draft.image {
            if let Err(e) = self.assets.discard(image).await {
                log::warn!("failed to discard staged image {}: {}", image.file_name, e);
            }
        }
        self.db.clear_session(sender, WizardKind::Podcast).await?;
        Ok(true)
    }

    async fn abort_commit(&self, sender: i64, draft: &PodcastDraft) -> Result<(), WizardError> {
        if let Some(image) = &draft.image {
            if let Err(e) = self.assets.discard(image).await {
                log::warn!("failed to discard staged image {}: {}", image.file_name, e);
            }
        }
        self.db.clear_session(sender, WizardKind::Podcast).await?;
        Ok(())
    }

    async fn load_podcast(
        &self,
        owner: i64,
    ) -> Result<Option<(Step, PodcastDraft)>, WizardError> {
        let Some(stored) = self.db.session(owner, WizardKind::Podcast).await? else {
            return Ok(None);
        };
        let parsed = Step::from_str(&stored.step)
            .ok()
            .filter(|step| step.kind() == WizardKind::Podcast)
            .and_then(|step| {
                serde_json::from_str::<PodcastDraft>(&stored.payload)
                    .ok()
                    .map(|draft| (step, draft))
            });
        match parsed {
            Some(session) => Ok(Some(session)),
            None => {
                log::warn!(
                    "discarding unreadable podcast session of {} (step '{}')",
                    owner,
                    stored.step
                );
                self.db.clear_session(owner, WizardKind::Podcast).await?;
                Ok(None)
            }
        }
    }

    async fn load_admin_step(&self, owner: i64) -> Result<Option<Step>, WizardError> {
        let Some(stored) = self.db.session(owner, WizardKind::AdminAction).await? else {
            return Ok(None);
        };
        let parsed = Step::from_str(&stored.step)
            .ok()
            .filter(|step| step.kind() == WizardKind::AdminAction);
        match parsed {
            Some(step) => Ok(Some(step)),
            None => {
                log::warn!(
                    "discarding unreadable admin session of {} (step '{}')",
                    owner,
                    stored.step
                );
                self.db.clear_session(owner, WizardKind::AdminAction).await?;
                Ok(None)
            }
        }
    }

    async fn save_podcast(
        &self,
        owner: i64,
        step: Step,
        draft: &PodcastDraft,
    ) -> Result<(), WizardError> {
        let payload = serde_json::to_string(draft)?;
        self.db
            .save_session(owner, WizardKind::Podcast, step, &payload)
            .await?;
        Ok(())
    }

    fn prompt_reply(&self, to: i64, step: Step, draft: &PodcastDraft) -> Outbound {
        let prompt = steps::prompt(step, draft);
        reply(to, prompt.text, prompt.menu)
    }
}
