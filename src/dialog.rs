use crate::*;

use std::fmt::Display;
use std::path::Path;

use chrono::Local;

pub const NOT_REGISTERED_TEXT: &str = "Пожалуйста, используйте /start для начала работы.";
pub const UNKNOWN_ACTION_TEXT: &str = "Неизвестное действие";

/// Outbound side of the chat platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, chat_id: ChatId, reply: Reply) -> HandlerResult;
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, show_alert: bool) -> HandlerResult;
    async fn download_file(&self, file_id: &str, destination: &Path) -> HandlerResult;
}

/// Drives every user through the dialog. Handlers for each flow live in
/// `add_expenses`, `add_category` and `show_statistics`.
#[derive(Clone)]
pub struct Dialog {
    pub(crate) states: StateStore,
    pub(crate) repository: Arc<dyn Repository>,
    pub(crate) extractor: Arc<dyn ExpenseExtractor>,
    pub(crate) transcriber: Arc<dyn Transcriber>,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Dialog {
    pub fn new(
        repository: Arc<dyn Repository>,
        extractor: Arc<dyn ExpenseExtractor>,
        transcriber: Arc<dyn Transcriber>,
        messenger: Arc<dyn Messenger>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Dialog {
            states: StateStore::new(),
            repository,
            extractor,
            transcriber,
            messenger,
            metrics,
        }
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) async fn send(&self, sender: &Sender, reply: Reply) -> HandlerResult {
        self.messenger.send(sender.chat_id, reply).await
    }

    /// Logs a failed collaborator call, counts it and tells the user.
    pub(crate) async fn report_failure(&self, sender: &Sender, kind: &str, err: &(dyn Display + Sync), text: &str) -> HandlerResult {
        error!("{} failed for user {}: {}", kind, sender.id, err);
        self.metrics.error(kind);
        self.send(sender, Reply::text(text).with_keyboard(Keyboard::MainMenu)).await
    }

    /// Keyboard matching where the user currently is, so statistics
    /// results do not knock them out of the menu they were using.
    pub async fn current_keyboard(&self, user_id: UserId) -> Keyboard {
        let data = self.states.get(user_id).await;
        match data.state {
            DialogState::InPeriodSelection | DialogState::AwaitingCustomPeriodText => Keyboard::PeriodSelection {
                include_all_time: data.stats_kind == Some(StatsKind::ByCategory),
            },
            DialogState::InStatisticsMenu => Keyboard::StatisticsMenu,
            _ => Keyboard::MainMenu,
        }
    }

    async fn registered_user(&self, sender: &Sender) -> Result<Option<User>, BotError> {
        match self.repository.get_user_by_external_id(sender.id).await {
            Ok(Some(user)) => Ok(Some(user)),
            Ok(None) => {
                info!("User {} is not registered", sender.id);
                self.metrics.error("user_not_found");
                self.send(sender, Reply::text(NOT_REGISTERED_TEXT)).await?;
                Ok(None)
            }
            Err(e) => {
                self.report_failure(sender, "database", &e, "Произошла ошибка. Попробуйте позже.")
                    .await?;
                Ok(None)
            }
        }
    }

    pub async fn handle_start(&self, sender: &Sender) -> HandlerResult {
        info!("Got command /start from {}", sender.id);
        self.metrics.command("start");

        let user = match self
            .repository
            .get_or_create_user_by_external_id(&UserProfile::from(sender))
            .await
        {
            Ok(user) => user,
            Err(e) => {
                error!("Failed to register user {}: {}", sender.id, e);
                self.metrics.error("user_registration");
                return self
                    .send(sender, Reply::text("Произошла ошибка при регистрации. Попробуйте позже."))
                    .await;
            }
        };

        self.states.clear(sender.id).await;
        info!("User {} started bot (telegram id {})", user.id, sender.id);

        let welcome = format!(
            "👋 Привет, {}!\n\nЯ помогу вам вести учет расходов.\n\nИспользуйте кнопки ниже для управления:",
            sender.first_name
        );
        self.send(sender, Reply::text(welcome).with_keyboard(Keyboard::MainMenu)).await
    }

    pub async fn handle_help(&self, sender: &Sender) -> HandlerResult {
        info!("Got command /help from {}", sender.id);
        self.metrics.command("help");

        let help = format!(
            "📚 <b>Справка:</b>\n\n\
            <b>{}</b> - отправьте голосовое сообщение или текст с описанием расхода.\n\n\
            <b>{}</b> - создайте свою категорию с эмодзи.\n\n\
            <b>{}</b> - распределение расходов по категориям или по тратам.\n\n\
            <b>{}</b> - траты за последние 7 дней.\n\n\
            {}",
            BUTTON_ADD_EXPENSE,
            BUTTON_ADD_CATEGORY,
            BUTTON_STATISTICS,
            BUTTON_WEEK_EXPENSES,
            Command::descriptions()
        );
        self.send(sender, Reply::html(help).with_keyboard(Keyboard::MainMenu)).await
    }

    pub async fn handle_text(&self, sender: &Sender, text: &str) -> HandlerResult {
        info!("Received message from {}: {}", sender.id, text);
        self.metrics.message("text");

        let Some(user) = self.registered_user(sender).await? else {
            return Ok(());
        };
        let data = self.states.get(sender.id).await;

        if self.handle_button(sender, &user, text, &data).await? {
            return Ok(());
        }

        match &data.state {
            DialogState::AwaitingCustomPeriodText => return self.handle_custom_period_input(sender, &user, text).await,
            DialogState::AwaitingCategoryName => return self.handle_category_name(sender, &user, text).await,
            DialogState::AwaitingCategoryEmoji { title } => return self.remind_category_emoji(sender, title).await,
            _ => {}
        }

        self.drop_pending(sender.id).await;
        self.process_expense_text(sender, &user, text).await
    }

    pub async fn handle_voice(&self, sender: &Sender, file_id: &str) -> HandlerResult {
        info!("Received voice message from {}: {}", sender.id, file_id);
        self.metrics.message("voice");

        let Some(user) = self.registered_user(sender).await? else {
            return Ok(());
        };
        let data = self.states.get(sender.id).await;

        match data.state {
            DialogState::AwaitingCustomPeriodText => {
                return self
                    .send(
                        sender,
                        Reply::text("Пожалуйста, введите период текстом в формате: ДД.ММ.ГГ ДД.ММ.ГГ"),
                    )
                    .await;
            }
            DialogState::AwaitingCategoryName | DialogState::AwaitingCategoryEmoji { .. } => {
                return self
                    .send(sender, Reply::text("Пожалуйста, введите название категории текстом."))
                    .await;
            }
            _ => {}
        }

        self.drop_pending(sender.id).await;
        self.process_voice_expense(sender, &user, file_id).await
    }

    pub async fn handle_callback(&self, sender: &Sender, callback_id: &str, data: &str) -> HandlerResult {
        info!("Callback from {}: {}", sender.id, data);

        let user = match self.repository.get_user_by_external_id(sender.id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.metrics.error("user_not_found");
                return self
                    .messenger
                    .answer_callback(callback_id, Some(NOT_REGISTERED_TEXT), true)
                    .await;
            }
            Err(e) => {
                error!("Failed to load user {}: {}", sender.id, e);
                self.metrics.error("database");
                return self
                    .messenger
                    .answer_callback(callback_id, Some("Произошла ошибка. Попробуйте позже."), true)
                    .await;
            }
        };

        match parse_callback_data(data) {
            Some((CALLBACK_EXPENSE, action)) => self.handle_expense_action(sender, &user, callback_id, action).await,
            Some((CALLBACK_EMOJI, emoji)) => self.handle_emoji_choice(sender, &user, callback_id, emoji).await,
            _ => {
                warn!("Unknown callback data: {}", data);
                self.messenger
                    .answer_callback(callback_id, Some(UNKNOWN_ACTION_TEXT), false)
                    .await
            }
        }
    }

    /// Returns `true` if `text` was one of the reply keyboard buttons.
    async fn handle_button(&self, sender: &Sender, user: &User, text: &str, data: &UserStateData) -> Result<bool, BotError> {
        match text {
            BUTTON_ADD_EXPENSE => {
                self.metrics.button("add_expense");
                self.start_add_expense(sender).await?;
            }
            BUTTON_ADD_CATEGORY => {
                self.metrics.button("add_category");
                self.start_add_category(sender).await?;
            }
            BUTTON_STATISTICS => {
                self.metrics.button("statistics");
                self.show_statistics_menu(sender).await?;
            }
            BUTTON_WEEK_EXPENSES => {
                self.metrics.button("week_expenses");
                self.send_statistics(sender, user, StatsKind::ByExpense, TimePeriod::week(Local::now()))
                    .await?;
            }
            BUTTON_BACK => {
                self.metrics.button("back");
                self.go_back(sender, data).await?;
            }
            BUTTON_BY_CATEGORIES => {
                self.metrics.button("by_categories");
                self.select_stats_kind(sender, StatsKind::ByCategory).await?;
            }
            BUTTON_BY_EXPENSES => {
                self.metrics.button("by_expenses");
                self.select_stats_kind(sender, StatsKind::ByExpense).await?;
            }
            BUTTON_TODAY | BUTTON_WEEK | BUTTON_MONTH | BUTTON_ALL_TIME => {
                let Some(fixed) = FixedPeriod::from_button(text) else {
                    return Ok(false);
                };
                self.metrics.button(fixed.metric_label());
                self.select_fixed_period(sender, user, data, fixed).await?;
            }
            BUTTON_CUSTOM_PERIOD => {
                self.metrics.button("period_custom");
                self.start_custom_period(sender, data).await?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// New input supersedes a batch that was never confirmed.
    async fn drop_pending(&self, user_id: UserId) {
        self.states
            .update(user_id, |data| {
                if data.pending_expenses.take().is_some() {
                    info!("Dropping unconfirmed expenses of {}", user_id);
                }
            })
            .await;
    }
}
