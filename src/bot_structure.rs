use crate::*;

pub type HandlerResult = Result<(), BotError>;

/// Position of a user in the multi-step dialog.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DialogState {
    #[default]
    Idle,
    AwaitingExpenseInput,
    InStatisticsMenu,
    InPeriodSelection,
    AwaitingCustomPeriodText,
    AwaitingCategoryName,
    AwaitingCategoryEmoji {
        title: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsKind {
    ByCategory,
    ByExpense,
}

/// Unconfirmed expense candidate. Category is only a label until confirmation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpenseDraft {
    pub amount: i64,
    pub currency: String,
    pub category: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserStateData {
    pub state: DialogState,
    pub pending_expenses: Option<Vec<ExpenseDraft>>,
    pub stats_kind: Option<StatsKind>,
}

impl UserStateData {
    pub fn has_pending(&self) -> bool {
        self.pending_expenses
            .as_ref()
            .is_some_and(|drafts| !drafts.is_empty())
    }
}

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Доступные команды")]
pub enum Command {
    #[command(description = "Показать приветственное сообщение")]
    Start,
    #[command(description = "Показать справку")]
    Help,
}

/// Reply keyboards and inline keyboards the dialog can attach to a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Keyboard {
    MainMenu,
    StatisticsMenu,
    PeriodSelection { include_all_time: bool },
    ConfirmExpenses,
    CategoryEmoji,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
    pub html: bool,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            keyboard: None,
            html: false,
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            keyboard: None,
            html: true,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Telegram identity of whoever sent an update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sender {
    pub id: UserId,
    pub chat_id: ChatId,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

// Main menu
pub const BUTTON_ADD_EXPENSE: &str = "➕ Добавить расход";
pub const BUTTON_ADD_CATEGORY: &str = "📂 Добавить категорию";
pub const BUTTON_STATISTICS: &str = "📊 Статистика";
pub const BUTTON_WEEK_EXPENSES: &str = "💰 Траты за неделю";

// Statistics menu
pub const BUTTON_BY_CATEGORIES: &str = "📊 По категориям";
pub const BUTTON_BY_EXPENSES: &str = "💸 По тратам";
pub const BUTTON_BACK: &str = "🔙 Назад";

// Period selection
pub const BUTTON_TODAY: &str = "📅 За сегодня";
pub const BUTTON_WEEK: &str = "📅 За неделю";
pub const BUTTON_MONTH: &str = "📅 За месяц";
pub const BUTTON_ALL_TIME: &str = "📅 За всё время";
pub const BUTTON_CUSTOM_PERIOD: &str = "📅 Кастомный период";

// Inline callbacks
pub const CALLBACK_EXPENSE: &str = "expense";
pub const CALLBACK_EMOJI: &str = "emoji";
pub const ACTION_CONFIRM: &str = "confirm";
pub const ACTION_CANCEL: &str = "cancel";

pub const CATEGORY_EMOJIS: [&str; 32] = [
    "🍔", "🍕", "🍜", "🍱", "🍛", "🍗", "🥗", "🥙",
    "🚗", "🚕", "🚌", "🚇", "🚊", "✈️", "🚲", "🛵",
    "🏠", "🏢", "🏪", "🏥", "💊", "🛒", "🎮", "🎬",
    "💰", "💳", "💵", "📱", "💻", "⚡", "💡", "🔧",
];

/// Splits an `"action:value"` callback payload.
pub fn parse_callback_data(data: &str) -> Option<(&str, &str)> {
    let (action, value) = data.split_once(':')?;
    if action.is_empty() {
        return None;
    }
    Some((action, value))
}
