use crate::*;

use chrono::Local;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixedPeriod {
    Today,
    Week,
    Month,
    AllTime,
}

impl FixedPeriod {
    pub fn from_button(text: &str) -> Option<Self> {
        match text {
            BUTTON_TODAY => Some(FixedPeriod::Today),
            BUTTON_WEEK => Some(FixedPeriod::Week),
            BUTTON_MONTH => Some(FixedPeriod::Month),
            BUTTON_ALL_TIME => Some(FixedPeriod::AllTime),
            _ => None,
        }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            FixedPeriod::Today => "period_today",
            FixedPeriod::Week => "period_week",
            FixedPeriod::Month => "period_month",
            FixedPeriod::AllTime => "period_alltime",
        }
    }

    pub fn period(&self, now: DateTime<Local>) -> TimePeriod {
        match self {
            FixedPeriod::Today => TimePeriod::today(now),
            FixedPeriod::Week => TimePeriod::week(now),
            FixedPeriod::Month => TimePeriod::month(now),
            FixedPeriod::AllTime => TimePeriod::all_time(now),
        }
    }
}

const CUSTOM_PERIOD_PROMPT: &str = "📅 <b>Введите кастомный период</b>\n\n\
    Форматы:\n\
    • <code>03.04.25 07.04.25</code>\n\
    • <code>03.04.25 - 07.04.25</code>\n\
    • <code>03.04 07.04</code> (текущий год)\n\
    • <code>03.04 - 07.04</code> (текущий год)";

const PERIOD_TOO_LONG_TEXT: &str = "❌ Для статистики по тратам период не может быть больше месяца (31 день).";

impl Dialog {
    pub(crate) async fn show_statistics_menu(&self, sender: &Sender) -> HandlerResult {
        self.states.set_state(sender.id, DialogState::InStatisticsMenu).await;
        self.send(
            sender,
            Reply::html("📊 <b>Выберите тип статистики:</b>").with_keyboard(Keyboard::StatisticsMenu),
        )
        .await
    }

    pub(crate) async fn select_stats_kind(&self, sender: &Sender, kind: StatsKind) -> HandlerResult {
        self.states
            .update(sender.id, |data| {
                data.state = DialogState::InPeriodSelection;
                data.stats_kind = Some(kind);
            })
            .await;
        info!("Changing state of {} to InPeriodSelection ({:?})", sender.id, kind);

        let text = match kind {
            StatsKind::ByCategory => "📊 <b>Статистика по категориям</b>\n\nВыберите период:",
            StatsKind::ByExpense => "💸 <b>Статистика по тратам</b>\n\nВыберите период:",
        };
        self.send(
            sender,
            Reply::html(text).with_keyboard(Keyboard::PeriodSelection {
                include_all_time: kind == StatsKind::ByCategory,
            }),
        )
        .await
    }

    pub(crate) async fn select_fixed_period(&self, sender: &Sender, user: &User, data: &UserStateData, fixed: FixedPeriod) -> HandlerResult {
        let Some(kind) = data.stats_kind else {
            info!("No statistics type chosen by {}, showing menu", sender.id);
            return self.show_statistics_menu(sender).await;
        };

        if data.state == DialogState::AwaitingCustomPeriodText {
            self.states.set_state(sender.id, DialogState::InPeriodSelection).await;
        }

        self.send_statistics(sender, user, kind, fixed.period(Local::now())).await
    }

    pub(crate) async fn start_custom_period(&self, sender: &Sender, data: &UserStateData) -> HandlerResult {
        if data.stats_kind.is_none() {
            info!("No statistics type chosen by {}, showing menu", sender.id);
            return self.show_statistics_menu(sender).await;
        }

        self.states
            .set_state(sender.id, DialogState::AwaitingCustomPeriodText)
            .await;
        self.send(sender, Reply::html(CUSTOM_PERIOD_PROMPT)).await
    }

    pub(crate) async fn handle_custom_period_input(&self, sender: &Sender, user: &User, text: &str) -> HandlerResult {
        let data = self.states.get(sender.id).await;
        let Some(kind) = data.stats_kind else {
            return self.show_statistics_menu(sender).await;
        };
        let period_keyboard = Keyboard::PeriodSelection {
            include_all_time: kind == StatsKind::ByCategory,
        };

        let period = match parse_custom_period(text, Local::now().date_naive()) {
            Ok(period) => period,
            Err(e) => {
                info!("Custom period from {} rejected: {}", sender.id, e);
                let reply = format!(
                    "❌ Ошибка: {}\n\nПожалуйста, введите период в формате:\n• ДД.ММ.ГГ ДД.ММ.ГГ\n• ДД.ММ - ДД.ММ (текущий год)",
                    e
                );
                return self.send(sender, Reply::text(reply).with_keyboard(period_keyboard)).await;
            }
        };

        if kind == StatsKind::ByExpense {
            if let Err(e) = period.ensure_max_days(MAX_EXPENSE_PERIOD_DAYS) {
                info!("Custom period from {} rejected: {}", sender.id, e);
                return self
                    .send(sender, Reply::text(PERIOD_TOO_LONG_TEXT).with_keyboard(period_keyboard))
                    .await;
            }
        }

        self.states.set_state(sender.id, DialogState::InPeriodSelection).await;
        self.send_statistics(sender, user, kind, period).await
    }

    pub(crate) async fn go_back(&self, sender: &Sender, data: &UserStateData) -> HandlerResult {
        match data.state {
            DialogState::InPeriodSelection | DialogState::AwaitingCustomPeriodText => self.show_statistics_menu(sender).await,
            _ => {
                self.states.clear(sender.id).await;
                self.send(sender, Reply::text("Главное меню:").with_keyboard(Keyboard::MainMenu))
                    .await
            }
        }
    }

    pub(crate) async fn send_statistics(&self, sender: &Sender, user: &User, kind: StatsKind, period: TimePeriod) -> HandlerResult {
        info!("Statistics {:?} for {} over {}", kind, sender.id, period.format());

        let expenses = match self
            .repository
            .list_expenses_for_user(user.id, &ExpenseSearch::within(&period))
            .await
        {
            Ok(expenses) => expenses,
            Err(e) => {
                return self
                    .report_failure(sender, "database", &e, "Ошибка получения расходов.")
                    .await;
            }
        };

        let text = match kind {
            StatsKind::ByCategory => by_category(&expenses, &period),
            StatsKind::ByExpense => by_expense(&expenses, &period),
        };
        let keyboard = self.current_keyboard(sender.id).await;
        self.send(sender, Reply::html(text).with_keyboard(keyboard)).await
    }
}
