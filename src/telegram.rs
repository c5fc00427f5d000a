use crate::*;

use std::path::Path;

use teloxide::{
    dispatching::UpdateHandler,
    net::Download,
    prelude::*,
    types::{
        InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup, ParseMode,
        ReplyMarkup,
    },
};

/// Delivers replies through the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        TelegramMessenger { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, chat_id: ChatId, reply: Reply) -> HandlerResult {
        let mut request = self.bot.send_message(chat_id, reply.text);
        if reply.html {
            request = request.parse_mode(ParseMode::Html);
        }
        if let Some(keyboard) = &reply.keyboard {
            request = request.reply_markup(reply_markup(keyboard));
        }
        request.await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, show_alert: bool) -> HandlerResult {
        let mut request = self.bot.answer_callback_query(callback_id.to_string());
        if let Some(text) = text {
            request = request.text(text);
        }
        if show_alert {
            request = request.show_alert(true);
        }
        request.await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str, destination: &Path) -> HandlerResult {
        let file = self.bot.get_file(file_id.to_string()).await?;
        debug!("Downloading {} to {}", file.path, destination.display());

        let mut target = tokio::fs::File::create(destination)
            .await
            .map_err(|e| BotError::Transport(e.to_string()))?;
        self.bot.download_file(&file.path, &mut target).await?;
        Ok(())
    }
}

fn main_menu_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(BUTTON_ADD_EXPENSE)],
        vec![KeyboardButton::new(BUTTON_ADD_CATEGORY), KeyboardButton::new(BUTTON_STATISTICS)],
        vec![KeyboardButton::new(BUTTON_WEEK_EXPENSES)],
    ])
    .resize_keyboard()
}

fn statistics_menu_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(BUTTON_BY_CATEGORIES), KeyboardButton::new(BUTTON_BY_EXPENSES)],
        vec![KeyboardButton::new(BUTTON_BACK)],
    ])
    .resize_keyboard()
}

fn period_selection_keyboard(include_all_time: bool) -> KeyboardMarkup {
    let mut second_row = vec![KeyboardButton::new(BUTTON_MONTH)];
    if include_all_time {
        second_row.push(KeyboardButton::new(BUTTON_ALL_TIME));
    }

    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(BUTTON_TODAY), KeyboardButton::new(BUTTON_WEEK)],
        second_row,
        vec![KeyboardButton::new(BUTTON_CUSTOM_PERIOD)],
        vec![KeyboardButton::new(BUTTON_BACK)],
    ])
    .resize_keyboard()
}

fn confirm_expenses_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Подтвердить", format!("{}:{}", CALLBACK_EXPENSE, ACTION_CONFIRM)),
        InlineKeyboardButton::callback("❌ Отменить", format!("{}:{}", CALLBACK_EXPENSE, ACTION_CANCEL)),
    ]])
}

fn category_emoji_keyboard() -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = CATEGORY_EMOJIS
        .chunks(4)
        .map(|row| {
            row.iter()
                .map(|emoji| InlineKeyboardButton::callback(emoji.to_string(), format!("{}:{}", CALLBACK_EMOJI, emoji)))
                .collect()
        })
        .collect();
    keyboard.push(vec![InlineKeyboardButton::callback(
        "❌ Отменить",
        format!("{}:{}", CALLBACK_EMOJI, ACTION_CANCEL),
    )]);
    InlineKeyboardMarkup::new(keyboard)
}

fn reply_markup(keyboard: &Keyboard) -> ReplyMarkup {
    match keyboard {
        Keyboard::MainMenu => ReplyMarkup::Keyboard(main_menu_keyboard()),
        Keyboard::StatisticsMenu => ReplyMarkup::Keyboard(statistics_menu_keyboard()),
        Keyboard::PeriodSelection { include_all_time } => {
            ReplyMarkup::Keyboard(period_selection_keyboard(*include_all_time))
        }
        Keyboard::ConfirmExpenses => ReplyMarkup::InlineKeyboard(confirm_expenses_keyboard()),
        Keyboard::CategoryEmoji => ReplyMarkup::InlineKeyboard(category_emoji_keyboard()),
    }
}

fn message_sender(msg: &Message) -> Option<Sender> {
    let from = msg.from.as_ref()?;
    Some(Sender {
        id: from.id,
        chat_id: msg.chat.id,
        username: from.username.clone(),
        first_name: from.first_name.clone(),
        last_name: from.last_name.clone(),
    })
}

fn callback_sender(q: &CallbackQuery) -> Sender {
    let chat_id = q
        .message
        .as_ref()
        .map(|message| message.chat().id)
        .unwrap_or_else(|| q.from.id.into());
    Sender {
        id: q.from.id,
        chat_id,
        username: q.from.username.clone(),
        first_name: q.from.first_name.clone(),
        last_name: q.from.last_name.clone(),
    }
}

pub fn schema() -> UpdateHandler<BotError> {
    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(dptree::case![Command::Start].endpoint(handle_start_command))
        .branch(dptree::case![Command::Help].endpoint(handle_help_command));

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(dptree::filter(|msg: Message| msg.voice().is_some()).endpoint(handle_voice_message))
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text_message));

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback_query);

    dptree::entry()
        .branch(message_handler)
        .branch(callback_handler)
}

async fn handle_start_command(msg: Message, dialog: Arc<Dialog>) -> HandlerResult {
    let Some(sender) = message_sender(&msg) else {
        return Ok(());
    };
    dialog.handle_start(&sender).await
}

async fn handle_help_command(msg: Message, dialog: Arc<Dialog>) -> HandlerResult {
    let Some(sender) = message_sender(&msg) else {
        return Ok(());
    };
    dialog.handle_help(&sender).await
}

async fn handle_text_message(msg: Message, dialog: Arc<Dialog>) -> HandlerResult {
    let (Some(sender), Some(text)) = (message_sender(&msg), msg.text()) else {
        return Ok(());
    };
    dialog.handle_text(&sender, text).await
}

async fn handle_voice_message(msg: Message, dialog: Arc<Dialog>) -> HandlerResult {
    let (Some(sender), Some(voice)) = (message_sender(&msg), msg.voice()) else {
        return Ok(());
    };
    dialog.handle_voice(&sender, &voice.file.id).await
}

async fn handle_callback_query(q: CallbackQuery, dialog: Arc<Dialog>) -> HandlerResult {
    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let sender = callback_sender(&q);
    dialog.handle_callback(&sender, &q.id, data).await
}

/// Registers the command list and runs the long-polling dispatcher until
/// Ctrl-C.
pub async fn run(bot: Bot, dialog: Arc<Dialog>) {
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {}", e);
    }

    info!("Starting dispatcher");
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![dialog])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline_rows(markup: ReplyMarkup) -> Vec<Vec<InlineKeyboardButton>> {
        match markup {
            ReplyMarkup::InlineKeyboard(markup) => markup.inline_keyboard,
            other => panic!("expected inline keyboard, got {:?}", other),
        }
    }

    fn reply_rows(markup: ReplyMarkup) -> Vec<Vec<String>> {
        match markup {
            ReplyMarkup::Keyboard(markup) => markup
                .keyboard
                .into_iter()
                .map(|row| row.into_iter().map(|button| button.text).collect())
                .collect(),
            other => panic!("expected reply keyboard, got {:?}", other),
        }
    }

    #[test]
    fn all_time_button_only_for_category_statistics() {
        let with = reply_rows(reply_markup(&Keyboard::PeriodSelection { include_all_time: true }));
        let without = reply_rows(reply_markup(&Keyboard::PeriodSelection { include_all_time: false }));
        assert!(with.iter().flatten().any(|text| text == BUTTON_ALL_TIME));
        assert!(!without.iter().flatten().any(|text| text == BUTTON_ALL_TIME));
        assert_eq!(with.last(), Some(&vec![BUTTON_BACK.to_string()]));
    }

    #[test]
    fn emoji_keyboard_has_rows_of_four_and_cancel() {
        let rows = inline_rows(reply_markup(&Keyboard::CategoryEmoji));
        assert_eq!(rows.len(), CATEGORY_EMOJIS.len() / 4 + 1);
        assert!(rows[..rows.len() - 1].iter().all(|row| row.len() == 4));
        assert_eq!(rows.last().map(|row| row.len()), Some(1));
    }

    #[test]
    fn confirm_keyboard_has_two_buttons() {
        let rows = inline_rows(reply_markup(&Keyboard::ConfirmExpenses));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 2);
    }
}
