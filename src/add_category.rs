use crate::*;

use teloxide::utils::html::escape;

const CATEGORY_NAME_PROMPT: &str = "📂 <b>Новая категория</b>\n\nНапишите название категории.";
const MAX_CATEGORY_TITLE_CHARS: usize = 64;

impl Dialog {
    pub(crate) async fn start_add_category(&self, sender: &Sender) -> HandlerResult {
        self.states.update(sender.id, |data| {
            data.state = DialogState::AwaitingCategoryName;
            data.pending_expenses = None;
        })
        .await;
        info!("Changing state of {} to AwaitingCategoryName", sender.id);

        self.send(sender, Reply::html(CATEGORY_NAME_PROMPT).with_keyboard(Keyboard::MainMenu))
            .await
    }

    pub(crate) async fn handle_category_name(&self, sender: &Sender, user: &User, text: &str) -> HandlerResult {
        let title = text.trim();
        if title.is_empty() || title.chars().count() > MAX_CATEGORY_TITLE_CHARS {
            info!("Category name from {} rejected", sender.id);
            return self
                .send(
                    sender,
                    Reply::text(format!(
                        "Название категории должно быть от 1 до {} символов.",
                        MAX_CATEGORY_TITLE_CHARS
                    )),
                )
                .await;
        }

        match self.repository.find_category_by_title(user.id, title).await {
            Ok(Some(_)) => {
                info!("Category '{}' already exists for {}", title, sender.id);
                self.send(
                    sender,
                    Reply::text("Такая категория уже добавлена. Напишите другое название."),
                )
                .await
            }
            Ok(None) => {
                self.states
                    .set_state(
                        sender.id,
                        DialogState::AwaitingCategoryEmoji {
                            title: title.to_string(),
                        },
                    )
                    .await;
                self.remind_category_emoji(sender, title).await
            }
            Err(e) => {
                self.report_failure(sender, "get_categories", &e, "Ошибка получения категорий.")
                    .await
            }
        }
    }

    pub(crate) async fn remind_category_emoji(&self, sender: &Sender, title: &str) -> HandlerResult {
        self.send(
            sender,
            Reply::html(format!("Выберите эмодзи для категории <b>{}</b>:", escape(title)))
                .with_keyboard(Keyboard::CategoryEmoji),
        )
        .await
    }

    pub(crate) async fn handle_emoji_choice(&self, sender: &Sender, user: &User, callback_id: &str, emoji: &str) -> HandlerResult {
        if emoji == ACTION_CANCEL {
            self.metrics.callback("emoji_cancel");
            self.states.clear(sender.id).await;
            self.messenger.answer_callback(callback_id, None, false).await?;
            return self
                .send(sender, Reply::text("Отменено.").with_keyboard(Keyboard::MainMenu))
                .await;
        }

        if !CATEGORY_EMOJIS.contains(&emoji) {
            warn!("Unknown emoji in callback: {}", emoji);
            return self
                .messenger
                .answer_callback(callback_id, Some(UNKNOWN_ACTION_TEXT), false)
                .await;
        }
        self.metrics.callback("emoji");

        // Claimed under the state lock, a second tap finds nothing to create.
        let mut title = None;
        self.states
            .update(sender.id, |data| {
                if let DialogState::AwaitingCategoryEmoji { title: awaiting } = &data.state {
                    title = Some(awaiting.clone());
                    data.state = DialogState::Idle;
                }
            })
            .await;
        let Some(title) = title else {
            return self
                .messenger
                .answer_callback(callback_id, Some("Сначала нажмите «Добавить категорию»."), true)
                .await;
        };

        match self.repository.create_category(user.id, &title, Some(emoji)).await {
            Ok(category) => {
                self.metrics.category_created();
                info!("Category {} '{}' created by {}", category.id, category.title, sender.id);
                self.messenger
                    .answer_callback(callback_id, Some("Категория создана!"), false)
                    .await?;
                self.send(
                    sender,
                    Reply::html(format!("✅ Категория {} <b>{}</b> добавлена!", emoji, escape(&title)))
                        .with_keyboard(Keyboard::MainMenu),
                )
                .await
            }
            Err(e) => {
                self.states
                    .set_state(sender.id, DialogState::AwaitingCategoryEmoji { title })
                    .await;
                self.messenger.answer_callback(callback_id, None, false).await?;
                self.report_failure(sender, "database", &e, "Ошибка сохранения категории.")
                    .await
            }
        }
    }
}
