use crate::*;

use std::time::Instant;

use teloxide::utils::html::escape;

pub const DEFAULT_CATEGORY_EMOJI: &str = "📁";

/// Confirmation body for a staged batch.
pub fn format_confirmation(drafts: &[ExpenseDraft]) -> String {
    let lines: Vec<String> = drafts
        .iter()
        .map(|draft| {
            let mut line = format!(
                "💰 {:.2} {} — {}",
                draft.amount as f64 / 100.0,
                escape(&draft.currency),
                escape(&draft.category)
            );
            if !draft.description.is_empty() {
                line.push_str(&format!(" ({})", escape(&draft.description)));
            }
            line
        })
        .collect();
    format!("✅ <b>Подтвердите расходы:</b>\n\n{}", lines.join("\n"))
}

impl Dialog {
    pub(crate) async fn start_add_expense(&self, sender: &Sender) -> HandlerResult {
        self.states.set_state(sender.id, DialogState::AwaitingExpenseInput).await;
        self.send(
            sender,
            Reply::html(
                "💰 <b>Добавление расхода</b>\n\n\
                Отправьте голосовое сообщение или напишите текстом.\n\
                Например: <code>500 рублей на еду в Макдональдс</code>",
            )
            .with_keyboard(Keyboard::MainMenu),
        )
        .await
    }

    pub(crate) async fn process_voice_expense(&self, sender: &Sender, user: &User, file_id: &str) -> HandlerResult {
        // Removed with everything inside it when this handler returns.
        let work_dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return self
                    .report_failure(sender, "download_file", &e, "Ошибка получения голосового сообщения.")
                    .await;
            }
        };
        let voice_path = work_dir.path().join("voice.oga");

        if let Err(e) = self.messenger.download_file(file_id, &voice_path).await {
            return self
                .report_failure(sender, "download_file", &e, "Ошибка получения голосового сообщения.")
                .await;
        }

        let started = Instant::now();
        let transcription = self.transcriber.transcribe(&voice_path).await;
        self.metrics.observe_transcription(started.elapsed());

        match transcription {
            Ok(text) => {
                info!("Transcription result for {}: {}", sender.id, text);
                self.process_expense_text(sender, user, &text).await
            }
            Err(e) => {
                self.report_failure(sender, "transcription", &e, "Ошибка распознавания голоса.")
                    .await
            }
        }
    }

    pub(crate) async fn process_expense_text(&self, sender: &Sender, user: &User, text: &str) -> HandlerResult {
        let categories = match self.repository.list_categories_for_user(user.id).await {
            Ok(categories) => categories,
            Err(e) => {
                return self
                    .report_failure(sender, "get_categories", &e, "Ошибка получения категорий.")
                    .await;
            }
        };
        let titles: Vec<String> = categories.into_iter().map(|c| c.title).collect();

        let started = Instant::now();
        let extracted = self.extractor.extract(text, &titles).await;
        self.metrics.observe_llm_parse(started.elapsed());

        let drafts = match extracted {
            Ok(drafts) => drafts,
            Err(e) => {
                return self
                    .report_failure(sender, "llm_parse", &e, "Ошибка обработки текста.")
                    .await;
            }
        };

        if drafts.is_empty() {
            info!("No expenses found in message from {}", sender.id);
            self.metrics.error("llm_parse_failed");
            return self
                .send(
                    sender,
                    Reply::text("Не получилось получить расходы.").with_keyboard(Keyboard::MainMenu),
                )
                .await;
        }

        info!("Parsed {} expenses for {}: {:?}", drafts.len(), sender.id, drafts);
        let confirmation = format_confirmation(&drafts);
        self.states
            .update(sender.id, |data| data.pending_expenses = Some(drafts))
            .await;

        self.send(sender, Reply::html(confirmation).with_keyboard(Keyboard::ConfirmExpenses))
            .await
    }

    pub(crate) async fn handle_expense_action(&self, sender: &Sender, user: &User, callback_id: &str, action: &str) -> HandlerResult {
        match action {
            ACTION_CONFIRM => self.confirm_expenses(sender, user, callback_id).await,
            ACTION_CANCEL => {
                self.metrics.callback("cancel");
                self.states.clear(sender.id).await;
                self.messenger.answer_callback(callback_id, None, false).await?;
                self.send(sender, Reply::text("Отменено.").with_keyboard(Keyboard::MainMenu))
                    .await
            }
            _ => {
                warn!("Unknown expense action: {}", action);
                self.messenger
                    .answer_callback(callback_id, Some(UNKNOWN_ACTION_TEXT), false)
                    .await
            }
        }
    }

    async fn confirm_expenses(&self, sender: &Sender, user: &User, callback_id: &str) -> HandlerResult {
        self.metrics.callback("confirm");

        let Some(drafts) = self.states.take_pending(sender.id).await else {
            info!("Nothing to confirm for {}", sender.id);
            return self
                .messenger
                .answer_callback(callback_id, Some("Ошибка: нет данных расхода"), true)
                .await;
        };

        if let Err((unsaved, e)) = self.persist_drafts(user, drafts).await {
            if self.states.restore_pending(sender.id, unsaved).await {
                info!("Unsaved expenses of {} staged again", sender.id);
            }
            self.messenger.answer_callback(callback_id, None, false).await?;
            return self
                .report_failure(sender, "database", &e, "Ошибка сохранения расхода.")
                .await;
        }

        self.states.clear_unless_pending(sender.id).await;
        self.send(sender, Reply::text("✅ Расходы добавлены!").with_keyboard(Keyboard::MainMenu))
            .await?;
        self.messenger
            .answer_callback(callback_id, Some("Расход сохранен!"), false)
            .await
    }

    /// Writes drafts in order. On failure returns the drafts that were not
    /// written, starting with the failing one.
    async fn persist_drafts(&self, user: &User, drafts: Vec<ExpenseDraft>) -> Result<(), (Vec<ExpenseDraft>, RepositoryError)> {
        let mut categories = match self.repository.list_categories_for_user(user.id).await {
            Ok(categories) => categories,
            Err(e) => return Err((drafts, e)),
        };

        for (index, draft) in drafts.iter().enumerate() {
            if let Err(e) = self.persist_draft(user, draft, &mut categories).await {
                return Err((drafts[index..].to_vec(), e));
            }
        }
        Ok(())
    }

    async fn persist_draft(&self, user: &User, draft: &ExpenseDraft, categories: &mut Vec<Category>) -> Result<(), RepositoryError> {
        let existing = categories
            .iter()
            .find(|c| c.title == draft.category)
            .map(|c| c.id);
        let category_id = match existing {
            _ if draft.category.is_empty() => None,
            Some(id) => Some(id),
            None => {
                let created = self
                    .repository
                    .create_category(user.id, &draft.category, Some(DEFAULT_CATEGORY_EMOJI))
                    .await?;
                self.metrics.category_created();
                let id = created.id;
                categories.push(created);
                Some(id)
            }
        };

        self.repository
            .create_expense(NewExpense {
                user_id: user.id,
                category_id,
                amount: draft.amount,
                currency: draft.currency.clone(),
                description: draft.description.clone(),
            })
            .await?;
        self.metrics.expense_created();
        Ok(())
    }
}
