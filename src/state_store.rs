use crate::*;

/// Volatile per-user dialog state. Every operation takes the map lock once,
/// so a reader always sees a whole record and no lock outlives a call.
#[derive(Clone, Default)]
pub struct StateStore {
    states: Arc<Mutex<HashMap<UserId, UserStateData>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Missing users are reported as idle.
    pub async fn get(&self, user_id: UserId) -> UserStateData {
        let states = self.states.lock().await;
        states.get(&user_id).cloned().unwrap_or_default()
    }

    /// Changes only the dialog position, keeping pending drafts and stats kind.
    pub async fn set_state(&self, user_id: UserId, state: DialogState) {
        info!("Changing state of {} to {:?}", user_id, state);
        let mut states = self.states.lock().await;
        states.entry(user_id).or_default().state = state;
    }

    pub async fn set_state_data(&self, user_id: UserId, data: UserStateData) {
        info!("Replacing state data of {}: {:?}", user_id, data.state);
        let mut states = self.states.lock().await;
        states.insert(user_id, data);
    }

    /// Read-modify-write under a single lock acquisition.
    pub async fn update<F>(&self, user_id: UserId, f: F) -> UserStateData
    where
        F: FnOnce(&mut UserStateData),
    {
        let mut states = self.states.lock().await;
        let entry = states.entry(user_id).or_default();
        f(entry);
        entry.clone()
    }

    pub async fn clear(&self, user_id: UserId) {
        info!("Clearing state of {}", user_id);
        let mut states = self.states.lock().await;
        states.remove(&user_id);
    }

    /// Removes and returns the pending batch. A second caller racing on the
    /// same batch gets `None`.
    pub async fn take_pending(&self, user_id: UserId) -> Option<Vec<ExpenseDraft>> {
        let mut states = self.states.lock().await;
        let entry = states.get_mut(&user_id)?;
        match entry.pending_expenses.take() {
            Some(drafts) if !drafts.is_empty() => Some(drafts),
            _ => None,
        }
    }

    /// Stages drafts only if nothing newer was staged since they were taken.
    pub async fn restore_pending(&self, user_id: UserId, drafts: Vec<ExpenseDraft>) -> bool {
        let mut states = self.states.lock().await;
        let entry = states.entry(user_id).or_default();
        if entry.has_pending() {
            return false;
        }
        entry.pending_expenses = Some(drafts);
        true
    }

    /// Returns the user to idle unless a newer batch was staged meanwhile.
    pub async fn clear_unless_pending(&self, user_id: UserId) -> bool {
        let mut states = self.states.lock().await;
        if states.get(&user_id).is_some_and(UserStateData::has_pending) {
            info!("Keeping state of {}, a newer batch is pending", user_id);
            return false;
        }
        info!("Clearing state of {}", user_id);
        states.remove(&user_id);
        true
    }

    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(amount: i64) -> ExpenseDraft {
        ExpenseDraft {
            amount,
            currency: "RUB".to_string(),
            category: "Еда".to_string(),
            description: "хлеб".to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_user_reads_as_idle() {
        let store = StateStore::new();
        let data = store.get(UserId(42)).await;
        assert_eq!(data, UserStateData::default());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn set_state_preserves_other_fields() {
        let store = StateStore::new();
        store
            .set_state_data(
                UserId(1),
                UserStateData {
                    state: DialogState::InStatisticsMenu,
                    pending_expenses: Some(vec![draft(100)]),
                    stats_kind: Some(StatsKind::ByExpense),
                },
            )
            .await;

        store.set_state(UserId(1), DialogState::InPeriodSelection).await;

        let data = store.get(UserId(1)).await;
        assert_eq!(data.state, DialogState::InPeriodSelection);
        assert_eq!(data.pending_expenses, Some(vec![draft(100)]));
        assert_eq!(data.stats_kind, Some(StatsKind::ByExpense));
    }

    #[tokio::test]
    async fn set_state_creates_missing_record() {
        let store = StateStore::new();
        store.set_state(UserId(7), DialogState::AwaitingExpenseInput).await;
        assert_eq!(store.get(UserId(7)).await.state, DialogState::AwaitingExpenseInput);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn clear_removes_record() {
        let store = StateStore::new();
        store.set_state(UserId(7), DialogState::InStatisticsMenu).await;
        store.clear(UserId(7)).await;
        assert_eq!(store.get(UserId(7)).await, UserStateData::default());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn users_do_not_share_records() {
        let store = StateStore::new();
        store.set_state(UserId(1), DialogState::InStatisticsMenu).await;
        store.set_state(UserId(2), DialogState::AwaitingCustomPeriodText).await;
        store.clear(UserId(1)).await;
        assert_eq!(store.get(UserId(2)).await.state, DialogState::AwaitingCustomPeriodText);
    }

    #[tokio::test]
    async fn take_pending_hands_out_batch_once() {
        let store = StateStore::new();
        store
            .update(UserId(1), |data| data.pending_expenses = Some(vec![draft(1), draft(2)]))
            .await;

        let (first, second) = tokio::join!(store.take_pending(UserId(1)), store.take_pending(UserId(1)));
        let taken: Vec<_> = [first, second].into_iter().flatten().collect();
        assert_eq!(taken, vec![vec![draft(1), draft(2)]]);
        assert!(!store.get(UserId(1)).await.has_pending());
    }

    #[tokio::test]
    async fn restore_does_not_overwrite_newer_batch() {
        let store = StateStore::new();
        store
            .update(UserId(1), |data| data.pending_expenses = Some(vec![draft(5)]))
            .await;
        assert!(!store.restore_pending(UserId(1), vec![draft(1)]).await);
        assert_eq!(store.get(UserId(1)).await.pending_expenses, Some(vec![draft(5)]));

        store.take_pending(UserId(1)).await;
        assert!(store.restore_pending(UserId(1), vec![draft(1)]).await);
        assert_eq!(store.get(UserId(1)).await.pending_expenses, Some(vec![draft(1)]));
    }

    #[tokio::test]
    async fn clear_unless_pending_keeps_newer_batch() {
        let store = StateStore::new();
        store
            .update(UserId(1), |data| data.pending_expenses = Some(vec![draft(5)]))
            .await;
        assert!(!store.clear_unless_pending(UserId(1)).await);
        assert_eq!(store.get(UserId(1)).await.pending_expenses, Some(vec![draft(5)]));

        store.take_pending(UserId(1)).await;
        assert!(store.clear_unless_pending(UserId(1)).await);
        assert!(store.is_empty().await);
    }
}
