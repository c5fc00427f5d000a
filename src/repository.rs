use crate::*;

use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Enabled,
    Deleted,
}

#[serde_with::serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: u64,
    pub telegram_id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    #[serde_as(as = "serde_with::TimestampSecondsWithFrac<String>")]
    pub created_at: DateTime<Utc>,
    pub status: Status,
}

#[serde_with::serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Category {
    pub id: u64,
    pub user_id: u64,
    pub title: String,
    pub emoji: Option<String>,
    #[serde_as(as = "serde_with::TimestampSecondsWithFrac<String>")]
    pub created_at: DateTime<Utc>,
    pub status: Status,
}

#[serde_with::serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Expense {
    pub id: u64,
    pub user_id: u64,
    pub category_id: Option<u64>,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub description: String,
    #[serde_as(as = "serde_with::TimestampSecondsWithFrac<String>")]
    pub created_at: DateTime<Utc>,
    pub status: Status,
    /// Joined on read, never stored.
    #[serde(skip)]
    pub category: Option<Category>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExpense {
    pub user_id: u64,
    pub category_id: Option<u64>,
    pub amount: i64,
    pub currency: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    pub page: usize,
    pub page_size: usize,
}

impl Pager {
    pub const ALL: Pager = Pager {
        page: 0,
        page_size: usize::MAX,
    };

    fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.page.saturating_mul(self.page_size))
            .take(self.page_size)
            .collect()
    }
}

/// Filters for expense listings. Bounds are exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseSearch {
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub category_id: Option<u64>,
    pub sort: SortDirection,
    pub pager: Pager,
}

impl Default for ExpenseSearch {
    fn default() -> Self {
        ExpenseSearch {
            created_after: None,
            created_before: None,
            category_id: None,
            sort: SortDirection::Desc,
            pager: Pager::ALL,
        }
    }
}

impl ExpenseSearch {
    pub fn within(period: &TimePeriod) -> Self {
        ExpenseSearch {
            created_after: Some(period.start),
            created_before: Some(period.end),
            ..Default::default()
        }
    }
}

/// Telegram profile data used when registering a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub telegram_id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

impl From<&Sender> for UserProfile {
    fn from(sender: &Sender) -> Self {
        UserProfile {
            telegram_id: sender.id,
            username: sender.username.clone(),
            first_name: sender.first_name.clone(),
            last_name: sender.last_name.clone(),
        }
    }
}

/// Storage for users, categories and expenses. Single-entity lookups report
/// absence as `Ok(None)`. Deletes only flip the status.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_or_create_user_by_external_id(&self, profile: &UserProfile) -> Result<User, RepositoryError>;
    async fn get_user_by_external_id(&self, telegram_id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn list_categories_for_user(&self, user_id: u64) -> Result<Vec<Category>, RepositoryError>;
    async fn create_category(&self, user_id: u64, title: &str, emoji: Option<&str>) -> Result<Category, RepositoryError>;
    async fn find_category_by_title(&self, user_id: u64, title: &str) -> Result<Option<Category>, RepositoryError>;
    async fn delete_category(&self, category_id: u64) -> Result<(), RepositoryError>;
    async fn create_expense(&self, expense: NewExpense) -> Result<Expense, RepositoryError>;
    async fn list_expenses_for_user(&self, user_id: u64, search: &ExpenseSearch) -> Result<Vec<Expense>, RepositoryError>;
    async fn delete_expense(&self, expense_id: u64) -> Result<(), RepositoryError>;
    async fn count_expenses(&self) -> Result<u64, RepositoryError>;
    async fn count_categories(&self) -> Result<u64, RepositoryError>;
    async fn ping(&self) -> Result<(), RepositoryError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct StoredData {
    next_id: u64,
    users: Vec<User>,
    categories: Vec<Category>,
    expenses: Vec<Expense>,
}

impl StoredData {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Repository kept in memory and written through to a JSON file after every
/// change. Without a path it never touches the disk.
#[derive(Clone)]
pub struct JsonRepository {
    path: Option<PathBuf>,
    data: Arc<Mutex<StoredData>>,
}

impl JsonRepository {
    pub fn in_memory() -> Self {
        JsonRepository {
            path: None,
            data: Arc::new(Mutex::new(StoredData::default())),
        }
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        info!("Loading data from {}...", path.display());
        let data = if Path::new(&path).exists() {
            info!("Found data file, reading...");
            let file_content = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&file_content)?
        } else {
            info!("No data file - creating new");
            StoredData::default()
        };

        Ok(JsonRepository {
            path: Some(path),
            data: Arc::new(Mutex::new(data)),
        })
    }

    async fn save(&self, data: &StoredData) -> Result<(), RepositoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        debug!("Saving data...");
        let json = serde_json::to_string_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Applies `change` to a copy of the data and keeps the copy only once
    /// it has been saved, so a failed write leaves nothing behind in memory.
    async fn commit<T>(
        &self,
        data: &mut StoredData,
        change: impl FnOnce(&mut StoredData) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut next = data.clone();
        let result = change(&mut next)?;
        self.save(&next).await?;
        *data = next;
        Ok(result)
    }
}

#[async_trait]
impl Repository for JsonRepository {
    async fn get_or_create_user_by_external_id(&self, profile: &UserProfile) -> Result<User, RepositoryError> {
        let mut data = self.data.lock().await;
        if let Some(user) = data
            .users
            .iter()
            .find(|u| u.telegram_id == profile.telegram_id && u.status == Status::Enabled)
        {
            return Ok(user.clone());
        }

        let user = self
            .commit(&mut data, |next| {
                let user = User {
                    id: next.allocate_id(),
                    telegram_id: profile.telegram_id,
                    username: profile.username.clone(),
                    first_name: profile.first_name.clone(),
                    last_name: profile.last_name.clone(),
                    created_at: Utc::now(),
                    status: Status::Enabled,
                };
                next.users.push(user.clone());
                Ok(user)
            })
            .await?;

        info!("New user created: {} (telegram id {})", user.id, profile.telegram_id);
        Ok(user)
    }

    async fn get_user_by_external_id(&self, telegram_id: UserId) -> Result<Option<User>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data
            .users
            .iter()
            .find(|u| u.telegram_id == telegram_id && u.status == Status::Enabled)
            .cloned())
    }

    async fn list_categories_for_user(&self, user_id: u64) -> Result<Vec<Category>, RepositoryError> {
        let data = self.data.lock().await;
        let mut categories: Vec<Category> = data
            .categories
            .iter()
            .filter(|c| c.user_id == user_id && c.status == Status::Enabled)
            .cloned()
            .collect();
        categories.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(categories)
    }

    async fn create_category(&self, user_id: u64, title: &str, emoji: Option<&str>) -> Result<Category, RepositoryError> {
        let mut data = self.data.lock().await;
        if !data.users.iter().any(|u| u.id == user_id) {
            return Err(RepositoryError::Missing { entity: "user", id: user_id });
        }

        let category = self
            .commit(&mut data, |next| {
                let category = Category {
                    id: next.allocate_id(),
                    user_id,
                    title: title.to_string(),
                    emoji: emoji.map(str::to_string),
                    created_at: Utc::now(),
                    status: Status::Enabled,
                };
                next.categories.push(category.clone());
                Ok(category)
            })
            .await?;

        info!("Category created: {} '{}' for user {}", category.id, category.title, user_id);
        Ok(category)
    }

    async fn find_category_by_title(&self, user_id: u64, title: &str) -> Result<Option<Category>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data
            .categories
            .iter()
            .find(|c| c.user_id == user_id && c.title == title && c.status == Status::Enabled)
            .cloned())
    }

    async fn delete_category(&self, category_id: u64) -> Result<(), RepositoryError> {
        let mut data = self.data.lock().await;
        self.commit(&mut data, |next| {
            let category = next
                .categories
                .iter_mut()
                .find(|c| c.id == category_id)
                .ok_or(RepositoryError::Missing { entity: "category", id: category_id })?;
            category.status = Status::Deleted;
            Ok(())
        })
        .await
    }

    async fn create_expense(&self, expense: NewExpense) -> Result<Expense, RepositoryError> {
        let mut data = self.data.lock().await;
        if !data.users.iter().any(|u| u.id == expense.user_id) {
            return Err(RepositoryError::Missing { entity: "user", id: expense.user_id });
        }
        let category = match expense.category_id {
            Some(id) => Some(
                data.categories
                    .iter()
                    .find(|c| c.id == id)
                    .cloned()
                    .ok_or(RepositoryError::Missing { entity: "category", id })?,
            ),
            None => None,
        };

        let mut created = self
            .commit(&mut data, |next| {
                let created = Expense {
                    id: next.allocate_id(),
                    user_id: expense.user_id,
                    category_id: expense.category_id,
                    amount: expense.amount,
                    currency: expense.currency,
                    description: expense.description,
                    created_at: Utc::now(),
                    status: Status::Enabled,
                    category: None,
                };
                next.expenses.push(created.clone());
                Ok(created)
            })
            .await?;

        info!(
            "Expense created: {} for user {}, {} {}",
            created.id, created.user_id, created.amount, created.currency
        );
        created.category = category;
        Ok(created)
    }

    async fn list_expenses_for_user(&self, user_id: u64, search: &ExpenseSearch) -> Result<Vec<Expense>, RepositoryError> {
        let data = self.data.lock().await;
        let mut expenses: Vec<Expense> = data
            .expenses
            .iter()
            .filter(|e| e.user_id == user_id && e.status == Status::Enabled)
            .filter(|e| search.created_after.map_or(true, |after| e.created_at > after))
            .filter(|e| search.created_before.map_or(true, |before| e.created_at < before))
            .filter(|e| search.category_id.map_or(true, |id| e.category_id == Some(id)))
            .cloned()
            .map(|mut e| {
                e.category = e
                    .category_id
                    .and_then(|id| data.categories.iter().find(|c| c.id == id).cloned());
                e
            })
            .collect();

        match search.sort {
            SortDirection::Asc => expenses.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            SortDirection::Desc => expenses.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
        Ok(search.pager.apply(expenses))
    }

    async fn delete_expense(&self, expense_id: u64) -> Result<(), RepositoryError> {
        let mut data = self.data.lock().await;
        self.commit(&mut data, |next| {
            let expense = next
                .expenses
                .iter_mut()
                .find(|e| e.id == expense_id)
                .ok_or(RepositoryError::Missing { entity: "expense", id: expense_id })?;
            expense.status = Status::Deleted;
            Ok(())
        })
        .await
    }

    async fn count_expenses(&self) -> Result<u64, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data.expenses.iter().filter(|e| e.status == Status::Enabled).count() as u64)
    }

    async fn count_categories(&self) -> Result<u64, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data.categories.iter().filter(|c| c.status == Status::Enabled).count() as u64)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        let _data = self.data.lock().await;
        match &self.path {
            Some(path) if path.exists() => {
                tokio::fs::metadata(path).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
