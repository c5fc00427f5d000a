use crate::*;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use teloxide::utils::html::escape;

pub const NO_CATEGORY_TITLE: &str = "Без категории";
pub const NO_CATEGORY_EMOJI: &str = "❓";

/// Approximate weight of one unit of `currency`. Only used to order
/// categories and totals, never to convert displayed amounts.
pub fn currency_rate(currency: &str) -> f64 {
    match currency.to_uppercase().as_str() {
        "USD" | "EUR" | "GBP" | "CHF" => 100.0,
        "GEL" => 30.0,
        "CNY" => 10.0,
        "RUB" => 1.0,
        "JPY" => 0.5,
        "KZT" => 0.14,
        _ => 1.0,
    }
}

fn currency_flag(currency: &str) -> Option<&'static str> {
    match currency {
        "RUB" => Some("🇷🇺"),
        "USD" => Some("🇺🇸"),
        "EUR" => Some("🇪🇺"),
        "GEL" => Some("🇬🇪"),
        "GBP" => Some("🇬🇧"),
        "JPY" => Some("🇯🇵"),
        "CNY" => Some("🇨🇳"),
        "CHF" => Some("🇨🇭"),
        "KZT" => Some("🇰🇿"),
        _ => None,
    }
}

fn currency_with_flag(currency: &str) -> String {
    let code = currency.to_uppercase();
    match currency_flag(&code) {
        Some(flag) => format!("{}{}", code, flag),
        None => code,
    }
}

/// `50000` -> `"500"`, `50050` -> `"500.50"`.
pub fn format_amount(minor_units: i64) -> String {
    if minor_units % 100 == 0 {
        format!("{}", minor_units / 100)
    } else {
        format!("{:.2}", minor_units as f64 / 100.0)
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn in_period<'a>(expenses: &'a [Expense], period: &TimePeriod) -> Vec<&'a Expense> {
    expenses
        .iter()
        .filter(|expense| period.contains(&expense.created_at))
        .collect()
}

fn category_label(expense: &Expense) -> (String, String) {
    match &expense.category {
        Some(category) => (category.title.clone(), category.emoji.clone().unwrap_or_default()),
        None => (NO_CATEGORY_TITLE.to_string(), NO_CATEGORY_EMOJI.to_string()),
    }
}

fn weighted_total(amounts: &BTreeMap<String, i64>) -> f64 {
    amounts
        .iter()
        .map(|(currency, amount)| *amount as f64 * currency_rate(currency))
        .sum()
}

/// Grand total per currency, highest-weighted currency first, then by code.
pub fn format_total(expenses: &[&Expense]) -> String {
    let mut totals: BTreeMap<String, i64> = BTreeMap::new();
    for expense in expenses {
        *totals.entry(expense.currency.clone()).or_default() += expense.amount;
    }

    let mut currencies: Vec<(String, i64)> = totals.into_iter().filter(|(_, amount)| *amount > 0).collect();
    currencies.sort_by(|(a, _), (b, _)| {
        currency_rate(b)
            .partial_cmp(&currency_rate(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cmp(b))
    });

    currencies
        .iter()
        .map(|(currency, amount)| format!("{} {}", format_amount(*amount), currency_with_flag(currency)))
        .collect::<Vec<_>>()
        .join(" / ")
}

struct CategoryStats {
    title: String,
    emoji: String,
    amounts: BTreeMap<String, i64>,
}

/// Per-category sums for expenses strictly inside `period`.
pub fn by_category(expenses: &[Expense], period: &TimePeriod) -> String {
    let filtered = in_period(expenses, period);
    if filtered.is_empty() {
        return "📊 <b>Статистика</b>\n\n<i>Пока нет расходов.</i>".to_string();
    }

    let mut categories: HashMap<String, CategoryStats> = HashMap::new();
    let mut currency_frequency: HashMap<String, usize> = HashMap::new();
    for expense in &filtered {
        let key = match &expense.category {
            Some(category) => category.title.clone(),
            None => "__no_category__".to_string(),
        };
        let stats = categories.entry(key).or_insert_with(|| {
            let (title, emoji) = category_label(expense);
            CategoryStats {
                title,
                emoji,
                amounts: BTreeMap::new(),
            }
        });
        *stats.amounts.entry(expense.currency.clone()).or_default() += expense.amount;
        *currency_frequency.entry(expense.currency.clone()).or_default() += 1;
    }

    let mut currency_order: Vec<(String, usize)> = currency_frequency.into_iter().collect();
    currency_order.sort_by(|(a_code, a_count), (b_code, b_count)| b_count.cmp(a_count).then_with(|| a_code.cmp(b_code)));

    let mut ranked: Vec<(f64, CategoryStats)> = categories
        .into_values()
        .map(|stats| (weighted_total(&stats.amounts), stats))
        .collect();
    ranked.sort_by(|(a_total, a), (b_total, b)| {
        b_total
            .partial_cmp(a_total)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.title.cmp(&b.title))
    });

    let mut text = String::from("📊 <b>Статистика по категориям:</b>\n");
    text.push_str(&format!("<i>{}</i>\n\n", period.format()));
    text.push_str(&format!("💰 <b>Всего:</b> {}\n\n", format_total(&filtered)));

    for (_, stats) in &ranked {
        let amounts: Vec<String> = currency_order
            .iter()
            .filter_map(|(currency, _)| {
                stats
                    .amounts
                    .get(currency)
                    .map(|amount| format!("{} {}", format_amount(*amount), currency.to_uppercase()))
            })
            .collect();
        text.push_str(&format!(
            "{} <b>{}:</b> {}\n",
            stats.emoji,
            escape(&stats.title),
            amounts.join("/")
        ));
    }

    text
}

/// One line per expense strictly inside `period`, newest first.
pub fn by_expense(expenses: &[Expense], period: &TimePeriod) -> String {
    let mut filtered = in_period(expenses, period);
    if filtered.is_empty() {
        return format!(
            "📊 <b>Статистика по тратам:</b>\n<i>{}</i>\n\n<i>Нет расходов за этот период.</i>",
            period.format()
        );
    }
    filtered.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut text = String::from("📊 <b>Статистика по тратам:</b>\n");
    text.push_str(&format!("<i>{}</i>\n\n", period.format()));
    text.push_str(&format!("💰 <b>Всего:</b> {}\n\n", format_total(&filtered)));

    for expense in &filtered {
        let (title, emoji) = category_label(expense);
        let amount = format_amount(expense.amount);
        let currency = expense.currency.to_uppercase();
        let date = format_date(&expense.created_at);

        if expense.description.is_empty() {
            text.push_str(&format!(
                "<b>{}{}</b>: {} {} ({})\n",
                emoji,
                escape(&title),
                amount,
                currency,
                date
            ));
        } else {
            text.push_str(&format!(
                "<b>{}</b> ({}{}): {} {} ({})\n",
                escape(&capitalize(&expense.description)),
                emoji,
                escape(&title),
                amount,
                currency,
                date
            ));
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn period() -> TimePeriod {
        TimePeriod::from_days(
            NaiveDate::from_ymd_opt(2025, 4, 3).unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 7).unwrap(),
        )
    }

    fn category(title: &str, emoji: &str) -> Category {
        Category {
            id: 1,
            user_id: 1,
            title: title.to_string(),
            emoji: Some(emoji.to_string()),
            created_at: Utc::now(),
            status: Status::Enabled,
        }
    }

    fn expense(amount: i64, currency: &str, category: Option<Category>, description: &str, created_at: DateTime<Utc>) -> Expense {
        Expense {
            id: 1,
            user_id: 1,
            category_id: category.as_ref().map(|c| c.id),
            amount,
            currency: currency.to_string(),
            description: description.to_string(),
            created_at,
            status: Status::Enabled,
            category,
        }
    }

    #[test]
    fn amounts_drop_zero_cents() {
        assert_eq!(format_amount(50000), "500");
        assert_eq!(format_amount(50050), "500.50");
        assert_eq!(format_amount(5), "0.05");
    }

    #[test]
    fn capitalizes_cyrillic() {
        assert_eq!(capitalize("хлеб"), "Хлеб");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn boundary_expenses_are_excluded() {
        let p = period();
        let mid = p.start + Duration::hours(12);
        let expenses = vec![
            expense(100, "RUB", None, "на старте", p.start),
            expense(200, "RUB", None, "в конце", p.end),
            expense(300, "RUB", None, "внутри", mid),
        ];

        let by_expense_text = by_expense(&expenses, &p);
        assert!(by_expense_text.contains("Внутри"));
        assert!(!by_expense_text.contains("На старте"));
        assert!(!by_expense_text.contains("В конце"));

        let by_category_text = by_category(&expenses, &p);
        assert!(by_category_text.contains("💰 <b>Всего:</b> 3 RUB🇷🇺"));
    }

    #[test]
    fn empty_period_messages() {
        let p = period();
        assert_eq!(by_category(&[], &p), "📊 <b>Статистика</b>\n\n<i>Пока нет расходов.</i>");
        assert!(by_expense(&[], &p).ends_with("<i>Нет расходов за этот период.</i>"));
    }

    #[test]
    fn categories_are_ranked_by_weighted_total() {
        let p = period();
        let at = p.start + Duration::hours(1);
        let food = category("Еда", "🍔");
        let travel = category("Транспорт", "🚕");
        let expenses = vec![
            expense(100000, "RUB", Some(food.clone()), "", at),
            expense(20000, "RUB", Some(food), "", at),
            expense(5000, "USD", Some(travel), "такси", at),
            expense(700, "RUB", None, "", at),
        ];

        let text = by_category(&expenses, &p);
        let travel_pos = text.find("🚕 <b>Транспорт:</b> 50 USD").unwrap();
        let food_pos = text.find("🍔 <b>Еда:</b> 1200 RUB").unwrap();
        let none_pos = text.find("❓ <b>Без категории:</b> 7 RUB").unwrap();
        assert!(travel_pos < food_pos && food_pos < none_pos);
        assert!(text.contains("💰 <b>Всего:</b> 50 USD🇺🇸 / 1207 RUB🇷🇺"));
    }

    #[test]
    fn currencies_in_a_category_follow_frequency() {
        let p = period();
        let at = p.start + Duration::hours(1);
        let food = category("Еда", "🍔");
        let expenses = vec![
            expense(100, "USD", Some(food.clone()), "", at),
            expense(100, "RUB", Some(food.clone()), "", at),
            expense(100, "RUB", Some(food), "", at),
        ];
        assert!(by_category(&expenses, &p).contains("🍔 <b>Еда:</b> 2 RUB/1 USD"));
    }

    #[test]
    fn expense_lines_are_newest_first() {
        let p = period();
        let food = category("Еда", "🍔");
        let older = p.start + Duration::hours(1);
        let newer = p.start + Duration::days(2);
        let expenses = vec![
            expense(50050, "RUB", Some(food.clone()), "хлеб", older),
            expense(1000, "eur", Some(food), "", newer),
        ];

        let text = by_expense(&expenses, &p);
        let newer_line = format!("<b>🍔Еда</b>: 10 EUR ({})", format_date(&newer));
        let older_line = format!("<b>Хлеб</b> (🍔Еда): 500.50 RUB ({})", format_date(&older));
        assert!(text.find(&newer_line).unwrap() < text.find(&older_line).unwrap());
    }

    #[test]
    fn total_skips_zero_and_orders_by_rate_then_code() {
        let at = period().start + Duration::hours(1);
        let expenses = vec![
            expense(100, "RUB", None, "", at),
            expense(100, "GBP", None, "", at),
            expense(100, "EUR", None, "", at),
            expense(0, "JPY", None, "", at),
        ];
        let refs: Vec<&Expense> = expenses.iter().collect();
        assert_eq!(format_total(&refs), "1 EUR🇪🇺 / 1 GBP🇬🇧 / 1 RUB🇷🇺");
    }

    #[test]
    fn user_text_is_escaped() {
        let p = period();
        let at = p.start + Duration::hours(1);
        let expenses = vec![expense(100, "RUB", None, "<b>", at)];
        assert!(by_expense(&expenses, &p).contains("<b>&lt;b&gt;</b>"));
    }
}
