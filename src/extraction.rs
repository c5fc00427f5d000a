use crate::*;

use std::time::Duration;

use regex::Regex;

pub const DEFAULT_CURRENCY: &str = "RUB";

const SYSTEM_PROMPT: &str = r#"Ты извлекаешь расходы из текста пользователя и отвечаешь ТОЛЬКО валидным JSON массивом.
Пользователь присылает список своих категорий и текст с расходами.
Если расходов нет или у всех нулевая сумма, ответь пустым массивом [].

Формат ответа:
[
  {
    "amount": <положительное число с плавающей точкой>,
    "currency": "RUB|USD|EUR|...",
    "category": "<непустая строка>",
    "description": "<строка или пусто>"
  }
]

Правила:
- amount всегда с десятичной частью (500.0, 20.50), копейки и центы сохраняй точно
- Если валюта не указана, используй RUB
- Если описание неясно или повторяет категорию, оставь description пустым
- Расходы с нулевой суммой пропускай
- Никаких пояснений и markdown, только JSON массив

Категории:
- Сначала подбирай подходящую по смыслу существующую категорию
- Если ни одна не подходит, придумай новую: существительное в именительном падеже ("Еда", "Транспорт", "Здоровье")

Примеры (существующие категории: Еда, Транспорт, Дом):
"купил хлеба на 500 рублей" -> [{"amount": 500.0, "currency": "RUB", "category": "Еда", "description": "хлеб"}]
"потратил 50 долларов на такси и 20 на кофе" -> [{"amount": 50.0, "currency": "USD", "category": "Транспорт", "description": "такси"}, {"amount": 20.0, "currency": "USD", "category": "Еда", "description": "кофе"}]
"1200 на коммуналку" -> [{"amount": 1200.0, "currency": "RUB", "category": "Дом", "description": "коммуналка"}]
"сегодня гулял в парке" -> []"#;

/// Turns free text into expense drafts. An empty list means no expenses
/// were found, which is not an error.
#[async_trait]
pub trait ExpenseExtractor: Send + Sync {
    async fn extract(&self, text: &str, categories: &[String]) -> Result<Vec<ExpenseDraft>, ExtractionError>;
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize, Debug)]
struct ParsedExpense {
    amount: f64,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    description: String,
}

impl From<ParsedExpense> for ExpenseDraft {
    fn from(parsed: ParsedExpense) -> Self {
        let currency = parsed.currency.trim().to_uppercase();
        ExpenseDraft {
            amount: (parsed.amount * 100.0).round() as i64,
            currency: if currency.is_empty() {
                DEFAULT_CURRENCY.to_string()
            } else {
                currency
            },
            category: parsed.category.trim().to_string(),
            description: parsed.description.trim().to_string(),
        }
    }
}

/// Client for an OpenAI-compatible chat completion endpoint.
pub struct GroqExtractor {
    client: reqwest::Client,
    api_url: String,
    model: String,
    token: String,
}

impl GroqExtractor {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(GroqExtractor {
            client,
            api_url: api_url.into(),
            model: model.into(),
            token: token.into(),
        })
    }

    async fn call_chat(&self, user_prompt: &str) -> Result<String, ExtractionError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| ExtractionError::Malformed(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(ExtractionError::EmptyResponse)
    }
}

#[async_trait]
impl ExpenseExtractor for GroqExtractor {
    async fn extract(&self, text: &str, categories: &[String]) -> Result<Vec<ExpenseDraft>, ExtractionError> {
        let prompt = build_user_prompt(text, categories);
        let content = self.call_chat(&prompt).await?;
        debug!("Extraction response: {}", content);
        parse_drafts(&content)
    }
}

/// Stands in when no API token is configured.
pub struct DisabledExtractor {
    reason: String,
}

impl DisabledExtractor {
    pub fn new(reason: impl Into<String>) -> Self {
        DisabledExtractor { reason: reason.into() }
    }
}

#[async_trait]
impl ExpenseExtractor for DisabledExtractor {
    async fn extract(&self, _text: &str, _categories: &[String]) -> Result<Vec<ExpenseDraft>, ExtractionError> {
        Err(ExtractionError::NotConfigured(self.reason.clone()))
    }
}

const MOCK_CATEGORY_KEYWORDS: [(&str, &str); 12] = [
    ("еда", "Еда"),
    ("food", "Еда"),
    ("транспорт", "Транспорт"),
    ("transport", "Транспорт"),
    ("дом", "Дом"),
    ("home", "Дом"),
    ("развлечени", "Развлечения"),
    ("entertainment", "Развлечения"),
    ("здоровье", "Здоровье"),
    ("health", "Здоровье"),
    ("покупк", "Покупки"),
    ("shopping", "Покупки"),
];

const MOCK_FILLER_WORDS: [&str; 16] = [
    "купил", "купила", "потратил", "потратила", "на", "в", "категории", "рублей", "рубля", "рубль", "руб",
    "₽", "spent", "bought", "category", "on",
];

/// Keyword matching extractor for running without an API token. Finds at
/// most one expense per message.
#[derive(Default)]
pub struct MockExtractor;

impl MockExtractor {
    pub fn new() -> Self {
        MockExtractor
    }
}

#[async_trait]
impl ExpenseExtractor for MockExtractor {
    async fn extract(&self, text: &str, categories: &[String]) -> Result<Vec<ExpenseDraft>, ExtractionError> {
        debug!("Mock extraction of {:?} with categories {:?}", text, categories);
        let lower = text.to_lowercase();

        let amount_re = Regex::new(r"\d+(?:[.,]\d+)?").map_err(|e| ExtractionError::Malformed(e.to_string()))?;
        let Some(amount_match) = amount_re.find(&lower) else {
            return Ok(vec![]);
        };
        let amount: f64 = amount_match
            .as_str()
            .replace(',', ".")
            .parse()
            .map_err(|_| ExtractionError::Malformed(format!("bad amount {}", amount_match.as_str())))?;
        if amount <= 0.0 {
            return Ok(vec![]);
        }

        let currency = if ["dollar", "доллар", "usd", "$"].iter().any(|w| lower.contains(w)) {
            "USD"
        } else if ["euro", "евро", "eur", "€"].iter().any(|w| lower.contains(w)) {
            "EUR"
        } else {
            DEFAULT_CURRENCY
        };

        let category = categories
            .iter()
            .find(|title| !title.is_empty() && lower.contains(&title.to_lowercase()))
            .cloned()
            .or_else(|| {
                MOCK_CATEGORY_KEYWORDS
                    .iter()
                    .find(|(keyword, _)| lower.contains(keyword))
                    .map(|(_, title)| title.to_string())
            })
            .unwrap_or_default();
        let category_lower = category.to_lowercase();

        let description = lower
            .replace(amount_match.as_str(), " ")
            .split_whitespace()
            .filter(|word| !MOCK_FILLER_WORDS.contains(word))
            .filter(|word| category_lower.is_empty() || !word.starts_with(&category_lower))
            .filter(|word| !["usd", "eur", "$", "€", "долларов", "евро"].contains(word))
            .collect::<Vec<_>>()
            .join(" ");
        let description = if description.chars().count() < 3 {
            String::new()
        } else {
            description
        };

        Ok(vec![ExpenseDraft {
            amount: (amount * 100.0).round() as i64,
            currency: currency.to_string(),
            category,
            description,
        }])
    }
}

pub fn build_user_prompt(text: &str, categories: &[String]) -> String {
    format!(
        "Существующие категории: {}\n\nТекст пользователя с расходами: {}\n",
        categories.join(", "),
        text
    )
}

/// Parses the completion content as a strict JSON array, unwrapping a
/// markdown code fence if the model added one.
pub fn parse_drafts(content: &str) -> Result<Vec<ExpenseDraft>, ExtractionError> {
    let json = strip_code_fence(content);
    let parsed: Vec<ParsedExpense> = serde_json::from_str(json)
        .map_err(|e| ExtractionError::Malformed(format!("{}, response: {}", e, content)))?;
    Ok(parsed.into_iter().map(ExpenseDraft::from).collect())
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_prefers_user_categories() {
        let drafts = MockExtractor::new()
            .extract("Кофе 250 рублей", &["Кофе".to_string()])
            .await
            .unwrap();
        assert_eq!(
            drafts,
            vec![ExpenseDraft {
                amount: 25000,
                currency: "RUB".to_string(),
                category: "Кофе".to_string(),
                description: String::new(),
            }]
        );
    }

    #[tokio::test]
    async fn mock_falls_back_to_keywords() {
        let drafts = MockExtractor::new()
            .extract("потратил 10.5 usd на такси транспорт", &[])
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].amount, 1050);
        assert_eq!(drafts[0].currency, "USD");
        assert_eq!(drafts[0].category, "Транспорт");
        assert_eq!(drafts[0].description, "такси");
    }

    #[tokio::test]
    async fn mock_without_amount_finds_nothing() {
        let drafts = MockExtractor::new().extract("сегодня гулял в парке", &[]).await.unwrap();
        assert!(drafts.is_empty());
    }

    #[test]
    fn parses_plain_array() {
        let drafts = parse_drafts(
            r#"[{"amount": 500.0, "currency": "RUB", "category": "Еда", "description": "хлеб"}]"#,
        )
        .unwrap();
        assert_eq!(
            drafts,
            vec![ExpenseDraft {
                amount: 50000,
                currency: "RUB".to_string(),
                category: "Еда".to_string(),
                description: "хлеб".to_string(),
            }]
        );
    }

    #[test]
    fn empty_array_is_not_an_error() {
        assert_eq!(parse_drafts("[]").unwrap(), vec![]);
    }

    #[test]
    fn unwraps_code_fence() {
        let drafts = parse_drafts("```json\n[{\"amount\": 20.5, \"currency\": \"usd\", \"category\": \"Еда\"}]\n```").unwrap();
        assert_eq!(drafts[0].amount, 2050);
        assert_eq!(drafts[0].currency, "USD");
        assert_eq!(drafts[0].description, "");
    }

    #[test]
    fn missing_currency_defaults_to_rub() {
        let drafts = parse_drafts(r#"[{"amount": 0.1, "category": "Еда"}]"#).unwrap();
        assert_eq!(drafts[0].currency, DEFAULT_CURRENCY);
        assert_eq!(drafts[0].amount, 10);
    }

    #[test]
    fn rejects_non_array_content() {
        assert!(matches!(parse_drafts("Вот ваши расходы"), Err(ExtractionError::Malformed(_))));
        assert!(matches!(
            parse_drafts(r#"{"amount": 1.0}"#),
            Err(ExtractionError::Malformed(_))
        ));
    }

    #[test]
    fn prompt_lists_categories() {
        let prompt = build_user_prompt("кофе 200", &["Еда".to_string(), "Транспорт".to_string()]);
        assert_eq!(
            prompt,
            "Существующие категории: Еда, Транспорт\n\nТекст пользователя с расходами: кофе 200\n"
        );
    }

    #[tokio::test]
    async fn disabled_extractor_reports_configuration() {
        let extractor = DisabledExtractor::new("GROQ_TOKEN is not set");
        let result = extractor.extract("кофе", &[]).await;
        assert!(matches!(result, Err(ExtractionError::NotConfigured(_))));
    }
}
