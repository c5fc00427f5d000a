use crate::*;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

pub const DEFAULT_EXTRACTION_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_EXTRACTION_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_TRANSCRIPTION_API_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-large-v3-turbo";
pub const DEFAULT_WHISPER_MODEL_PATH: &str = "models/ggml-base.bin";
pub const DEFAULT_DATA_FILE_PATH: &str = "users_data.json";
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_PROMETHEUS_URL: &str = "http://prometheus:9090";
pub const DEFAULT_EXTERNAL_CALL_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractorKind {
    Groq,
    Mock,
}

impl ExtractorKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "groq" => Some(ExtractorKind::Groq),
            "mock" => Some(ExtractorKind::Mock),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranscriberKind {
    Groq,
    WhisperCli,
    Mock,
}

impl TranscriberKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "groq" => Some(TranscriberKind::Groq),
            "whisper-cli" | "whisper" => Some(TranscriberKind::WhisperCli),
            "mock" => Some(TranscriberKind::Mock),
            _ => None,
        }
    }
}

/// Startup settings. Only a missing bot token fails loading; any other bad
/// value is logged and replaced by its default.
#[derive(Clone)]
pub struct Config {
    pub telegram_token: String,
    pub groq_token: Option<String>,
    pub extractor: ExtractorKind,
    pub extraction_api_url: Url,
    pub extraction_model: String,
    pub transcription_api_url: Url,
    pub transcription_model: String,
    pub transcriber: TranscriberKind,
    pub whisper_model_path: String,
    pub data_file_path: PathBuf,
    pub http_addr: SocketAddr,
    pub prometheus_url: Url,
    pub external_call_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_token = value("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;

        let transcriber = match value("TRANSCRIBER") {
            None => TranscriberKind::Groq,
            Some(raw) => TranscriberKind::parse(&raw).unwrap_or_else(|| {
                warn!("{}, using groq", ConfigError::InvalidValue { name: "TRANSCRIBER", value: raw });
                TranscriberKind::Groq
            }),
        };

        let extractor = match value("EXTRACTOR") {
            None => ExtractorKind::Groq,
            Some(raw) => ExtractorKind::parse(&raw).unwrap_or_else(|| {
                warn!("{}, using groq", ConfigError::InvalidValue { name: "EXTRACTOR", value: raw });
                ExtractorKind::Groq
            }),
        };

        let http_addr = parse_or_default("HTTP_ADDR", value("HTTP_ADDR"), DEFAULT_HTTP_ADDR, |raw| {
            raw.parse::<SocketAddr>().ok()
        })?;

        let timeout_secs = parse_or_default(
            "EXTERNAL_CALL_TIMEOUT_SECS",
            value("EXTERNAL_CALL_TIMEOUT_SECS"),
            &DEFAULT_EXTERNAL_CALL_TIMEOUT_SECS.to_string(),
            |raw| raw.parse::<u64>().ok().filter(|secs| *secs > 0),
        )?;

        Ok(Config {
            telegram_token,
            groq_token: value("GROQ_TOKEN"),
            extractor,
            extraction_api_url: url_or_default(
                "EXTRACTION_API_URL",
                value("EXTRACTION_API_URL"),
                DEFAULT_EXTRACTION_API_URL,
            )?,
            extraction_model: value("EXTRACTION_MODEL").unwrap_or_else(|| DEFAULT_EXTRACTION_MODEL.to_string()),
            transcription_api_url: url_or_default(
                "TRANSCRIPTION_API_URL",
                value("TRANSCRIPTION_API_URL"),
                DEFAULT_TRANSCRIPTION_API_URL,
            )?,
            transcription_model: value("TRANSCRIPTION_MODEL")
                .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            transcriber,
            whisper_model_path: value("WHISPER_MODEL_PATH")
                .unwrap_or_else(|| DEFAULT_WHISPER_MODEL_PATH.to_string()),
            data_file_path: PathBuf::from(
                value("DATA_FILE_PATH").unwrap_or_else(|| DEFAULT_DATA_FILE_PATH.to_string()),
            ),
            http_addr,
            prometheus_url: url_or_default("PROMETHEUS_URL", value("PROMETHEUS_URL"), DEFAULT_PROMETHEUS_URL)?,
            external_call_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn extractor(&self) -> Arc<dyn ExpenseExtractor> {
        if self.extractor == ExtractorKind::Mock {
            warn!("Using mock expense extraction");
            return Arc::new(MockExtractor::new());
        }

        let Some(token) = &self.groq_token else {
            let e = ConfigError::Missing("GROQ_TOKEN");
            error!("Expense extraction disabled: {}", e);
            return Arc::new(DisabledExtractor::new(e.to_string()));
        };

        match GroqExtractor::new(
            self.extraction_api_url.as_str(),
            self.extraction_model.as_str(),
            token.as_str(),
            self.external_call_timeout,
        ) {
            Ok(extractor) => Arc::new(extractor),
            Err(e) => {
                error!("Expense extraction disabled: {}", e);
                Arc::new(DisabledExtractor::new(e.to_string()))
            }
        }
    }

    pub fn transcriber(&self) -> Arc<dyn Transcriber> {
        match self.transcriber {
            TranscriberKind::Mock => {
                warn!("Using mock voice transcription");
                Arc::new(MockTranscriber)
            }
            TranscriberKind::WhisperCli => {
                info!("Using whisper-cli with model {}", self.whisper_model_path);
                Arc::new(WhisperCliTranscriber::new(
                    self.whisper_model_path.as_str(),
                    self.external_call_timeout,
                ))
            }
            TranscriberKind::Groq => {
                let Some(token) = &self.groq_token else {
                    let e = ConfigError::Missing("GROQ_TOKEN");
                    error!("Voice transcription disabled: {}", e);
                    return Arc::new(DisabledTranscriber::new(e.to_string()));
                };

                match GroqTranscriber::new(
                    self.transcription_api_url.as_str(),
                    self.transcription_model.as_str(),
                    token.as_str(),
                    self.external_call_timeout,
                ) {
                    Ok(transcriber) => Arc::new(transcriber),
                    Err(e) => {
                        error!("Voice transcription disabled: {}", e);
                        Arc::new(DisabledTranscriber::new(e.to_string()))
                    }
                }
            }
        }
    }
}

fn parse_or_default<T>(
    name: &'static str,
    raw: Option<String>,
    default: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    if let Some(raw) = raw {
        if let Some(parsed) = parse(&raw) {
            return Ok(parsed);
        }
        warn!("{}, using {}", ConfigError::InvalidValue { name, value: raw }, default);
    }
    parse(default).ok_or(ConfigError::InvalidValue {
        name,
        value: default.to_string(),
    })
}

fn url_or_default(name: &'static str, raw: Option<String>, default: &str) -> Result<Url, ConfigError> {
    if let Some(raw) = raw {
        match Url::parse(&raw) {
            Ok(url) => return Ok(url),
            Err(source) => warn!("{}, using {}", ConfigError::InvalidUrl { name, source }, default),
        }
    }
    Url::parse(default).map_err(|source| ConfigError::InvalidUrl { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn token_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))));
        assert!(matches!(
            load(&[("TELEGRAM_BOT_TOKEN", "  ")]),
            Err(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("TELEGRAM_BOT_TOKEN", "token")]).unwrap();
        assert_eq!(config.groq_token, None);
        assert_eq!(config.transcriber, TranscriberKind::Groq);
        assert_eq!(config.extraction_api_url.as_str(), DEFAULT_EXTRACTION_API_URL);
        assert_eq!(config.prometheus_url.as_str(), "http://prometheus:9090/");
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.data_file_path, PathBuf::from(DEFAULT_DATA_FILE_PATH));
        assert_eq!(config.external_call_timeout, Duration::from_secs(30));
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = load(&[
            ("TELEGRAM_BOT_TOKEN", "token"),
            ("PROMETHEUS_URL", "not a url"),
            ("HTTP_ADDR", "localhost"),
            ("EXTERNAL_CALL_TIMEOUT_SECS", "0"),
            ("TRANSCRIBER", "vosk"),
        ])
        .unwrap();
        assert_eq!(config.prometheus_url.as_str(), "http://prometheus:9090/");
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.external_call_timeout, Duration::from_secs(30));
        assert_eq!(config.transcriber, TranscriberKind::Groq);
    }

    #[test]
    fn overrides_are_read() {
        let config = load(&[
            ("TELEGRAM_BOT_TOKEN", "token"),
            ("GROQ_TOKEN", "groq"),
            ("TRANSCRIBER", "whisper-cli"),
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("EXTERNAL_CALL_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(config.groq_token.as_deref(), Some("groq"));
        assert_eq!(config.transcriber, TranscriberKind::WhisperCli);
        assert_eq!(config.http_addr.port(), 9000);
        assert_eq!(config.external_call_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn mock_backends_run_without_token() {
        let config = load(&[
            ("TELEGRAM_BOT_TOKEN", "token"),
            ("EXTRACTOR", "mock"),
            ("TRANSCRIBER", "mock"),
        ])
        .unwrap();
        assert_eq!(config.extractor, ExtractorKind::Mock);
        assert_eq!(config.transcriber, TranscriberKind::Mock);

        let text = config.transcriber().transcribe(Path::new("voice.oga")).await.unwrap();
        let drafts = config.extractor().extract(&text, &[]).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].amount, 50000);
        assert_eq!(drafts[0].category, "Еда");
    }

    #[tokio::test]
    async fn missing_groq_token_disables_extraction() {
        let config = load(&[("TELEGRAM_BOT_TOKEN", "token")]).unwrap();
        let result = config.extractor().extract("хлеб 100", &[]).await;
        assert!(matches!(result, Err(ExtractionError::NotConfigured(_))));
    }
}
