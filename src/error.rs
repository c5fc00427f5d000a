use teloxide::{DownloadError, RequestError};

#[derive(thiserror::Error, Debug)]
pub enum ExtractionError {
    #[error("extraction service is not configured: {0}")]
    NotConfigured(String),
    #[error("extraction request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("extraction service answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("extraction service returned no choices")]
    EmptyResponse,
    #[error("malformed extraction response: {0}")]
    Malformed(String),
}

#[derive(thiserror::Error, Debug)]
pub enum TranscriptionError {
    #[error("transcription service is not configured: {0}")]
    NotConfigured(String),
    #[error("audio io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{program} exited with {status}: {output}")]
    Process {
        program: &'static str,
        status: String,
        output: String,
    },
    #[error("{program} timed out after {seconds}s")]
    Timeout { program: &'static str, seconds: u64 },
    #[error("transcription request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("transcription service answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed transcription response: {0}")]
    Malformed(String),
}

#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("data file io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("data file is corrupted: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{entity} {id} does not exist")]
    Missing { entity: &'static str, id: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum MonitoringError {
    #[error("monitoring request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("monitoring service answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("monitoring query {query} failed: {reason}")]
    Query { query: String, reason: String },
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PeriodError {
    #[error("неверный формат периода")]
    Format,
    #[error("ошибка в начальной дате: {0}")]
    Start(Box<PeriodError>),
    #[error("ошибка в конечной дате: {0}")]
    End(Box<PeriodError>),
    #[error("неверный формат даты (используйте ДД.ММ.ГГ или ДД.ММ)")]
    DateFormat,
    #[error("месяц должен быть от 1 до 12")]
    Month,
    #[error("день должен быть от 1 до 31")]
    Day,
    #[error("несуществующая дата")]
    NonexistentDate,
    #[error("начальная дата не может быть позже конечной")]
    StartAfterEnd,
    #[error("период не может быть больше {max_days} дней")]
    TooLong { max_days: i64 },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is not a valid url: {source}")]
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },
    #[error("{name} has invalid value {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(thiserror::Error, Debug)]
pub enum BotError {
    #[error("validation error: {0}")]
    Validation(#[from] PeriodError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("transcription error: {0}")]
    Transcription(#[from] TranscriptionError),
    #[error("persistence error: {0}")]
    Persistence(#[from] RepositoryError),
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<RequestError> for BotError {
    fn from(request_error: RequestError) -> BotError {
        BotError::Transport(request_error.to_string())
    }
}

impl From<DownloadError> for BotError {
    fn from(download_error: DownloadError) -> BotError {
        BotError::Transport(download_error.to_string())
    }
}
