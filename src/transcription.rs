use crate::*;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Converts a voice note into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError>;
}

/// Runs an external program, bounded by `timeout`. The child is killed if
/// the future is dropped.
async fn run_program(program: &'static str, args: &[&str], timeout: Duration) -> Result<String, TranscriptionError> {
    debug!("Running {} {:?}", program, args);
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| TranscriptionError::Timeout {
            program,
            seconds: timeout.as_secs(),
        })??;

    if !output.status.success() {
        return Err(TranscriptionError::Process {
            program,
            status: output.status.to_string(),
            output: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Resamples any input to mono 16 kHz 16-bit PCM wav inside `work_dir`.
pub async fn normalize_audio(input: &Path, work_dir: &Path, timeout: Duration) -> Result<PathBuf, TranscriptionError> {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("voice");
    let wav = work_dir.join(format!("{}.wav", stem));

    let input_arg = input.to_string_lossy().into_owned();
    let wav_arg = wav.to_string_lossy().into_owned();
    run_program(
        "ffmpeg",
        &["-y", "-i", input_arg.as_str(), "-ac", "1", "-ar", "16000", "-acodec", "pcm_s16le", wav_arg.as_str()],
        timeout,
    )
    .await?;

    Ok(wav)
}

/// Remote speech-to-text over a multipart upload.
pub struct GroqTranscriber {
    client: reqwest::Client,
    api_url: String,
    model: String,
    token: String,
    timeout: Duration,
}

#[derive(Deserialize, Debug)]
struct TranscriptionResponse {
    text: String,
}

impl GroqTranscriber {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, TranscriptionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(GroqTranscriber {
            client,
            api_url: api_url.into(),
            model: model.into(),
            token: token.into(),
            timeout,
        })
    }

    async fn upload(&self, wav: &Path) -> Result<String, TranscriptionError> {
        let bytes = tokio::fs::read(wav).await?;
        let file_name = wav
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "voice.wav".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", "ru")
            .text("temperature", "0");

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TranscriptionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse =
            serde_json::from_str(&body).map_err(|e| TranscriptionError::Malformed(e.to_string()))?;
        Ok(parsed.text.trim().to_string())
    }
}

#[async_trait]
impl Transcriber for GroqTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError> {
        let work_dir = tempfile::tempdir()?;
        let wav = normalize_audio(audio_path, work_dir.path(), self.timeout).await?;
        self.upload(&wav).await
    }
}

/// Local `whisper-cli` binary.
pub struct WhisperCliTranscriber {
    model_path: String,
    timeout: Duration,
}

impl WhisperCliTranscriber {
    pub fn new(model_path: impl Into<String>, timeout: Duration) -> Self {
        WhisperCliTranscriber {
            model_path: model_path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError> {
        let work_dir = tempfile::tempdir()?;
        let wav = normalize_audio(audio_path, work_dir.path(), self.timeout).await?;
        let wav_arg = wav.to_string_lossy().into_owned();
        let text = run_program(
            "whisper-cli",
            &["-m", self.model_path.as_str(), "-l", "ru", "-f", wav_arg.as_str(), "-otxt", "-of", "-"],
            self.timeout,
        )
        .await?;
        Ok(text.trim().to_string())
    }
}

pub const MOCK_TRANSCRIPT: &str = "купил еды на 500 рублей в категории еда";

/// Returns a fixed phrase for every voice note.
#[derive(Default)]
pub struct MockTranscriber;

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError> {
        debug!("Mock transcription of {}", audio_path.display());
        Ok(MOCK_TRANSCRIPT.to_string())
    }
}

pub struct DisabledTranscriber {
    reason: String,
}

impl DisabledTranscriber {
    pub fn new(reason: impl Into<String>) -> Self {
        DisabledTranscriber { reason: reason.into() }
    }
}

#[async_trait]
impl Transcriber for DisabledTranscriber {
    async fn transcribe(&self, _audio_path: &Path) -> Result<String, TranscriptionError> {
        Err(TranscriptionError::NotConfigured(self.reason.clone()))
    }
}
