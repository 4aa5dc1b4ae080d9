//! Text extraction from document bytes.

use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

use docflow_engine::{FlowError, FlowResult};

use crate::settings::OcrSettings;

/// Converts raw document bytes to evidence text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8]) -> FlowResult<String>;
}

/// Treats the payload as UTF-8 text.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, bytes: &[u8]) -> FlowResult<String> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Runs an external OCR program on a temporary copy of the document.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Extractor from settings; `None` when no command is configured.
    pub fn from_settings(settings: &OcrSettings) -> Option<Self> {
        settings.command.as_ref().map(|program| {
            Self::new(
                program.clone(),
                settings.args.clone(),
                Duration::from_secs(settings.timeout_seconds),
            )
        })
    }
}

#[async_trait]
impl TextExtractor for CommandExtractor {
    async fn extract(&self, bytes: &[u8]) -> FlowResult<String> {
        let mut input = tempfile::NamedTempFile::new()?;
        input.write_all(bytes)?;
        input.flush()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(input.path())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            FlowError::Configuration(format!("cannot spawn {}: {}", self.program, e))
        })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let read_output = async {
            let read_out = async {
                let mut out = Vec::new();
                if let Some(s) = stdout.as_mut() {
                    s.read_to_end(&mut out).await?;
                }
                Ok::<_, std::io::Error>(out)
            };
            let read_err = async {
                let mut err = Vec::new();
                if let Some(s) = stderr.as_mut() {
                    s.read_to_end(&mut err).await?;
                }
                Ok::<_, std::io::Error>(err)
            };
            let (out, err) = tokio::try_join!(read_out, read_err)?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out, err))
        };

        let (status, out, err) = match timeout(self.timeout, read_output).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FlowError::Transport(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                )))
            }
        };

        if !status.success() {
            return Err(FlowError::Data(format!(
                "{} exited with {}: {}",
                self.program,
                status.code().unwrap_or(-1),
                String::from_utf8_lossy(&err).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}
