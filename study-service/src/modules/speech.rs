//! Text-to-speech through an external command such as `espeak`.

use super::FeatureModule;
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[async_trait]
pub trait SpeechEngine: FeatureModule {
    async fn speak(&self, text: &str, options: &Value) -> std::io::Result<()>;
    async fn stop(&self) -> std::io::Result<()>;
}

/// Spawns `<command> <args...> <text>` per utterance; a new utterance or
/// `stop` kills the previous one
pub struct CommandSpeech {
    command: String,
    args: Vec<String>,
    current: Mutex<Option<Child>>,
}

impl CommandSpeech {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            current: Mutex::new(None),
        }
    }

    pub async fn is_speaking(&self) -> bool {
        let mut current = self.current.lock().await;
        match current.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[async_trait]
impl FeatureModule for CommandSpeech {
    fn name(&self) -> &'static str {
        "speech"
    }
}

#[async_trait]
impl SpeechEngine for CommandSpeech {
    async fn speak(&self, text: &str, options: &Value) -> std::io::Result<()> {
        let mut current = self.current.lock().await;
        if let Some(mut previous) = current.take() {
            let _ = previous.kill().await;
        }

        let mut command = Command::new(&self.command);
        command.args(&self.args);
        if let Some(rate) = options.get("rate").and_then(Value::as_u64) {
            command.arg("-s").arg(rate.to_string());
        }
        let child = command
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        info!("Speaking {} chars with {}", text.chars().count(), self.command);
        *current = Some(child);
        Ok(())
    }

    async fn stop(&self) -> std::io::Result<()> {
        if let Some(mut child) = self.current.lock().await.take() {
            debug!("Stopping speech");
            // Already exited is fine
            let _ = child.kill().await;
        }
        Ok(())
    }
}
