//! Unix socket server: one JSON request per line in, one envelope per line out

use crate::cache::ResultCache;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::envelope::ResponseEnvelope;
use crate::modules::speech::CommandSpeech;
use crate::notify::NotificationReporter;
use crate::registry::{DefaultModules, ModuleRegistry};
use crate::storage::{KeyValueStore, SqliteStore};
use crate::study_store::StudyStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// Study server that listens on a Unix socket
pub struct StudyServer {
    socket_path: PathBuf,
    dispatcher: Arc<Dispatcher>,
}

impl StudyServer {
    pub fn new(socket_path: PathBuf, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            socket_path,
            dispatcher,
        }
    }

    /// Open storage and wire every collaborator from the configuration
    pub async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        // Ensure data directory exists
        if let Some(parent) = config.server.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&config.server.db_path)?);
        let store = StudyStore::new(Arc::clone(&kv));
        store.ensure_default_data().await?;

        let factory = DefaultModules::new(
            kv,
            config.ocr.binary_path.clone(),
            config.video.transcript_endpoint.clone(),
        );
        let mut dispatcher = Dispatcher::new(
            ModuleRegistry::new(Arc::new(factory)),
            ResultCache::new(config.cache.capacity, config.cache.ttl()),
            store,
            NotificationReporter::new(config.notifications.dismiss_after()),
        )
        .with_default_top_k(config.search.default_top_k);

        match &config.speech.command {
            Some(command) => {
                info!("Speech via {}", command);
                dispatcher = dispatcher.with_speech(Arc::new(CommandSpeech::new(
                    command.clone(),
                    config.speech.args.clone(),
                )));
            }
            None => debug!("No speech command configured"),
        }

        Ok(Self::new(
            config.server.socket_path.clone(),
            Arc::new(dispatcher),
        ))
    }

    /// Start the server and listen for connections
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        // Remove existing socket file if present
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("Study server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, dispatcher).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Handle a single request line without going through the socket
    pub async fn process(&self, line: &str) -> ResponseEnvelope {
        process_line(&self.dispatcher, line).await
    }
}

async fn process_line(dispatcher: &Dispatcher, line: &str) -> ResponseEnvelope {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) => dispatcher.handle_json(value).await,
        Err(e) => {
            warn!("Failed to parse request: {}", e);
            ResponseEnvelope::error(format!("Parse error: {}", e))
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Read one JSON request per line
    while reader.read_line(&mut line).await? > 0 {
        if line.trim().is_empty() {
            line.clear();
            continue;
        }

        let response = process_line(&dispatcher, line.trim()).await;

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}
