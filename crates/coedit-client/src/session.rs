//! DocumentSession: owns every component of one open document.
//!
//! Replaces module-level singletons with an explicit per-document lifetime:
//! the session owns the editor, coordinator, stream controller, connection
//! manager, store, and assistant, and tears them all down on shutdown.
//!
//! The event loop multiplexes connection events, user commands, AI stream
//! signals, and a coarse scheduler tick that drives the coordinator's
//! deadlines. The editor is only ever mutated from this loop, which is what
//! makes the document-busy exclusion between remote applies and live AI
//! ranges enforceable: a remote snapshot arriving while an AI range is
//! active is dropped, and a prompt is refused while a remote apply is in
//! progress.

use crate::connection::{ConnectionEvent, ConnectionManager};
use anyhow::Result;
use coedit_core::assist::{self, AssistRequest, Assistant};
use coedit_core::coordinator::{RemoteDecision, SyncAction, SyncCoordinator};
use coedit_core::document::DocumentPatch;
use coedit_core::editor::EditorModel;
use coedit_core::protocol::Operation;
use coedit_core::store::DocumentStore;
use coedit_core::stream::StreamInsertionController;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often the coordinator's deadlines are checked.
const TICK_PERIOD: Duration = Duration::from_millis(250);

/// Configuration for one document session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub document_id: i64,
    pub user_id: i64,
    pub token: String,
}

/// Commands from the embedding UI.
#[derive(Debug)]
pub enum SessionCommand {
    /// Replace the whole document with new serialized content.
    Edit { content: String },
    /// Insert plain text at a position.
    Type { position: usize, text: String },
    /// Change the document title.
    EditTitle(String),
    /// Submit an AI prompt.
    Prompt { text: String, web_search: bool },
    /// Accept the AI response (markdown-converted, in place).
    AcceptResponse,
    /// Discard the AI response.
    DiscardResponse,
    /// Move the AI response below the original selection.
    InsertBelow,
    /// Discard and resubmit the previous prompt.
    RetryResponse,
    /// The tab was hidden; flush unsaved content.
    Hidden,
    /// Flush, disconnect, and end the session.
    Shutdown,
}

/// Signals from the spawned AI streaming task, tagged with the turn that
/// produced them so a replaced turn's late signals can be dropped.
#[derive(Debug)]
enum StreamSignal {
    Chunk { turn: u64, text: String },
    Done { turn: u64 },
    Failed { turn: u64, message: String },
}

impl StreamSignal {
    fn turn(&self) -> u64 {
        match self {
            StreamSignal::Chunk { turn, .. }
            | StreamSignal::Done { turn }
            | StreamSignal::Failed { turn, .. } => *turn,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// One open document and everything attached to it.
pub struct DocumentSession<E, S, A> {
    config: SessionConfig,
    editor: E,
    store: S,
    assistant: Arc<A>,
    coordinator: SyncCoordinator,
    stream: StreamInsertionController,
    connection: ConnectionManager,
    conn_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    stream_tx: mpsc::UnboundedSender<StreamSignal>,
    stream_rx: mpsc::UnboundedReceiver<StreamSignal>,
    stream_task: Option<JoinHandle<()>>,
    /// Current AI turn; signals from older turns are stale.
    stream_turn: u64,
}

impl<E, S, A> DocumentSession<E, S, A>
where
    E: EditorModel,
    S: DocumentStore,
    A: Assistant + 'static,
{
    /// Create a session. Returns the command sender for the embedding UI.
    pub fn new(
        config: SessionConfig,
        editor: E,
        store: S,
        assistant: A,
        ws_url: &str,
    ) -> (Self, mpsc::UnboundedSender<SessionCommand>) {
        let (connection, conn_events) = ConnectionManager::new(ws_url);
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();

        let coordinator = SyncCoordinator::new(config.user_id);
        (
            Self {
                config,
                editor,
                store,
                assistant: Arc::new(assistant),
                coordinator,
                stream: StreamInsertionController::new(),
                connection,
                conn_events,
                commands,
                stream_tx,
                stream_rx,
                stream_task: None,
                stream_turn: 0,
            },
            command_tx,
        )
    }

    /// Load the document, connect, and run until shutdown.
    pub async fn run(mut self) -> Result<()> {
        self.load_document().await?;

        let token = self.config.token.clone();
        if let Err(e) = self
            .connection
            .connect(self.config.document_id, self.config.user_id, &token)
            .await
        {
            // A retry is already scheduled; editing and persistence work
            // without the socket.
            warn!("Initial connect failed: {}", e);
        }

        let mut ticker = tokio::time::interval(TICK_PERIOD);
        loop {
            tokio::select! {
                Some(command) = self.commands.recv() => {
                    if matches!(command, SessionCommand::Shutdown) {
                        break;
                    }
                    self.handle_command(command).await;
                }

                Some(event) = self.conn_events.recv() => {
                    self.handle_connection_event(event).await;
                }

                Some(signal) = self.stream_rx.recv() => {
                    self.handle_stream_signal(signal).await;
                }

                _ = ticker.tick() => {
                    let actions = self.coordinator.tick(now_ms());
                    self.perform(actions).await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn load_document(&mut self) -> Result<()> {
        let document = self.store.fetch(self.config.document_id).await?;
        info!("Loaded document {} ({})", document.id, document.title);

        self.editor.replace_all(document.content_blocks());
        self.editor.poll_change();
        self.coordinator.seed(&self.editor.content());
        Ok(())
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Edit { content } => {
                self.editor
                    .replace_all(coedit_core::content::parse_or_wrap(&content));
                self.drain_editor_change();
            }
            SessionCommand::Type { position, text } => {
                self.editor.insert_text(position, &text);
                self.drain_editor_change();
            }
            SessionCommand::EditTitle(title) => {
                self.coordinator.on_title_edit(&title, now_ms());
            }
            SessionCommand::Prompt { text, web_search } => {
                self.start_prompt(text, web_search);
            }
            SessionCommand::AcceptResponse => {
                self.stream.accept(&mut self.editor);
                self.drain_editor_change();
            }
            SessionCommand::DiscardResponse => {
                self.stream.discard(&mut self.editor);
                self.drain_editor_change();
            }
            SessionCommand::InsertBelow => {
                self.stream.insert_below(&mut self.editor);
                self.drain_editor_change();
            }
            SessionCommand::RetryResponse => {
                match self.stream.retry(&mut self.editor) {
                    Some(prompt) => {
                        self.drain_editor_change();
                        // Retries always use the non-web-search mode.
                        self.start_prompt(prompt, false);
                    }
                    None => warn!("No previous prompt to retry"),
                }
            }
            SessionCommand::Hidden => {
                let actions = self.coordinator.flush();
                self.perform(actions).await;
            }
            SessionCommand::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn start_prompt(&mut self, text: String, web_search: bool) {
        if self.coordinator.is_applying_remote() {
            warn!("Document busy applying a remote snapshot; prompt ignored");
            return;
        }

        // The context must not include the half-written previous answer.
        let context =
            assist::strip_pending_response(&self.editor.plain_text(), self.stream.pending_text());

        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        self.stream_turn += 1;
        let turn = self.stream_turn;

        self.stream.start(&mut self.editor, &text);
        self.drain_editor_change();

        let request = AssistRequest {
            context,
            question: text,
        };
        let assistant = Arc::clone(&self.assistant);
        let done_tx = self.stream_tx.clone();
        let chunk_tx = self.stream_tx.clone();
        self.stream_task = Some(tokio::spawn(async move {
            let mut on_chunk = move |chunk: &str| {
                let _ = chunk_tx.send(StreamSignal::Chunk {
                    turn,
                    text: chunk.to_string(),
                });
            };
            match assistant
                .ask_streaming(&request, web_search, &mut on_chunk)
                .await
            {
                Ok(_) => {
                    let _ = done_tx.send(StreamSignal::Done { turn });
                }
                Err(e) => {
                    let _ = done_tx.send(StreamSignal::Failed {
                        turn,
                        message: e.to_string(),
                    });
                }
            }
        }));
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                info!("Collaboration socket open");
            }
            ConnectionEvent::Message(operation) => {
                self.apply_remote(operation);
            }
            ConnectionEvent::Error(e) => {
                warn!("Collaboration socket error: {}", e);
            }
            ConnectionEvent::Closed { code } => {
                info!("Collaboration socket closed (code {:?})", code);
                self.connection.handle_closed();
            }
            ConnectionEvent::ReconnectDue { generation } => {
                if let Err(e) = self.connection.redial(generation).await {
                    warn!("Reconnect failed: {}", e);
                }
            }
        }
    }

    fn apply_remote(&mut self, operation: Operation) {
        match self.coordinator.on_remote(&operation) {
            RemoteDecision::Apply { blocks, .. } => {
                if self.stream.is_active() {
                    // Document busy: replacing content now would invalidate
                    // the live AI range.
                    warn!("AI range active; dropping remote snapshot");
                    return;
                }
                self.coordinator.begin_remote_apply();
                self.editor.replace_all(blocks);
                self.drain_editor_change();
                self.coordinator.finish_remote_apply();
                debug!("Applied remote snapshot from user {}", operation.user_id);
            }
            RemoteDecision::Ignore(reason) => {
                debug!("Ignoring remote operation: {:?}", reason);
            }
        }
    }

    async fn handle_stream_signal(&mut self, signal: StreamSignal) {
        if signal.turn() != self.stream_turn {
            debug!("Dropping signal from a replaced AI turn");
            return;
        }
        match signal {
            StreamSignal::Chunk { text, .. } => {
                self.stream.append(&mut self.editor, &text);
                self.drain_editor_change();
            }
            StreamSignal::Done { .. } => {
                self.stream.complete();
                info!(
                    "AI response complete ({} chars)",
                    self.stream.pending_text().chars().count()
                );
            }
            StreamSignal::Failed { message, .. } => {
                warn!("AI stream failed: {}", message);
                self.stream.fail(message);
            }
        }
    }

    /// Route an editor change notification into the coordinator.
    fn drain_editor_change(&mut self) {
        if let Some(payload) = self.editor.poll_change() {
            self.coordinator.on_local_edit(&payload, now_ms());
        }
    }

    async fn perform(&mut self, actions: Vec<SyncAction>) {
        for action in actions {
            match action {
                SyncAction::SendSync { content } => {
                    let operation = Operation::sync(self.config.user_id, content);
                    self.connection.send(&operation).await;
                }
                SyncAction::Persist { content } => {
                    let patch = DocumentPatch::content(content.clone());
                    let ok = match self
                        .store
                        .update(self.config.document_id, self.config.user_id, patch)
                        .await
                    {
                        Ok(_) => true,
                        Err(e) => {
                            warn!("Failed to persist document: {}", e);
                            false
                        }
                    };
                    self.coordinator.persist_completed(&content, ok);
                }
                SyncAction::PersistTitle { title } => {
                    let patch = DocumentPatch::title(title);
                    if let Err(e) = self
                        .store
                        .update(self.config.document_id, self.config.user_id, patch)
                        .await
                    {
                        warn!("Failed to persist title: {}", e);
                    }
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down session");
        let actions = self.coordinator.flush();
        self.perform(actions).await;

        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        self.connection.disconnect().await;
    }
}
