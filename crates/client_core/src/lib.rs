use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use shared::{
    domain::{Reference, Role, TurnId},
    protocol::{AssistantFile, BootstrapResponse, ChatRequest, CheckAssistantResponse},
};
use tokio::{
    sync::{broadcast, Mutex, RwLock},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod session;
pub mod transcript;
pub mod transport;

pub use config::{load_settings, ClientSettings};
pub use error::ChatError;
pub use session::{SessionUpdate, StreamSession};
pub use transcript::{Transcript, Turn};
pub use transport::{ByteStream, ChatTransport, HttpTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Sending,
    Streaming,
    Completed,
    Cancelled,
    Failed(String),
}

impl StreamPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamPhase::Completed | StreamPhase::Cancelled | StreamPhase::Failed(_)
        )
    }
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    PhaseChanged(StreamPhase),
    TurnAppended {
        turn: TurnId,
        role: Role,
    },
    ContentDelta {
        turn: TurnId,
        delta: String,
    },
    ReferencesUpdated {
        turn: TurnId,
        references: Vec<Reference>,
    },
    TurnSealed {
        turn: TurnId,
    },
    Error(String),
}

/// Result of a response that completed or was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub turn: TurnId,
    pub phase: StreamPhase,
    pub content: String,
    pub references: Option<Vec<Reference>>,
    pub malformed_events: usize,
}

enum StreamEnd {
    Completed,
    Cancelled { timed_out: bool },
    Failed(ChatError),
}

struct IngestorState {
    phase: StreamPhase,
    session: Option<StreamSession>,
    cancel: Option<CancellationToken>,
}

/// Drives one request/response cycle at a time against the chat backend and
/// records it in the session transcript.
pub struct ChatClient {
    transport: Arc<dyn ChatTransport>,
    stream_timeout: Option<Duration>,
    transcript: RwLock<Transcript>,
    inner: Mutex<IngestorState>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatClient {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Arc<Self> {
        Self::new_with_stream_timeout(transport, None)
    }

    pub fn new_with_stream_timeout(
        transport: Arc<dyn ChatTransport>,
        stream_timeout: Option<Duration>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            transport,
            stream_timeout,
            transcript: RwLock::new(Transcript::new()),
            inner: Mutex::new(IngestorState {
                phase: StreamPhase::Idle,
                session: None,
                cancel: None,
            }),
            events,
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> anyhow::Result<Arc<Self>> {
        let transport = HttpTransport::from_settings(settings)?;
        Ok(Self::new_with_stream_timeout(
            Arc::new(transport),
            settings.stream_timeout(),
        ))
    }

    pub async fn check_assistant(&self) -> Result<CheckAssistantResponse, ChatError> {
        self.transport.check_assistant().await
    }

    pub async fn list_assistant_files(&self) -> Result<Vec<AssistantFile>, ChatError> {
        self.transport.list_assistant_files().await
    }

    pub async fn trigger_bootstrap(&self) -> Result<BootstrapResponse, ChatError> {
        self.transport.trigger_bootstrap().await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> StreamPhase {
        self.inner.lock().await.phase.clone()
    }

    pub async fn snapshot(&self) -> Vec<Turn> {
        self.transcript.read().await.snapshot()
    }

    /// Coalesced text of the response currently streaming, if any.
    pub async fn current_response(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .session
            .as_ref()
            .map(|session| session.accumulated().to_string())
    }

    /// Submits `text` and streams the reply into the transcript.
    ///
    /// Completed and cancelled responses return their outcome. A transport
    /// failure seals the partial reply, leaves the phase at `Failed` and is
    /// returned as the error.
    ///
    /// The stream runs on its own task. Dropping the returned future cancels
    /// it, and the turn is still sealed as `Cancelled`.
    pub async fn send_message(self: &Arc<Self>, text: &str) -> Result<StreamOutcome, ChatError> {
        let (request, turn, token) = self.begin(text).await?;
        let guard = token.clone().drop_guard();

        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            let end = client.drive(request, &token).await;
            client.conclude(turn, end).await
        });

        let result = task.await.map_err(|join_error| {
            ChatError::InvariantViolation(format!(
                "stream task for turn {} failed: {join_error}",
                turn.0
            ))
        });
        guard.disarm();
        result?
    }

    /// Stops the active stream, keeping whatever content already arrived.
    /// Returns `false` when there is nothing left to cancel.
    pub async fn cancel(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(token) = inner.cancel.clone() else {
            return false;
        };
        if token.is_cancelled() {
            return false;
        }
        if let Some(session) = inner.session.as_mut() {
            session.mark_cancelled();
        }
        token.cancel();
        info!(phase = ?inner.phase, "cancelling active stream");
        true
    }

    /// Returns a terminal phase to `Idle` so the next message can be sent.
    pub async fn acknowledge(&self) -> Option<StreamPhase> {
        let mut inner = self.inner.lock().await;
        if !inner.phase.is_terminal() {
            return None;
        }
        let previous = std::mem::replace(&mut inner.phase, StreamPhase::Idle);
        drop(inner);
        self.emit(ChatEvent::PhaseChanged(StreamPhase::Idle));
        Some(previous)
    }

    async fn begin(
        &self,
        text: &str,
    ) -> Result<(ChatRequest, TurnId, CancellationToken), ChatError> {
        let mut inner = self.inner.lock().await;
        if inner.phase != StreamPhase::Idle {
            return Err(ChatError::Busy);
        }
        let message = text.trim();
        if message.is_empty() {
            return Err(ChatError::InvalidInput);
        }

        let mut transcript = self.transcript.write().await;
        let history = transcript.history();
        let user_turn = transcript.append_user_turn(message)?;
        let turn = transcript.append_assistant_placeholder()?;
        drop(transcript);

        let token = CancellationToken::new();
        inner.session = Some(StreamSession::new(turn));
        inner.cancel = Some(token.clone());
        inner.phase = StreamPhase::Sending;
        drop(inner);

        self.emit(ChatEvent::TurnAppended {
            turn: user_turn,
            role: Role::User,
        });
        self.emit(ChatEvent::TurnAppended {
            turn,
            role: Role::Assistant,
        });
        self.emit(ChatEvent::PhaseChanged(StreamPhase::Sending));
        info!(turn = turn.0, history = history.len(), "sending message");

        let request = ChatRequest {
            message: message.to_string(),
            history,
        };
        Ok((request, turn, token))
    }

    async fn drive(&self, request: ChatRequest, token: &CancellationToken) -> StreamEnd {
        let deadline = self.stream_timeout.map(|timeout| Instant::now() + timeout);

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return StreamEnd::Cancelled { timed_out: false },
            _ = deadline_elapsed(deadline) => {
                token.cancel();
                return StreamEnd::Cancelled { timed_out: true };
            }
            opened = self.transport.open_chat_stream(&request) => opened,
        };
        let mut body = match opened {
            Ok(body) => body,
            Err(error) => return StreamEnd::Failed(error),
        };

        let mut streaming = false;
        let end = loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => break StreamEnd::Cancelled { timed_out: false },
                _ = deadline_elapsed(deadline) => {
                    token.cancel();
                    break StreamEnd::Cancelled { timed_out: true };
                }
                chunk = body.next() => chunk,
            };

            match chunk {
                None => {
                    break match self.apply(|session, transcript| session.finish(transcript)).await {
                        Ok(_) => {
                            info!("chat stream closed without end-of-stream sentinel");
                            StreamEnd::Completed
                        }
                        Err(error) => StreamEnd::Failed(error),
                    };
                }
                Some(Err(error)) => break StreamEnd::Failed(error),
                Some(Ok(bytes)) => {
                    if !streaming && !bytes.is_empty() {
                        streaming = true;
                        self.set_phase(StreamPhase::Streaming).await;
                    }
                    match self
                        .apply(|session, transcript| session.ingest(&bytes, transcript))
                        .await
                    {
                        Ok(true) => break StreamEnd::Completed,
                        Ok(false) => {}
                        Err(error) => break StreamEnd::Failed(error),
                    }
                }
            }
        };
        drop(body);
        end
    }

    /// Runs one step of the active session against the transcript and
    /// publishes the resulting updates. Returns whether the sentinel was seen.
    async fn apply<F>(&self, step: F) -> Result<bool, ChatError>
    where
        F: FnOnce(&mut StreamSession, &mut Transcript) -> Result<Vec<SessionUpdate>, ChatError>,
    {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.session.as_mut() else {
            return Err(ChatError::InvariantViolation(
                "no active stream session".to_string(),
            ));
        };
        let turn = session.turn();
        let updates = {
            let mut transcript = self.transcript.write().await;
            step(session, &mut *transcript)?
        };
        drop(inner);

        let mut finished = false;
        for update in updates {
            match update {
                SessionUpdate::Content(delta) => {
                    self.emit(ChatEvent::ContentDelta { turn, delta });
                }
                SessionUpdate::References(references) => {
                    self.emit(ChatEvent::ReferencesUpdated { turn, references });
                }
                SessionUpdate::Malformed { .. } => {}
                SessionUpdate::EndOfStream => finished = true,
            }
        }
        Ok(finished)
    }

    async fn conclude(&self, turn: TurnId, end: StreamEnd) -> Result<StreamOutcome, ChatError> {
        let mut inner = self.inner.lock().await;
        let mut session = inner.session.take();
        inner.cancel = None;

        // A cancel that won the lock after the stream ended still decides the outcome.
        let end = match end {
            StreamEnd::Completed | StreamEnd::Failed(_)
                if session.as_ref().is_some_and(StreamSession::is_cancelled) =>
            {
                StreamEnd::Cancelled { timed_out: false }
            }
            end => end,
        };

        if let Err(seal_error) = self.transcript.write().await.seal(turn) {
            error!(turn = turn.0, %seal_error, "failed to seal assistant turn");
        }

        let (phase, failure) = match end {
            StreamEnd::Completed => (StreamPhase::Completed, None),
            StreamEnd::Cancelled { timed_out } => {
                if let Some(session) = session.as_mut() {
                    session.mark_cancelled();
                }
                if timed_out {
                    warn!(turn = turn.0, "chat stream timed out");
                }
                (StreamPhase::Cancelled, None)
            }
            StreamEnd::Failed(failure) => {
                (StreamPhase::Failed(failure.to_string()), Some(failure))
            }
        };
        inner.phase = phase.clone();
        drop(inner);

        self.emit(ChatEvent::TurnSealed { turn });
        self.emit(ChatEvent::PhaseChanged(phase.clone()));
        info!(turn = turn.0, ?phase, "chat stream finished");

        if let Some(failure) = failure {
            if failure.is_user_visible() {
                warn!(turn = turn.0, %failure, "chat stream failed");
                self.emit(ChatEvent::Error(failure.to_string()));
            } else {
                error!(turn = turn.0, %failure, "chat stream aborted");
            }
            return Err(failure);
        }

        Ok(StreamOutcome {
            turn,
            phase,
            content: session
                .as_ref()
                .map(|session| session.accumulated().to_string())
                .unwrap_or_default(),
            references: session
                .as_ref()
                .and_then(|session| session.references().map(<[Reference]>::to_vec)),
            malformed_events: session
                .as_ref()
                .map(StreamSession::malformed_events)
                .unwrap_or_default(),
        })
    }

    async fn set_phase(&self, phase: StreamPhase) {
        self.inner.lock().await.phase = phase.clone();
        info!(?phase, "stream phase changed");
        self.emit(ChatEvent::PhaseChanged(phase));
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
