// The user turn is stored before the request goes out and kept if the reply fails.

use crate::api::LLMApiProvider;
use crate::config;
use crate::conversations::ConversationStore;
use crate::error::{ChatError, ChatResult};
use crate::models::{ApiConfig, Message, Role, WireMessage};
use crate::state::{InFlight, SessionState, SessionStatus};
use crate::stream::StreamBuffer;
use crate::thinking::{self, Extracted};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

pub struct ChatSession {
    // Single writer: every mutation goes through this lock
    store: Arc<Mutex<ConversationStore>>,
    provider: Arc<dyn LLMApiProvider>,
    status: SessionStatus,
    show_thinking: AtomicBool,
}

enum Step {
    Delta(ChatResult<String>),
    End,
    Cancelled,
}

impl ChatSession {
    pub fn new(store: ConversationStore, provider: Arc<dyn LLMApiProvider>) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            provider,
            status: SessionStatus::new(),
            show_thinking: AtomicBool::new(true),
        }
    }

    pub fn store(&self) -> &Arc<Mutex<ConversationStore>> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn LLMApiProvider> {
        &self.provider
    }

    pub fn state(&self) -> SessionState {
        self.status.current()
    }

    pub fn is_loading(&self) -> bool {
        self.status.current().is_busy()
    }

    /// Raw text received so far for the in-flight request.
    pub fn streaming_content(&self) -> String {
        self.status.streaming_content()
    }

    /// Thinking/response split of the partial buffer, for live display.
    pub fn streaming_preview(&self) -> Extracted {
        let content = self.status.streaming_content();
        if content.is_empty() {
            return Extracted::default();
        }
        thinking::extract(&content)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.status.subscribe_state()
    }

    pub fn subscribe_streaming(&self) -> watch::Receiver<String> {
        self.status.subscribe_streaming()
    }

    pub fn show_thinking(&self) -> bool {
        self.show_thinking.load(Ordering::Relaxed)
    }

    pub fn set_show_thinking(&self, show: bool) {
        self.show_thinking.store(show, Ordering::Relaxed);
    }

    /// Stops the in-flight request. Text received so far is kept.
    pub fn stop_generation(&self) -> bool {
        let stopped = self.status.stop();
        if stopped {
            log::warn!("Stop requested for in-flight generation");
        }
        stopped
    }

    /// Sends `text` as a user turn in the active chat (creating one if
    /// needed) and commits the streamed reply.
    pub async fn send_message(&self, text: &str) -> ChatResult<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::State("Message cannot be empty.".into()));
        }
        let flight = self.status.begin()?;

        let (chat_id, payload, api_config) = {
            let mut store = self.store.lock().await;
            let api_config = store.api_config().clone();
            config::resolve_api_key(&api_config)?;

            let chat_id = match store.current_chat_id() {
                Some(id) => id,
                None => store.create_chat().await.id,
            };
            store
                .append_user_message(chat_id, text)
                .await
                .ok_or_else(|| ChatError::State(format!("Chat {} not found", chat_id)))?;
            (chat_id, store.history(chat_id), api_config)
        };
        log::info!("Sending message to chat {} ({} turns)", chat_id, payload.len());

        let full_text = self
            .stream_reply(&flight, &api_config, &payload)
            .await
            .inspect_err(|e| log::error!("Failed to get response for chat {}: {}", chat_id, e))?;

        flight.advance(SessionState::Committing);
        let mut store = self.store.lock().await;
        let message = store
            .append_assistant_message(chat_id, &full_text)
            .await
            .ok_or_else(|| {
                ChatError::State("Chat was deleted while the response was streaming.".into())
            })?;
        store.derive_title(chat_id).await;
        Ok(message)
    }

    /// Re-asks the active chat's last question and replaces the trailing
    /// assistant reply with the new one.
    pub async fn regenerate_message(&self) -> ChatResult<Message> {
        let flight = self.status.begin()?;

        let (chat_id, payload, api_config) = {
            let store = self.store.lock().await;
            let chat = store
                .current_chat()
                .ok_or_else(|| ChatError::State("No active chat to regenerate.".into()))?;
            if chat.messages.len() < 2 {
                return Err(ChatError::State("Not enough messages to regenerate.".into()));
            }
            let api_config = store.api_config().clone();
            config::resolve_api_key(&api_config)?;

            let mut history: &[Message] = &chat.messages;
            if let Some((last, rest)) = history.split_last() {
                if last.role == Role::Assistant {
                    history = rest;
                }
            }
            let payload: Vec<WireMessage> = history.iter().map(WireMessage::from).collect();
            (chat.id, payload, api_config)
        };
        log::info!("Regenerating last response for chat {}", chat_id);

        let full_text = self
            .stream_reply(&flight, &api_config, &payload)
            .await
            .inspect_err(|e| log::error!("Failed to regenerate response for chat {}: {}", chat_id, e))?;

        flight.advance(SessionState::Committing);
        let mut store = self.store.lock().await;
        store
            .replace_last_assistant_message(chat_id, &full_text)
            .await
            .ok_or_else(|| {
                ChatError::State("Chat was deleted while the response was streaming.".into())
            })
    }

    /// Issues the request and drains the delta stream into one buffer.
    /// A stop request ends the read early; what arrived so far is returned,
    /// or `Cancelled` when nothing did.
    async fn stream_reply(
        &self,
        flight: &InFlight<'_>,
        api_config: &ApiConfig,
        payload: &[WireMessage],
    ) -> ChatResult<String> {
        let token = flight.token().clone();

        let mut deltas = tokio::select! {
            _ = token.cancelled() => return Err(ChatError::Cancelled),
            response = self.provider.send_chat_stream_request(api_config, payload) => response?,
        };
        flight.advance(SessionState::Streaming);

        let mut buffer = StreamBuffer::new();
        loop {
            let step = tokio::select! {
                _ = token.cancelled() => Step::Cancelled,
                next = deltas.next() => match next {
                    Some(delta) => Step::Delta(delta),
                    None => Step::End,
                },
            };
            match step {
                Step::Delta(delta) => flight.publish(buffer.push(&delta?)),
                Step::End => break,
                Step::Cancelled => {
                    log::warn!("Generation stopped after {} bytes", buffer.as_str().len());
                    if buffer.is_empty() {
                        return Err(ChatError::Cancelled);
                    }
                    break;
                }
            }
        }
        Ok(buffer.into_string())
    }
}
