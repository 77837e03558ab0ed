// In-memory chats, most recent first. Every mutation is written through to the blob store.

use crate::error::{ChatError, ChatResult};
use crate::models::{ApiConfig, Chat, Message, Role, WireMessage};
use crate::storage::BlobStore;
use crate::thinking;
use std::sync::Arc;
use uuid::Uuid;

pub const CHATS_KEY: &str = "chats";
pub const API_CONFIG_KEY: &str = "apiConfig";

const TITLE_MAX_CHARS: usize = 30;

pub struct ConversationStore {
    chats: Vec<Chat>,
    current_chat_id: Option<Uuid>,
    api_config: ApiConfig,
    blobs: Arc<dyn BlobStore>,
}

/// First 30 characters of `text`, with `...` when cut.
pub fn title_from(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

impl ConversationStore {
    /// Empty store that persists into `blobs`.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            chats: Vec::new(),
            current_chat_id: None,
            api_config: ApiConfig::default(),
            blobs,
        }
    }

    /// Loads saved chats and config. Missing or corrupt blobs fall back to
    /// an empty collection / default config.
    pub async fn load(blobs: Arc<dyn BlobStore>) -> Self {
        let mut store = Self::new(blobs);

        match store.blobs.load(CHATS_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Chat>>(&raw) {
                Ok(chats) => {
                    log::info!("Loaded {} saved chats", chats.len());
                    store.chats = chats;
                }
                Err(e) => log::error!("{}", ChatError::Persistence(format!("Failed to parse saved chats: {}", e))),
            },
            Ok(None) => log::debug!("No saved chats"),
            Err(e) => log::error!("Failed to read saved chats: {:?}", e),
        }

        match store.blobs.load(API_CONFIG_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<ApiConfig>(&raw) {
                Ok(config) => store.api_config = config,
                Err(e) => log::error!("{}", ChatError::Persistence(format!("Failed to parse saved API config: {}", e))),
            },
            Ok(None) => log::debug!("No saved API config, using defaults"),
            Err(e) => log::error!("Failed to read saved API config: {:?}", e),
        }

        store.current_chat_id = store.chats.first().map(|c| c.id);
        store
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn chat(&self, chat_id: Uuid) -> Option<&Chat> {
        self.chats.iter().find(|c| c.id == chat_id)
    }

    pub fn current_chat_id(&self) -> Option<Uuid> {
        self.current_chat_id
    }

    pub fn current_chat(&self) -> Option<&Chat> {
        self.current_chat_id.and_then(|id| self.chat(id))
    }

    pub fn api_config(&self) -> &ApiConfig {
        &self.api_config
    }

    pub async fn set_api_config(&mut self, config: ApiConfig) {
        log::info!("Updating API config: {:?}", config);
        self.api_config = config;
        self.persist_config().await;
    }

    /// Inserts an empty chat at the front and makes it active.
    pub async fn create_chat(&mut self) -> Chat {
        let chat = Chat::new();
        log::info!("Creating new chat {}", chat.id);
        self.chats.insert(0, chat.clone());
        self.current_chat_id = Some(chat.id);
        self.persist_chats().await;
        chat
    }

    /// Makes `chat_id` active. Unknown ids are ignored.
    pub fn select_chat(&mut self, chat_id: Uuid) -> bool {
        if self.chat(chat_id).is_some() {
            self.current_chat_id = Some(chat_id);
            true
        } else {
            log::warn!("Attempted to select non-existent chat: {}", chat_id);
            false
        }
    }

    /// Role/content history of a chat, in turn order.
    pub fn history(&self, chat_id: Uuid) -> Vec<WireMessage> {
        self.chat(chat_id)
            .map(|chat| chat.messages.iter().map(WireMessage::from).collect())
            .unwrap_or_default()
    }

    pub async fn append_user_message(&mut self, chat_id: Uuid, content: &str) -> Option<Message> {
        let message = Message::new(Role::User, content);
        self.push_message(chat_id, message).await
    }

    /// Appends an assistant reply. `content` keeps the raw text; the thinking
    /// segment is derived alongside it.
    pub async fn append_assistant_message(
        &mut self,
        chat_id: Uuid,
        full_text: &str,
    ) -> Option<Message> {
        let message = assistant_message(full_text);
        self.push_message(chat_id, message).await
    }

    /// Replaces a trailing assistant message with a new one (new id), or
    /// appends when the chat does not end with an assistant message.
    pub async fn replace_last_assistant_message(
        &mut self,
        chat_id: Uuid,
        full_text: &str,
    ) -> Option<Message> {
        let message = assistant_message(full_text);
        let idx = self.index_of(chat_id)?;
        let chat = &mut self.chats[idx];
        match chat.messages.last() {
            Some(last) if last.role == Role::Assistant => {
                log::info!(
                    "Replacing assistant message {} with {} in chat {}",
                    last.id,
                    message.id,
                    chat_id
                );
                chat.messages.pop();
            }
            _ => log::debug!("Chat {} has no trailing assistant message, appending", chat_id),
        }
        chat.messages.push(message.clone());
        self.bump(idx);
        self.persist_chats().await;
        Some(message)
    }

    /// Titles the chat after its first user message once it holds two or
    /// more messages. Happens at most once per chat.
    pub async fn derive_title(&mut self, chat_id: Uuid) -> bool {
        let Some(idx) = self.index_of(chat_id) else {
            return false;
        };
        let chat = &mut self.chats[idx];
        if chat.title_fixed || chat.messages.len() < 2 {
            return false;
        }
        let Some(first_user) = chat.messages.iter().find(|m| m.role == Role::User) else {
            return false;
        };
        chat.title = title_from(&first_user.content);
        chat.title_fixed = true;
        chat.touch();
        log::debug!("Chat {} titled '{}'", chat_id, chat.title);
        self.persist_chats().await;
        true
    }

    pub async fn rename_chat(&mut self, chat_id: Uuid, title: &str) -> ChatResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ChatError::State("New title cannot be empty.".into()));
        }
        let idx = self
            .index_of(chat_id)
            .ok_or_else(|| ChatError::State(format!("Chat {} not found", chat_id)))?;
        let chat = &mut self.chats[idx];
        chat.title = title.to_string();
        chat.title_fixed = true;
        chat.touch();
        self.persist_chats().await;
        Ok(())
    }

    /// Removes a chat. If it was active, the most recent remaining chat
    /// becomes active.
    pub async fn delete_chat(&mut self, chat_id: Uuid) -> bool {
        let Some(idx) = self.index_of(chat_id) else {
            log::warn!("Attempted to delete non-existent chat: {}", chat_id);
            return false;
        };
        log::warn!("Deleting chat {}", chat_id);
        self.chats.remove(idx);
        if self.current_chat_id == Some(chat_id) {
            self.current_chat_id = self.chats.first().map(|c| c.id);
        }
        self.persist_chats().await;
        true
    }

    pub async fn clear(&mut self) {
        log::warn!("Clearing all {} chats", self.chats.len());
        self.chats.clear();
        self.current_chat_id = None;
        self.persist_chats().await;
    }

    fn index_of(&self, chat_id: Uuid) -> Option<usize> {
        self.chats.iter().position(|c| c.id == chat_id)
    }

    async fn push_message(&mut self, chat_id: Uuid, message: Message) -> Option<Message> {
        let Some(idx) = self.index_of(chat_id) else {
            log::warn!("Dropping {} message for unknown chat {}", message.role, chat_id);
            return None;
        };
        log::debug!("Appending {} message {} to chat {}", message.role, message.id, chat_id);
        self.chats[idx].messages.push(message.clone());
        self.bump(idx);
        self.persist_chats().await;
        Some(message)
    }

    // Touch and move to the front so the collection stays most-recent first.
    fn bump(&mut self, idx: usize) {
        let mut chat = self.chats.remove(idx);
        chat.touch();
        self.chats.insert(0, chat);
    }

    async fn persist_chats(&self) {
        match serde_json::to_string(&self.chats) {
            Ok(raw) => {
                if let Err(e) = self.blobs.save(CHATS_KEY, &raw).await {
                    log::error!("Failed to persist chats: {:?}", e);
                }
            }
            Err(e) => log::error!("Failed to serialize chats: {}", e),
        }
    }

    async fn persist_config(&self) {
        match serde_json::to_string(&self.api_config) {
            Ok(raw) => {
                if let Err(e) = self.blobs.save(API_CONFIG_KEY, &raw).await {
                    log::error!("Failed to persist API config: {:?}", e);
                }
            }
            Err(e) => log::error!("Failed to serialize API config: {}", e),
        }
    }
}

fn assistant_message(full_text: &str) -> Message {
    let mut message = Message::new(Role::Assistant, full_text);
    message.thinking = thinking::extract(full_text).thinking;
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;
    use pretty_assertions::assert_eq;

    fn store() -> (ConversationStore, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        (ConversationStore::new(blobs.clone()), blobs)
    }

    #[test]
    fn title_truncates_on_char_boundary() {
        assert_eq!(title_from("Hi"), "Hi");
        assert_eq!(title_from(&"a".repeat(30)), "a".repeat(30));
        assert_eq!(title_from(&"é".repeat(31)), format!("{}...", "é".repeat(30)));
    }

    #[tokio::test]
    async fn create_chat_goes_first_and_becomes_active() {
        let (mut store, _) = store();
        let first = store.create_chat().await;
        let second = store.create_chat().await;
        assert_eq!(store.chats()[0].id, second.id);
        assert_eq!(store.chats()[1].id, first.id);
        assert_eq!(store.current_chat_id(), Some(second.id));
    }

    #[tokio::test]
    async fn append_to_unknown_chat_is_noop() {
        let (mut store, _) = store();
        assert!(store.append_user_message(Uuid::new_v4(), "Hi").await.is_none());
        assert!(store.chats().is_empty());
    }

    #[tokio::test]
    async fn assistant_message_keeps_raw_content() {
        let (mut store, _) = store();
        let chat = store.create_chat().await;
        let msg = store
            .append_assistant_message(chat.id, "<think>hmm</think>Answer")
            .await
            .unwrap();
        assert_eq!(msg.content, "<think>hmm</think>Answer");
        assert_eq!(msg.thinking.as_deref(), Some("hmm"));
        assert_eq!(msg.rendered().response, "Answer");
    }

    #[tokio::test]
    async fn replace_last_assistant_swaps_id_in_place() {
        let (mut store, _) = store();
        let chat = store.create_chat().await;
        let user = store.append_user_message(chat.id, "Hi").await.unwrap();
        let old = store.append_assistant_message(chat.id, "Hello!").await.unwrap();
        let new = store
            .replace_last_assistant_message(chat.id, "Hey there")
            .await
            .unwrap();

        let messages = &store.chat(chat.id).unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, user.id);
        assert_eq!(messages[1].id, new.id);
        assert_ne!(new.id, old.id);
        assert_eq!(messages[1].content, "Hey there");
    }

    #[tokio::test]
    async fn replace_without_trailing_assistant_appends() {
        let (mut store, _) = store();
        let chat = store.create_chat().await;
        store.append_user_message(chat.id, "Hi").await;
        store.replace_last_assistant_message(chat.id, "Hello").await;
        let roles: Vec<Role> = store.chat(chat.id).unwrap().messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn title_derived_once() {
        let (mut store, _) = store();
        let chat = store.create_chat().await;
        store.append_user_message(chat.id, "What is the capital of France, please?").await;
        assert!(!store.derive_title(chat.id).await);
        store.append_assistant_message(chat.id, "Paris").await;
        assert!(store.derive_title(chat.id).await);
        assert_eq!(store.chat(chat.id).unwrap().title, "What is the capital of France,...");

        store.append_user_message(chat.id, "Another question").await;
        assert!(!store.derive_title(chat.id).await);
        assert_eq!(store.chat(chat.id).unwrap().title, "What is the capital of France,...");
    }

    #[tokio::test]
    async fn renamed_chat_keeps_its_title() {
        let (mut store, _) = store();
        let chat = store.create_chat().await;
        store.rename_chat(chat.id, "  Mine ").await.unwrap();
        store.append_user_message(chat.id, "Hi").await;
        store.append_assistant_message(chat.id, "Hello").await;
        assert!(!store.derive_title(chat.id).await);
        assert_eq!(store.chat(chat.id).unwrap().title, "Mine");
        assert!(matches!(store.rename_chat(chat.id, " ").await, Err(ChatError::State(_))));
    }

    #[tokio::test]
    async fn updated_at_advances_and_chat_moves_to_front() {
        let (mut store, _) = store();
        let older = store.create_chat().await;
        let newer = store.create_chat().await;
        let before = store.chat(older.id).unwrap().updated_at;
        store.append_user_message(older.id, "bump").await;
        assert_eq!(store.chats()[0].id, older.id);
        assert_eq!(store.chats()[1].id, newer.id);
        assert!(store.chat(older.id).unwrap().updated_at >= before);
    }

    #[tokio::test]
    async fn deleting_active_chat_selects_next_most_recent() {
        let (mut store, _) = store();
        let other = store.create_chat().await;
        let active = store.create_chat().await;
        assert!(store.delete_chat(active.id).await);
        assert_eq!(store.current_chat_id(), Some(other.id));
        assert!(store.delete_chat(other.id).await);
        assert_eq!(store.current_chat_id(), None);
    }

    #[tokio::test]
    async fn deleting_inactive_chat_keeps_selection() {
        let (mut store, _) = store();
        let other = store.create_chat().await;
        let active = store.create_chat().await;
        store.delete_chat(other.id).await;
        assert_eq!(store.current_chat_id(), Some(active.id));
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let (mut store, blobs) = store();
        store.create_chat().await;
        store.create_chat().await;
        store.clear().await;
        assert!(store.chats().is_empty());
        assert_eq!(store.current_chat_id(), None);
        assert_eq!(blobs.load(CHATS_KEY).await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn writes_through_and_reloads() {
        let (mut store, blobs) = store();
        let chat = store.create_chat().await;
        store.append_user_message(chat.id, "Hi").await;
        store
            .set_api_config(ApiConfig {
                api_key: "sk-1".into(),
                ..ApiConfig::default()
            })
            .await;

        let reloaded = ConversationStore::load(blobs).await;
        assert_eq!(reloaded.chats(), store.chats());
        assert_eq!(reloaded.current_chat_id(), Some(chat.id));
        assert_eq!(reloaded.api_config().api_key, "sk-1");
    }

    #[tokio::test]
    async fn corrupt_blobs_load_as_empty() {
        let blobs = Arc::new(MemoryBlobStore::with_entries([
            (CHATS_KEY, "not json"),
            (API_CONFIG_KEY, "{\"baseUrl\":"),
        ]));
        let store = ConversationStore::load(blobs).await;
        assert!(store.chats().is_empty());
        assert_eq!(store.current_chat_id(), None);
        assert_eq!(store.api_config(), &ApiConfig::default());
    }

    #[tokio::test]
    async fn history_is_role_and_content_only() {
        let (mut store, _) = store();
        let chat = store.create_chat().await;
        store.append_user_message(chat.id, "Hi").await;
        store.append_assistant_message(chat.id, "Hello!").await;
        assert_eq!(
            store.history(chat.id),
            vec![
                WireMessage { role: Role::User, content: "Hi".into() },
                WireMessage { role: Role::Assistant, content: "Hello!".into() },
            ]
        );
    }
}
