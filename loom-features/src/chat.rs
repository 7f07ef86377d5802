//! Chat: conversations, their messages and the simulated assistant.
//!
//! Replies are canned strings picked at random; the only "thinking" is the
//! configurable delay [`send_message`] waits before answering.

use crate::args::{optional, required, to_json};
use crate::events::{CHAT_CREATE, CHAT_DELETE, CHAT_OPEN, CHAT_TYPING, ROUTER_NAVIGATE};
use crate::notify::{NotificationKind, notify};
use crate::slice::{PersistedSlice, lock};
use crate::listen::Listeners;
use loom_bus::EventBus;
use loom_plugin_host::{
    Plugin, PluginApi, PluginContext, PluginError, PluginHostError, PluginHostManager, PluginMetadata,
};
use loom_state::paths;
use loom_storage::keys;
use loom_types::{Chat, ChatId, Message, Role, truncate_chars};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const NAME: &str = "chat";

pub const DEFAULT_RESPONSE_DELAY_MS: u64 = 1500;

const CANNED_REPLIES: [&str; 5] = [
    "I've analyzed your request and here's what I found...",
    "Based on the information available, I'd recommend...",
    "That's an interesting question. Here's what I know...",
    "I can help with that. Here are the details...",
    "After reviewing similar cases, here's my response...",
];

/// Plugin configuration, read from the `[plugins.config.chat]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub response_delay_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            response_delay_ms: DEFAULT_RESPONSE_DELAY_MS,
        }
    }
}

impl ChatConfig {
    fn from_value(value: &Value) -> Self {
        if value.is_null() {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "Invalid chat configuration, using defaults");
            Self::default()
        })
    }
}

pub struct ChatPlugin {
    inner: Arc<ChatInner>,
    listeners: Listeners<ChatInner>,
}

struct ChatInner {
    bus: EventBus,
    api: PluginApi,
    slice: PersistedSlice,
    current: Mutex<Option<ChatId>>,
    config: Mutex<ChatConfig>,
}

impl ChatPlugin {
    pub fn new(ctx: PluginContext) -> Self {
        let config = ChatConfig::from_value(&ctx.config);
        let inner = Arc::new(ChatInner {
            slice: PersistedSlice::new(ctx.store.clone(), ctx.storage.clone(), paths::CHATS, keys::CHATS),
            bus: ctx.bus,
            api: ctx.api,
            current: Mutex::new(None),
            config: Mutex::new(config),
        });
        Self {
            listeners: Listeners::new(&inner),
            inner,
        }
    }

    pub fn factory(ctx: PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
        Ok(Arc::new(Self::new(ctx)))
    }

    pub fn list(&self) -> Result<Vec<Chat>, PluginError> {
        self.inner.list()
    }

    pub fn get(&self, id: ChatId) -> Result<Option<Chat>, PluginError> {
        Ok(self.inner.list()?.into_iter().find(|c| c.id == id))
    }

    pub fn current_chat_id(&self) -> Option<ChatId> {
        *lock(&self.inner.current)
    }

    pub fn create(&self) -> Result<Chat, PluginError> {
        self.inner.create()
    }

    pub fn open(&self, id: ChatId) {
        self.inner.open(id);
    }

    pub fn delete(&self, id: ChatId) -> Result<bool, PluginError> {
        self.inner.delete(id)
    }

    pub fn rename(&self, id: ChatId, title: &str) -> Result<bool, PluginError> {
        self.inner.rename(id, title)
    }

    /// Chats whose title or last message contains `query`, ignoring case.
    /// An empty query matches everything.
    pub fn filter(&self, query: &str) -> Result<Vec<Chat>, PluginError> {
        let needle = query.trim().to_lowercase();
        let chats = self.inner.list()?;
        if needle.is_empty() {
            return Ok(chats);
        }
        Ok(chats
            .into_iter()
            .filter(|c| c.title.to_lowercase().contains(&needle) || c.last_message.to_lowercase().contains(&needle))
            .collect())
    }

    /// Appends a message to the current chat. Returns `None` when no chat is
    /// open or the open chat no longer exists.
    pub fn add_message(&self, role: Role, content: &str) -> Result<Option<Message>, PluginError> {
        self.inner.add_message(role, content)
    }

    pub fn generate_reply(text: &str) -> String {
        let mut rng = rand::thread_rng();
        let pick = rng.gen_range(0..=CANNED_REPLIES.len());
        match CANNED_REPLIES.get(pick) {
            Some(reply) => (*reply).to_string(),
            None => format!(
                "You mentioned \"{}...\" - let me provide some insights on that.",
                truncate_chars(text, 20)
            ),
        }
    }

    /// Summarises the latest exchange on the current chat and retitles it
    /// if it still carries its generated `New Chat` title.
    pub fn update_metadata(&self, user_text: &str, reply: &str) -> Result<bool, PluginError> {
        self.inner.update_metadata(user_text, reply)
    }

    pub fn set_typing(&self, typing: bool) {
        self.inner.set_typing(typing);
    }

    pub fn config(&self) -> ChatConfig {
        lock(&self.inner.config).clone()
    }

    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.config().response_delay_ms)
    }

    fn subscribe_bus(&self) {
        let bus = &self.inner.bus;
        self.listeners.on(bus, CHAT_OPEN, |inner: &ChatInner, emission| {
            let id: ChatId = serde_json::from_value(emission.arg(0).clone())?;
            inner.open(id);
            Ok(())
        });
        self.listeners.on(bus, CHAT_CREATE, |inner: &ChatInner, _| {
            inner.create()?;
            Ok(())
        });
        self.listeners.on(bus, CHAT_DELETE, |inner: &ChatInner, emission| {
            let id: ChatId = serde_json::from_value(emission.arg(0).clone())?;
            inner.delete(id)?;
            Ok(())
        });
    }
}

impl ChatInner {
    fn list(&self) -> Result<Vec<Chat>, PluginError> {
        self.slice.items()
    }

    fn create(&self) -> Result<Chat, PluginError> {
        let title = format!("New Chat {}", chrono::Local::now().format("%H:%M:%S"));
        let chat = Chat::new(title, "No messages yet");

        let mut chats = self.list()?;
        chats.insert(0, chat.clone());
        self.slice.replace(&chats)?;
        info!(id = %chat.id, "Chat created");

        self.open(chat.id);
        notify(&self.bus, "New chat created", NotificationKind::Success);
        Ok(chat)
    }

    fn open(&self, id: ChatId) {
        *lock(&self.current) = Some(id);
        debug!(%id, "Chat opened");
        self.bus.emit(ROUTER_NAVIGATE, &[json!("active-chat")]);
    }

    fn delete(&self, id: ChatId) -> Result<bool, PluginError> {
        let mut chats = self.list()?;
        let before = chats.len();
        chats.retain(|c| c.id != id);
        if chats.len() == before {
            return Ok(false);
        }
        self.slice.replace(&chats)?;

        let was_current = {
            let mut current = lock(&self.current);
            if *current == Some(id) {
                *current = None;
                true
            } else {
                false
            }
        };
        if was_current {
            self.bus.emit(ROUTER_NAVIGATE, &[json!("chat")]);
        }
        notify(&self.bus, "Chat deleted successfully", NotificationKind::Success);
        Ok(true)
    }

    fn rename(&self, id: ChatId, title: &str) -> Result<bool, PluginError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PluginError::InvalidArgs("chat title is required".into()));
        }
        let mut chats = self.list()?;
        let Some(chat) = chats.iter_mut().find(|c| c.id == id) else {
            return Ok(false);
        };
        chat.title = title.to_string();
        self.slice.replace(&chats)?;
        notify(&self.bus, "Chat renamed successfully", NotificationKind::Success);
        Ok(true)
    }

    fn add_message(&self, role: Role, content: &str) -> Result<Option<Message>, PluginError> {
        let Some(current) = *lock(&self.current) else {
            return Ok(None);
        };
        let mut chats = self.list()?;
        let Some(chat) = chats.iter_mut().find(|c| c.id == current) else {
            debug!(id = %current, "Open chat no longer exists");
            return Ok(None);
        };
        let message = Message::new(role, content);
        chat.messages.push(message.clone());
        self.slice.replace(&chats)?;
        Ok(Some(message))
    }

    fn update_metadata(&self, user_text: &str, reply: &str) -> Result<bool, PluginError> {
        let Some(current) = *lock(&self.current) else {
            return Ok(false);
        };
        let mut chats = self.list()?;
        let Some(chat) = chats.iter_mut().find(|c| c.id == current) else {
            return Ok(false);
        };
        chat.last_message = format!("AI: {}...", truncate_chars(reply, 50));
        chat.timestamp = chrono::Utc::now();
        if chat.title.starts_with("New Chat") {
            let head = truncate_chars(user_text, 30);
            chat.title = if head.len() < user_text.len() {
                format!("{head}...")
            } else {
                head.to_string()
            };
        }
        self.slice.replace(&chats)?;
        Ok(true)
    }

    fn set_typing(&self, typing: bool) {
        self.api.set_state("typing", json!(typing));
        self.bus.emit(CHAT_TYPING, &[json!(typing)]);
    }
}

impl Plugin for ChatPlugin {
    fn metadata(&self) -> PluginMetadata {
        crate::metadata(NAME, "Chat and messaging feature")
    }

    fn init(&self) -> Result<(), PluginError> {
        self.inner.slice.load();
        Ok(())
    }

    fn enable(&self) -> Result<(), PluginError> {
        self.inner.slice.attach();
        self.subscribe_bus();
        Ok(())
    }

    fn disable(&self) -> Result<(), PluginError> {
        self.listeners.clear();
        self.inner.slice.detach();
        Ok(())
    }

    fn destroy(&self) -> Result<(), PluginError> {
        self.listeners.clear();
        self.inner.slice.detach();
        *lock(&self.inner.current) = None;
        Ok(())
    }

    fn update_config(&self, config: &Value) {
        *lock(&self.inner.config) = ChatConfig::from_value(config);
    }

    fn call(&self, method: &str, args: &[Value]) -> Result<Value, PluginError> {
        match method {
            "list" => to_json(&self.list()?),
            "get" => to_json(&self.get(required(args, 0, "id")?)?),
            "current" => to_json(&self.current_chat_id()),
            "create" => to_json(&self.create()?),
            "open" => {
                self.open(required(args, 0, "id")?);
                Ok(Value::Null)
            }
            "delete" => Ok(json!(self.delete(required(args, 0, "id")?)?)),
            "rename" => {
                let title: String = required(args, 1, "title")?;
                Ok(json!(self.rename(required(args, 0, "id")?, &title)?))
            }
            "filter" => {
                let query: Option<String> = optional(args, 0, "query")?;
                to_json(&self.filter(query.as_deref().unwrap_or_default())?)
            }
            "add_message" => {
                let role: Role = required(args, 0, "role")?;
                let content: String = required(args, 1, "content")?;
                to_json(&self.add_message(role, &content)?)
            }
            "generate_reply" => {
                let text: String = required(args, 0, "text")?;
                Ok(json!(Self::generate_reply(&text)))
            }
            "update_metadata" => {
                let user_text: String = required(args, 0, "user")?;
                let reply: String = required(args, 1, "reply")?;
                Ok(json!(self.update_metadata(&user_text, &reply)?))
            }
            "set_typing" => {
                self.set_typing(required(args, 0, "typing")?);
                Ok(Value::Null)
            }
            "response_delay_ms" => Ok(json!(self.config().response_delay_ms)),
            other => Err(PluginError::MethodNotFound(other.to_string())),
        }
    }
}

/// Sends `text` to the open chat and waits for the simulated reply.
///
/// The user message is stored, `chat:typing true` is emitted, and after the
/// configured delay a canned reply is stored and `chat:typing false` follows.
/// Returns the reply, or `None` for blank input or when no chat is open.
pub async fn send_message(host: &PluginHostManager, text: &str) -> Result<Option<Message>, PluginHostError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let sent = host.call_plugin_method(NAME, "add_message", &[json!(Role::User), json!(text)])?;
    if sent.is_null() {
        debug!("No open chat, message dropped");
        return Ok(None);
    }

    host.call_plugin_method(NAME, "set_typing", &[json!(true)])?;
    let delay = host
        .call_plugin_method(NAME, "response_delay_ms", &[])?
        .as_u64()
        .unwrap_or(DEFAULT_RESPONSE_DELAY_MS);
    tokio::time::sleep(Duration::from_millis(delay)).await;

    let reply = host.call_plugin_method(NAME, "generate_reply", &[json!(text)])?;
    let stored = host.call_plugin_method(NAME, "add_message", &[json!(Role::Assistant), reply.clone()]);
    host.call_plugin_method(NAME, "set_typing", &[json!(false)])?;
    let stored = stored?;
    host.call_plugin_method(NAME, "update_metadata", &[json!(text), reply])?;

    serde_json::from_value(stored).map_err(|e| PluginHostError::Plugin {
        plugin: NAME.to_string(),
        source: e.into(),
    })
}
