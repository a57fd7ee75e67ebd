use praxis_core::chat_types::{ChatMessage, HistoryEntry, Role, Sender, Turn};
use tracing::{info, warn};

use crate::api_client::{ApiClient, ApiMode};
use crate::error::ClientError;
use crate::session_gate::SessionGate;

pub const EMPTY_STATE_TEXT: &str = "No messages yet. Say hello!";
pub const LOADING_TEXT: &str = "Loading...";
pub const SIGN_IN_REQUIRED_TEXT: &str = "Session expired. Please sign in again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewStatus {
    Idle,
    Loading,
    Ready,
    Error(String),
    SignInRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewMessage {
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
    pub created_at: Option<String>,
    pub delivery: Delivery,
}

impl ViewMessage {
    fn pending_user(content: &str) -> Self {
        Self {
            id: None,
            role: Role::User,
            content: content.to_string(),
            created_at: None,
            delivery: Delivery::Pending,
        }
    }

    fn assistant_reply(content: String) -> Self {
        Self {
            id: None,
            role: Role::Assistant,
            content,
            created_at: None,
            delivery: Delivery::Sent,
        }
    }
}

impl From<ChatMessage> for ViewMessage {
    fn from(m: ChatMessage) -> Self {
        Self {
            id: Some(m.id),
            role: m.role,
            content: m.content,
            created_at: Some(m.created_at),
            delivery: Delivery::Sent,
        }
    }
}

impl From<HistoryEntry> for ViewMessage {
    fn from(e: HistoryEntry) -> Self {
        Self {
            id: None,
            role: match e.sender {
                Sender::User => Role::User,
                Sender::Bot => Role::Assistant,
            },
            content: e.text,
            created_at: Some(e.time),
            delivery: Delivery::Sent,
        }
    }
}

/// Local state of one conversation: the loaded messages, optimistic sends in
/// flight, and the request status shown to the user.
#[derive(Debug, Clone)]
pub struct ChatView {
    mode: ApiMode,
    chat_id: Option<String>,
    messages: Vec<ViewMessage>,
    status: ViewStatus,
    has_more: bool,
    page_size: usize,
}

impl ChatView {
    pub fn new(page_size: usize) -> Self {
        Self {
            mode: ApiMode::Threaded,
            chat_id: None,
            messages: Vec::new(),
            status: ViewStatus::Idle,
            has_more: false,
            page_size: page_size.max(1),
        }
    }

    pub fn mode(&self) -> ApiMode {
        self.mode
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    pub fn messages(&self) -> &[ViewMessage] {
        &self.messages
    }

    pub fn status(&self) -> &ViewStatus {
        &self.status
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Text of user messages that never reached the server, oldest first.
    pub fn failed_drafts(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User && m.delivery == Delivery::Failed)
            .map(|m| m.content.clone())
            .collect()
    }

    /// Work against a specific thread instead of the most recent one.
    pub fn select_chat(&mut self, chat_id: impl Into<String>) {
        self.chat_id = Some(chat_id.into());
        self.mode = ApiMode::Threaded;
        self.messages.clear();
        self.has_more = false;
        self.status = ViewStatus::Idle;
    }

    pub async fn load(&mut self, client: &ApiClient, gate: &SessionGate) -> Result<(), ClientError> {
        self.status = ViewStatus::Loading;
        let result = self.load_inner(client).await;
        self.settle(result, gate)
    }

    async fn load_inner(&mut self, client: &ApiClient) -> Result<(), ClientError> {
        if self.mode == ApiMode::Threaded {
            match self.load_threaded(client).await {
                Err(e) if e.is_endpoint_missing() => self.fall_back_to_legacy(&e),
                other => return other,
            }
        }
        let history = client.legacy_history().await?;
        self.messages = history.messages.into_iter().map(ViewMessage::from).collect();
        self.has_more = false;
        Ok(())
    }

    async fn load_threaded(&mut self, client: &ApiClient) -> Result<(), ClientError> {
        let chat_id = match self.chat_id.clone() {
            Some(id) => id,
            None => {
                let chats = client.list_chats().await?;
                match chats.into_iter().next() {
                    Some(latest) => latest.id,
                    None => client.create_chat(None).await?,
                }
            }
        };
        let page = client
            .get_messages(&chat_id, Some(self.page_size), None)
            .await?;
        self.chat_id = Some(chat_id);
        self.messages = page.messages.into_iter().map(ViewMessage::from).collect();
        self.has_more = page.has_more;
        Ok(())
    }

    /// Send one user message. Blank input is ignored.
    pub async fn send(
        &mut self,
        client: &ApiClient,
        gate: &SessionGate,
        text: &str,
    ) -> Result<(), ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.messages.push(ViewMessage::pending_user(text));
        let index = self.messages.len() - 1;
        self.status = ViewStatus::Loading;

        let outcome = match self.deliver(client, index).await {
            Ok(reply) => {
                self.messages[index].delivery = Delivery::Sent;
                self.messages.push(reply);
                Ok(())
            }
            Err(e) => {
                self.messages[index].delivery = Delivery::Failed;
                Err(e)
            }
        };
        self.settle(outcome, gate)
    }

    async fn deliver(&mut self, client: &ApiClient, index: usize) -> Result<ViewMessage, ClientError> {
        if self.mode == ApiMode::Threaded {
            match self.deliver_threaded(client, index).await {
                Err(e) if e.is_endpoint_missing() => self.fall_back_to_legacy(&e),
                other => return other,
            }
        }
        let transcript: Vec<Turn> = self
            .messages
            .iter()
            .filter(|m| m.delivery != Delivery::Failed)
            .map(|m| Turn {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();
        let reply = client.legacy_chat(&transcript).await?;
        Ok(ViewMessage::assistant_reply(reply))
    }

    async fn deliver_threaded(
        &mut self,
        client: &ApiClient,
        index: usize,
    ) -> Result<ViewMessage, ClientError> {
        let chat_id = match self.chat_id.clone() {
            Some(id) => id,
            None => {
                let id = client.create_chat(None).await?;
                self.chat_id = Some(id.clone());
                id
            }
        };
        let resp = client
            .post_message(&chat_id, &self.messages[index].content)
            .await?;
        Ok(ViewMessage::from(resp.assistant))
    }

    /// Fetch the page preceding the oldest loaded message. Returns how many
    /// messages were prepended.
    pub async fn load_older(
        &mut self,
        client: &ApiClient,
        gate: &SessionGate,
    ) -> Result<usize, ClientError> {
        if self.mode != ApiMode::Threaded || !self.has_more {
            return Ok(0);
        }
        let (Some(chat_id), Some(before)) = (
            self.chat_id.clone(),
            self.messages.iter().find_map(|m| m.created_at.clone()),
        ) else {
            return Ok(0);
        };

        self.status = ViewStatus::Loading;
        let result = client
            .get_messages(&chat_id, Some(self.page_size), Some(&before))
            .await;
        let added = match &result {
            Ok(page) => page.messages.len(),
            Err(_) => 0,
        };
        if let Ok(page) = &result {
            self.has_more = page.has_more;
            let mut older: Vec<ViewMessage> =
                page.messages.iter().cloned().map(ViewMessage::from).collect();
            older.append(&mut self.messages);
            self.messages = older;
        }
        self.settle(result.map(|_| ()), gate)?;
        Ok(added)
    }

    fn fall_back_to_legacy(&mut self, cause: &ClientError) {
        warn!("Per-thread API unavailable ({cause}), falling back to legacy endpoints");
        self.mode = ApiMode::Legacy;
        self.chat_id = None;
        self.has_more = false;
    }

    /// Map a request outcome to the view status. Unauthorized drops the
    /// stored session.
    fn settle(&mut self, result: Result<(), ClientError>, gate: &SessionGate) -> Result<(), ClientError> {
        match result {
            Ok(()) => {
                self.status = ViewStatus::Ready;
                Ok(())
            }
            Err(ClientError::Unauthorized) => {
                info!("Session rejected by server, clearing stored token");
                if let Err(e) = gate.sign_out() {
                    warn!("Failed to clear token: {e}");
                }
                self.status = ViewStatus::SignInRequired;
                Err(ClientError::Unauthorized)
            }
            Err(e) => {
                self.status = ViewStatus::Error(e.to_string());
                Err(e)
            }
        }
    }

    /// Display lines for the current state.
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.has_more {
            lines.push("(older messages available: /older)".to_string());
        }
        if self.messages.is_empty() && self.status != ViewStatus::Loading {
            lines.push(EMPTY_STATE_TEXT.to_string());
        }
        for m in &self.messages {
            let who = match m.role {
                Role::User => "You",
                Role::Assistant => "Assistant",
            };
            let mut line = format!("{who}: {}", m.content);
            match m.delivery {
                Delivery::Pending => line.push_str(" (sending...)"),
                Delivery::Failed => line.push_str(" (failed)"),
                Delivery::Sent => {}
            }
            lines.push(line);
        }
        match &self.status {
            ViewStatus::Loading => lines.push(LOADING_TEXT.to_string()),
            ViewStatus::Error(message) => lines.push(format!("Error: {message}")),
            ViewStatus::SignInRequired => lines.push(SIGN_IN_REQUIRED_TEXT.to_string()),
            ViewStatus::Idle | ViewStatus::Ready => {}
        }
        lines
    }
}
