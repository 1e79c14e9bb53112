use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// In-memory assistant conversations keyed by session id.
#[derive(Clone, Default)]
pub struct ChatSessions {
    sessions: Arc<Mutex<HashMap<String, VecDeque<ChatMessage>>>>,
}

impl ChatSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_session(&self) -> String {
        let session_id = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session_id.clone(), VecDeque::new());
        session_id
    }

    /// Appends to an existing session, dropping the oldest messages past
    /// `MAX_HISTORY`.
    pub async fn append(&self, session_id: &str, message: ChatMessage) -> AppResult<()> {
        let mut sessions = self.sessions.lock().await;
        let Some(history) = sessions.get_mut(session_id) else {
            return Err(AppError::NotFound(format!("No chat session {}", session_id)));
        };
        history.push_back(message);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
        Ok(())
    }

    pub async fn history(&self, session_id: &str) -> AppResult<Vec<ChatMessage>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .map(|history| history.iter().cloned().collect())
            .ok_or_else(|| AppError::NotFound(format!("No chat session {}", session_id)))
    }

    pub async fn close_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_id).is_some()
    }
}
