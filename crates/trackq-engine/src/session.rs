//! Per-user sessions.
//!
//! Each user has one session guarded by a fair `tokio::sync::Mutex`, so a
//! user's queries run one at a time in arrival order while different users
//! proceed concurrently. The transcript only ever grows.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use trackq_core::{ConversationContext, ProcessResponse};

use crate::service::QueryService;

/// One answered query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub query: String,
    pub response: ProcessResponse,
    pub asked_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Session {
    context: ConversationContext,
    transcript: Vec<TranscriptEntry>,
}

/// Routes queries to per-user sessions.
pub struct SessionManager {
    service: Arc<QueryService>,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionManager {
    pub fn new(service: Arc<QueryService>) -> Self {
        Self {
            service,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn service(&self) -> &QueryService {
        &self.service
    }

    async fn session(&self, user: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(sessions.entry(user.to_string()).or_insert_with(|| {
            debug!(user, "Session opened");
            Arc::new(Mutex::new(Session::default()))
        }))
    }

    /// Answer `query` for `user`, after any of their earlier queries.
    pub async fn ask(&self, user: &str, query: &str, cancel: &CancellationToken) -> ProcessResponse {
        let session = self.session(user).await;
        let mut session = session.lock().await;

        let mut context = session.context.clone();
        let response = self
            .service
            .process(query, &mut context, cancel)
            .instrument(info_span!("session", user))
            .await;

        session.context = context;
        session.transcript.push(TranscriptEntry {
            query: query.to_string(),
            response: response.clone(),
            asked_at: Utc::now(),
        });
        response
    }

    pub async fn transcript(&self, user: &str) -> Vec<TranscriptEntry> {
        let session = self.session(user).await;
        let session = session.lock().await;
        session.transcript.clone()
    }

    pub async fn context(&self, user: &str) -> ConversationContext {
        let session = self.session(user).await;
        let session = session.lock().await;
        session.context.clone()
    }

    /// Forget carried project and sprint. The transcript is kept.
    pub async fn reset_context(&self, user: &str) {
        let session = self.session(user).await;
        session.lock().await.context = ConversationContext::default();
    }

    pub async fn user_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
