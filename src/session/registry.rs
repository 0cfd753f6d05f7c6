//! Process-wide registry of call sessions.
//!
//! The registry is the single entry point for telephony events. It enforces
//! the one-active-call invariant (additional offers are rejected busy), routes
//! media to the owning session, and reaps sessions that reached a terminal
//! state.

use std::sync::Arc;

use dashmap::DashMap;

use super::{CallId, CallSession, SessionConfig};
use crate::ai::AiSessionClient;
use crate::telephony::{CallControl, CallerInfo, MediaSink, TelephonyEvent};
use crate::tools::ToolDispatcher;

/// Registry and factory for [`CallSession`]s.
pub struct SessionRegistry {
    sessions: DashMap<CallId, Arc<CallSession>>,
    ai_client: Arc<dyn AiSessionClient>,
    tools: Arc<ToolDispatcher>,
    template: SessionConfig,
}

impl SessionRegistry {
    /// Create a registry that builds sessions from `template`.
    pub fn new(
        ai_client: Arc<dyn AiSessionClient>,
        tools: Arc<ToolDispatcher>,
        template: SessionConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            ai_client,
            tools,
            template,
        }
    }

    /// Handle an offered call.
    ///
    /// If another call is still live the offer is rejected busy and `None` is
    /// returned. Otherwise a session is created, registered and started on its
    /// own task.
    pub fn offer_call(
        &self,
        call: CallId,
        caller: CallerInfo,
        control: Arc<dyn CallControl>,
        media: Arc<dyn MediaSink>,
    ) -> Option<Arc<CallSession>> {
        self.reap();
        if !self.sessions.is_empty() {
            tracing::info!(%call, caller = %caller.remote_uri, "Busy, rejecting offered call");
            tokio::spawn(async move {
                if let Err(e) = control.reject().await {
                    tracing::warn!(%call, error = %e, "Busy reject failed");
                }
            });
            return None;
        }

        tracing::info!(%call, caller = %caller.remote_uri, "Incoming call");
        let session = Arc::new(CallSession::new(
            call,
            caller,
            self.template.clone(),
            control,
            media,
            self.ai_client.clone(),
            self.tools.clone(),
        ));
        self.sessions.insert(call, session.clone());

        let starting = session.clone();
        tokio::spawn(async move {
            let id = starting.id();
            if let Err(e) = starting.start().await {
                tracing::error!(call = %id, error = %e, "Session start failed");
            }
        });
        Some(session)
    }

    /// Route a non-offer telephony event to the owning session.
    ///
    /// Offers carry no control handles on the event and must come through
    /// [`offer_call`](Self::offer_call).
    pub fn handle_event(&self, event: TelephonyEvent) {
        match event {
            TelephonyEvent::CallOffered { call, .. } => {
                tracing::warn!(%call, "Offer on the event path ignored, use offer_call");
            }
            TelephonyEvent::CallAnswered { call } => {
                tracing::debug!(%call, "PBX confirmed answer");
            }
            TelephonyEvent::CallTerminated { call, reason } => {
                if let Some(session) = self.get(call) {
                    tokio::spawn(async move {
                        session.stop(&format!("remote hangup: {reason}")).await;
                    });
                }
                self.reap();
            }
            TelephonyEvent::Media { call, frame } => {
                if let Some(session) = self.get(call) {
                    session.on_telephony_audio(frame);
                }
            }
            TelephonyEvent::RegistrationChanged { registered } => {
                if registered {
                    tracing::info!("Registered with PBX");
                } else {
                    tracing::warn!("Lost PBX registration");
                }
            }
        }
    }

    /// Look up a session by call id.
    pub fn get(&self, call: CallId) -> Option<Arc<CallSession>> {
        self.sessions.get(&call).map(|entry| entry.value().clone())
    }

    /// Drop sessions that reached a terminal state.
    pub fn reap(&self) {
        self.sessions
            .retain(|_, session| !session.state().is_terminal());
    }

    /// Number of registered (possibly terminal, not yet reaped) sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every session and empty the registry.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<CallSession>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for session in sessions {
            session.stop("gateway shutdown").await;
        }
        self.sessions.clear();
    }
}
