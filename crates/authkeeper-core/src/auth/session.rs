use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Capacity of the session event channel. Slow subscribers lag rather than block writers.
const EVENT_BUFFER_SIZE: usize = 32;

/// Profile image as returned by the backend: either a bare URL or a hosted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(untagged)]
pub enum Avatar {
    Url(String),
    Hosted {
        #[serde(default)]
        public_id: Option<String>,
        url: String,
    },
}

impl Avatar {
    pub fn url(&self) -> &str {
        match self {
            Avatar::Url(url) => url,
            Avatar::Hosted { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserIdentity {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Avatar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: Option<UserIdentity>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Issued by registration, consumed by account activation
    pub activation_token: Option<String>,
    /// Bumped on every mutation
    pub version: u64,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    fn is_empty(&self) -> bool {
        self.user.is_none()
            && self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.activation_token.is_none()
    }
}

/// Fields to overwrite in a `replace`. `None` leaves the current value alone.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub user: Option<UserIdentity>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: String },
    TokensRotated,
    Registered,
    SignedOut,
}

/// Observable in-memory session. All mutation goes through this type; watchers
/// see the new value before the mutating call returns.
pub struct SessionState {
    current: watch::Sender<Session>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (current, _) = watch::channel(Session::default());
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { current, events }
    }

    pub fn current(&self) -> Session {
        self.current.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.borrow().is_authenticated()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.current.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn replace(&self, patch: SessionPatch) {
        let event = match patch.user {
            Some(ref user) => SessionEvent::SignedIn {
                user_id: user.id.clone(),
            },
            None => SessionEvent::TokensRotated,
        };

        self.mutate(
            |session| {
                if let Some(user) = patch.user {
                    session.user = Some(user);
                }
                if let Some(access) = patch.access_token {
                    session.access_token = Some(access);
                }
                if let Some(refresh) = patch.refresh_token {
                    session.refresh_token = Some(refresh);
                }
            },
            event,
        );
    }

    /// Swap in a refreshed token pair; the user is left untouched.
    pub fn update_tokens(&self, access: &str, refresh: &str) {
        self.mutate(
            |session| {
                session.access_token = Some(access.to_string());
                session.refresh_token = Some(refresh.to_string());
            },
            SessionEvent::TokensRotated,
        );
    }

    pub fn set_activation_token(&self, token: &str) {
        self.mutate(
            |session| session.activation_token = Some(token.to_string()),
            SessionEvent::Registered,
        );
    }

    pub fn take_activation_token(&self) -> Option<String> {
        let mut taken = None;
        self.current.send_if_modified(|session| {
            taken = session.activation_token.take();
            if taken.is_some() {
                stamp(session);
            }
            taken.is_some()
        });
        taken
    }

    /// Back to the empty session. Resetting an empty session changes nothing.
    pub fn reset(&self) {
        let changed = self.current.send_if_modified(|session| {
            if session.is_empty() {
                return false;
            }
            *session = Session {
                version: session.version,
                ..Session::default()
            };
            stamp(session);
            true
        });

        if changed {
            debug!("Session reset");
            let _ = self.events.send(SessionEvent::SignedOut);
        }
    }

    fn mutate(&self, apply: impl FnOnce(&mut Session), event: SessionEvent) {
        self.current.send_modify(|session| {
            apply(session);
            stamp(session);
        });
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn stamp(session: &mut Session) {
    session.version += 1;
    session.updated_at = Some(Utc::now());
}

// ============================================================================
// Tests
// ============================================================================
