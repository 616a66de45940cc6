//! Telemetry session bookkeeping.
//!
//! A session groups the analytics-style events the sink ships: while one is
//! active every event is stamped with the session and user ids. Changing
//! either id mid-session is refused so a collector can attribute a session's
//! events consistently.

use std::collections::BTreeMap;

use rand::Rng;

/// Tag carried by the session lifecycle events.
pub const SESSION_START_EVENT: &str = "Session.Start";
pub const SESSION_END_EVENT: &str = "Session.End";

/// Field names stamped onto session-scoped events.
pub(crate) const SESSION_ID_FIELD: &str = "sessionId";
pub(crate) const USER_ID_FIELD: &str = "userId";

/// Current session descriptor, owned by the sink behind a mutex.
#[derive(Clone, Debug, Default)]
pub struct Session {
    session_id: Option<String>,
    user_id: Option<String>,
    active: bool,
}

impl Session {
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Activate the session, generating an id when requested and none was
    /// set beforehand.
    pub(crate) fn start(&mut self, generate_id: bool) {
        if generate_id && self.session_id.is_none() {
            self.session_id = Some(generate_session_id());
        }
        self.active = true;
    }

    pub(crate) fn end(&mut self) {
        self.active = false;
        self.session_id = None;
    }

    /// Set the session id; refused while a session is active.
    pub(crate) fn set_session_id(&mut self, id: String) -> bool {
        if self.active {
            log::warn!("tcplog: set_session_id called while a session is active; ignoring");
            return false;
        }
        self.session_id = Some(id);
        true
    }

    /// Set the user id; refused while a session is active.
    pub(crate) fn set_user_id(&mut self, id: String) -> bool {
        if self.active {
            log::warn!("tcplog: set_user_id called while a session is active; ignoring");
            return false;
        }
        self.user_id = Some(id);
        true
    }

    /// Stamp session and user ids onto an event's attribute map.
    pub(crate) fn stamp(&self, fields: &mut BTreeMap<String, String>) {
        if let Some(id) = &self.session_id {
            fields
                .entry(SESSION_ID_FIELD.to_owned())
                .or_insert_with(|| id.clone());
        }
        if let Some(id) = &self.user_id {
            fields
                .entry(USER_ID_FIELD.to_owned())
                .or_insert_with(|| id.clone());
        }
    }
}

/// Random 128-bit hex session id.
fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let bits: u128 = rng.r#gen();
    format!("{bits:032x}")
}
