//! The session entity stored in the remote cache.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clock::deadline;

/// Index field under which the store indexes the resolved principal name.
pub const PRINCIPAL_INDEX_FIELD: &str = "principal_name";

/// A session: attributes plus the timestamps that decide its expiry.
///
/// Sessions are created by [`SessionRepository::create_session`] and written
/// back with [`SessionRepository::save`]. Only the persistent state is
/// serialized; `is_new` and the superseded ids belong to the local copy.
///
/// [`SessionRepository::create_session`]: crate::SessionRepository::create_session
/// [`SessionRepository::save`]: crate::SessionRepository::save
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    max_inactive_interval: Duration,
    #[serde(default)]
    attributes: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    principal_index_value: Option<String>,

    /// True until the first successful write; deserialized copies are never new.
    #[serde(skip)]
    is_new: bool,

    /// Ids abandoned by [`Session::change_id`] since the last write.
    #[serde(skip)]
    superseded_ids: Vec<String>,
}

impl Session {
    /// Create a new session accessed at `now` with a fresh random id.
    pub fn new(now: DateTime<Utc>, max_inactive_interval: Duration) -> Self {
        Self {
            id: new_id(),
            created_at: now,
            last_accessed_at: now,
            max_inactive_interval,
            attributes: HashMap::new(),
            principal_index_value: None,
            is_new: true,
            superseded_ids: Vec::new(),
        }
    }

    /// The current session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the session id with a fresh one and return it.
    ///
    /// The previous id is remembered so the next save can delete its remote
    /// entry. Rotating several times before a save accumulates ids.
    pub fn change_id(&mut self) -> &str {
        let previous = std::mem::replace(&mut self.id, new_id());
        self.superseded_ids.push(previous);
        &self.id
    }

    /// Ids abandoned since the last write, oldest first.
    pub fn superseded_ids(&self) -> &[String] {
        &self.superseded_ids
    }

    /// Get an attribute value.
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    /// Get an attribute deserialized into `T`.
    ///
    /// Returns `None` when the attribute is missing or has a different shape.
    pub fn attribute_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.attributes
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set an attribute. Setting `null` removes it.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        let name = name.into();
        match value.into() {
            serde_json::Value::Null => {
                self.attributes.remove(&name);
            }
            value => {
                self.attributes.insert(name, value);
            }
        }
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove_attribute(&mut self, name: &str) -> Option<serde_json::Value> {
        self.attributes.remove(name)
    }

    /// Names of all attributes currently set.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// All attributes.
    pub fn attributes(&self) -> &HashMap<String, serde_json::Value> {
        &self.attributes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.last_accessed_at
    }

    pub fn set_last_accessed_at(&mut self, at: DateTime<Utc>) {
        self.last_accessed_at = at;
    }

    pub fn max_inactive_interval(&self) -> Duration {
        self.max_inactive_interval
    }

    pub fn set_max_inactive_interval(&mut self, interval: Duration) {
        self.max_inactive_interval = interval;
    }

    /// The instant this session expires unless accessed again.
    pub fn expires_at(&self) -> DateTime<Utc> {
        deadline(self.last_accessed_at, self.max_inactive_interval)
    }

    /// Whether the session is expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Whether the session has never been written.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// The principal name last resolved before a write.
    pub fn principal_index_value(&self) -> Option<&str> {
        self.principal_index_value.as_deref()
    }

    /// Value of an index field maintained by the store.
    pub fn indexed_value(&self, field: &str) -> Option<&str> {
        match field {
            PRINCIPAL_INDEX_FIELD => self.principal_index_value(),
            _ => None,
        }
    }

    pub(crate) fn set_principal_index_value(&mut self, value: Option<String>) {
        self.principal_index_value = value;
    }

    pub(crate) fn mark_not_new(&mut self) {
        self.is_new = false;
    }

    pub(crate) fn take_superseded_ids(&mut self) -> Vec<String> {
        std::mem::take(&mut self.superseded_ids)
    }

    /// Record an access at `now` after a successful read.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.is_new = false;
        self.superseded_ids.clear();
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
