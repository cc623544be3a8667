//! Resolution of the principal name used as the secondary index.

use crate::session::Session;

/// Index name accepted by [`SessionRepository::find_by_index`]; also the
/// attribute name an application can set the principal name under directly.
///
/// [`SessionRepository::find_by_index`]: crate::SessionRepository::find_by_index
pub const PRINCIPAL_NAME_INDEX_NAME: &str = "PRINCIPAL_NAME_INDEX_NAME";

/// Attribute holding the authentication context of a logged-in user.
pub const SECURITY_CONTEXT_ATTRIBUTE: &str = "SECURITY_CONTEXT";

/// Path of the principal name inside the security context.
pub const DEFAULT_PRINCIPAL_POINTER: &str = "/authentication/name";

/// Derives the principal name a session belongs to.
///
/// An explicit string attribute under [`PRINCIPAL_NAME_INDEX_NAME`] wins;
/// otherwise the name is read out of the [`SECURITY_CONTEXT_ATTRIBUTE`] value
/// with a JSON pointer.
#[derive(Debug, Clone)]
pub struct PrincipalResolver {
    pointer: String,
}

impl Default for PrincipalResolver {
    fn default() -> Self {
        Self {
            pointer: DEFAULT_PRINCIPAL_POINTER.to_string(),
        }
    }
}

impl PrincipalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the name from a different path inside the security context.
    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.pointer = pointer.into();
        self
    }

    pub fn resolve(&self, session: &Session) -> Option<String> {
        if let Some(name) = session
            .attribute(PRINCIPAL_NAME_INDEX_NAME)
            .and_then(|v| v.as_str())
        {
            return Some(name.to_string());
        }

        session
            .attribute(SECURITY_CONTEXT_ATTRIBUTE)?
            .pointer(&self.pointer)?
            .as_str()
            .map(str::to_string)
    }
}
