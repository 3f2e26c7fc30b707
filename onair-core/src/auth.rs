//! Auth collaborator seam.
//!
//! The engine does not authenticate anyone; it only asks the external auth
//! collaborator which role the current caller holds and gates privileged
//! writes on it.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Role asserted by the auth collaborator for the current client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May write broadcast state and manage schedules.
    Admin,
    /// May read and subscribe only.
    Listener,
}

impl Role {
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Trait for the external auth collaborator.
pub trait AuthProvider: Send + Sync {
    /// Role of the client this process is acting for.
    fn current_role(&self) -> Role;
}

/// Gate a privileged operation on the admin role.
///
/// # Errors
///
/// Returns [`CoreError::Unauthorized`] naming the attempted action.
pub fn require_admin(auth: &dyn AuthProvider, action: &str) -> Result<()> {
    if auth.current_role().is_admin() {
        Ok(())
    } else {
        Err(CoreError::Unauthorized {
            action: action.to_string(),
        })
    }
}
