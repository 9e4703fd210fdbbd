//! User and user-authentication models.

use serde::Deserialize;

use super::id_from_uri;

/// A MyTardis user account.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    /// Object id.
    pub id: u64,
    /// Primary username.
    pub username: String,
    /// Staff accounts can read everything.
    #[serde(default)]
    pub is_staff: bool,
    /// Superusers can read everything.
    #[serde(default)]
    pub is_superuser: bool,
    /// Resource URIs of the groups the user belongs to.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl User {
    /// Staff and superusers bypass per-experiment checks.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.is_staff || self.is_superuser
    }

    /// Ids of the user's groups, skipping malformed URIs.
    pub fn group_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.groups.iter().filter_map(|uri| id_from_uri(uri))
    }
}

/// Links an external identity (e.g. an LDAP login) to a MyTardis user.
#[derive(Debug, Clone, Deserialize)]
pub struct UserAuthentication {
    /// The external username.
    pub username: String,
    /// The authentication method the username belongs to.
    #[serde(rename = "authenticationMethod")]
    pub authentication_method: String,
    /// The MyTardis account behind it.
    pub user: User,
}
