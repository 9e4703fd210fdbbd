//! Object access control entries.

use serde::Deserialize;

/// Plugin id for ACL entries granted to a single user.
pub const USER_PLUGIN: &str = "django_user";
/// Plugin id for ACL entries granted to a group.
pub const GROUP_PLUGIN: &str = "django_group";

/// One access control entry on an experiment.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectAcl {
    /// Which kind of entity the entry grants to.
    #[serde(rename = "pluginId")]
    pub plugin_id: String,
    /// Id of that entity, as a string.
    #[serde(rename = "entityId")]
    pub entity_id: String,
    /// Id of the object being protected.
    pub object_id: u64,
    /// Read permission.
    #[serde(rename = "canRead", default)]
    pub can_read: bool,
    /// Ownership implies read.
    #[serde(rename = "isOwner", default)]
    pub is_owner: bool,
}

impl ObjectAcl {
    /// Whether this entry lets the given user (or one of their groups) read the object.
    #[must_use]
    pub fn grants_read_to(&self, user_id: u64, group_ids: &[u64]) -> bool {
        if !(self.can_read || self.is_owner) {
            return false;
        }
        let Ok(entity) = self.entity_id.parse::<u64>() else {
            return false;
        };
        match self.plugin_id.as_str() {
            USER_PLUGIN => entity == user_id,
            GROUP_PLUGIN => group_ids.contains(&entity),
            _ => false,
        }
    }
}
