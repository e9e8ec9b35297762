use crate::conditions::{ConditionStatus, ConditionType, Conditions, HasConditions, Severity};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label telling the database server instance hosting a database
pub const DATABASE_INSTANCE_LABEL: &str = "dbName";

/// A database (and its user) requested from a MariaDB server
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "MariaDBDatabase",
    status = "MariaDBDatabaseStatus",
    group = "mariadb.openstack.org",
    version = "v1beta1",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBDatabaseSpec {
    /// Name of the database in the server
    pub name: String,
    /// Secret holding the password of the database user
    pub secret: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBDatabaseStatus {
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub completed: bool,
    /// Address of the server hosting the database
    #[serde(default)]
    pub hostname: Option<String>,
}

impl MariaDBDatabase {
    /// Hostname of the server once the database is usable
    pub fn ready_hostname(&self) -> Option<&str> {
        self.status
            .as_ref()
            .filter(|s| s.completed)
            .and_then(|s| s.hostname.as_deref())
            .filter(|h| !h.is_empty())
    }

    /// Message of a Ready condition reporting a hard failure
    pub fn failure(&self) -> Option<&str> {
        self.conditions()
            .and_then(|c| c.get(&ConditionType::READY))
            .filter(|c| c.status == ConditionStatus::False && c.severity == Some(Severity::Error))
            .map(|c| c.message.as_str())
    }
}

impl HasConditions for MariaDBDatabase {
    fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|s| &s.conditions)
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.get_or_insert_with(MariaDBDatabaseStatus::default).conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::ConditionReason;

    #[test]
    fn test_hostname_only_when_completed() {
        let mut db = MariaDBDatabase::new("nova-api", MariaDBDatabaseSpec {
            name: "nova_api".to_string(),
            secret: "osp-secret".to_string(),
        });
        assert_eq!(db.ready_hostname(), None);
        db.status = Some(MariaDBDatabaseStatus {
            hostname: Some("openstack.openstack.svc".to_string()),
            ..MariaDBDatabaseStatus::default()
        });
        assert_eq!(db.ready_hostname(), None);
        if let Some(s) = db.status.as_mut() {
            s.completed = true;
        }
        assert_eq!(db.ready_hostname(), Some("openstack.openstack.svc"));
    }

    #[test]
    fn test_failure_needs_error_severity() {
        let mut db = MariaDBDatabase::default();
        db.conditions_mut().mark_false(
            ConditionType::READY,
            ConditionReason::REQUESTED,
            Severity::Info,
            "waiting".to_string(),
        );
        assert_eq!(db.failure(), None);
        db.conditions_mut().mark_false(
            ConditionType::READY,
            ConditionReason::ERROR,
            Severity::Error,
            "access denied".to_string(),
        );
        assert_eq!(db.failure(), Some("access denied"));
    }
}
