use common::{
    conditions::{Condition, ConditionReason, ConditionType, Severity},
    OperatorConfig,
};
use std::fmt;

/// Observed state of a provisioned dependency (database or message bus)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceStatus {
    Creating,
    Completed,
    Failed(String),
}

/// Messages of the condition reporting a dependency
pub struct DependencyMessages {
    pub ready: &'static str,
    pub running: &'static str,
    pub error: &'static str,
}

impl ResourceStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, ResourceStatus::Completed)
    }

    /// Condition of the given type reporting this status
    pub fn condition(&self, type_: ConditionType, messages: &DependencyMessages) -> Condition {
        match self {
            ResourceStatus::Completed => Condition::ok(type_, messages.ready),
            ResourceStatus::Creating => Condition::ko(
                type_,
                ConditionReason::ERROR,
                Severity::Error,
                messages.running.to_string(),
            ),
            ResourceStatus::Failed(e) => Condition::ko(
                type_,
                ConditionReason::ERROR,
                Severity::Error,
                format!("{}: {e}", messages.error),
            ),
        }
    }
}

/// Why a cell was not reconciled during this pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    DbPending,
    MqPending,
    PrimaryPending,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::DbPending => "db-pending",
            SkipReason::MqPending => "mq-pending",
            SkipReason::PrimaryPending => "cell0-pending",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    Skip(SkipReason),
}

/// What a cell needs before it can be reconciled
#[derive(Clone, Debug)]
pub struct GateUnit<'a> {
    pub name: &'a str,
    pub has_api_access: bool,
    pub database: &'a ResourceStatus,
    pub message_bus: &'a ResourceStatus,
}

/// Decides whether a cell may proceed, given its dependencies and the primary cell readiness
pub struct DependencyGate<'a> {
    primary_cell: &'a str,
}

impl<'a> DependencyGate<'a> {
    #[must_use]
    pub fn new(config: &'a OperatorConfig) -> Self {
        Self {
            primary_cell: &config.primary_cell,
        }
    }

    /// Rules are checked in order: database, message bus, then the primary cell
    /// for non-primary cells reaching the API database
    pub fn can_proceed(&self, unit: &GateUnit<'_>, primary_ready: bool) -> Gate {
        if !unit.database.is_completed() {
            Gate::Skip(SkipReason::DbPending)
        } else if !unit.message_bus.is_completed() {
            Gate::Skip(SkipReason::MqPending)
        } else if unit.has_api_access && unit.name != self.primary_cell && !primary_ready {
            Gate::Skip(SkipReason::PrimaryPending)
        } else {
            Gate::Proceed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit<'a>(name: &'a str, api: bool, db: &'a ResourceStatus, mq: &'a ResourceStatus) -> GateUnit<'a> {
        GateUnit {
            name,
            has_api_access: api,
            database: db,
            message_bus: mq,
        }
    }

    #[test]
    fn test_gate_rules_in_order() {
        let config = OperatorConfig::default();
        let gate = DependencyGate::new(&config);
        let done = ResourceStatus::Completed;
        let creating = ResourceStatus::Creating;
        let failed = ResourceStatus::Failed("boom".to_string());

        assert_eq!(
            gate.can_proceed(&unit("cell1", true, &creating, &creating), false),
            Gate::Skip(SkipReason::DbPending)
        );
        assert_eq!(
            gate.can_proceed(&unit("cell1", true, &failed, &done), true),
            Gate::Skip(SkipReason::DbPending)
        );
        assert_eq!(
            gate.can_proceed(&unit("cell1", true, &done, &failed), true),
            Gate::Skip(SkipReason::MqPending)
        );
        assert_eq!(
            gate.can_proceed(&unit("cell1", true, &done, &done), false),
            Gate::Skip(SkipReason::PrimaryPending)
        );
        assert_eq!(gate.can_proceed(&unit("cell1", true, &done, &done), true), Gate::Proceed);
    }

    #[test]
    fn test_primary_and_isolated_cells_do_not_wait_for_primary() {
        let config = OperatorConfig::default();
        let gate = DependencyGate::new(&config);
        let done = ResourceStatus::Completed;
        assert_eq!(gate.can_proceed(&unit("cell0", true, &done, &done), false), Gate::Proceed);
        assert_eq!(gate.can_proceed(&unit("cell2", false, &done, &done), false), Gate::Proceed);
    }

    #[test]
    fn test_status_conditions() {
        use common::conditions::ConditionStatus;
        let messages = DependencyMessages {
            ready: "done",
            running: "running",
            error: "failed",
        };
        let type_ = ConditionType::NOVA_API_DB_READY;
        assert!(ResourceStatus::Completed.condition(type_.clone(), &messages).is_true());
        let creating = ResourceStatus::Creating.condition(type_.clone(), &messages);
        assert_eq!(creating.status, ConditionStatus::False);
        assert_eq!(creating.reason, ConditionReason::ERROR);
        assert_eq!(creating.severity, Some(Severity::Error));
        assert_eq!(creating.message, "running");
        let failed = ResourceStatus::Failed("denied".to_string()).condition(type_, &messages);
        assert_eq!(failed.severity, Some(Severity::Error));
        assert_eq!(failed.message, "failed: denied");
    }

    #[test]
    fn test_primary_name_comes_from_configuration() {
        let config = OperatorConfig {
            primary_cell: "main".to_string(),
            ..OperatorConfig::default()
        };
        let gate = DependencyGate::new(&config);
        let done = ResourceStatus::Completed;
        assert_eq!(
            gate.can_proceed(&unit("cell0", true, &done, &done), false),
            Gate::Skip(SkipReason::PrimaryPending)
        );
        assert_eq!(gate.can_proceed(&unit("main", true, &done, &done), false), Gate::Proceed);
        assert_eq!(SkipReason::PrimaryPending.to_string(), "cell0-pending");
    }
}
