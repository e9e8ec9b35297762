use crate::gate::{ResourceStatus, SkipReason};
use common::conditions::{
    Condition, ConditionReason, ConditionType, Severity, ALL_CELLS_DB_READY_CREATING_MESSAGE,
    ALL_CELLS_DB_READY_ERROR_MESSAGE, ALL_CELLS_DB_READY_MESSAGE, ALL_CELLS_MQ_READY_CREATING_MESSAGE,
    ALL_CELLS_MQ_READY_ERROR_MESSAGE, ALL_CELLS_MQ_READY_MESSAGE, ALL_CELLS_READY_CREATING_MESSAGE,
    ALL_CELLS_READY_ERROR_MESSAGE, ALL_CELLS_READY_MESSAGE, ALL_CELLS_READY_WAITING_MESSAGE,
};

/// Result of one cell for one aspect (database, message bus or the cell itself)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Failed(String),
    Creating,
    Skipped(SkipReason),
    Ready,
}

impl From<&ResourceStatus> for Outcome {
    fn from(status: &ResourceStatus) -> Self {
        match status {
            ResourceStatus::Creating => Outcome::Creating,
            ResourceStatus::Completed => Outcome::Ready,
            ResourceStatus::Failed(e) => Outcome::Failed(e.clone()),
        }
    }
}

/// Message prefixes of an aggregated condition
pub struct AggregateMessages {
    pub ready: &'static str,
    pub failed: &'static str,
    pub creating: &'static str,
    pub waiting: &'static str,
}

pub const CELL_DATABASES: AggregateMessages = AggregateMessages {
    ready: ALL_CELLS_DB_READY_MESSAGE,
    failed: ALL_CELLS_DB_READY_ERROR_MESSAGE,
    creating: ALL_CELLS_DB_READY_CREATING_MESSAGE,
    waiting: ALL_CELLS_DB_READY_CREATING_MESSAGE,
};

pub const CELL_MESSAGE_BUSES: AggregateMessages = AggregateMessages {
    ready: ALL_CELLS_MQ_READY_MESSAGE,
    failed: ALL_CELLS_MQ_READY_ERROR_MESSAGE,
    creating: ALL_CELLS_MQ_READY_CREATING_MESSAGE,
    waiting: ALL_CELLS_MQ_READY_CREATING_MESSAGE,
};

pub const CELLS: AggregateMessages = AggregateMessages {
    ready: ALL_CELLS_READY_MESSAGE,
    failed: ALL_CELLS_READY_ERROR_MESSAGE,
    creating: ALL_CELLS_READY_CREATING_MESSAGE,
    waiting: ALL_CELLS_READY_WAITING_MESSAGE,
};

/// Per-cell outcomes folded into one condition
#[derive(Clone, Debug)]
pub struct Aggregation {
    pub condition: Condition,
    pub failed: Vec<String>,
    pub creating: Vec<String>,
    pub skipped: Vec<String>,
    pub ready: Vec<String>,
}

/// Fold outcomes into a condition of the given type
///
/// Any failure wins over cells being created, which win over skipped cells.
/// Only the names of the winning partition are listed in the message.
pub fn aggregate(
    type_: ConditionType,
    messages: &AggregateMessages,
    outcomes: &[(String, Outcome)],
) -> Aggregation {
    let mut sorted: Vec<&(String, Outcome)> = outcomes.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut failed = Vec::new();
    let mut failed_details = Vec::new();
    let mut creating = Vec::new();
    let mut skipped = Vec::new();
    let mut skipped_details = Vec::new();
    let mut ready = Vec::new();
    for (name, outcome) in sorted {
        match outcome {
            Outcome::Failed(e) => {
                failed.push(name.clone());
                failed_details.push(format!("{name}({e})"));
            }
            Outcome::Creating => creating.push(name.clone()),
            Outcome::Skipped(reason) => {
                skipped.push(name.clone());
                skipped_details.push(format!("{name}({reason})"));
            }
            Outcome::Ready => ready.push(name.clone()),
        }
    }

    let condition = if !failed.is_empty() {
        Condition::ko(
            type_,
            ConditionReason::ERROR,
            Severity::Error,
            format!("{}: {}", messages.failed, failed_details.join(", ")),
        )
    } else if !creating.is_empty() {
        Condition::ko(
            type_,
            ConditionReason::ERROR,
            Severity::Error,
            format!("{}: {}", messages.creating, creating.join(", ")),
        )
    } else if !skipped.is_empty() {
        Condition::ko(
            type_,
            ConditionReason::ERROR,
            Severity::Error,
            format!("{}: {}", messages.waiting, skipped_details.join(", ")),
        )
    } else {
        Condition::ok(type_, messages.ready)
    };

    Aggregation {
        condition,
        failed,
        creating,
        skipped,
        ready,
    }
}
