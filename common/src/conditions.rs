use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::{borrow::Cow, fmt};

/// Type of a condition
///
/// Kept as an open string so conditions reported by other controllers always parse
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(transparent)]
pub struct ConditionType(Cow<'static, str>);

impl ConditionType {
    pub const READY: ConditionType = ConditionType(Cow::Borrowed("Ready"));
    pub const INPUT_READY: ConditionType = ConditionType(Cow::Borrowed("InputReady"));
    pub const SERVICE_CONFIG_READY: ConditionType = ConditionType(Cow::Borrowed("ServiceConfigReady"));
    pub const DEPLOYMENT_READY: ConditionType = ConditionType(Cow::Borrowed("DeploymentReady"));
    pub const EXPOSE_SERVICE_READY: ConditionType = ConditionType(Cow::Borrowed("ExposeServiceReady"));
    pub const KEYSTONE_SERVICE_READY: ConditionType = ConditionType(Cow::Borrowed("KeystoneServiceReady"));
    pub const KEYSTONE_ENDPOINT_READY: ConditionType = ConditionType(Cow::Borrowed("KeystoneEndpointReady"));
    pub const NOVA_API_DB_READY: ConditionType = ConditionType(Cow::Borrowed("NovaAPIDBReady"));
    pub const NOVA_API_MQ_READY: ConditionType = ConditionType(Cow::Borrowed("NovaAPIMQReady"));
    pub const NOVA_ALL_CELLS_DB_READY: ConditionType = ConditionType(Cow::Borrowed("NovaAllCellsDBReady"));
    pub const NOVA_ALL_CELLS_MQ_READY: ConditionType = ConditionType(Cow::Borrowed("NovaAllCellsMQReady"));
    pub const NOVA_ALL_CELLS_READY: ConditionType = ConditionType(Cow::Borrowed("NovaAllCellsReady"));
    pub const NOVA_API_READY: ConditionType = ConditionType(Cow::Borrowed("NovaAPIReady"));

    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_ready(&self) -> bool {
        *self == Self::READY
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Machine readable reason of the last transition
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(transparent)]
pub struct ConditionReason(Cow<'static, str>);

impl ConditionReason {
    pub const INIT: ConditionReason = ConditionReason(Cow::Borrowed("Init"));
    pub const READY: ConditionReason = ConditionReason(Cow::Borrowed("Ready"));
    pub const REQUESTED: ConditionReason = ConditionReason(Cow::Borrowed("Requested"));
    pub const ERROR: ConditionReason = ConditionReason(Cow::Borrowed("Error"));

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// How bad a non-True condition is
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    fn rank(severity: Option<Severity>) -> u8 {
        match severity {
            Some(Severity::Error) => 0,
            Some(Severity::Warning) => 1,
            Some(Severity::Info) => 2,
            None => 3,
        }
    }
}

// Other controllers write an empty severity on True conditions
fn lenient_severity<'de, D>(deserializer: D) -> Result<Option<Severity>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| match s.as_str() {
        "Error" => Some(Severity::Error),
        "Warning" => Some(Severity::Warning),
        "Info" => Some(Severity::Info),
        _ => None,
    }))
}

/// A single observation about one aspect of a resource
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of the condition
    #[serde(rename = "type")]
    pub type_: ConditionType,
    /// Status of the condition, one of True, False, Unknown
    pub status: ConditionStatus,
    /// Reason of the last transition
    #[serde(default)]
    pub reason: ConditionReason,
    /// Severity of a non-True condition
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_severity")]
    pub severity: Option<Severity>,
    /// Human readable message
    #[serde(default)]
    pub message: String,
    /// Last time the status of the condition changed
    #[serde(default = "Utc::now")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    #[must_use]
    pub fn ok(type_: ConditionType, message: &str) -> Condition {
        Condition {
            type_,
            status: ConditionStatus::True,
            reason: ConditionReason::READY,
            severity: None,
            message: message.to_string(),
            last_transition_time: Utc::now(),
        }
    }

    #[must_use]
    pub fn ko(type_: ConditionType, reason: ConditionReason, severity: Severity, message: String) -> Condition {
        Condition {
            type_,
            status: ConditionStatus::False,
            reason,
            severity: Some(severity),
            message,
            last_transition_time: Utc::now(),
        }
    }

    #[must_use]
    pub fn init(type_: ConditionType) -> Condition {
        let message = if type_.is_ready() {
            READY_INIT_MESSAGE.to_string()
        } else {
            format!("{type_} not started")
        };
        Condition {
            type_,
            status: ConditionStatus::Unknown,
            reason: ConditionReason::INIT,
            severity: None,
            message,
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    fn badness(&self) -> (u8, u8) {
        let status = match self.status {
            ConditionStatus::False => 0,
            ConditionStatus::Unknown => 1,
            ConditionStatus::True => 2,
        };
        (status, Severity::rank(self.severity))
    }

    /// Same observation under another type
    #[must_use]
    pub fn retyped(&self, type_: ConditionType) -> Condition {
        Condition {
            type_,
            ..self.clone()
        }
    }
}

/// Ordered set of conditions, at most one per type
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed Ready and every given type as Unknown, leaving known conditions as they are
    pub fn init(&mut self, types: &[ConditionType]) {
        for type_ in std::iter::once(&ConditionType::READY).chain(types.iter()) {
            if self.get(type_).is_none() {
                self.0.push(Condition::init(type_.clone()));
            }
        }
        self.sort();
    }

    pub fn get(&self, type_: &ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| &c.type_ == type_)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert or replace the condition of the same type
    ///
    /// The transition time only moves when the status changes
    pub fn set(&mut self, mut condition: Condition) {
        match self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(current) => {
                if current.status == condition.status {
                    condition.last_transition_time = current.last_transition_time;
                }
                *current = condition;
            }
            None => {
                self.0.push(condition);
                self.sort();
            }
        }
    }

    pub fn mark_true(&mut self, type_: ConditionType, message: &str) {
        self.set(Condition::ok(type_, message));
    }

    pub fn mark_false(&mut self, type_: ConditionType, reason: ConditionReason, severity: Severity, message: String) {
        self.set(Condition::ko(type_, reason, severity, message));
    }

    pub fn is_true(&self, type_: &ConditionType) -> bool {
        self.get(type_).is_some_and(Condition::is_true)
    }

    pub fn is_ready(&self) -> bool {
        self.is_true(&ConditionType::READY)
    }

    pub fn all_sub_conditions_true(&self) -> bool {
        self.0.iter().filter(|c| !c.type_.is_ready()).all(Condition::is_true)
    }

    /// The Ready condition of this set, under another type
    pub fn mirror(&self, type_: ConditionType) -> Option<Condition> {
        self.get(&ConditionType::READY).map(|c| c.retyped(type_))
    }

    /// Derive Ready from every other condition of the set
    ///
    /// Ready is True when all others are, otherwise it reports the worst of them
    pub fn compute_ready(&mut self) {
        let worst = self
            .0
            .iter()
            .filter(|c| !c.type_.is_ready() && !c.is_true())
            .min_by_key(|c| c.badness())
            .map(|c| c.retyped(ConditionType::READY));
        match worst {
            Some(condition) => self.set(condition),
            None => self.mark_true(ConditionType::READY, READY_MESSAGE),
        }
    }

    fn sort(&mut self) {
        self.0
            .sort_by(|a, b| (!a.type_.is_ready(), &a.type_).cmp(&(!b.type_.is_ready(), &b.type_)));
    }
}

impl From<Vec<Condition>> for Conditions {
    fn from(list: Vec<Condition>) -> Self {
        let mut conditions = Conditions::new();
        for c in list {
            conditions.set(c);
        }
        conditions
    }
}

/// Resources exposing a condition set in their status
pub trait HasConditions {
    fn conditions(&self) -> Option<&Conditions>;
    fn conditions_mut(&mut self) -> &mut Conditions;

    fn is_ready(&self) -> bool {
        self.conditions().is_some_and(Conditions::is_ready)
    }
}

pub const READY_MESSAGE: &str = "Setup complete";
pub const READY_INIT_MESSAGE: &str = "Setup started";

pub const INPUT_READY_MESSAGE: &str = "Input data complete";
pub const INPUT_READY_WAITING_MESSAGE: &str = "Input data resources missing";
pub const INPUT_READY_ERROR_MESSAGE: &str = "Input data error occurred";

pub const SERVICE_CONFIG_READY_MESSAGE: &str = "Service config create completed";
pub const SERVICE_CONFIG_READY_ERROR_MESSAGE: &str = "Service config create error occurred";

pub const DEPLOYMENT_READY_MESSAGE: &str = "Deployment completed";
pub const DEPLOYMENT_READY_RUNNING_MESSAGE: &str = "Deployment in progress";
pub const DEPLOYMENT_READY_ERROR_MESSAGE: &str = "Deployment error occurred";

pub const EXPOSE_SERVICE_READY_MESSAGE: &str = "Exposing service completed";
pub const EXPOSE_SERVICE_READY_ERROR_MESSAGE: &str = "Exposing service error occurred";

pub const KEYSTONE_SERVICE_READY_ERROR_MESSAGE: &str = "Keystone service error occurred";
pub const KEYSTONE_ENDPOINT_READY_ERROR_MESSAGE: &str = "Keystone endpoint error occurred";

pub const DB_READY_MESSAGE: &str = "DB create completed";
pub const DB_READY_RUNNING_MESSAGE: &str = "DB create in progress";
pub const DB_READY_ERROR_MESSAGE: &str = "DB error occurred";

pub const MQ_READY_MESSAGE: &str = "MessageBus creation completed";
pub const MQ_READY_RUNNING_MESSAGE: &str = "MessageBus creation in progress";
pub const MQ_READY_ERROR_MESSAGE: &str = "MessageBus error occurred";

pub const ALL_CELLS_DB_READY_MESSAGE: &str = "All DBs created successfully";
pub const ALL_CELLS_DB_READY_ERROR_MESSAGE: &str = "DB creation failed for some cells";
pub const ALL_CELLS_DB_READY_CREATING_MESSAGE: &str = "DB creation ongoing for";

pub const ALL_CELLS_MQ_READY_MESSAGE: &str = "All MessageBuses created successfully";
pub const ALL_CELLS_MQ_READY_ERROR_MESSAGE: &str = "MessageBus creation failed for some cells";
pub const ALL_CELLS_MQ_READY_CREATING_MESSAGE: &str = "MessageBus creation ongoing for";

pub const ALL_CELLS_READY_MESSAGE: &str = "All NovaCells are ready";
pub const ALL_CELLS_READY_ERROR_MESSAGE: &str = "Following NovaCells failed";
pub const ALL_CELLS_READY_CREATING_MESSAGE: &str = "Following NovaCells are being created";
pub const ALL_CELLS_READY_WAITING_MESSAGE: &str = "Waiting for dependencies of cells";

pub const NOVA_API_READY_ERROR_MESSAGE: &str = "NovaAPI error occurred";
