use async_trait::async_trait;
use common::ConditionType;
use kube::runtime::controller::Action;
use manager::Context;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0}")]
    StoreError(#[from] common::Error),

    #[error("Missing {0} cell in spec.cellTemplates")]
    MissingPrimaryCell(String),

    #[error("KeystoneAPI {0} not found")]
    MissingKeystoneAPI(String),

    #[error("KeystoneAPI {0} has no public endpoint yet")]
    MissingKeystoneEndpoint(String),

    #[error("Secret {0} is missing field(s): {1}")]
    MissingSecretField(String, String),

    #[error("{0} has no uid")]
    MissingUid(String),

    #[error("Invalid trace ID")]
    InvalidTraceId,
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    #[must_use]
    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }

    /// Errors only a change of the object can fix
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::MissingPrimaryCell(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::StoreError(e) if e.is_not_found())
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::StoreError(e) if e.is_conflict())
    }
}

/// One pass of a controller over a loaded instance
///
/// Loading, condition seeding, the finalizer of the instance and the final
/// status write are handled around it by `status::run`
#[async_trait]
pub trait Reconciler: common::HasConditions {
    /// Conditions seeded as Unknown before the pass, besides Ready
    fn condition_types() -> &'static [ConditionType];
    /// Finalizer put on the instance, None when its children need no cleanup
    fn finalizer(ctx: &Context) -> Option<String>;
    // Reconcile (for non-finalizer related changes)
    async fn reconcile(&mut self, ctx: &Context) -> Result<Action>;
    // Reconcile with finalize cleanup (the object was deleted)
    async fn cleanup(&mut self, ctx: &Context) -> Result<Action>;
}

pub mod aggregate;
pub mod children;
pub mod database;
pub mod deployment;
pub mod events;
pub mod finalizer;
pub mod gate;
pub mod identity;
pub mod messagebus;
pub mod status;

pub mod nova;
pub mod novaapi;
pub mod novacell;

/// State machinery for kube, as exposeable to actix
pub mod manager;
pub use manager::Manager;

/// Generated type, for crdgen
pub use common::{nova::Nova, novaapi::NovaAPI, novacell::NovaCell};

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
pub mod testing;
