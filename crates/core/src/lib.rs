pub mod cascade;
pub mod config;
pub mod domain;
pub mod errors;

pub use cascade::{
    CascadeAggregator, CascadeEngine, CascadeLifecycle, CascadeOrchestrator, CascadeStore,
    DisabledConfigPolicy, EngineSettings, LeadLifecycleHooks, ReportingPeriod,
    ResponsibilityRecorder, StartOutcome, SweepReport, UrgencyBucket,
};
pub use domain::assignment::{AssignmentSource, ResponsibilityChange};
pub use domain::cascade::{
    CascadeConfig, CascadeConfigId, CascadeEntry, CascadeEntryId, CascadeEntryStatus, ClientId,
    ConsultantId, DistributionMethod, LeadId, APPOINTMENT_CREATED_REASON,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
