//! Loader services

pub mod batch_orchestrator;
pub mod csv_input;
pub mod field_mapper;
pub mod http_remote_client;
pub mod import_pipeline;
pub mod progress;
pub mod record_classifier;
pub mod remote_client;
pub mod schema_check;
pub mod stats_report;
pub mod upsert_executor;

pub use batch_orchestrator::BatchOrchestrator;
pub use field_mapper::{MapError, MappingTable, TargetPath};
pub use http_remote_client::HttpRemoteClient;
pub use import_pipeline::{prepare, ImportPipeline, ImportReport, PreparedRun};
pub use progress::{EventProgress, NoProgress, ProgressSink};
pub use record_classifier::{classify, ClassifiedRows};
pub use remote_client::{
    ContainerRef, MatchKey, RemoteClient, RemoteError, RemoteResource, ResourceKind,
    SecondaryResource,
};
pub use schema_check::{AcceptAll, JsonSchemaCheck, SchemaCheck, Violation};
pub use stats_report::StatsReport;
pub use upsert_executor::{ArtifactSettings, ExecutorSettings, UpsertExecutor};
