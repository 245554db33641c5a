//! Import pipeline
//!
//! Sequences one run: classify rows, map the valid ones, establish the
//! project, then hand the documents to the [`BatchOrchestrator`]. Everything
//! up to and including the project lookup is fatal on failure; after that,
//! failures stay inside the ledger.

use crate::error::{LoaderError, LoaderResult};
use crate::models::{InvalidRow, Ledger, Record, ResourceDocument};
use crate::services::batch_orchestrator::BatchOrchestrator;
use crate::services::field_mapper::MappingTable;
use crate::services::record_classifier::classify;
use crate::services::remote_client::{ContainerRef, RemoteClient, RemoteError};
use crate::services::schema_check::SchemaCheck;
use crate::services::upsert_executor::{ExecutorSettings, UpsertExecutor};
use crate::utils::retry_with;
use tracing::info;

/// Rows ready for application
#[derive(Debug)]
pub struct PreparedRun {
    pub documents: Vec<ResourceDocument>,
    pub invalid_rows: Vec<InvalidRow>,
    /// Rows read from the input, valid or not
    pub total_rows: usize,
}

/// Result of a completed (or cancelled) run
#[derive(Debug)]
pub struct ImportReport {
    pub ledger: Ledger,
    pub invalid_rows: Vec<InvalidRow>,
    pub total_rows: usize,
    /// `None` for dry runs
    pub container: Option<ContainerRef>,
}

impl ImportReport {
    /// Report for a run that stopped after mapping
    pub fn dry_run(prepared: PreparedRun) -> Self {
        Self {
            ledger: Ledger::empty(0),
            invalid_rows: prepared.invalid_rows,
            total_rows: prepared.total_rows,
            container: None,
        }
    }
}

/// Classify and map rows without touching the remote service
///
/// A mapping defect in any valid row aborts the whole run.
pub fn prepare(
    rows: Vec<Record>,
    input_schema: &dyn SchemaCheck,
    mapping: &MappingTable,
) -> LoaderResult<PreparedRun> {
    let total_rows = rows.len();
    let classified = classify(rows, input_schema);
    let documents = mapping.map_all(&classified.valid)?;

    info!(
        rows = total_rows,
        documents = documents.len(),
        invalid = classified.invalid.len(),
        "Rows mapped to resources"
    );

    Ok(PreparedRun {
        documents,
        invalid_rows: classified.invalid,
        total_rows,
    })
}

/// Remote half of a run
pub struct ImportPipeline<'a> {
    client: &'a dyn RemoteClient,
    settings: &'a ExecutorSettings,
    output_schema: &'a dyn SchemaCheck,
    project_name: &'a str,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(
        client: &'a dyn RemoteClient,
        settings: &'a ExecutorSettings,
        output_schema: &'a dyn SchemaCheck,
        project_name: &'a str,
    ) -> Self {
        Self {
            client,
            settings,
            output_schema,
            project_name,
        }
    }

    /// Find or create the run's project
    pub async fn ensure_project(&self) -> LoaderResult<ContainerRef> {
        let project = retry_with(
            "ensure project",
            &self.settings.retry,
            RemoteError::retry_decision,
            || self.client.ensure_container(self.project_name),
        )
        .await
        .map_err(|failure| LoaderError::Setup {
            project: self.project_name.to_string(),
            source: failure.error,
        })?
        .value;

        info!(project_id = %project.id, project = %project.name, "Project ready");
        Ok(project)
    }

    /// Establish the project and apply every prepared document
    pub async fn execute(
        &self,
        prepared: PreparedRun,
        orchestrator: &BatchOrchestrator,
        resume_from: usize,
    ) -> LoaderResult<ImportReport> {
        let container = self.ensure_project().await?;
        let executor =
            UpsertExecutor::new(self.settings, self.client, &container, self.output_schema);

        let ledger = orchestrator
            .run(&executor, &prepared.documents, resume_from)
            .await?;

        Ok(ImportReport {
            ledger,
            invalid_rows: prepared.invalid_rows,
            total_rows: prepared.total_rows,
            container: Some(container),
        })
    }
}
