//! A refresh run: update embeddings, then rebuild the neighbor index.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use projsim_embeddings::{
    EmbeddingError, EmbeddingProvider, EmbeddingRequest, EmbeddingStore, JsonFileBackend,
    MemoryBackend, OpenAIProvider, TimeoutProvider, VectorBackend, WriteOutcome,
};

use crate::combiner::{ProjectContext, TextCombiner};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::persist::{IndexPersister, to_rows};
use crate::records::ProjectTable;

/// Everything a run needs, passed explicitly.
pub struct RunContext {
    /// Input records for this run.
    table: ProjectTable,

    /// Text-to-vector gateway. Callers bound its latency, e.g. with
    /// [`TimeoutProvider`].
    gateway: Arc<dyn EmbeddingProvider>,

    /// Embedding store.
    store: Arc<EmbeddingStore>,

    /// Destination of the neighbor table.
    persister: Arc<dyn IndexPersister>,

    /// Combines rows into context text.
    combiner: TextCombiner,

    /// Configuration.
    config: PipelineConfig,
}

impl RunContext {
    /// Assemble a run from its parts.
    ///
    /// Fails if the store was opened for a different model than the gateway's.
    pub fn new(
        table: ProjectTable,
        gateway: Arc<dyn EmbeddingProvider>,
        store: Arc<EmbeddingStore>,
        persister: Arc<dyn IndexPersister>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let model = gateway.model_identity().key();
        if model != store.model() {
            return Err(EmbeddingError::ModelMismatch {
                stored: store.model().to_string(),
                provided: model,
            }
            .into());
        }

        Ok(Self {
            table,
            gateway,
            store,
            persister,
            combiner: TextCombiner::default(),
            config,
        })
    }

    /// Assemble a run against the OpenAI-compatible gateway described by `config`.
    pub async fn from_config(
        config: PipelineConfig,
        table: ProjectTable,
        persister: Arc<dyn IndexPersister>,
    ) -> Result<Self> {
        config.validate()?;

        let gateway_config = &config.gateway;
        let api_key = std::env::var(&gateway_config.api_key_env).map_err(|_| {
            PipelineError::Config(format!(
                "no API key in ${}",
                gateway_config.api_key_env
            ))
        })?;

        let mut provider = OpenAIProvider::new().with_api_key(api_key);
        if let Some(model) = &gateway_config.model {
            provider = provider.with_model(model);
        }
        if let Some(base_url) = &gateway_config.base_url {
            provider = provider.with_base_url(base_url);
        }
        let gateway: Arc<dyn EmbeddingProvider> =
            Arc::new(TimeoutProvider::new(provider, gateway_config.timeout()));

        let store = Arc::new(open_store(&config, gateway.model_identity().key()).await?);

        Self::new(table, gateway, store, persister, config)
    }

    /// Replace the text combiner.
    pub fn with_combiner(mut self, combiner: TextCombiner) -> Self {
        self.combiner = combiner;
        self
    }

    /// The store this run writes to.
    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    /// Update embeddings for every project, then rebuild and persist the
    /// neighbor index.
    ///
    /// Per-project failures are counted in the report. If any vector was
    /// rejected for disagreeing with the store, no index is written and
    /// [`PipelineError::Integrity`] is returned.
    pub async fn run(&self) -> Result<RunReport> {
        let mut report = self.update_embeddings().await?;

        if !report.integrity_errors.is_empty() {
            warn!(
                "Skipping index rebuild: {} vector(s) rejected by the store",
                report.integrity_errors.len()
            );
            return Err(PipelineError::Integrity(report.integrity_errors));
        }

        report.neighbor_entries = self.rebuild_index().await?;
        info!("Refresh finished: {report}");
        Ok(report)
    }

    /// Embedding phase only.
    pub async fn update_embeddings(&self) -> Result<RunReport> {
        let contexts = self.combiner.combine_all(&self.table);
        let mut report = RunReport {
            projects: contexts.len(),
            rejected_rows: self.table.rejected_rows(),
            ..RunReport::default()
        };

        let permits = Arc::new(Semaphore::new(self.config.gateway.max_concurrency));
        let mut tasks = JoinSet::new();

        for context in contexts {
            let permit = permits.clone().acquire_owned().await?;
            let gateway = self.gateway.clone();
            let store = self.store.clone();
            tasks.spawn(async move {
                let outcome = process_project(gateway.as_ref(), &store, &context).await;
                drop(permit);
                outcome
            });
        }

        // Every write settles before anything reads the store.
        while let Some(joined) = tasks.join_next().await {
            report.record(joined?);
        }

        info!(
            "Embedding phase: {} inserted, {} updated, {} unchanged, {} without content, {} gateway failures",
            report.inserted,
            report.updated,
            report.unchanged,
            report.missing_content,
            report.gateway_failures
        );
        Ok(report)
    }

    /// Index phase only: rebuild neighbors from the current store and persist
    /// them. Returns the number of rows written.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let snapshot = self.store.snapshot().await?;
        let entries = self.config.index.builder().build(snapshot)?;
        let rows = to_rows(entries);
        self.persister.persist(&rows).await?;
        Ok(rows.len())
    }
}

/// Open the store described by `config` for vectors from `model`.
pub async fn open_store(config: &PipelineConfig, model: impl Into<String>) -> Result<EmbeddingStore> {
    let backend: Arc<dyn VectorBackend> = match &config.store.path {
        Some(path) => Arc::new(JsonFileBackend::open(path).await?),
        None => Arc::new(MemoryBackend::new()),
    };
    let store = EmbeddingStore::open(backend, model)
        .await?
        .with_threshold(config.update.threshold);
    Ok(store)
}

/// What happened to one project during the embedding phase.
#[derive(Debug)]
enum ProjectOutcome {
    Written(WriteOutcome),
    GatewayFailure,
    Rejected(String),
    StoreFailure,
}

async fn process_project(
    gateway: &dyn EmbeddingProvider,
    store: &EmbeddingStore,
    context: &ProjectContext,
) -> ProjectOutcome {
    let project_id = context.project_id.as_str();

    let vector = if context.is_empty() {
        None
    } else {
        match gateway.embed(EmbeddingRequest::new(&context.text)).await {
            Ok(response) => {
                let identity = gateway.model_identity();
                if !identity.matches_reported(&response.model) {
                    warn!(
                        "Skipping {project_id}: gateway answered with model {}, store expects {}",
                        response.model, identity.model
                    );
                    return ProjectOutcome::GatewayFailure;
                }
                Some(response.embedding)
            }
            Err(EmbeddingError::EmptyInput) => None,
            Err(e) => {
                warn!("Skipping {project_id}: embedding failed: {e}");
                return ProjectOutcome::GatewayFailure;
            }
        }
    };

    match store.put_or_update(project_id, &context.text, vector).await {
        Ok(outcome) => {
            debug!("{project_id}: {outcome:?}");
            ProjectOutcome::Written(outcome)
        }
        Err(e @ EmbeddingError::InvalidVector { .. }) => {
            warn!("Skipping {project_id}: gateway returned an unusable vector: {e}");
            ProjectOutcome::GatewayFailure
        }
        Err(e) if e.is_integrity_failure() => {
            warn!("Rejected vector for {project_id}: {e}");
            ProjectOutcome::Rejected(format!("{project_id}: {e}"))
        }
        Err(e) => {
            warn!("Skipping {project_id}: store write failed: {e}");
            ProjectOutcome::StoreFailure
        }
    }
}

/// Counts from one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Distinct projects in the input.
    pub projects: usize,

    /// Input rows dropped at ingestion.
    pub rejected_rows: usize,

    /// New records written.
    pub inserted: usize,

    /// Records replaced because their content drifted.
    pub updated: usize,

    /// Records left alone because the new vector restated them.
    pub unchanged: usize,

    /// Projects with nothing to embed.
    pub missing_content: usize,

    /// Projects skipped because the gateway failed or timed out.
    pub gateway_failures: usize,

    /// Projects skipped because the store could not be written.
    pub store_failures: usize,

    /// Vectors rejected for disagreeing with the store.
    pub integrity_errors: Vec<String>,

    /// Rows in the persisted neighbor table.
    pub neighbor_entries: usize,
}

impl RunReport {
    /// Number of store writes performed.
    pub fn writes(&self) -> usize {
        self.inserted + self.updated
    }

    fn record(&mut self, outcome: ProjectOutcome) {
        match outcome {
            ProjectOutcome::Written(WriteOutcome::Inserted) => self.inserted += 1,
            ProjectOutcome::Written(WriteOutcome::Updated { .. }) => self.updated += 1,
            ProjectOutcome::Written(WriteOutcome::Unchanged { .. }) => self.unchanged += 1,
            ProjectOutcome::Written(WriteOutcome::NoContent) => self.missing_content += 1,
            ProjectOutcome::GatewayFailure => self.gateway_failures += 1,
            ProjectOutcome::StoreFailure => self.store_failures += 1,
            ProjectOutcome::Rejected(message) => self.integrity_errors.push(message),
        }
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} projects, {} writes ({} new, {} updated), {} unchanged, {} without content, \
             {} gateway failures, {} store failures, {} neighbor rows",
            self.projects,
            self.writes(),
            self.inserted,
            self.updated,
            self.unchanged,
            self.missing_content,
            self.gateway_failures,
            self.store_failures,
            self.neighbor_entries
        )
    }
}
