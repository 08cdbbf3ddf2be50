
use flowforge_core::{
    Defect, Graph, InferredEdge, RepairAction, analyze, apply_edits, apply_inference,
    apply_repairs, detect_defects, infer_connections, plan_repairs, validate_graph,
};
use flowforge_llm::{
    BuildAudit, BuildError, BuildMode, BuildOptions, ChatBackend, Clock, Complexity, GraphBuilder,
    LlmClient, LlmConfig, PlanSource, ResponseCache, SystemClock, plan_connections_with_backend,
    plan_modification_with_backend, plan_repairs_with_backend,
};
use flowforge_store::{StoreClient, StoreConfig, StoreError, WorkflowStore, WorkflowSummary};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::PipelineError;

/// A freshly built workflow as confirmed by the store.
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub workflow_id: String,
    pub graph: Graph,
    pub audit: BuildAudit,
    pub description: Option<String>,
    pub complexity: Complexity,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectReport {
    pub workflow_id: String,
    pub source: PlanSource,
    pub total_nodes: usize,
    pub connected_before: usize,
    pub connected_after: usize,
    pub inferred: Vec<InferredEdge>,
    /// How many of `inferred` the oracle proposed.
    pub oracle_edges: usize,
    pub reasoning: Option<String>,
    pub warnings: Vec<String>,
    /// False when nothing changed and the store was left alone.
    pub updated: bool,
    pub graph: Graph,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub workflow_id: String,
    pub source: PlanSource,
    pub defects: Vec<Defect>,
    pub actions: Vec<RepairAction>,
    pub oracle_actions: usize,
    /// Defects still present after the repair.
    pub remaining: Vec<Defect>,
    pub warnings: Vec<String>,
    pub updated: bool,
    pub graph: Graph,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModifyReport {
    pub workflow_id: String,
    pub summary: Option<String>,
    pub proposed: usize,
    pub applied: usize,
    pub inferred: Vec<InferredEdge>,
    pub warnings: Vec<String>,
    pub graph: Graph,
}

/// Prompt-to-store pipeline plus the maintenance operations on stored
/// workflows. Every operation works on its own copy of the graph and writes
/// to the store at most once, after validation.
pub struct WorkflowPipeline<
    C: ChatBackend = LlmClient,
    S: WorkflowStore = StoreClient,
    K: Clock = SystemClock,
> {
    oracle: C,
    enhancer: Option<C>,
    store: S,
    cache: Option<ResponseCache<K>>,
    options: BuildOptions,
}

impl WorkflowPipeline {
    /// Production wiring: HTTP oracle, lighter enhancement model, HTTP store.
    pub fn new(llm: LlmConfig, store: StoreConfig) -> Self {
        let enhancer = LlmClient::new(llm.for_enhancement());
        Self::with_backends(LlmClient::new(llm), StoreClient::new(store))
            .with_enhancer(enhancer)
    }
}

impl<C: ChatBackend, S: WorkflowStore> WorkflowPipeline<C, S> {
    pub fn with_backends(oracle: C, store: S) -> Self {
        Self {
            oracle,
            enhancer: None,
            store,
            cache: None,
            options: BuildOptions::default(),
        }
    }
}

impl<C: ChatBackend, S: WorkflowStore, K: Clock> WorkflowPipeline<C, S, K> {
    pub fn with_enhancer(mut self, enhancer: C) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Cache raw oracle replies. The cache's clock decides expiry.
    pub fn with_cache<K2: Clock>(self, cache: ResponseCache<K2>) -> WorkflowPipeline<C, S, K2> {
        WorkflowPipeline {
            oracle: self.oracle,
            enhancer: self.enhancer,
            store: self.store,
            cache: Some(cache),
            options: self.options,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Build a graph from `prompt` and create it in the store.
    #[instrument(skip(self, prompt))]
    pub async fn deploy_from_prompt(
        &self,
        prompt: &str,
        mode: BuildMode,
    ) -> Result<Deployment, PipelineError> {
        let options = BuildOptions {
            mode,
            ..self.options.clone()
        };
        let mut builder = GraphBuilder::new(&self.oracle, options);
        if let Some(enhancer) = &self.enhancer {
            builder = builder.with_enhancer(enhancer);
        }
        let output = match &self.cache {
            Some(cache) => builder.with_cache(cache).build(prompt).await?,
            None => builder.build(prompt).await?,
        };

        validate_graph(&output.graph)?;
        let stored = self.store.create(&output.graph).await?;
        let workflow_id = stored_id(&stored)?;

        info!(
            workflow_id = %workflow_id,
            inferred = output.audit.inferred_edges.len(),
            repairs = output.audit.repairs.len(),
            "Deployed workflow"
        );

        Ok(Deployment {
            workflow_id,
            graph: stored,
            audit: output.audit,
            description: output.description,
            complexity: output.complexity,
            cached: output.cached,
        })
    }

    /// Add missing edges to a stored workflow, from the rules alone or from
    /// an oracle plan checked against the graph and completed by the rules.
    /// A graph that is already fully connected is not written back.
    #[instrument(skip(self))]
    pub async fn auto_connect(
        &self,
        id: &str,
        source: PlanSource,
    ) -> Result<ConnectReport, PipelineError> {
        let mut graph = self.store.get(id).await?;
        let before = analyze(&graph);

        let (inference, oracle_edges, reasoning, warnings) = match source {
            PlanSource::Rules => (
                infer_connections(&graph, &before, &self.options.inference),
                0,
                None,
                Vec::new(),
            ),
            PlanSource::Oracle => {
                let proposal =
                    plan_connections_with_backend(&self.oracle, &graph, &self.options.inference)
                        .await;
                (
                    proposal.inference,
                    proposal.oracle_edges,
                    proposal.reasoning,
                    proposal.warnings,
                )
            }
        };
        if !inference.orphans.is_empty() {
            return Err(BuildError::OrphanNodes(inference.orphans).into());
        }
        apply_inference(&mut graph, &inference);
        validate_graph(&graph)?;

        let updated = !inference.inferred.is_empty();
        if updated {
            graph = self.store.update(id, &graph).await?;
        }
        let after = analyze(&graph);
        if !after.is_fully_connected() {
            warn!(
                unconnected = after.unconnected_node_ids.len(),
                "Stored workflow still has unconnected nodes"
            );
        }

        info!(
            inferred = inference.inferred.len(),
            oracle_edges,
            before = before.connected_node_ids.len(),
            after = after.connected_node_ids.len(),
            "Auto-connected workflow"
        );

        Ok(ConnectReport {
            workflow_id: id.to_string(),
            source,
            total_nodes: graph.nodes.len(),
            connected_before: before.connected_node_ids.len(),
            connected_after: after.connected_node_ids.len(),
            inferred: inference.inferred,
            oracle_edges,
            reasoning,
            warnings,
            updated,
            graph,
        })
    }

    /// Detect defects on a stored workflow and write back the repaired graph.
    #[instrument(skip(self))]
    pub async fn auto_repair(
        &self,
        id: &str,
        source: PlanSource,
    ) -> Result<RepairReport, PipelineError> {
        let graph = self.store.get(id).await?;
        let defects = detect_defects(&graph);
        if defects.is_empty() {
            info!("No defects found");
            return Ok(RepairReport {
                workflow_id: id.to_string(),
                source,
                defects,
                actions: Vec::new(),
                oracle_actions: 0,
                remaining: Vec::new(),
                warnings: Vec::new(),
                updated: false,
                graph,
            });
        }

        let (plan, oracle_actions, warnings) = match source {
            PlanSource::Rules => (plan_repairs(&defects), 0, Vec::new()),
            PlanSource::Oracle => {
                let proposal = plan_repairs_with_backend(&self.oracle, &graph, &defects).await;
                (proposal.plan, proposal.oracle_actions, proposal.warnings)
            }
        };

        let repaired = apply_repairs(&graph, &plan);
        validate_graph(&repaired)?;
        let remaining = detect_defects(&repaired);
        if !remaining.is_empty() {
            warn!(count = remaining.len(), "Defects remain after repair");
        }
        let stored = self.store.update(id, &repaired).await?;

        info!(
            defects = defects.len(),
            actions = plan.actions.len(),
            oracle_actions,
            "Repaired workflow"
        );

        Ok(RepairReport {
            workflow_id: id.to_string(),
            source,
            defects,
            actions: plan.actions,
            oracle_actions,
            remaining,
            warnings,
            updated: true,
            graph: stored,
        })
    }

    /// Apply a natural-language change request to a stored workflow.
    #[instrument(skip(self, request))]
    pub async fn modify(&self, id: &str, request: &str) -> Result<ModifyReport, PipelineError> {
        let mut graph = self.store.get(id).await?;
        let plan = plan_modification_with_backend(&self.oracle, &graph, request).await?;
        if !plan.safe {
            return Err(PipelineError::UnsafeModification {
                summary: plan
                    .summary
                    .unwrap_or_else(|| "no summary given".to_string()),
            });
        }

        let mut warnings = plan.warnings;
        let skipped = apply_edits(&mut graph, &plan.changes);
        let applied = plan.changes.len() - skipped.len();
        warnings.extend(skipped);

        let analysis = analyze(&graph);
        let inference = infer_connections(&graph, &analysis, &self.options.inference);
        if !inference.orphans.is_empty() {
            return Err(BuildError::OrphanNodes(inference.orphans).into());
        }
        apply_inference(&mut graph, &inference);
        validate_graph(&graph)?;

        let stored = self.store.update(id, &graph).await?;
        info!(applied, skipped = warnings.len(), "Modified workflow");

        Ok(ModifyReport {
            workflow_id: id.to_string(),
            summary: plan.summary,
            proposed: plan.changes.len(),
            applied,
            inferred: inference.inferred,
            warnings,
            graph: stored,
        })
    }

    #[instrument(skip(self))]
    pub async fn activate(&self, id: &str) -> Result<Graph, PipelineError> {
        Ok(self.store.set_active(id, true).await?)
    }

    #[instrument(skip(self))]
    pub async fn deactivate(&self, id: &str) -> Result<Graph, PipelineError> {
        Ok(self.store.set_active(id, false).await?)
    }

    pub async fn list(&self) -> Result<Vec<WorkflowSummary>, PipelineError> {
        Ok(self.store.list().await?)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), PipelineError> {
        Ok(self.store.delete(id).await?)
    }

    pub async fn health_check(&self) -> bool {
        self.store.health_check().await
    }
}

fn stored_id(graph: &Graph) -> Result<String, PipelineError> {
    graph
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StoreError::Decode("created workflow has no id".to_string()).into())
}
