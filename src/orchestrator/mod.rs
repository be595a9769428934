//! Orchestration Coordinator - request → clarification or optimized plan
//!
//! Flow per request:
//! 1. cache lookup on the normalized request
//! 2. nearest prior cases (best-effort, bounded)
//! 3. missing-information detection, possibly answered with questions
//! 4. intent → components → provider → synthesis → validation → optimization
//! 5. estimate, confidence, cache insert
//!
//! Collaborator lookups degrade to empty results. Every other failure is
//! reported with the stage it happened in. Cancelled requests are never
//! cached.

pub mod cache;
pub mod clarify;
pub mod confidence;
mod error;
pub mod intent;
mod response;
pub mod telemetry;

pub use cache::{cache_key, ResponseCache};
pub use clarify::{InfoCategory, MissingInfoDetector, RegexMissingInfoDetector};
pub use error::{OrchestrationError, Stage};
pub use intent::{HeuristicIntentInterpreter, IntentInterpreter, LlmIntentInterpreter};
pub use response::{
    CaseSuggestion, ClarificationQuestion, ClarificationResponse, OrchestrationRequest,
    OrchestrationResponse, PlanEstimate, PlanResponse,
};
pub use telemetry::{MetricsCollector, OrchestrationObserver, TracingObserver};

use crate::capability::{default_components, CapabilityIndex, ComponentDescriptor, StaticCapabilityIndex};
use crate::cases::{CaseStore, InMemoryCaseStore, SimilarCase, UseCase, HIGH_QUALITY_RATING};
use crate::graph::stage::{self, keys};
use crate::graph::ExecutionGraph;
use crate::optimizer::{Optimizer, OptimizerConfig, OptimizerContext, OptimizerTables};
use crate::router::{estimate_units, Router, RoutingRequest};
use crate::sandbox::{SandboxExecutor, SandboxOutcome, SecurityLevel};
use crate::synthesizer::{Intent, SynthesisConstraints, Synthesizer, WorkflowArchetype};
use anyhow::{anyhow, bail};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

fn default_top_k() -> usize {
    5
}

fn default_min_similarity() -> f64 {
    0.7
}

fn default_cache_capacity() -> usize {
    256
}

fn default_cache_ttl_secs() -> Option<u64> {
    Some(3600)
}

fn default_lookup_timeout_ms() -> u64 {
    5_000
}

fn default_provider_timeout_ms() -> u64 {
    30_000
}

fn default_sandbox_timeout_ms() -> u64 {
    10_000
}

fn default_terminal_types() -> Vec<String> {
    vec![stage::CHAT_OUTPUT.to_string(), stage::TEXT_OUTPUT.to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Nearest cases requested from the case store
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Cases below this similarity are discarded
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// `None` keeps entries until evicted
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: Option<u64>,
    /// Bound on capability and case-store calls
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    /// Bound on each provider call
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    #[serde(default = "default_sandbox_timeout_ms")]
    pub sandbox_timeout_ms: u64,
    #[serde(default)]
    pub sandbox_level: SecurityLevel,
    /// A valid plan contains at least one node of these types
    #[serde(default = "default_terminal_types")]
    pub terminal_types: Vec<String>,
    #[serde(default)]
    pub synthesis: SynthesisConstraints,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            provider_timeout_ms: default_provider_timeout_ms(),
            sandbox_timeout_ms: default_sandbox_timeout_ms(),
            sandbox_level: SecurityLevel::default(),
            terminal_types: default_terminal_types(),
            synthesis: SynthesisConstraints::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms)
    }
}

pub struct CoordinatorBuilder {
    router: Router,
    capabilities: Option<Arc<dyn CapabilityIndex>>,
    cases: Option<Arc<dyn CaseStore>>,
    detector: Option<Arc<dyn MissingInfoDetector>>,
    interpreter: Option<Arc<dyn IntentInterpreter>>,
    sandbox: Option<Arc<dyn SandboxExecutor>>,
    synthesizer: Synthesizer,
    optimizer: Optimizer,
    optimizer_config: OptimizerConfig,
    default_components: Vec<ComponentDescriptor>,
    observers: Vec<Arc<dyn OrchestrationObserver>>,
    config: CoordinatorConfig,
}

impl CoordinatorBuilder {
    pub fn capabilities(mut self, index: Arc<dyn CapabilityIndex>) -> Self {
        self.capabilities = Some(index);
        self
    }

    pub fn cases(mut self, store: Arc<dyn CaseStore>) -> Self {
        self.cases = Some(store);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn MissingInfoDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn interpreter(mut self, interpreter: Arc<dyn IntentInterpreter>) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<dyn SandboxExecutor>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Synthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn optimizer(mut self, optimizer: Optimizer, config: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self.optimizer_config = config;
        self
    }

    pub fn default_components(mut self, components: Vec<ComponentDescriptor>) -> Self {
        self.default_components = components;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn OrchestrationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Coordinator, regex::Error> {
        let detector: Arc<dyn MissingInfoDetector> = match self.detector {
            Some(detector) => detector,
            None => Arc::new(RegexMissingInfoDetector::new()?),
        };
        let ttl = self.config.cache_ttl_secs.map(Duration::from_secs);

        Ok(Coordinator {
            router: self.router,
            capabilities: self
                .capabilities
                .unwrap_or_else(|| Arc::new(StaticCapabilityIndex::builtin())),
            cases: self.cases.unwrap_or_else(|| Arc::new(InMemoryCaseStore::new())),
            detector,
            interpreter: self
                .interpreter
                .unwrap_or_else(|| Arc::new(HeuristicIntentInterpreter::new())),
            sandbox: self.sandbox,
            synthesizer: self.synthesizer,
            optimizer: self.optimizer,
            optimizer_config: self.optimizer_config,
            default_components: self.default_components,
            cache: ResponseCache::new(self.config.cache_capacity, ttl),
            observers: self.observers,
            config: self.config,
        })
    }
}

pub struct Coordinator {
    router: Router,
    capabilities: Arc<dyn CapabilityIndex>,
    cases: Arc<dyn CaseStore>,
    detector: Arc<dyn MissingInfoDetector>,
    interpreter: Arc<dyn IntentInterpreter>,
    sandbox: Option<Arc<dyn SandboxExecutor>>,
    synthesizer: Synthesizer,
    optimizer: Optimizer,
    optimizer_config: OptimizerConfig,
    default_components: Vec<ComponentDescriptor>,
    cache: ResponseCache,
    observers: Vec<Arc<dyn OrchestrationObserver>>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn builder(router: Router) -> CoordinatorBuilder {
        CoordinatorBuilder {
            router,
            capabilities: None,
            cases: None,
            detector: None,
            interpreter: None,
            sandbox: None,
            synthesizer: Synthesizer::default(),
            optimizer: Optimizer::default(),
            optimizer_config: OptimizerConfig::default(),
            default_components: default_components(),
            observers: Vec::new(),
            config: CoordinatorConfig::default(),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub async fn orchestrate(
        &self,
        request: &OrchestrationRequest,
        cancel: CancellationToken,
    ) -> Result<OrchestrationResponse, OrchestrationError> {
        let started = Instant::now();
        let key = cache_key(request);

        if let Some(cached) = self.cache.get(&key) {
            self.notify(|o| o.on_cache_hit(&key));
            return Ok(cached);
        }
        self.notify(|o| o.on_cache_miss(&key));

        let span = tracing::info_span!("orchestrate", request_id = %Uuid::new_v4());
        let outcome = match self.compute(request, &cancel).instrument(span).await {
            Ok(_) if cancel.is_cancelled() => Err(OrchestrationError::Cancelled),
            other => other,
        };

        match outcome {
            Ok(response) => {
                self.cache.insert(key, response.clone());
                self.notify(|o| o.on_completed(started.elapsed()));
                Ok(response)
            }
            Err(error) => {
                self.notify(|o| o.on_failed(&error, started.elapsed()));
                Err(error)
            }
        }
    }

    /// Record the cached plan for `request` as a use case when the rating is high.
    /// Returns whether a case was written.
    pub async fn record_feedback(
        &self,
        request: &OrchestrationRequest,
        rating: u8,
    ) -> anyhow::Result<bool> {
        if rating > 5 {
            bail!("rating must be between 0 and 5, got {}", rating);
        }
        if rating < HIGH_QUALITY_RATING {
            tracing::debug!(rating, "Feedback below recording threshold");
            return Ok(false);
        }

        let key = cache_key(request);
        let Some(OrchestrationResponse::Plan(plan)) = self.cache.get(&key) else {
            tracing::warn!("Feedback for a request with no cached plan");
            return Ok(false);
        };

        let use_case = UseCase {
            id: key,
            query: request.query.clone(),
            archetype: plan.intent.archetype,
            capabilities: plan.intent.required_capabilities.clone(),
            components: component_names(&plan.graph),
            provider_id: Some(plan.provider_id.clone()),
        };
        self.cases.record_case(use_case).await?;
        tracing::info!(rating, "Plan recorded as use case");
        Ok(true)
    }

    async fn compute(
        &self,
        request: &OrchestrationRequest,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationResponse, OrchestrationError> {
        let similar = self.similar_cases(&request.query, cancel).await?;

        let missing = self
            .run_stage(Stage::DetectMissingInfo, cancel, async {
                self.detector.detect(&request.query, &similar)
            })
            .await?;

        if !missing.is_empty() && request.clarification_answers.is_empty() {
            self.notify(|o| o.on_clarification(&missing));
            return Ok(OrchestrationResponse::Clarification(ClarificationResponse {
                questions: missing.iter().map(|c| c.question()).collect(),
                suggestions: similar
                    .iter()
                    .map(|c| CaseSuggestion {
                        case_id: c.use_case.id.clone(),
                        query: c.use_case.query.clone(),
                        archetype: c.use_case.archetype,
                        similarity: c.similarity,
                    })
                    .collect(),
            }));
        }

        let routing = request.routing_request();
        let intent_request = RoutingRequest {
            task: request.query_with_answers(),
            ..routing.clone()
        };
        let intent = self
            .run_stage(
                Stage::InterpretIntent,
                cancel,
                self.interpreter.interpret(&intent_request, &similar, cancel),
            )
            .await?;
        tracing::info!(
            archetype = %intent.archetype,
            capabilities = ?intent.required_capabilities,
            "Intent interpreted"
        );

        let components = self
            .run_stage(Stage::SelectComponents, cancel, async {
                Ok::<_, anyhow::Error>(self.select_components(&intent, cancel).await)
            })
            .await??;

        let profile = self
            .run_stage(Stage::SelectProvider, cancel, async {
                let decision = self.router.select_provider(&routing)?;
                self.router
                    .registry()
                    .profile(&decision.provider_id)
                    .ok_or_else(|| anyhow!("provider {} vanished from the registry", decision.provider_id))
            })
            .await?;

        let graph = self
            .run_stage(Stage::Synthesize, cancel, async {
                let graph = self
                    .synthesizer
                    .synthesize(&intent, &components, &profile, &self.config.synthesis)?;
                Ok::<_, anyhow::Error>(graph)
            })
            .await?;

        let warnings = self
            .run_stage(Stage::Validate, cancel, async {
                graph.validate(&self.config.terminal_types)?;
                Ok::<_, anyhow::Error>(self.dry_run(&graph, cancel).await)
            })
            .await??;

        let optimizer_config = self.optimizer_config_for(request);
        let context = self.eligible_context(&routing);
        let report = self
            .run_stage(Stage::Optimize, cancel, async {
                let report = self.optimizer.optimize(graph, &optimizer_config, &context)?;
                Ok::<_, anyhow::Error>(report)
            })
            .await?;

        self.run_stage(Stage::Validate, cancel, async {
            report.graph.validate(&self.config.terminal_types)?;
            Ok::<_, anyhow::Error>(())
        })
        .await?;

        let units = estimate_units(&request.query);
        let estimate = confidence::estimate_plan(
            &report.graph,
            self.router.registry(),
            self.optimizer.tables(),
            units,
        );
        let best_similarity = similar.first().map(|c| c.similarity);
        let confidence = confidence::confidence_score(&intent, components.len(), best_similarity);
        let provider_id = planned_provider(&report.graph, self.optimizer.tables())
            .unwrap_or_else(|| profile.id.clone());
        if provider_id != profile.id {
            tracing::info!(routed = %profile.id, planned = %provider_id, "Optimizer substituted the routed provider");
        }
        let explanation = explain(&intent, &components, &provider_id, &report.applied_passes);

        Ok(OrchestrationResponse::Plan(Box::new(PlanResponse {
            intent,
            provider_id,
            graph: report.graph,
            explanation,
            estimate,
            confidence,
            applied_passes: report.applied_passes,
            metrics: report.metrics,
            warnings,
        })))
    }

    fn notify(&self, event: impl Fn(&dyn OrchestrationObserver)) {
        for observer in &self.observers {
            event(observer.as_ref());
        }
    }

    /// Run one stage under the cancellation token, tagging failures with the stage
    async fn run_stage<T, Fut>(
        &self,
        stage: Stage,
        cancel: &CancellationToken,
        work: Fut,
    ) -> Result<T, OrchestrationError>
    where
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let started = Instant::now();
        self.notify(|o| o.on_stage_started(stage));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            result = work => result,
        };

        self.notify(|o| o.on_stage_finished(stage, started.elapsed()));
        result.map_err(|e| OrchestrationError::at(stage, e))
    }

    /// Bounded, cancellable collaborator call; failures and timeouts become empty results
    async fn lookup<T, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        call: Fut,
    ) -> Result<Vec<T>, OrchestrationError>
    where
        Fut: Future<Output = anyhow::Result<Vec<T>>>,
    {
        let timeout = self.config.lookup_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrchestrationError::Cancelled),
            outcome = tokio::time::timeout(timeout, call) => match outcome {
                Ok(Ok(items)) => Ok(items),
                Ok(Err(e)) => {
                    tracing::warn!(lookup = what, "Lookup failed, continuing without results: {}", e);
                    Ok(Vec::new())
                }
                Err(_) => {
                    tracing::warn!(lookup = what, timeout_ms = timeout.as_millis() as u64, "Lookup timed out");
                    Ok(Vec::new())
                }
            },
        }
    }

    async fn similar_cases(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SimilarCase>, OrchestrationError> {
        let mut cases = self
            .lookup("similar_cases", cancel, self.cases.find_similar_cases(query, self.config.top_k))
            .await?;
        cases.retain(|c| c.similarity >= self.config.min_similarity);
        cases.sort_by(|a, b| OrderedFloat(b.similarity).cmp(&OrderedFloat(a.similarity)));
        cases.truncate(self.config.top_k);
        tracing::debug!(count = cases.len(), "Similar cases retained");
        Ok(cases)
    }

    async fn select_components(
        &self,
        intent: &Intent,
        cancel: &CancellationToken,
    ) -> Result<Vec<ComponentDescriptor>, OrchestrationError> {
        let mut components = if intent.required_capabilities.is_empty() {
            Vec::new()
        } else {
            self.lookup(
                "find_components",
                cancel,
                self.capabilities.find_components(&intent.required_capabilities),
            )
            .await?
        };

        let needs_tools = matches!(
            intent.archetype,
            WorkflowArchetype::Agent | WorkflowArchetype::MultiAgent
        );
        if needs_tools && !components.iter().any(|c| c.is_tool) {
            let tools = self
                .lookup("components_by_category", cancel, self.capabilities.components_by_category("tools"))
                .await?;
            components.extend(tools);
        }

        if components.is_empty() {
            tracing::debug!("No components found, using defaults");
            components = self.default_components.clone();
        }
        Ok(components)
    }

    /// Run each code-execution node in the sandbox; problems become warnings
    async fn dry_run(
        &self,
        graph: &ExecutionGraph,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, OrchestrationError> {
        let Some(sandbox) = &self.sandbox else {
            return Ok(Vec::new());
        };

        let mut warnings = Vec::new();
        for node in graph.nodes_of_type(stage::CODE_EXECUTOR) {
            let Some(code) = node.config_str(keys::CODE) else {
                continue;
            };
            let language = node.config_str(keys::LANGUAGE).unwrap_or("python");
            let execution = sandbox.execute(code, language, self.config.sandbox_level);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
                outcome = tokio::time::timeout(self.config.sandbox_timeout(), execution) => outcome,
            };
            match outcome {
                Ok(Ok(SandboxOutcome::Success { .. })) => {}
                Ok(Ok(SandboxOutcome::Failure { error })) => {
                    warnings.push(format!("{}: sandbox run failed: {}", node.id, error));
                }
                Ok(Err(e)) => warnings.push(format!("{}: sandbox unavailable: {}", node.id, e)),
                Err(_) => warnings.push(format!("{}: sandbox run timed out", node.id)),
            }
        }
        Ok(warnings)
    }

    /// Substitution candidates: only providers that pass the request's own filters
    fn eligible_context(&self, routing: &RoutingRequest) -> OptimizerContext {
        let eligible = match self.router.rank(routing) {
            Ok(decisions) => decisions,
            Err(e) => {
                tracing::warn!("No eligible substitutes: {}", e);
                return OptimizerContext::new();
            }
        };
        let registry = self.router.registry();
        eligible
            .iter()
            .filter_map(|decision| registry.profile(&decision.provider_id))
            .fold(OptimizerContext::new(), |context, profile| {
                context.with_provider(&profile.id, profile.cost.output, true)
            })
    }

    /// Request ceilings fill in whatever the configured optimizer leaves unset
    fn optimizer_config_for(&self, request: &OrchestrationRequest) -> OptimizerConfig {
        let mut config = self.optimizer_config.clone();
        if let Some(constraints) = &request.constraints {
            if config.max_cost.is_none() {
                config.max_cost = constraints.max_cost;
            }
            if config.max_latency_ms.is_none() {
                config.max_latency_ms = constraints.max_latency_ms;
            }
        }
        config
    }
}

fn component_names(graph: &ExecutionGraph) -> Vec<String> {
    graph
        .nodes
        .iter()
        .map(|n| {
            n.config_str(keys::COMPONENT)
                .map(str::to_string)
                .unwrap_or_else(|| n.stage_type.clone())
        })
        .collect()
}

/// Provider of the first model-call node, in graph order
fn planned_provider(graph: &ExecutionGraph, tables: &OptimizerTables) -> Option<String> {
    graph
        .nodes
        .iter()
        .filter(|n| tables.is_model_call(&n.stage_type))
        .find_map(|n| n.config_str(keys::PROVIDER).map(str::to_string))
}

fn explain(
    intent: &Intent,
    components: &[ComponentDescriptor],
    provider_id: &str,
    applied_passes: &[String],
) -> String {
    let names: Vec<&str> = components.iter().map(|c| c.name.as_str()).collect();
    let mut text = format!(
        "{} workflow for \"{}\" on {} using {}.",
        intent.archetype,
        intent.goal,
        provider_id,
        if names.is_empty() { "no extra components".to_string() } else { names.join(", ") }
    );
    if !applied_passes.is_empty() {
        text.push_str(&format!(" Optimizations: {}.", applied_passes.join(", ")));
    }
    text
}
