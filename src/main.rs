//! flowplan - request-to-execution-plan CLI
//!
//! - `plan`: full orchestration (clarification or optimized plan)
//! - `route`: provider selection only
//! - `providers`: registry listing
//! - `optimize`: run the optimizer over a graph file

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use flowplan::capability::StaticCapabilityIndex;
use flowplan::config::AppConfig;
use flowplan::logging::{self, LogTarget};
use flowplan::optimizer::{Optimizer, OptimizerContext};
use flowplan::orchestrator::{
    Coordinator, LlmIntentInterpreter, OrchestrationRequest, OrchestrationResponse, TracingObserver,
};
use flowplan::provider::OpenAiCompatibleClient;
use flowplan::registry::{
    self, EnvCredentialSource, Feature, HealthMonitor, HealthSource, HttpHealthCheck,
    ProviderRegistry, QualityDimension,
};
use flowplan::router::{Router, RoutingConstraints, RoutingRequest};
use flowplan::synthesizer::Synthesizer;
use flowplan::ExecutionGraph;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "flowplan")]
#[command(version)]
#[command(about = "Turn a task description into an optimized execution plan", long_about = None)]
struct Args {
    /// Configuration file path (overrides defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to the log file instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    /// Besides credentials, check each provider's models endpoint before routing
    #[arg(long, global = true)]
    check_http: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an execution plan for a task
    Plan {
        /// Task description
        task: String,
        #[command(flatten)]
        constraints: ConstraintArgs,
        /// Answer a clarification question, as category=answer
        #[arg(long = "answer", value_parser = parse_answer)]
        answers: Vec<(String, String)>,
        /// Ask the routed provider to interpret the request instead of keyword tables
        #[arg(long)]
        llm_intent: bool,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Select a provider for a task
    Route {
        /// Task description
        task: String,
        #[command(flatten)]
        constraints: ConstraintArgs,
        /// Print every eligible provider with its score
        #[arg(long)]
        all: bool,
    },
    /// List configured providers
    Providers,
    /// Optimize a graph read from a JSON file
    Optimize {
        graph: PathBuf,
        #[arg(long)]
        max_cost: Option<f64>,
        /// Latency ceiling in milliseconds
        #[arg(long)]
        max_latency: Option<f64>,
    },
}

#[derive(ClapArgs, Debug, Default)]
struct ConstraintArgs {
    /// Maximum estimated cost per request
    #[arg(long)]
    max_cost: Option<f64>,
    /// Maximum time to first token, in milliseconds
    #[arg(long)]
    max_latency: Option<f64>,
    /// Minimum quality score (0-1)
    #[arg(long)]
    min_quality: Option<f64>,
    /// Compare --min-quality against one dimension (reasoning, creativity, factuality, instruction_following)
    #[arg(long)]
    quality_dimension: Option<QualityDimension>,
    /// Required feature (streaming, function_calling, vision); repeatable
    #[arg(long = "feature")]
    features: Vec<Feature>,
    /// Preferred provider id; repeatable
    #[arg(long = "prefer")]
    preferred: Vec<String>,
}

impl ConstraintArgs {
    fn routing_constraints(&self) -> RoutingConstraints {
        RoutingConstraints {
            max_cost: self.max_cost,
            max_latency_ms: self.max_latency,
            min_quality: self.min_quality,
            quality_dimension: self.quality_dimension,
            required_features: self.features.iter().copied().collect(),
        }
    }
}

fn parse_answer(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected category=answer, got {:?}", raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;

    let target = if args.log_file {
        LogTarget::File
    } else {
        LogTarget::Console
    };
    logging::init_logging(target, args.verbose || config.debug)?;

    let registry = Arc::new(config.provider_registry()?);
    registry::global::init(registry.clone())?;
    let router = Router::new(registry.clone()).with_performance_window(config.router.performance_window);

    // Providers without a credential must never be routed to
    check_providers(&config, args.check_http).await?;

    let result = match args.command {
        Command::Plan {
            task,
            constraints,
            answers,
            llm_intent,
            json,
        } => {
            let options = PlanOptions { llm_intent, json };
            run_plan(&config, router, task, constraints, answers, options).await
        }
        Command::Route {
            task,
            constraints,
            all,
        } => run_route(&router, task, constraints, all),
        Command::Providers => {
            print_providers(&registry);
            Ok(())
        }
        Command::Optimize {
            graph,
            max_cost,
            max_latency,
        } => run_optimize(&config, &registry, graph, max_cost, max_latency),
    };

    registry::global::teardown();
    logging::flush();
    result
}

async fn check_providers(config: &AppConfig, check_http: bool) -> anyhow::Result<()> {
    let registry = registry::global::get().context("provider registry not initialized")?;
    let source: Arc<dyn HealthSource> = if check_http {
        Arc::new(HttpHealthCheck::new(config.router.health_check_timeout()))
    } else {
        Arc::new(EnvCredentialSource::new())
    };
    let monitor = HealthMonitor::new(
        registry,
        source,
        config.router.health_interval(),
        config.router.health_check_timeout(),
    );
    let report = monitor.run_once().await;
    for (id, health) in &report.unavailable {
        tracing::warn!(provider = %id, ?health, "Provider unavailable");
    }
    Ok(())
}

struct PlanOptions {
    llm_intent: bool,
    json: bool,
}

async fn run_plan(
    config: &AppConfig,
    router: Router,
    task: String,
    constraints: ConstraintArgs,
    answers: Vec<(String, String)>,
    options: PlanOptions,
) -> anyhow::Result<()> {
    let mut builder = Coordinator::builder(router.clone());
    if options.llm_intent {
        let timeout = config.coordinator.provider_timeout();
        // Intent extraction wants deterministic, short JSON
        let client = Arc::new(
            OpenAiCompatibleClient::new(timeout)
                .with_temperature(0.0)
                .with_max_tokens(Some(512)),
        );
        builder = builder.interpreter(Arc::new(LlmIntentInterpreter::new(router, client, timeout)));
    }

    let coordinator = builder
        .capabilities(Arc::new(StaticCapabilityIndex::new(config.catalog.components.clone())))
        .default_components(config.catalog.default_components.clone())
        .synthesizer(Synthesizer::new(config.synthesizer.max_workers))
        .optimizer(
            Optimizer::new(config.optimizer.tables.clone()),
            config.optimizer.passes.clone(),
        )
        .observer(Arc::new(TracingObserver))
        .config(config.coordinator.clone())
        .build()?;

    let mut request = OrchestrationRequest::new(task)
        .with_constraints(constraints.routing_constraints())
        .with_preferred(constraints.preferred.clone());
    for (category, answer) in answers {
        request = request.with_answer(category, answer);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let response = coordinator.orchestrate(&request, cancel).await?;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    match response {
        OrchestrationResponse::Clarification(clarification) => {
            println!("More information needed:");
            for question in &clarification.questions {
                println!("  [{}] {}", question.category.as_str(), question.question);
                if !question.examples.is_empty() {
                    println!("      e.g. {}", question.examples.join(", "));
                }
            }
            for suggestion in &clarification.suggestions {
                println!("  similar: {} ({:.2})", suggestion.query, suggestion.similarity);
            }
            println!("\nRe-run with --answer <category>=<answer>");
        }
        OrchestrationResponse::Plan(plan) => {
            println!("{}", plan.explanation);
            println!(
                "Provider: {}  confidence {:.2}  ~${:.4}  ~{:.0}ms",
                plan.provider_id, plan.confidence, plan.estimate.cost, plan.estimate.latency_ms
            );
            println!(
                "Graph: {} nodes, {} edges ({} → {})",
                plan.graph.nodes.len(),
                plan.graph.edges.len(),
                plan.metrics.nodes_before,
                plan.metrics.nodes_after
            );
            if !plan.applied_passes.is_empty() {
                println!("Passes: {}", plan.applied_passes.join(", "));
            }
            for warning in &plan.warnings {
                println!("⚠️  {}", warning);
            }
        }
    }
    Ok(())
}

fn run_route(router: &Router, task: String, constraints: ConstraintArgs, all: bool) -> anyhow::Result<()> {
    let request = RoutingRequest::new(task)
        .with_constraints(constraints.routing_constraints())
        .with_preferred(constraints.preferred.clone());

    if all {
        for decision in router.rank(&request)? {
            println!("{:<24} {:.3}", decision.provider_id, decision.score);
        }
    } else {
        let decision = router.select_provider(&request)?;
        println!("{} (score {:.3})", decision.provider_id, decision.score);
    }
    Ok(())
}

fn print_providers(registry: &ProviderRegistry) {
    let snapshot = registry.snapshot(flowplan::router::DEFAULT_PERFORMANCE_WINDOW);
    println!(
        "{:<24} {:<12} {:>10} {:>10} {:>8} {:>9}",
        "ID", "BACKEND", "IN/1K", "OUT/1K", "TTFT", "QUALITY"
    );
    for status in snapshot.providers() {
        let profile = &status.profile;
        println!(
            "{:<24} {:<12} {:>10.5} {:>10.5} {:>6.0}ms {:>9.2}{}",
            profile.id,
            profile.backend,
            profile.cost.input,
            profile.cost.output,
            profile.latency.time_to_first_token_ms,
            profile.quality.mean(),
            if status.available { "" } else { "  (unavailable)" }
        );
    }
}

fn run_optimize(
    config: &AppConfig,
    registry: &ProviderRegistry,
    path: PathBuf,
    max_cost: Option<f64>,
    max_latency: Option<f64>,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read graph file {:?}", path))?;
    let graph: ExecutionGraph = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse graph file {:?}", path))?;

    let mut passes = config.optimizer.passes.clone();
    if let Some(max_cost) = max_cost {
        passes = passes.with_max_cost(max_cost);
    }
    if let Some(max_latency) = max_latency {
        passes = passes.with_max_latency(max_latency);
    }

    let context = OptimizerContext::from_snapshot(&registry.snapshot(config.router.performance_window));
    let report = Optimizer::new(config.optimizer.tables.clone()).optimize(graph, &passes, &context)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
