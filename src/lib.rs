//! flowplan - de una petición en lenguaje natural a un plan de ejecución
//!
//! Dada una descripción de tarea, flowplan elige el proveedor de modelos más
//! adecuado bajo restricciones de coste, latencia y calidad, sintetiza un grafo
//! de ejecución y lo optimiza antes de devolverlo al llamador.
//!
//! # Arquitectura
//!
//! - **Registry + Router**: perfiles de proveedores, disponibilidad y selección
//!   con fallback
//! - **Synthesizer**: intención → grafo dirigido acíclico de etapas
//! - **Optimizer**: ocho pasadas sobre el grafo con métricas estimadas
//! - **Coordinator**: cache, clarificación y el pipeline completo
//!
//! # Módulos Principales
//!
//! - [`registry`] - Perfiles, salud y muestras de rendimiento
//! - [`router`] - Selección de proveedor y ejecución con fallback
//! - [`synthesizer`] - Construcción de grafos por arquetipo
//! - [`optimizer`] - Pasadas de optimización
//! - [`orchestrator`] - Coordinador de la petición completa
//!
//! # Ejemplo de Uso
//!
//! ```rust,no_run
//! use flowplan::config::AppConfig;
//! use flowplan::orchestrator::{Coordinator, OrchestrationRequest};
//! use flowplan::router::Router;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AppConfig::load(None)?;
//! let router = Router::new(Arc::new(config.provider_registry()?));
//! let coordinator = Coordinator::builder(router).build()?;
//!
//! let request = OrchestrationRequest::new("summarize the attached PDF report into bullet points");
//! let response = coordinator.orchestrate(&request, CancellationToken::new()).await?;
//! println!("{}", serde_json::to_string_pretty(&response)?);
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod cases;
pub mod config;
pub mod graph;
pub mod logging;
pub mod optimizer;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod router;
pub mod sandbox;
pub mod synthesizer;

pub use graph::{ExecutionGraph, GraphEdge, GraphNode};
pub use optimizer::{OptimizationReport, Optimizer, OptimizerConfig};
pub use orchestrator::{Coordinator, OrchestrationRequest, OrchestrationResponse};
pub use registry::{ProviderProfile, ProviderRegistry};
pub use router::{Router, RoutingConstraints, RoutingRequest};
pub use synthesizer::{Intent, Synthesizer, WorkflowArchetype};
