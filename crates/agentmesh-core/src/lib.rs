//! agentmesh-core — shared building blocks for agentmesh agents
//!
//! Holds the agent manifest model, the error taxonomy, configuration, the
//! background task store, and the two collaborator seams (execution engine
//! and observability sink) that the A2A dispatcher composes.

pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod task;
pub mod telemetry;

pub use config::MeshConfig;
pub use engine::{BlockingEngine, ExecutionEngine};
pub use error::{MeshError, MeshResult};
pub use manifest::{AgentManifest, CapabilityDescriptor, Endpoints, ManifestDefaults};
pub use task::{Task, TaskStatus, TaskStore};
pub use telemetry::{NoopSink, ObservabilitySink, SpanRecord, TracingSink};
