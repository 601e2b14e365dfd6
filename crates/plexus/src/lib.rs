//! Plexus — a graph-based task orchestration engine.
//!
//! This crate re-exports all Plexus sub-crates for convenient
//! single-import usage. Enable features to control which modules are
//! available.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `default` | `graph`, `engine`, `store`, `callbacks` |
//! | `graph` | Graph model, builder, validator, Mermaid rendering |
//! | `engine` | Scheduler, node executors, run controller, `Engine` |
//! | `store` | In-memory `RunStore`/`ApprovalQueue` |
//! | `callbacks` | `LoggingCallback`, `TracingCallback` |
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use plexus::core::{TaskRouter, RouteRequest, RouteResponse};
//! use plexus::engine::{Engine, RunOptions};
//! use plexus::graph::{GraphBuilder, Node, NodeKind, TaskConfig};
//! ```

/// Collaborator contracts, error taxonomy, and run-level types.
/// Always available.
pub use plexus_core as core;

/// Graph model, builder, validator, condition evaluation, templates,
/// Mermaid rendering.
#[cfg(feature = "graph")]
pub use plexus_graph as graph;

/// Dependency scheduler, node executors, run controller, and the
/// `Engine` facade.
#[cfg(feature = "engine")]
pub use plexus_engine as engine;

/// In-memory run store and approval queue for development/testing.
#[cfg(feature = "store")]
pub use plexus_store as store;

/// Logging and tracing callback handlers.
#[cfg(feature = "callbacks")]
pub use plexus_callbacks as callbacks;
