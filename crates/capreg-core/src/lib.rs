//! capreg Core Library
//!
//! The domain layer of the capability registry: versioned Skill and Agent
//! definitions with lineage, evaluation history, per-domain champions and
//! a prompt injector. Storage comes from `capreg-state`.
//!
//! ## Layer 1 - Domain
//!
//! - [`CapabilityRegistry`]: create/get/update/delete/list, lineage walks,
//!   evaluation history and champion promotion over any backend
//! - [`injector::render`]: pure formatting of records into prompt text
//! - [`evolution::evolve`]: drives an external [`VariantSource`]
//! - [`RegistryConfig`] / [`open_backend`]: environment configuration

pub mod champion;
pub mod config;
pub mod domain;
pub mod evolution;
pub mod history;
pub mod injector;
pub mod lineage;
pub mod metrics;
pub mod obs;
pub mod registry;
pub mod telemetry;

pub use config::{open_backend, BackendKind, RegistryConfig};
pub use domain::{
    CapabilityPatch, DeleteMode, DeriveRequest, LineageViolation, ListOrder, NewCapability,
    RecordFilter, RegistryError, Result,
};
pub use evolution::{
    evolve, Evaluation, EvolutionError, EvolveOptions, EvolveReport, ProposedVariant,
    VariantSource,
};
pub use injector::{render, InjectionStyle};
pub use lineage::{Ancestors, LineagePlan};
pub use registry::CapabilityRegistry;
pub use telemetry::init_tracing;

pub use capreg_state::{
    CapabilityContent, CapabilityRecord, ChampionMetadata, ChampionRecord, EvaluationEvent,
    RecordId, RecordKind, RegistryBackend,
};

/// Workspace version, shared by every capreg crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
