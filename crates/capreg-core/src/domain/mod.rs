//! Domain models for the capability registry.
//!
//! The persisted entities (`CapabilityRecord`, `EvaluationEvent`,
//! `ChampionRecord`) live in `capreg-state`; this module holds the
//! request types the registry API accepts and the error taxonomy.

pub mod error;
pub mod request;

pub use error::{LineageViolation, RegistryError, Result};
pub use request::{
    CapabilityPatch, DeleteMode, DeriveRequest, ListOrder, NewCapability, RecordFilter,
};
