//! Configuration types for the Tachikoma audit delivery pipeline.
//!
//! Configuration is a static [`DeliveryConfig`] read once at startup from
//! `.tachikoma/audit-delivery.yaml`, with `${VAR}` expansion and
//! `TACHIKOMA_AUDIT_*` environment overrides applied on top.

pub mod env;
pub mod loader;
pub mod types;

pub use env::*;
pub use loader::*;
pub use types::*;
