//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into migration and archival use-cases.
//! - Keep callers decoupled from storage details through injected stores.

pub mod archive_service;
pub mod collection_registry;
pub mod migration_service;
