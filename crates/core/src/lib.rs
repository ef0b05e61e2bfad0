//! # Duet Core
//!
//! Domain types, traits, and error definitions for the Duet self-editing
//! runtime. This crate has **zero framework dependencies** — it defines the
//! vocabulary every other crate speaks: edits and batches, annotation turns,
//! the provider abstraction, domain events, and the error kinds the pipeline
//! reports.
//!
//! ## Design Philosophy
//!
//! The pipeline stages live in their own crates (`duet-document`,
//! `duet-kernel`, `duet-agent`). They meet here, so:
//! - Stages can be tested in isolation against plain values
//! - The provider backend can be swapped for a scripted mock
//! - The dependency graph points inward, at core

pub mod annotation;
pub mod edit;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use annotation::{AnnotationTurn, Origin};
pub use edit::{Edit, EditBatch, Proposal};
pub use error::{Diagnostic, Error, ErrorKind, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolChoice};
