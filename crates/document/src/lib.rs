//! # Duet Document
//!
//! A Duet document is one text file in two regions: the kernel (code) above
//! a separator line and the annotation log (comments) below it. This crate
//! owns that model and the stages that guard it:
//!
//! - [`DocumentStore`] holds the committed text and splits it
//! - [`PatchEngine`] applies an edit batch as one transaction
//! - [`Validator`] checks structure and kernel syntax without running code
//! - [`AnnotationLog`] renders and re-reads conversation turns
//! - [`persist`] writes committed text to disk atomically

pub mod annotation;
pub mod patch;
pub mod persist;
pub mod store;
pub mod validator;

pub use annotation::AnnotationLog;
pub use patch::PatchEngine;
pub use store::{CommitSummary, DocumentLayout, DocumentStore, SourceDocument};
pub use validator::{ValidationOutcome, Validator};
