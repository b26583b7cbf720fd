//! Turning storage records into nested output documents.

mod assembler;
mod association;
mod document;
mod error;
mod materializer;

pub use assembler::{
    Assembler, AssociationSpec, CollectionPolicy, CollectionReport, SkippedRecord,
};
pub use association::Aggregator;
pub use document::{Association, AssociationMap, DocValue, Document, ExtraFields};
pub use error::{ResolveError, ResolveResult};
pub use materializer::Materializer;
