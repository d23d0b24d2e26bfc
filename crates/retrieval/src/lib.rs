//! # Toolbridge Retrieval
//!
//! Grounded answers from a REST document index:
//! - [`RetrievalAdapter`] exposes the index as a `query` tool
//! - [`PathNormalizer`] turns storage paths into public document paths
//! - [`DocumentCache`] keeps the latest revision of each retrieved document
//! - [`CitationVerifier`] checks that replies only cite retrieved documents
//!
//! Register the adapter and the verifier on the same
//! [`Bridge`](toolbridge_agent::Bridge).

pub mod adapter;
pub mod citation;
pub mod error;
pub mod evidence;

pub use adapter::{QUERY_TOOL, QueryResult, RetrievalAdapter};
pub use citation::{CitationReport, CitationSession, CitationVerifier, verify_citations};
pub use error::{Result, RetrievalError};
pub use evidence::{CachedDocument, DocumentCache, Evidence, EvidenceSet, PathNormalizer};
