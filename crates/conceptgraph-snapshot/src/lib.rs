//! Portable snapshot layer: document format, codec, validator, archive.
//!
//! ```text
//!   live store  ──export──►  SnapshotDocument  ──pack──►  .tar.gz
//!       ▲                        │    ▲                     │
//!       └────────import──────────┘    └──────extract────────┘
//! ```
//!
//! The document is plain JSON and self-describing; the archive wraps it
//! together with the original source payloads, content-addressed. The
//! validator sits between extract/load and import: a document with
//! errors must never be applied.

pub mod archive;
pub mod codec;
pub mod document;
pub mod error;
pub mod validate;

pub use archive::{extract, pack, ExtractedArchive, PackSummary, BLOB_DIR, DOCUMENT_MEMBER};
pub use codec::{
    ImportOptions, ImportSummary, SectionCounts, SnapshotCodec, DEFAULT_WORKER_WIDTH,
};
pub use document::{
    ScopeKind, SnapshotData, SnapshotDocument, SnapshotScope, SnapshotStatistics,
    SNAPSHOT_VERSION, SUPPORTED_VERSIONS,
};
pub use error::{SnapshotError, SnapshotResult};
pub use validate::{IntegrityValidator, ValidationReport};
