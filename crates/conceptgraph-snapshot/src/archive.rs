//! Archive container: one gzip-compressed tar carrying the snapshot
//! document at a fixed member path plus the original source payloads in a
//! content-addressed `documents/` directory.
//!
//! Extraction is defensive: member paths are validated before anything is
//! written, and a member whose content hash disagrees with its
//! content-addressed name is rejected.

use crate::document::SnapshotDocument;
use crate::error::{SnapshotError, SnapshotResult};
use conceptgraph_core::blob::BlobStore;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;

/// Fixed member path of the document inside the container.
pub const DOCUMENT_MEMBER: &str = "snapshot.json";

/// Member path of the blob manifest (blob key → content-addressed member).
pub const BLOB_MANIFEST_MEMBER: &str = "blobs.json";

/// Directory member holding content-addressed payloads.
pub const BLOB_DIR: &str = "documents";

/// Outcome of packing, blob side included.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PackSummary {
    pub blobs_packed: u64,
    pub blobs_missing: u64,
}

/// Write `document` and the payloads its sources reference into a
/// `.tar.gz` at `path`. Missing blobs are tolerated, logged, and counted.
pub fn pack(
    document: &SnapshotDocument,
    blobs: &dyn BlobStore,
    path: &Path,
) -> SnapshotResult<PackSummary> {
    let mut summary = PackSummary::default();
    let mut manifest: BTreeMap<String, String> = BTreeMap::new();
    let mut payloads: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    for source in &document.data.sources {
        let Some(key) = source.blob_key.as_deref() else {
            continue;
        };
        if manifest.contains_key(key) {
            continue;
        }
        let bytes = blobs.get(key).map_err(|e| SnapshotError::Blob {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        match bytes {
            Some(bytes) => {
                let digest = hex_digest(&bytes);
                let member = format!("{BLOB_DIR}/{digest}");
                manifest.insert(key.to_string(), member.clone());
                payloads.entry(member).or_insert(bytes);
                summary.blobs_packed += 1;
            }
            None => {
                tracing::warn!(blob_key = key, "blob missing from store, not packed");
                summary.blobs_missing += 1;
            }
        }
    }

    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    append_member(
        &mut builder,
        DOCUMENT_MEMBER,
        document.to_json_string()?.as_bytes(),
    )?;
    let manifest_json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| SnapshotError::Archive(e.to_string()))?;
    append_member(&mut builder, BLOB_MANIFEST_MEMBER, manifest_json.as_bytes())?;
    for (member, bytes) in &payloads {
        append_member(&mut builder, member, bytes)?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| SnapshotError::Archive(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| SnapshotError::Archive(e.to_string()))?
        .flush()?;

    Ok(summary)
}

fn append_member<W: Write>(
    builder: &mut tar::Builder<W>,
    member: &str,
    bytes: &[u8],
) -> SnapshotResult<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, member, bytes)
        .map_err(|e| SnapshotError::Archive(format!("appending {member}: {e}")))
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// An archive unpacked into a temporary directory. The document is parsed
/// eagerly; blob payloads stay on disk until pushed to a store. Dropping
/// the value removes the directory; [`ExtractedArchive::cleanup`] does it
/// explicitly and reports failures without raising.
#[derive(Debug)]
pub struct ExtractedArchive {
    pub document: SnapshotDocument,
    /// (blob key, extracted payload path), manifest order.
    pub blobs: Vec<(String, PathBuf)>,
    temp_dir: Option<TempDir>,
}

impl ExtractedArchive {
    /// Delete the extraction directory, tolerating and logging failure.
    pub fn cleanup(mut self) {
        if let Some(dir) = self.temp_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove extraction dir");
            }
        }
    }

    pub fn extraction_dir(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(|d| d.path())
    }
}

/// Unpack `path`, rejecting member paths that contain parent-directory
/// segments or are absolute.
pub fn extract(path: &Path) -> SnapshotResult<ExtractedArchive> {
    let temp_dir = TempDir::new()?;
    let file = File::open(path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    for entry in archive
        .entries()
        .map_err(|e| SnapshotError::Archive(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| SnapshotError::Archive(e.to_string()))?;
        let member = entry
            .path()
            .map_err(|e| SnapshotError::Archive(e.to_string()))?
            .into_owned();
        let safe = sanitized_member_path(&member)?;
        let dest = temp_dir.path().join(safe);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry
            .unpack(&dest)
            .map_err(|e| SnapshotError::Archive(format!("{}: {e}", member.display())))?;
    }

    let document_path = temp_dir.path().join(DOCUMENT_MEMBER);
    if !document_path.is_file() {
        return Err(SnapshotError::Archive(format!(
            "archive carries no {DOCUMENT_MEMBER}"
        )));
    }
    let document = SnapshotDocument::load(&document_path)?;

    let manifest_path = temp_dir.path().join(BLOB_MANIFEST_MEMBER);
    let mut blobs = Vec::new();
    if manifest_path.is_file() {
        let manifest: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)
                .map_err(|e| SnapshotError::Archive(format!("blob manifest: {e}")))?;
        for (key, member) in manifest {
            let payload_path = temp_dir.path().join(sanitized_member_path(Path::new(&member))?);
            let bytes = std::fs::read(&payload_path).map_err(|e| SnapshotError::Blob {
                key: key.clone(),
                message: format!("missing payload member {member}: {e}"),
            })?;
            let expected = member
                .strip_prefix(&format!("{BLOB_DIR}/"))
                .unwrap_or(&member);
            if hex_digest(&bytes) != expected {
                return Err(SnapshotError::Blob {
                    key,
                    message: format!("payload does not match content address {member}"),
                });
            }
            blobs.push((key, payload_path));
        }
    }

    Ok(ExtractedArchive {
        document,
        blobs,
        temp_dir: Some(temp_dir),
    })
}

/// Member paths must be purely relative: no parent segments, no roots,
/// no prefixes.
fn sanitized_member_path(member: &Path) -> SnapshotResult<PathBuf> {
    let mut safe = PathBuf::new();
    for component in member.components() {
        match component {
            Component::Normal(part) => safe.push(part),
            Component::CurDir => {}
            _ => {
                return Err(SnapshotError::Archive(format!(
                    "refusing traversal-hostile member path `{}`",
                    member.display()
                )));
            }
        }
    }
    if safe.as_os_str().is_empty() {
        return Err(SnapshotError::Archive("empty member path".into()));
    }
    Ok(safe)
}
