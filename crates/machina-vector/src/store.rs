//! On-disk persistence for `KnowledgeIndex`.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/CURRENT              name of the live generation, e.g. "gen-000003"
//! <root>/gen-000003/
//!     vectors.bin             "MVEC" | u32 version | u32 dim | u64 count | f32 LE * dim * count
//!     texts.txt               one chunk text per line, in ordinal order
//!     metadata.json           JSON array of metadata, in ordinal order
//!     manifest.json           embedder id, dimension, count, timestamp, blake3 of vectors.bin
//! ```
//!
//! A save writes a complete generation into a scratch directory, renames it
//! into place and only then repoints `CURRENT`. Readers therefore observe
//! either the previous index or the new one, never a mix.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use machina_core::error::{Error, Result};
use machina_core::types::Metadata;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::flat::FlatL2Index;
use crate::index::KnowledgeIndex;

pub const CURRENT_FILE: &str = "CURRENT";
pub const VECTORS_FILE: &str = "vectors.bin";
pub const TEXTS_FILE: &str = "texts.txt";
pub const METADATA_FILE: &str = "metadata.json";
pub const MANIFEST_FILE: &str = "manifest.json";

const MAGIC: &[u8; 4] = b"MVEC";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const GENERATION_PREFIX: &str = "gen-";
const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub embedder_id: Option<String>,
    pub dimension: Option<usize>,
    pub count: usize,
    pub created_at: DateTime<Utc>,
    /// blake3 of the whole `vectors.bin`, header included.
    pub vectors_blake3: String,
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when a generation has been committed, even if it later turns out
    /// to be unreadable.
    pub fn exists(&self) -> bool {
        self.root.join(CURRENT_FILE).is_file()
    }

    /// Persist `index` as a new generation and make it current.
    pub fn save(&self, index: &KnowledgeIndex) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).map_err(|e| Error::io(&self.root, e))?;

        let name = self.next_generation_name()?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| Error::io(&self.root, e))?;
        let manifest = write_generation(staging.path(), index)?;

        let generation = self.root.join(&name);
        fs::rename(staging.path(), &generation).map_err(|e| Error::io(&generation, e))?;
        // The scratch dir now lives at `generation`; dropping the guard is a no-op.
        drop(staging);

        self.write_current(&name)?;
        info!(
            store = %self.root.display(),
            generation = %name,
            count = manifest.count,
            dim = ?manifest.dimension,
            "index saved"
        );
        self.prune(&name);
        Ok(generation)
    }

    /// Load the current generation. A store without `CURRENT` is a cold start
    /// and yields an empty index; anything inconsistent is `CorruptIndex`.
    pub fn load(&self) -> Result<KnowledgeIndex> {
        let Some(generation) = self.current_generation()? else {
            debug!(store = %self.root.display(), "no committed index; starting empty");
            return Ok(KnowledgeIndex::default());
        };
        let index = read_generation(&generation)?;
        info!(store = %self.root.display(), count = index.len(), "index loaded");
        Ok(index)
    }

    /// Manifest of the current generation, `None` on a cold start.
    pub fn manifest(&self) -> Result<Option<Manifest>> {
        match self.current_generation()? {
            Some(generation) => read_manifest(&generation).map(Some),
            None => Ok(None),
        }
    }

    /// Remove everything under the store root.
    pub fn discard(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                warn!(store = %self.root.display(), "discarded persisted index");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&self.root, e)),
        }
    }

    fn current_generation(&self) -> Result<Option<PathBuf>> {
        let pointer = self.root.join(CURRENT_FILE);
        let name = match fs::read_to_string(&pointer) {
            Ok(s) => s.trim().to_string(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&pointer, e)),
        };
        if parse_generation(&name).is_none() {
            return Err(Error::corrupt(&pointer, format!("invalid generation name '{}'", name)));
        }
        let generation = self.root.join(&name);
        if !generation.is_dir() {
            return Err(Error::corrupt(&generation, "generation named by CURRENT is missing"));
        }
        Ok(Some(generation))
    }

    fn generations(&self) -> Result<Vec<(u64, String)>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.root, e)),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(n) = parse_generation(&name) {
                out.push((n, name));
            }
        }
        out.sort();
        Ok(out)
    }

    fn next_generation_name(&self) -> Result<String> {
        let next = self.generations()?.last().map_or(1, |(n, _)| n + 1);
        Ok(format!("{}{:06}", GENERATION_PREFIX, next))
    }

    fn write_current(&self, name: &str) -> Result<()> {
        let target = self.root.join(CURRENT_FILE);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(|e| Error::io(&self.root, e))?;
        writeln!(tmp, "{}", name).map_err(|e| Error::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
        tmp.persist(&target).map_err(|e| Error::io(&target, e.error))?;
        Ok(())
    }

    /// Best-effort removal of superseded generations and abandoned scratch dirs.
    fn prune(&self, keep: &str) {
        let Ok(entries) = fs::read_dir(&self.root) else { return };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let stale = name != keep && (parse_generation(&name).is_some() || name.starts_with(STAGING_PREFIX));
            if stale && entry.path().is_dir() {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!(path = %entry.path().display(), error = %e, "failed to remove stale generation");
                } else {
                    debug!(generation = %name, "removed stale generation");
                }
            }
        }
    }
}

/// Save `index` to the store rooted at `path`.
pub fn save(index: &KnowledgeIndex, path: impl AsRef<Path>) -> Result<PathBuf> {
    IndexStore::new(path.as_ref()).save(index)
}

/// Load the index stored at `path`; empty on a cold start.
pub fn load(path: impl AsRef<Path>) -> Result<KnowledgeIndex> {
    IndexStore::new(path.as_ref()).load()
}

/// Manifest of the index stored at `path`, without loading vectors.
pub fn manifest(path: impl AsRef<Path>) -> Result<Option<Manifest>> {
    IndexStore::new(path.as_ref()).manifest()
}

/// Remove the index stored at `path`.
pub fn discard(path: impl AsRef<Path>) -> Result<()> {
    IndexStore::new(path.as_ref()).discard()
}

fn parse_generation(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(GENERATION_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn write_generation(dir: &Path, index: &KnowledgeIndex) -> Result<Manifest> {
    let vectors = encode_vectors(index.vectors());
    let vectors_path = dir.join(VECTORS_FILE);
    write_synced(&vectors_path, &vectors)?;

    let mut texts = String::with_capacity(index.texts().iter().map(|t| t.len() + 1).sum());
    for text in index.texts() {
        texts.push_str(text);
        texts.push('\n');
    }
    let texts_path = dir.join(TEXTS_FILE);
    write_synced(&texts_path, texts.as_bytes())?;

    write_json(&dir.join(METADATA_FILE), index.metadata())?;

    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        embedder_id: index.embedder_id().map(str::to_string),
        dimension: index.dim(),
        count: index.len(),
        created_at: Utc::now(),
        vectors_blake3: blake3::hash(&vectors).to_hex().to_string(),
    };
    write_json(&dir.join(MANIFEST_FILE), &manifest)?;
    Ok(manifest)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| Error::Operation(format!("serialize {}: {}", path.display(), e)))?;
    write_synced(path, &bytes)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).map_err(|e| Error::io(path, e))?;
    file.write_all(bytes).map_err(|e| Error::io(path, e))?;
    file.sync_all().map_err(|e| Error::io(path, e))
}

fn encode_vectors(index: &FlatL2Index) -> Vec<u8> {
    let data = index.as_slice();
    let mut out = Vec::with_capacity(HEADER_LEN + data.len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    let dim = u32::try_from(index.dim().unwrap_or(0)).unwrap_or(u32::MAX);
    out.extend_from_slice(&dim.to_le_bytes());
    out.extend_from_slice(&(index.len() as u64).to_le_bytes());
    for x in data {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn decode_vectors(path: &Path, bytes: &[u8]) -> Result<FlatL2Index> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::corrupt(path, "truncated header"));
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    if &header[0..4] != MAGIC {
        return Err(Error::corrupt(path, "bad magic"));
    }
    let word = |at: usize| u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);
    let version = word(4);
    if version != FORMAT_VERSION {
        return Err(Error::corrupt(path, format!("unsupported format version {}", version)));
    }
    let dim = word(8) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header[12..20]);
    let count = usize::try_from(u64::from_le_bytes(count_bytes)).map_err(|_| Error::corrupt(path, "count overflows"))?;

    if dim == 0 && count > 0 {
        return Err(Error::corrupt(path, "zero dimension with non-zero count"));
    }
    let expected = count.checked_mul(dim).and_then(|n| n.checked_mul(4)).ok_or_else(|| Error::corrupt(path, "size overflows"))?;
    if payload.len() != expected {
        return Err(Error::corrupt(
            path,
            format!("payload is {} bytes, header promises {} ({} x {})", payload.len(), expected, count, dim),
        ));
    }

    let data: Vec<f32> = payload.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect();
    if data.iter().any(|x| !x.is_finite()) {
        return Err(Error::corrupt(path, "non-finite vector component"));
    }
    Ok(FlatL2Index::from_raw((dim > 0).then_some(dim), data))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::corrupt(path, "missing file"),
        _ => Error::io(path, e),
    })
}

fn read_manifest(generation: &Path) -> Result<Manifest> {
    let path = generation.join(MANIFEST_FILE);
    let bytes = read_file(&path)?;
    let manifest: Manifest = serde_json::from_slice(&bytes).map_err(|e| Error::corrupt(&path, e.to_string()))?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(Error::corrupt(&path, format!("unsupported format version {}", manifest.format_version)));
    }
    Ok(manifest)
}

fn read_generation(generation: &Path) -> Result<KnowledgeIndex> {
    let manifest = read_manifest(generation)?;

    let vectors_path = generation.join(VECTORS_FILE);
    let bytes = read_file(&vectors_path)?;
    let digest = blake3::hash(&bytes).to_hex().to_string();
    if digest != manifest.vectors_blake3 {
        return Err(Error::corrupt(&vectors_path, "checksum does not match manifest"));
    }
    let vectors = decode_vectors(&vectors_path, &bytes)?;
    if vectors.len() != manifest.count || vectors.dim() != manifest.dimension {
        return Err(Error::corrupt(
            &vectors_path,
            format!(
                "holds {} vectors of dim {:?}, manifest says {} of dim {:?}",
                vectors.len(),
                vectors.dim(),
                manifest.count,
                manifest.dimension
            ),
        ));
    }

    let texts_path = generation.join(TEXTS_FILE);
    let raw = read_file(&texts_path)?;
    let raw = String::from_utf8(raw).map_err(|_| Error::corrupt(&texts_path, "not valid UTF-8"))?;
    let texts: Vec<String> = raw.split_terminator('\n').map(str::to_string).collect();
    if texts.len() != manifest.count {
        return Err(Error::corrupt(&texts_path, format!("{} lines, expected {}", texts.len(), manifest.count)));
    }

    let metadata_path = generation.join(METADATA_FILE);
    let metadata: Vec<Metadata> =
        serde_json::from_slice(&read_file(&metadata_path)?).map_err(|e| Error::corrupt(&metadata_path, e.to_string()))?;
    if metadata.len() != manifest.count {
        return Err(Error::corrupt(&metadata_path, format!("{} entries, expected {}", metadata.len(), manifest.count)));
    }

    KnowledgeIndex::from_parts(vectors, texts, metadata, manifest.embedder_id)
        .map_err(|e| Error::corrupt(generation, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_names_parse() {
        assert_eq!(parse_generation("gen-000012"), Some(12));
        assert_eq!(parse_generation("gen-"), None);
        assert_eq!(parse_generation("gen-12a"), None);
        assert_eq!(parse_generation(".staging-abc"), None);
    }

    #[test]
    fn vector_header_layout() {
        let mut index = FlatL2Index::new(2);
        index.add(&[vec![1.0, -2.5]]).expect("add");
        let bytes = encode_vectors(&index);
        assert_eq!(&bytes[0..4], b"MVEC");
        assert_eq!(bytes.len(), HEADER_LEN + 8);
        assert_eq!(u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 2);

        let decoded = decode_vectors(Path::new("vectors.bin"), &bytes).expect("decode");
        assert_eq!(decoded, index);

        let err = decode_vectors(Path::new("vectors.bin"), &bytes[..bytes.len() - 1]).expect_err("truncated");
        assert!(err.is_corrupt());
    }
}
