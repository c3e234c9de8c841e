//! Binary storage for the catalog index.
//!
//! File format: vectors.bin
//!
//! Header (59 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - item_count: u32 (little-endian)
//! - entry_count: u64 (little-endian)
//! - built_at: i64 (unix seconds, little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Catalog:
//! - length: u64 (little-endian)
//! - items: JSON array of catalog items
//!
//! Entries (repeated):
//! - item_pos: u32 (little-endian)
//! - variant: u8
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::catalog::CatalogItem;
use crate::semantic::index::{CatalogIndex, IndexError, SearchIndex};
use crate::semantic::preprocess::EmbedVariant;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) +
/// item_count(4) + entry_count(8) + built_at(8) + checksum(4)
const HEADER_SIZE: usize = 59;

/// Bytes covered by the header checksum
const CHECKSUMMED: usize = HEADER_SIZE - 4;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Catalog blob is invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stored index is inconsistent: {0}")]
    Index(#[from] IndexError),
}

/// Header fields of a stored index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub version: u8,
    pub model_id: [u8; 32],
    pub dimensions: usize,
    pub item_count: usize,
    pub entry_count: u64,
    /// Unix seconds
    pub built_at: i64,
}

impl IndexInfo {
    pub fn built_at_rfc3339(&self) -> String {
        chrono::DateTime::from_timestamp(self.built_at, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| self.built_at.to_string())
    }
}

/// Storage manager for the catalog index.
pub struct IndexStorage {
    path: PathBuf,
}

impl IndexStorage {
    /// Create a new storage manager for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the storage file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the storage file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and verify only the header.
    pub fn info(&self) -> Result<IndexInfo, StorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        read_header(&mut reader)
    }

    /// Load the catalog index from storage.
    ///
    /// # Arguments
    /// * `expected_model_id` - SHA256 hash of the expected model name
    /// * `expected_dimensions` - Expected embedding dimensions
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<CatalogIndex, StorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        validate_header(&header, expected_model_id, expected_dimensions)?;

        let items = read_catalog(&mut reader)?;
        if items.len() != header.item_count {
            return Err(StorageError::InvalidFormat(format!(
                "header lists {} items, catalog blob has {}",
                header.item_count,
                items.len()
            )));
        }

        let mut entries = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            entries.push(read_entry(&mut reader, header.dimensions)?);
        }

        Ok(CatalogIndex::from_parts(header.dimensions, items, entries)?)
    }

    /// Save the catalog index to storage.
    ///
    /// Uses atomic write: unique temp file in the same directory -> fsync -> rename.
    /// Concurrent saves never share a temp file, and a failed save leaves the
    /// previous file untouched.
    pub fn save(&self, index: &CatalogIndex, model_id: &[u8; 32]) -> Result<(), StorageError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        // removed on drop unless persisted
        let temp = tempfile::NamedTempFile::new_in(parent)?;
        self.write_to_file(temp.as_file(), index, model_id)?;

        temp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;

        Ok(())
    }

    /// Delete the storage file if it exists.
    pub fn delete(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn write_to_file(
        &self,
        file: &File,
        index: &CatalogIndex,
        model_id: &[u8; 32],
    ) -> Result<(), StorageError> {
        let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
            StorageError::InvalidFormat(format!("{} dimensions do not fit u16", index.dimensions()))
        })?;
        let item_count = u32::try_from(index.item_count()).map_err(|_| {
            StorageError::InvalidFormat(format!("{} items do not fit u32", index.item_count()))
        })?;

        let mut writer = BufWriter::new(file);

        let header = IndexInfo {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions: dimensions as usize,
            item_count: item_count as usize,
            entry_count: index.entry_count() as u64,
            built_at: chrono::Utc::now().timestamp(),
        };
        write_header(&mut writer, &header)?;

        let catalog = serde_json::to_vec(index.items())?;
        writer.write_all(&(catalog.len() as u64).to_le_bytes())?;
        writer.write_all(&catalog)?;

        for entry in index.entries() {
            writer.write_all(&(entry.item as u32).to_le_bytes())?;
            writer.write_all(&[entry.variant.as_u8()])?;
            for &value in &entry.embedding {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        drop(writer);
        file.sync_all()?;

        Ok(())
    }
}

fn read_header<R: Read>(reader: &mut R) -> Result<IndexInfo, StorageError> {
    let mut bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut bytes).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            StorageError::InvalidFormat("file shorter than header".to_string())
        }
        _ => StorageError::Io(e),
    })?;

    let version = bytes[0];

    // Version check first
    if version > FORMAT_VERSION {
        return Err(StorageError::VersionMismatch(version, FORMAT_VERSION));
    }
    if version == 0 {
        return Err(StorageError::InvalidFormat("version 0".to_string()));
    }

    // Verify checksum (computed over header without checksum field)
    let stored_checksum = u32::from_le_bytes(le_array(&bytes[55..59]));
    if stored_checksum != crc32fast::hash(&bytes[..CHECKSUMMED]) {
        return Err(StorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&bytes[1..33]);

    Ok(IndexInfo {
        version,
        model_id,
        dimensions: u16::from_le_bytes(le_array(&bytes[33..35])) as usize,
        item_count: u32::from_le_bytes(le_array(&bytes[35..39])) as usize,
        entry_count: u64::from_le_bytes(le_array(&bytes[39..47])),
        built_at: i64::from_le_bytes(le_array(&bytes[47..55])),
    })
}

fn validate_header(
    header: &IndexInfo,
    expected_model_id: &[u8; 32],
    expected_dimensions: usize,
) -> Result<(), StorageError> {
    if header.model_id != *expected_model_id {
        return Err(StorageError::ModelMismatch);
    }

    if header.dimensions != expected_dimensions {
        return Err(StorageError::DimensionMismatch {
            expected: expected_dimensions,
            got: header.dimensions,
        });
    }

    Ok(())
}

fn write_header<W: Write>(writer: &mut W, header: &IndexInfo) -> Result<(), StorageError> {
    let mut bytes = [0u8; HEADER_SIZE];

    bytes[0] = header.version;
    bytes[1..33].copy_from_slice(&header.model_id);
    bytes[33..35].copy_from_slice(&(header.dimensions as u16).to_le_bytes());
    bytes[35..39].copy_from_slice(&(header.item_count as u32).to_le_bytes());
    bytes[39..47].copy_from_slice(&header.entry_count.to_le_bytes());
    bytes[47..55].copy_from_slice(&header.built_at.to_le_bytes());

    let checksum = crc32fast::hash(&bytes[..CHECKSUMMED]);
    bytes[55..59].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&bytes)?;
    Ok(())
}

fn read_catalog<R: Read>(reader: &mut R) -> Result<Vec<CatalogItem>, StorageError> {
    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes);

    let mut blob = vec![];
    reader.take(len).read_to_end(&mut blob)?;
    if blob.len() as u64 != len {
        return Err(StorageError::InvalidFormat("truncated catalog blob".to_string()));
    }

    Ok(serde_json::from_slice(&blob)?)
}

fn read_entry<R: Read>(
    reader: &mut R,
    dimensions: usize,
) -> Result<(usize, EmbedVariant, Vec<f32>), StorageError> {
    let mut pos_bytes = [0u8; 4];
    reader.read_exact(&mut pos_bytes)?;
    let item = u32::from_le_bytes(pos_bytes) as usize;

    let mut variant_byte = [0u8; 1];
    reader.read_exact(&mut variant_byte)?;
    let variant = EmbedVariant::from_u8(variant_byte[0]).ok_or_else(|| {
        StorageError::InvalidFormat(format!("unknown variant tag {}", variant_byte[0]))
    })?;

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let mut float_bytes = [0u8; 4];
        reader.read_exact(&mut float_bytes)?;
        embedding.push(f32::from_le_bytes(float_bytes));
    }

    Ok((item, variant, embedding))
}

fn le_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::embeddings::Embedder;
    use crate::semantic::hash::HashEmbedder;

    fn test_model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    fn sample_index() -> CatalogIndex {
        let items = vec![
            CatalogItem::new("a", "Leadership", "leadership assessment", "https://example.com/a")
                .with_metadata("duration", "30 minutes"),
            CatalogItem::new("b", "Coding", "coding test", "https://example.com/b"),
        ];
        let entries = vec![
            (0, EmbedVariant::Full, vec![1.0, 0.0, 0.0]),
            (1, EmbedVariant::Full, vec![0.0, 1.0, 0.0]),
            (1, EmbedVariant::Name, vec![0.0, 0.5, 0.5]),
        ];
        CatalogIndex::from_parts(3, items, entries).unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = IndexStorage::new(tmp.path().join("vectors.bin"));
        let model_id = test_model_id();

        storage.save(&sample_index(), &model_id).unwrap();
        assert!(storage.exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);

        let loaded = storage.load(&model_id, 3).unwrap();
        assert_eq!(loaded.item_count(), 2);
        assert_eq!(loaded.entry_count(), 3);
        assert_eq!(loaded.item("a").unwrap().meta("duration"), "30 minutes");
        assert_eq!(loaded.entries()[2].variant, EmbedVariant::Name);
        assert_eq!(loaded.entries()[1].embedding, vec![0.0, 1.0, 0.0]);

        let info = storage.info().unwrap();
        assert_eq!(info.version, FORMAT_VERSION);
        assert_eq!(info.item_count, 2);
        assert_eq!(info.entry_count, 3);
        assert!(info.built_at > 0);
    }

    #[test]
    fn test_save_and_load_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = IndexStorage::new(tmp.path().join("nested/dir/vectors.bin"));
        let model_id = test_model_id();

        storage.save(&CatalogIndex::empty(384), &model_id).unwrap();

        let loaded = storage.load(&model_id, 384).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimensions(), 384);
    }

    #[test]
    fn test_search_survives_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = IndexStorage::new(tmp.path().join("vectors.bin"));
        let embedder = HashEmbedder::default();

        let items = vec![
            CatalogItem::new("a", "Leadership", "leadership assessment", "https://example.com/a"),
            CatalogItem::new("b", "Coding", "coding test", "https://example.com/b"),
        ];
        let index = CatalogIndex::build(items, &embedder).unwrap();
        storage.save(&index, &embedder.model_id_hash()).unwrap();

        let loaded = storage
            .load(&embedder.model_id_hash(), embedder.dimensions())
            .unwrap();
        let query = embedder.embed("coding test").unwrap();
        assert_eq!(index.search(&query, 2).unwrap(), loaded.search(&query, 2).unwrap());
    }

    #[test]
    fn test_failed_save_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        std::fs::create_dir_all(path.join("sub")).unwrap();

        let storage = IndexStorage::new(path.clone());
        let result = storage.save(&sample_index(), &test_model_id());

        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(path.join("sub").is_dir());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_concurrent_saves() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = std::sync::Arc::new(IndexStorage::new(tmp.path().join("vectors.bin")));

        let handles = (0..4)
            .map(|_| {
                let storage = std::sync::Arc::clone(&storage);
                std::thread::spawn(move || storage.save(&sample_index(), &test_model_id()))
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let loaded = storage.load(&test_model_id(), 3).unwrap();
        assert_eq!(loaded.entry_count(), 3);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_model_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = IndexStorage::new(tmp.path().join("vectors.bin"));
        storage.save(&sample_index(), &test_model_id()).unwrap();

        let mut wrong_model_id = [0u8; 32];
        wrong_model_id[0] = 0xFF;

        let result = storage.load(&wrong_model_id, 3);
        assert!(matches!(result, Err(StorageError::ModelMismatch)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = IndexStorage::new(tmp.path().join("vectors.bin"));
        storage.save(&sample_index(), &test_model_id()).unwrap();

        let result = storage.load(&test_model_id(), 384);
        assert!(matches!(
            result,
            Err(StorageError::DimensionMismatch { expected: 384, got: 3 })
        ));
    }

    #[test]
    fn test_corrupted_header_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        let storage = IndexStorage::new(path.clone());
        storage.save(&sample_index(), &test_model_id()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[34] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            storage.load(&test_model_id(), 3),
            Err(StorageError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_newer_version_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        let storage = IndexStorage::new(path.clone());
        storage.save(&sample_index(), &test_model_id()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = FORMAT_VERSION + 1;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            storage.info(),
            Err(StorageError::VersionMismatch(v, FORMAT_VERSION)) if v == FORMAT_VERSION + 1
        ));
    }

    #[test]
    fn test_truncated_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        std::fs::write(&path, [1u8; 10]).unwrap();

        let storage = IndexStorage::new(path);
        assert!(matches!(storage.info(), Err(StorageError::InvalidFormat(_))));
    }

    #[test]
    fn test_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = IndexStorage::new(tmp.path().join("vectors.bin"));
        storage.save(&sample_index(), &test_model_id()).unwrap();

        storage.delete().unwrap();
        assert!(!storage.exists());
        storage.delete().unwrap();
    }
}
