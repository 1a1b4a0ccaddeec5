//! Blob sources: where parameter values come from
//!
//! A blob is a headerless run of `f32` values in native byte order whose
//! length must equal exactly `4 * element_count` bytes.

use crate::error::{FlameError, FlameResult};
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const F32_BYTES: u64 = std::mem::size_of::<f32>() as u64;

/// Fills named parameter buffers of known length
pub trait BlobSource {
    /// Fill `dst` completely from blob `name`, or fail
    fn fill(&mut self, name: &str, dst: &mut [f32]) -> FlameResult<()>;
}

impl<F> BlobSource for F
where
    F: FnMut(&str, &mut [f32]) -> FlameResult<()>,
{
    fn fill(&mut self, name: &str, dst: &mut [f32]) -> FlameResult<()> {
        self(name, dst)
    }
}

/// Flat directory with one file per blob, named after the blob
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write `data` as blob `name`, creating the directory if needed
    pub fn write(&self, name: &str, data: &[f32]) -> FlameResult<()> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.blob_path(name), bytemuck::cast_slice::<f32, u8>(data))?;
        Ok(())
    }
}

impl BlobSource for DirectoryStore {
    fn fill(&mut self, name: &str, dst: &mut [f32]) -> FlameResult<()> {
        let path = self.blob_path(name);
        let bytes = fs::read(&path).map_err(|e| FlameError::load(name, format!("{}: {e}", path.display())))?;

        let expected = dst.len() as u64 * F32_BYTES;
        if bytes.len() as u64 != expected {
            return Err(FlameError::BlobSize {
                blob: name.to_string(),
                expected,
                actual: bytes.len() as u64,
            });
        }
        bytemuck::cast_slice_mut::<f32, u8>(dst).copy_from_slice(&bytes);
        debug!("read {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }
}

/// In-memory blob map, for tests and embedded parameter sets
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blobs: HashMap<String, Vec<f32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: Vec<f32>) {
        self.blobs.insert(name.into(), data);
    }

    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.blobs.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobSource for MemoryStore {
    fn fill(&mut self, name: &str, dst: &mut [f32]) -> FlameResult<()> {
        let src = self
            .blobs
            .get(name)
            .ok_or_else(|| FlameError::load(name, "no such blob"))?;
        if src.len() != dst.len() {
            return Err(FlameError::BlobSize {
                blob: name.to_string(),
                expected: dst.len() as u64 * F32_BYTES,
                actual: src.len() as u64 * F32_BYTES,
            });
        }
        dst.copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("blobs");
        let store = DirectoryStore::new(&dir);
        store.write("c1b", &[1.0, -2.5, 3.25]).unwrap();

        let mut dst = [0.0f32; 3];
        DirectoryStore::new(&dir).fill("c1b", &mut dst).unwrap();
        assert_eq!(dst, [1.0, -2.5, 3.25]);
    }

    #[test]
    fn test_directory_store_rejects_truncated_blob() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        // 10 bytes: not even a whole number of floats
        fs::write(dir.join("fcb"), [0u8; 10]).unwrap();

        let mut dst = [7.0f32; 3];
        let err = DirectoryStore::new(&dir).fill("fcb", &mut dst).unwrap_err();
        match err {
            FlameError::BlobSize { blob, expected, actual } => {
                assert_eq!(blob, "fcb");
                assert_eq!(expected, 12);
                assert_eq!(actual, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        // nothing written on failure
        assert_eq!(dst, [7.0; 3]);
    }

    #[test]
    fn test_missing_blob_is_a_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(tmp.path().join("missing"));
        let err = store.fill("c5w", &mut [0.0; 4]).unwrap_err();
        assert!(err.is_load());
        assert!(err.to_string().contains("c5w"));

        let err = MemoryStore::new().fill("c5w", &mut [0.0; 4]).unwrap_err();
        assert!(err.is_load());
    }

    #[test]
    fn test_closure_source() {
        let mut calls = Vec::new();
        let mut source = |name: &str, dst: &mut [f32]| -> FlameResult<()> {
            calls.push(name.to_string());
            dst.fill(0.5);
            Ok(())
        };
        let mut dst = [0.0; 2];
        source.fill("c1w", &mut dst).unwrap();
        assert_eq!(dst, [0.5, 0.5]);
        drop(source);
        assert_eq!(calls, ["c1w"]);
    }
}
