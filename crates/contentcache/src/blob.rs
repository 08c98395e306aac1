//! Blob Store (§4.4): content-addressed, compressed byte storage with
//! two-level directory fan-out under `cache_dir/blobs`.

use crate::error::{CacheError, Result};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub struct BlobStore {
    root: PathBuf,
    compression_level: u32,
}

impl BlobStore {
    pub fn new(cache_dir: &Path, compression_level: u32) -> Self {
        Self {
            root: cache_dir.join("blobs"),
            compression_level,
        }
    }

    /// `${hash[0:2]}/${hash[2:4]}/${hash}.z` under `blobs/`.
    fn blob_path(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[0..2]).join(&hash[2..4]).join(format!("{hash}.z"))
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.blob_path(hash).exists()
    }

    /// Compress `content` and write it under `hash`, via write-to-temp then
    /// rename so readers never observe a partial file.
    pub fn put(&self, hash: &str, content: &str) -> Result<()> {
        let path = self.blob_path(hash);
        let dir = path.parent().expect("blob path always has a parent");
        std::fs::create_dir_all(dir)?;

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(self.compression_level));
        encoder.write_all(content.as_bytes())?;
        let compressed = encoder.finish()?;

        let temp_name = format!(".{hash}.tmp.{}.{}", std::process::id(), uuid::Uuid::new_v4());
        let temp_path = dir.join(temp_name);
        std::fs::write(&temp_path, &compressed)?;
        std::fs::rename(&temp_path, &path).inspect_err(|_| {
            let _ = std::fs::remove_file(&temp_path);
        })?;

        Ok(())
    }

    /// Read and decompress the blob for `hash`. `hash` addresses the blob by
    /// the source file's content hash (spec: "by reference to a blob
    /// addressed by `content_hash`"), not a hash of the stored bytes
    /// themselves — extracted content generally differs from file bytes, so
    /// there is no self-hash to verify here. Decompression failure alone
    /// (truncated or non-deflate bytes) surfaces as an `IntegrityFault`.
    pub fn get(&self, hash: &str) -> Result<Option<String>> {
        let path = self.blob_path(hash);
        if !path.exists() {
            return Ok(None);
        }

        let compressed = std::fs::read(&path)?;
        let mut decoder = DeflateDecoder::new(compressed.as_slice());
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .map_err(|e| CacheError::integrity_fault_with_source(format!("corrupt blob for {hash}"), e))?;

        Ok(Some(out))
    }

    /// Remove the blob for `hash`, if present. Used by garbage collection.
    pub fn remove(&self, hash: &str) -> Result<()> {
        let path = self.blob_path(hash);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Walk the fan-out layout and return every hash currently stored.
    /// Used by sweep to find blobs no metadata entry references anymore.
    pub fn list_all_hashes(&self) -> Result<Vec<String>> {
        let mut hashes = Vec::new();
        if !self.root.exists() {
            return Ok(hashes);
        }
        for l1 in std::fs::read_dir(&self.root)? {
            let l1 = l1?.path();
            if !l1.is_dir() {
                continue;
            }
            for l2 in std::fs::read_dir(&l1)? {
                let l2 = l2?.path();
                if !l2.is_dir() {
                    continue;
                }
                for file in std::fs::read_dir(&l2)? {
                    let file = file?.path();
                    if let Some(name) = file.file_stem().and_then(|s| s.to_str()) {
                        hashes.push(name.to_string());
                    }
                }
            }
        }
        Ok(hashes)
    }
}
