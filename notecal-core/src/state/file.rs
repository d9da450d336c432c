//! Directory-backed store: one file per key.
//!
//! Keys are escaped into filenames (anything outside `[A-Za-z0-9_-]` becomes
//! `%XX`), so escaped names never contain a `.` and in-flight `.tmp` files can
//! be told apart from entries.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};
use crate::state::KeyValueStore;

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    temp_counter: AtomicU64,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> SyncResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(FileStore {
            dir,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(encode_key(key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_error("read", key, e)),
        }
    }

    async fn put(&self, key: &str, value: &str) -> SyncResult<()> {
        let path = self.path_for(key);
        let seq = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp = self.dir.join(format!(
            "{}.{}-{}{}",
            encode_key(key),
            std::process::id(),
            seq,
            TEMP_SUFFIX
        ));

        // Write-then-rename so readers never see a half-written value
        tokio::fs::write(&temp, value)
            .await
            .map_err(|e| store_error("write", key, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(store_error("rename", key, e));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_error("delete", key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| store_error("list", prefix, e))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| store_error("list", prefix, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.contains('.') {
                continue;
            }
            match decode_key(name) {
                Some(key) if key.starts_with(prefix) => keys.push(key),
                _ => {}
            }
        }

        keys.sort();
        Ok(keys)
    }
}

fn store_error(op: &str, key: &str, err: std::io::Error) -> SyncError {
    SyncError::Store(format!("{} '{}': {}", op, key, err))
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
