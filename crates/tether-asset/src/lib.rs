// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Asset sources. A plain synchronous `open(name) -> bytes` interface; the
// bridge neither caches nor interprets what comes back.

pub mod font;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tether_core::error::{Result, TetherError};
use tracing::{debug, instrument};

/// Somewhere named byte resources can be read from.
pub trait AssetSource: Send + Sync {
    /// Read the whole asset. A missing asset is `AssetNotFound`.
    fn open(&self, name: &str) -> Result<Vec<u8>>;
}

/// Assets stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `name` under the root, or `None` if the name would escape it.
    fn locate(&self, name: &str) -> Option<PathBuf> {
        let rel = Path::new(name);
        let mut saw_normal = false;
        for component in rel.components() {
            match component {
                Component::Normal(_) => saw_normal = true,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        saw_normal.then(|| self.root.join(rel))
    }
}

impl AssetSource for DirAssets {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    fn open(&self, name: &str) -> Result<Vec<u8>> {
        let path = self
            .locate(name)
            .ok_or_else(|| TetherError::AssetNotFound(name.to_string()))?;
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!(len = bytes.len(), "asset read");
                Ok(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(TetherError::AssetNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Assets held in memory, e.g. bundled with the binary.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssets {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), bytes.into());
    }
}

impl AssetSource for MemoryAssets {
    fn open(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| TetherError::AssetNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_file_under_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("sub/hello.txt"), b"Hello, Assets.\n").expect("write");

        let assets = DirAssets::new(dir.path());
        assert_eq!(
            assets.open("sub/hello.txt").expect("open"),
            b"Hello, Assets.\n"
        );
        assert_eq!(
            assets.open("./sub/hello.txt").expect("open with curdir"),
            b"Hello, Assets.\n"
        );
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let assets = DirAssets::new(dir.path());
        assert!(matches!(
            assets.open("nope.txt"),
            Err(TetherError::AssetNotFound(name)) if name == "nope.txt"
        ));
    }

    #[test]
    fn names_escaping_root_are_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inner = dir.path().join("root");
        std::fs::create_dir(&inner).expect("mkdir");
        std::fs::write(dir.path().join("secret"), b"x").expect("write");

        let assets = DirAssets::new(&inner);
        for name in ["../secret", "/etc/passwd", "", "."] {
            assert!(
                matches!(assets.open(name), Err(TetherError::AssetNotFound(_))),
                "{name:?} should be refused"
            );
        }
    }

    #[test]
    fn memory_assets_serve_inserted_bytes() {
        let assets = MemoryAssets::new().with("hello.txt", "hi");
        assert_eq!(assets.open("hello.txt").expect("open"), b"hi");
        assert!(assets.open("other").is_err());
    }
}
