// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// System font lookup: Noto first, Droid as the fallback for older systems.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tether_core::error::{Result, TetherError};
use tracing::debug;

/// Where distribution packages install TrueType fonts.
pub const SYSTEM_FONT_ROOT: &str = "/usr/share/fonts/truetype";

const NOTO_SANS: &str = "noto/NotoSans-Regular.ttf";
const DROID_SANS: &str = "droid/DroidSans.ttf";
const NOTO_MONO: &str = "noto/NotoMono-Regular.ttf";
const DROID_MONO: &str = "droid/DroidSansMono.ttf";

/// Font lookup rooted at a directory laid out like `SYSTEM_FONT_ROOT`.
#[derive(Debug, Clone)]
pub struct FontSearch {
    root: PathBuf,
}

impl Default for FontSearch {
    fn default() -> Self {
        Self::new(SYSTEM_FONT_ROOT)
    }
}

impl FontSearch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Proportional sans-serif font bytes.
    pub fn default_font(&self) -> Result<Vec<u8>> {
        self.first_of(NOTO_SANS, DROID_SANS)
    }

    /// Monospace font bytes.
    pub fn monospace_font(&self) -> Result<Vec<u8>> {
        self.first_of(NOTO_MONO, DROID_MONO)
    }

    /// Read `preferred`, falling back to `fallback`. When neither can be
    /// read the error is the one for `preferred`.
    fn first_of(&self, preferred: &str, fallback: &str) -> Result<Vec<u8>> {
        let preferred_path = self.root.join(preferred);
        match std::fs::read(&preferred_path) {
            Ok(bytes) => Ok(bytes),
            Err(preferred_err) => {
                let fallback_path = self.root.join(fallback);
                if let Ok(bytes) = std::fs::read(&fallback_path) {
                    debug!(font = %fallback_path.display(), "using fallback font");
                    return Ok(bytes);
                }
                Err(font_error(&preferred_path, preferred_err))
            }
        }
    }
}

fn font_error(path: &Path, err: std::io::Error) -> TetherError {
    if err.kind() == ErrorKind::NotFound {
        TetherError::AssetNotFound(path.display().to_string())
    } else {
        TetherError::Io(err)
    }
}

/// Default font from the system font directory.
pub fn default_font() -> Result<Vec<u8>> {
    FontSearch::default().default_font()
}

/// Monospace font from the system font directory.
pub fn monospace_font() -> Result<Vec<u8>> {
    FontSearch::default().monospace_font()
}
