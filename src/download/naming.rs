//! Local file names for downloads: sanitized, never overwriting

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Give up on `name(n).ext` after this many attempts
const MAX_SUFFIX: u32 = 10_000;

const DEFAULT_NAME: &str = "download";

/// Make a remote display name safe to use as a single path component
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        DEFAULT_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// `report.pdf` -> `report(2).pdf`; dotfiles and extensionless names get the suffix at the end
fn numbered(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}({}){}", &name[..dot], n, &name[dot..]),
        _ => format!("{}({})", name, n),
    }
}

/// Destinations handed out to running downloads but not yet on disk
#[derive(Debug, Clone, Default)]
pub(crate) struct Reservations {
    taken: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Reservations {
    /// Pick `dir/name`, or the first free `dir/name(n).ext`, and hold it until released
    pub(crate) fn reserve(&self, dir: &Path, name: &str) -> PathBuf {
        let name = sanitize_file_name(name);
        let mut taken = self
            .taken
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let is_free = |path: &Path, taken: &HashSet<PathBuf>| !path.exists() && !taken.contains(path);

        let mut chosen = dir.join(&name);
        if !is_free(chosen.as_path(), &*taken) {
            chosen = (1..=MAX_SUFFIX)
                .map(|n| dir.join(numbered(&name, n)))
                .find(|path| is_free(path.as_path(), &*taken))
                .unwrap_or_else(|| dir.join(numbered(&name, MAX_SUFFIX + 1)));
        }
        taken.insert(chosen.clone());
        chosen
    }

    pub(crate) fn release(&self, path: &Path) {
        self.taken
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(path);
    }
}
