//! Deterministic file ordering for multi-file fingerprints.
//!
//! Files compare by full path using ordinal (byte-wise) string order,
//! except that a name whose extension-stripped form extends another's
//! extension-stripped form sorts after it. This keeps `game.zip`,
//! `game.part01.zip` and `game.part02.zip` adjacent and in that order,
//! where plain ordinal order would put `game.part01.zip` first.
//!
//! Because the stripped form is always a prefix of the full path, the rule
//! is equivalent to ordering by `(stripped, full)` lexicographically, which
//! is a total order. Two entries are equal only when their full paths are.
//!
//! Only the prefix relation is honored. A stripped name that contains
//! another stripped name elsewhere (`agame.bin` against `game.zip`) gets no
//! special treatment and falls back to ordinal order, since a containment
//! rule is not transitive and cannot back a sort.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Compare two file paths for fingerprint ordering.
#[must_use]
pub fn compare_paths(a: &Path, b: &Path) -> Ordering {
    let (a_full, a_stem) = sort_key(a);
    let (b_full, b_stem) = sort_key(b);

    a_stem
        .as_bytes()
        .cmp(b_stem.as_bytes())
        .then_with(|| a_full.as_bytes().cmp(b_full.as_bytes()))
}

/// Sort paths in place into fingerprint order and drop duplicates.
pub fn sort_paths(paths: &mut Vec<PathBuf>) {
    paths.sort_by(|a, b| compare_paths(a, b));
    paths.dedup();
}

fn sort_key(path: &Path) -> (Cow<'_, str>, String) {
    let stripped = path.with_extension("").to_string_lossy().into_owned();
    (path.to_string_lossy(), stripped)
}
