//! Remaining-set computation.
//!
//! Association is keyed by content hash, not by list position, so one
//! representative per hash is enough.

use bridge_traits::CloudSong;
use std::collections::HashSet;

/// Source songs whose hash is absent from `target_hashes`, in source order.
///
/// Duplicate hashes within `source` collapse to their first occurrence.
pub fn deduplicate<'a, I>(source: I, target_hashes: &HashSet<String>) -> Vec<&'a CloudSong>
where
    I: IntoIterator<Item = &'a CloudSong>,
{
    let mut seen: HashSet<&'a str> = HashSet::new();
    let mut remaining = Vec::new();

    for song in source {
        if target_hashes.contains(&song.content_hash) {
            continue;
        }
        if seen.insert(song.content_hash.as_str()) {
            remaining.push(song);
        }
    }

    remaining
}

/// Number of source entries whose hash the target already held before any
/// run touched it.
///
/// Entries for which `is_tracked` holds were put there (or attempted) by an
/// earlier run and are left out, so the count stays stable across runs.
pub fn count_in_target<F>(
    source: &[CloudSong],
    target_hashes: &HashSet<String>,
    is_tracked: F,
) -> usize
where
    F: Fn(&str) -> bool,
{
    source
        .iter()
        .filter(|song| target_hashes.contains(&song.content_hash))
        .filter(|song| !is_tracked(&song.content_hash))
        .count()
}
