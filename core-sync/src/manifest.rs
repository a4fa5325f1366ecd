//! # Manifests
//!
//! A manifest is a sorted list of `(key, hash)` records describing a file set at
//! one point in time. Keys are slash-separated paths rooted at a logical
//! directory (`saves/game.srm`); hashes are lowercase hex MD5 digests. An empty
//! hash is a tombstone: the key was deleted since it was last seen.
//!
//! ## Wire format
//!
//! ```json
//! [
//!   {
//!     "path": "saves/game.srm",
//!     "hash": "5d41402abc4b2a76b9719d911017c592"
//!   },
//!   {
//!     "path": "states/game.state0"
//!   }
//! ]
//! ```
//!
//! Tombstones are written without a `hash` field; on read a missing, `null` or
//! empty hash all decode to a tombstone. Entries without a `path` are dropped.
//! Hashes are lowercased on read; anything other than 32 hex digits makes the
//! whole manifest malformed.
//! Decoded manifests are re-sorted and de-duplicated, so the writer's order does
//! not matter.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::warn;

/// Name of the manifest object on the remote, and of its cached copy on disk.
pub const SERVER_MANIFEST_NAME: &str = "manifest.server";

/// Name of the last-synced manifest on disk.
pub const LOCAL_MANIFEST_NAME: &str = "manifest.local";

// ============================================================================
// Keys
// ============================================================================

/// Ordering used for every manifest.
///
/// Keys compare ASCII case-insensitively so that listings from case-preserving
/// filesystems merge with the remote's view; raw bytes break ties to keep the
/// order total.
pub fn key_cmp(a: &str, b: &str) -> Ordering {
    let folded = a
        .bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()));
    folded.then_with(|| a.cmp(b))
}

/// Anything that can sit in a sorted manifest list.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Compare the heads of two cursors. An exhausted cursor sorts after everything.
pub fn cmp_heads<A: Keyed + ?Sized, B: Keyed + ?Sized>(a: Option<&A>, b: Option<&B>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => key_cmp(a.key(), b.key()),
    }
}

// ============================================================================
// Entries
// ============================================================================

/// One `(key, hash)` record. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestEntry {
    key: String,
    hash: String,
}

impl ManifestEntry {
    pub fn new(key: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            hash: hash.into(),
        }
    }

    /// A deletion record.
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self::new(key, String::new())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_tombstone(&self) -> bool {
        self.hash.is_empty()
    }
}

impl Keyed for ManifestEntry {
    fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Serialize, Deserialize)]
struct WireEntry {
    #[serde(default)]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

// ============================================================================
// Manifest
// ============================================================================

/// A sorted, key-unique list of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort `entries` by key and drop duplicates; the last occurrence of a key wins.
    pub fn from_entries(mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by(|a, b| key_cmp(&a.key, &b.key));

        let mut unique: Vec<ManifestEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            match unique.last_mut() {
                Some(last) if last.key == entry.key => *last = entry,
                _ => unique.push(entry),
            }
        }

        Self { entries: unique }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by(|e| key_cmp(&e.key, key))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Decode a JSON manifest.
    ///
    /// # Errors
    ///
    /// [`SyncError::Manifest`] if the bytes are not a JSON array of objects,
    /// or if a hash is not an MD5 hex digest.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: Vec<WireEntry> =
            serde_json::from_slice(bytes).map_err(|e| SyncError::Manifest(e.to_string()))?;

        let mut entries = Vec::with_capacity(wire.len());
        for w in wire {
            let Some(key) = w.path else { continue };
            let hash = normalize_hash(&key, w.hash.unwrap_or_default())?;
            entries.push(ManifestEntry::new(key, hash));
        }

        Ok(Self::from_entries(entries))
    }

    /// Decode, treating malformed content as an absent manifest.
    pub fn decode_or_empty(bytes: &[u8], source: &str) -> Self {
        match Self::decode(bytes) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(source, error = %e, "Ignoring malformed manifest");
                Self::new()
            }
        }
    }

    /// Encode as a pretty-printed JSON array in key order.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire: Vec<WireEntry> = self
            .entries
            .iter()
            .map(|e| WireEntry {
                path: Some(e.key.clone()),
                hash: (!e.hash.is_empty()).then(|| e.hash.clone()),
            })
            .collect();

        let mut out =
            serde_json::to_vec_pretty(&wire).map_err(|e| SyncError::Manifest(e.to_string()))?;
        out.push(b'\n');
        Ok(out)
    }
}

fn normalize_hash(key: &str, hash: String) -> Result<String> {
    if hash.is_empty() {
        return Ok(hash);
    }
    if hash.len() != 32 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SyncError::Manifest(format!(
            "bad hash {:?} for {}",
            hash, key
        )));
    }
    Ok(hash.to_ascii_lowercase())
}

// ============================================================================
// Builder
// ============================================================================

/// Append-only collector for the updated manifests produced by a diff.
///
/// Transfers complete out of order, so entries are only sorted (and
/// de-duplicated, last write wins) in [`ManifestBuilder::build`].
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    entries: Vec<ManifestEntry>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: &str, hash: &str) {
        self.entries.push(ManifestEntry::new(key, hash));
    }

    pub fn record_tombstone(&mut self, key: &str) {
        self.entries.push(ManifestEntry::tombstone(key));
    }

    /// Record `entry` if present; used to carry a prior state forward.
    pub fn carry(&mut self, entry: Option<&ManifestEntry>) {
        if let Some(entry) = entry {
            self.entries.push(entry.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> Manifest {
        Manifest::from_entries(self.entries)
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// Forward-only cursor over a sorted list.
#[derive(Debug)]
pub struct Cursor<T> {
    items: Vec<T>,
    pos: usize,
}

impl<T: Keyed> Cursor<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items, pos: 0 }
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.get(self.pos)
    }

    pub fn advance(&mut self) {
        if self.pos < self.items.len() {
            self.pos += 1;
        }
    }

    /// Number of items already passed.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.items.len()
    }
}

impl<T: Keyed> Default for Cursor<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl From<Manifest> for Cursor<ManifestEntry> {
    fn from(manifest: Manifest) -> Self {
        Self::new(manifest.into_entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_cmp_is_case_insensitive_with_tiebreak() {
        assert_eq!(key_cmp("saves/A.srm", "saves/a.srm"), Ordering::Less);
        assert_eq!(key_cmp("saves/a.srm", "saves/B.srm"), Ordering::Less);
        assert_eq!(key_cmp("config/x", "saves/a"), Ordering::Less);
        assert_eq!(key_cmp("saves/a", "saves/a"), Ordering::Equal);
    }

    #[test]
    fn test_cmp_heads_none_sorts_last() {
        let a = ManifestEntry::new("a", "1");
        assert_eq!(cmp_heads(Some(&a), None::<&ManifestEntry>), Ordering::Less);
        assert_eq!(cmp_heads(None::<&ManifestEntry>, Some(&a)), Ordering::Greater);
        assert_eq!(
            cmp_heads(None::<&ManifestEntry>, None::<&ManifestEntry>),
            Ordering::Equal
        );
    }

    #[test]
    fn test_decode_sorts_and_dedupes() {
        let json = br#"[
            {"path": "states/b.state", "hash": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"},
            {"path": "saves/a.srm", "hash": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"},
            {"path": "states/b.state", "hash": "cccccccccccccccccccccccccccccccc"}
        ]"#;
        let manifest = Manifest::decode(json).unwrap();
        let keys: Vec<_> = manifest.entries().iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec!["saves/a.srm", "states/b.state"]);
        assert_eq!(
            manifest.get("states/b.state").unwrap().hash(),
            "cccccccccccccccccccccccccccccccc"
        );
    }

    #[test]
    fn test_decode_lowercases_hashes() {
        let json = br#"[{"path": "saves/a.srm", "hash": "5D41402ABC4B2A76B9719D911017C592"}]"#;
        let manifest = Manifest::decode(json).unwrap();
        assert_eq!(
            manifest.get("saves/a.srm").unwrap().hash(),
            crate::hasher::hash_bytes(b"hello")
        );
    }

    #[test]
    fn test_decode_rejects_non_md5_hashes() {
        for hash in ["abc", "zz41402abc4b2a76b9719d911017c592", "5d41402abc4b2a76b9719d911017c5920"] {
            let json = format!(r#"[{{"path": "saves/a.srm", "hash": "{}"}}]"#, hash);
            assert!(
                matches!(Manifest::decode(json.as_bytes()), Err(SyncError::Manifest(_))),
                "{} accepted",
                hash
            );
        }
    }

    #[test]
    fn test_decode_tombstone_forms() {
        let json = br#"[
            {"path": "a"},
            {"path": "b", "hash": null},
            {"path": "c", "hash": ""},
            {"hash": "orphan"}
        ]"#;
        let manifest = Manifest::decode(json).unwrap();
        assert_eq!(manifest.len(), 3);
        assert!(manifest.entries().iter().all(|e| e.is_tombstone()));
    }

    #[test]
    fn test_round_trip_with_tombstone() {
        let manifest = Manifest::from_entries(vec![
            ManifestEntry::new("saves/a.srm", "5d41402abc4b2a76b9719d911017c592"),
            ManifestEntry::tombstone("states/gone.state"),
        ]);
        let encoded = manifest.encode().unwrap();
        let text = String::from_utf8(encoded.clone()).unwrap();
        assert!(text.contains("\"path\": \"states/gone.state\""));
        assert_eq!(text.matches("\"hash\"").count(), 1);
        assert_eq!(Manifest::decode(&encoded).unwrap(), manifest);
    }

    #[test]
    fn test_round_trip_empty() {
        let encoded = Manifest::new().encode().unwrap();
        assert_eq!(Manifest::decode(&encoded).unwrap(), Manifest::new());
    }

    #[test]
    fn test_malformed_is_error_and_or_empty() {
        assert!(matches!(
            Manifest::decode(b"{not json"),
            Err(SyncError::Manifest(_))
        ));
        assert!(Manifest::decode_or_empty(b"[{\"path\": 3}]", "test").is_empty());
    }

    fn entry_strategy() -> impl Strategy<Value = ManifestEntry> {
        (
            "(config|saves|states)/[A-Za-z0-9_.]{1,12}",
            prop_oneof![Just(String::new()), "[0-9a-f]{32}"],
        )
            .prop_map(|(key, hash)| ManifestEntry::new(key, hash))
    }

    proptest! {
        #[test]
        fn test_round_trip_any_manifest(
            entries in prop::collection::vec(entry_strategy(), 0..24)
        ) {
            let manifest = Manifest::from_entries(entries);
            let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, manifest);
        }
    }

    #[test]
    fn test_builder_last_write_wins() {
        let mut builder = ManifestBuilder::new();
        builder.record("saves/b", "1");
        builder.record("saves/a", "2");
        builder.record_tombstone("saves/b");
        builder.carry(None);
        builder.carry(Some(&ManifestEntry::new("config/x.cfg", "3")));

        let manifest = builder.build();
        let keys: Vec<_> = manifest.entries().iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec!["config/x.cfg", "saves/a", "saves/b"]);
        assert!(manifest.get("saves/b").unwrap().is_tombstone());
    }

    #[test]
    fn test_cursor() {
        let mut cursor: Cursor<ManifestEntry> =
            Manifest::from_entries(vec![ManifestEntry::new("b", "2"), ManifestEntry::new("a", "1")])
                .into();
        assert_eq!(cursor.len(), 2);
        assert_eq!(cursor.peek().unwrap().key(), "a");
        cursor.advance();
        assert_eq!(cursor.peek().unwrap().key(), "b");
        cursor.advance();
        cursor.advance();
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.position(), 2);
        assert!(cursor.peek().is_none());
    }
}
