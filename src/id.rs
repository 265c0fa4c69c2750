//! ID generation, the short↔permanent mapping, and reconciliation
//! (`spec.md` §3 "ID mapping", §4.3).

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::issue::{IssueId, ShortId};

const CROCKFORD_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Generate a fresh permanent id: a 48-bit millisecond timestamp followed
/// by 80 bits of randomness, Crockford base32 encoded and prefixed `is-`
/// (a ULID payload, per `spec.md` §4.3).
#[must_use]
pub fn generate_issue_id() -> IssueId {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    let mut random = [0_u8; 10];
    rand::rng().fill_bytes(&mut random);
    generate_issue_id_from(millis, random)
}

fn generate_issue_id_from(millis: u64, random: [u8; 10]) -> IssueId {
    let mut bits: Vec<u8> = Vec::with_capacity(16);
    bits.extend_from_slice(&millis.to_be_bytes()[2..]); // low 48 bits
    bits.extend_from_slice(&random);
    let payload = encode_crockford(&bits);
    IssueId::new(format!("is-{payload}")).expect("generated id is always well-formed")
}

fn encode_crockford(bytes: &[u8]) -> String {
    // 128 bits -> 26 base32 characters (5 bits each, last char uses 3 bits).
    let mut acc: u128 = 0;
    for b in bytes {
        acc = (acc << 8) | u128::from(*b);
    }
    // bytes.len() == 16 -> 128 bits; pad to a multiple of 5 bits (130) by
    // shifting left 2, matching the canonical ULID encoding.
    acc <<= 2;
    let mut out = vec![0_u8; 26];
    for i in (0..26).rev() {
        let idx = (acc & 0b1_1111) as usize;
        out[i] = CROCKFORD_ALPHABET[idx];
        acc >>= 5;
    }
    String::from_utf8(out).expect("crockford alphabet is ASCII")
}

/// Short-id alphabet: lowercase alphanumeric, avoiding no characters (the
/// collision space is tiny and human-facing tokens read fine without
/// Crockford's disambiguation).
const SHORT_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Allocate a fresh short id from `seed`, lengthening until a token not
/// already present in `taken` is found. `seed` is typically a monotonic
/// counter so repeated calls within one mapping produce a stable sequence
/// (`a`, `b`, ..., `aa`, ...), falling back to a `terseid`-style
/// deterministic short-hash generator once fixed-length tokens are
/// exhausted.
#[must_use]
pub fn allocate_short_id(seed: u64, taken: &impl Fn(&str) -> bool) -> ShortId {
    let mut length = 1_usize;
    loop {
        let candidate = encode_base_n(seed, length);
        if !taken(&candidate) {
            return ShortId::new(candidate);
        }
        // Exhausted this length for this seed's encoding; widen. This is
        // reachable once a clone has allocated `alphabet.len()^length`
        // short ids, which for length 1 is 36 — realistic for a mapping
        // of any size, so the loop is expected to step through a few
        // lengths during normal operation, not just in pathological cases.
        length += 1;
        if length > 8 {
            // Fall back to the hash-based terseid allocator, which never
            // loops: hash the seed plus a growing salt until free.
            let mut salt = 0_u64;
            loop {
                let candidate = terseid::hash(format!("{seed}:{salt}").as_bytes(), 6);
                if !taken(&candidate) {
                    return ShortId::new(candidate);
                }
                salt += 1;
            }
        }
    }
}

fn encode_base_n(mut value: u64, length: usize) -> String {
    let base = SHORT_ID_ALPHABET.len() as u64;
    let mut chars = vec![0_u8; length];
    for slot in chars.iter_mut().rev() {
        *slot = SHORT_ID_ALPHABET[(value % base) as usize];
        value /= base;
    }
    String::from_utf8(chars).expect("alphabet is ASCII")
}

// ---------------------------------------------------------------------------
// IdMapping
// ---------------------------------------------------------------------------

/// The short↔permanent bijection for one clone, plus a generation
/// counter used to allocate new short ids deterministically.
///
/// Serialized as `<tbd>/data-sync/mappings/ids.yml` — two parallel views
/// kept in sync so both directions resolve without a linear scan.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IdMapping {
    /// short → permanent.
    #[serde(default)]
    short_to_id: BTreeMap<String, IssueId>,
    /// permanent → short.
    #[serde(default)]
    id_to_short: BTreeMap<IssueId, String>,
    /// Monotonic counter feeding [`allocate_short_id`]'s `seed`.
    #[serde(default)]
    pub generation: u64,
}

impl IdMapping {
    /// Parse from YAML text; permissive (unknown top-level keys in the
    /// file are rejected by `serde`'s default struct handling only if the
    /// struct uses `deny_unknown_fields`, which this one deliberately
    /// does not — `spec.md` §6 calls for "permissive" mapping parsing).
    pub fn parse(text: &str) -> crate::Result<Self> {
        serde_yaml::from_str(text).map_err(|e| crate::Error::Validation { field: "ids.yml".into(), reason: e.to_string() })
    }

    /// Serialize with stable ordering (the `BTreeMap`s already iterate in
    /// sorted key order).
    pub fn to_yaml(&self) -> crate::Result<String> {
        serde_yaml::to_string(self).map_err(|e| crate::Error::Validation { field: "ids.yml".into(), reason: e.to_string() })
    }

    /// Look up the permanent id bound to `short`.
    #[must_use]
    pub fn permanent_for(&self, short: &str) -> Option<&IssueId> {
        self.short_to_id.get(short)
    }

    /// Look up the short id bound to `id`.
    #[must_use]
    pub fn short_for(&self, id: &IssueId) -> Option<ShortId> {
        self.id_to_short.get(id).map(|s| ShortId::new(s.clone()))
    }

    /// Bind `short` to `id`, overwriting any prior binding for `short`
    /// (callers are expected to have already checked for collisions via
    /// [`Self::permanent_for`] where that matters).
    pub fn bind(&mut self, short: ShortId, id: IssueId) {
        self.id_to_short.insert(id.clone(), short.as_str().to_owned());
        self.short_to_id.insert(short.as_str().to_owned(), id);
    }

    /// Allocate and bind a fresh short id for `id`, returning it.
    pub fn allocate_for(&mut self, id: IssueId) -> ShortId {
        self.generation += 1;
        let seed = self.generation;
        let taken = |candidate: &str| self.short_to_id.contains_key(candidate);
        let short = allocate_short_id(seed, &taken);
        self.bind(short.clone(), id);
        short
    }

    /// Resolve `input` (a bare short id, a `<prefix>-<short>` display id,
    /// or a permanent id) to a permanent id.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotFound`] if none of the three
    /// interpretations resolve.
    pub fn resolve(&self, input: &str, prefix: &str) -> crate::Result<IssueId> {
        if let Ok(id) = IssueId::new(input) {
            return Ok(id);
        }
        if let Some(id) = self.permanent_for(input) {
            return Ok(id.clone());
        }
        if let Some(short) = input.strip_prefix(&format!("{prefix}-")) {
            if let Some(id) = self.permanent_for(short) {
                return Ok(id.clone());
            }
        }
        Err(crate::Error::NotFound { what: "issue".into(), id: input.to_owned() })
    }

    /// Every permanent id currently bound in this mapping.
    pub fn permanent_ids(&self) -> impl Iterator<Item = &IssueId> {
        self.id_to_short.keys()
    }

    /// Merge `other` into `self` (`self` plays the role of "local";
    /// `other` is "remote"), per `spec.md` §4.3's merge rule:
    ///
    /// - The union of entries is retained.
    /// - For every short id bound to different permanent ids on each
    ///   side, `self`'s binding wins and `other`'s side is reassigned a
    ///   fresh short id.
    /// - No entry is ever deleted.
    ///
    /// Returns the short ids that were reassigned, for logging/tests.
    pub fn merge_from(&mut self, other: &Self) -> Vec<ShortId> {
        let mut reassigned = Vec::new();
        for (short, remote_id) in &other.short_to_id {
            match self.short_to_id.get(short) {
                None => {
                    self.bind(ShortId::new(short.clone()), remote_id.clone());
                }
                Some(local_id) if local_id == remote_id => {
                    // Same binding on both sides; nothing to do.
                }
                Some(_local_id) => {
                    let new_short = self.allocate_for(remote_id.clone());
                    reassigned.push(new_short);
                }
            }
        }
        reassigned
    }

    /// For every `id` in `issue_ids` that has no mapping entry, bind it —
    /// recovering the short id from `historical` (the remote's mapping)
    /// when present there, otherwise allocating a fresh one. Implements
    /// reconciliation (`spec.md` §4.3), run every successful sync.
    ///
    /// Returns the number of entries recovered or newly allocated.
    pub fn reconcile<'a>(&mut self, issue_ids: impl Iterator<Item = &'a IssueId>, historical: Option<&Self>) -> usize {
        let mut count = 0;
        for id in issue_ids {
            if self.id_to_short.contains_key(id) {
                continue;
            }
            let recovered = historical.and_then(|h| h.short_for(id)).map(|s| s.as_str().to_owned());
            match recovered {
                Some(short) if !self.short_to_id.contains_key(&short) => {
                    self.bind(ShortId::new(short), id.clone());
                }
                _ => {
                    self.allocate_for(id.clone());
                }
            }
            count += 1;
        }
        count
    }
}
