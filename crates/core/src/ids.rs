//! Monotonic, time-sortable identifiers.
//!
//! Every entity needs a monotonic, time-sortable 26-character identifier.
//! The `ulid` crate gives us that directly (Crockford base32,
//! millisecond-prefix monotonic within a process). For the few places that
//! want a *deterministic* id derived from structured input (the audit
//! trail keys in Rollback/Consolidation), we hash the canonical input with
//! `blake3` and re-encode through the same Crockford alphabet so both id
//! flavors are indistinguishable 26-char strings.

use std::sync::Mutex;
use ulid::Ulid;

static MONOTONIC: Mutex<Option<ulid::Generator>> = Mutex::new(None);

/// Mint a new monotonic, time-sortable 26-character id.
pub fn new_id() -> String {
    let mut guard = MONOTONIC.lock().expect("id generator lock poisoned");
    let generator = guard.get_or_insert_with(ulid::Generator::new);
    // A clock that ran backwards or a generator exhausted within the same
    // millisecond falls back to a fresh non-monotonic ulid rather than
    // failing id generation.
    let ulid = generator.generate().unwrap_or_else(|_| Ulid::new());
    ulid.to_string()
}

/// Derive a deterministic 26-character id from arbitrary canonical input.
///
/// Same input always produces the same id, which is what the audit trail
/// needs to make inserts idempotent. Not time-sortable.
pub fn deterministic_id(input: &str) -> String {
    let hash = blake3::hash(input.as_bytes());
    let bytes = hash.as_bytes();
    let mut u128_bytes = [0u8; 16];
    u128_bytes.copy_from_slice(&bytes[..16]);
    Ulid::from_bytes(u128_bytes).to_string()
}
