//! Pseudonymous identity derivation.
//!
//! Two hashes are deliberately different. The user fingerprint uses
//! SipHash-2-4 keyed with the 16-byte daily salt, so the identifier cannot
//! be reproduced by offline enumeration without the key. The session
//! identifier only buckets an already-blinded `user_id` by hour, so the
//! unkeyed (and much cheaper) FNV-1a is sufficient there.

use std::hash::Hasher;

use chrono::{DateTime, Utc};
use fnv::FnvHasher;
use siphasher::sip::SipHasher24;

/// Derives the 64-bit pseudonymous user identifier.
///
/// The raw client IP and user agent are inputs only; they never leave this
/// call. `host_domain` is the request URL's hostname with any leading
/// `www.` stripped, keeping the identifier distinct per website even when
/// the repository is the same.
pub fn derive_user_id(
    salt: &[u8; 16],
    client_ip: &str,
    user_agent: &str,
    repo_id: &str,
    host_domain: &str,
) -> u64 {
    let message = format!("{client_ip}|{user_agent}|{repo_id}|{host_domain}");

    // The salt is the SipHash key, not part of the message.
    let mut hasher = SipHasher24::new_with_key(salt);
    hasher.write(message.as_bytes());
    hasher.finish()
}

/// Derives the session identifier: a deterministic hourly bin per user.
///
/// The bin string is `YYYY-MM-DD|HH|<lowercase hex user_id>` in UTC.
pub fn derive_session_id(user_id: u64, t: DateTime<Utc>) -> u64 {
    let bin = format!("{}|{}|{:x}", t.format("%Y-%m-%d"), t.format("%H"), user_id);

    let mut hasher = FnvHasher::default();
    hasher.write(bin.as_bytes());
    hasher.finish()
}

/// Strips a single leading `www.` from a hostname.
pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}
