//! Filesystem-safe name components.

use crate::io::hash::short_hash;

/// Token used when a sanitized value would otherwise be empty.
pub const FALLBACK_COMPONENT: &str = "unknown";

/// Default upper bound for a single sanitized name component.
pub const DEFAULT_MAX_COMPONENT_LEN: usize = 64;

const DIGEST_LEN: usize = 8;

const WINDOWS_RESERVED: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Turn an arbitrary identifier into a single path component that is valid on
/// both POSIX and Windows.
///
/// - Anything other than ASCII alphanumerics, `-`, `_` and `.` (path
///   separators included) becomes `_`, and runs of `_` collapse to one.
/// - Leading/trailing `.`, `_` are trimmed, so `.` and `..` cannot survive.
/// - Windows device names (`con`, `nul`, `com1`, ...) get a `_` suffix.
/// - An empty result becomes [`FALLBACK_COMPONENT`].
/// - Results longer than `max_len` are cut and suffixed with a short BLAKE3
///   digest of the original value, so long ids sharing a prefix stay distinct.
///
/// The mapping is deterministic: the same input always yields the same name.
pub fn sanitize_component(value: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            c
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut name = if trimmed.is_empty() {
        FALLBACK_COMPONENT.to_string()
    } else {
        trimmed.to_string()
    };

    let stem = name.split('.').next().unwrap_or_default().to_ascii_lowercase();
    if WINDOWS_RESERVED.contains(&stem.as_str()) {
        name.push('_');
    }

    let max_len = max_len.max(1);
    if name.len() <= max_len {
        return name;
    }

    // All characters are ASCII at this point, so byte slicing is safe.
    if max_len <= DIGEST_LEN + 1 {
        name.truncate(max_len);
        return name;
    }
    let keep = max_len - DIGEST_LEN - 1;
    let prefix = name[..keep].trim_end_matches('.');
    format!("{prefix}-{}", short_hash(value.as_bytes(), DIGEST_LEN))
}
