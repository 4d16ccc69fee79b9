//! Loose dotted-version comparison.
//!
//! Selector comparisons and host-version matching treat `3`, `3.10` and
//! `3.10.2` as versions by padding missing components with `0` and handing
//! the result to [`semver`]. Anything else is compared as plain text.
//!
//! ```
//! use ctl_deps::version::{compare_loose, parse_loose};
//! use std::cmp::Ordering;
//!
//! assert_eq!(parse_loose("3.10").unwrap(), semver::Version::new(3, 10, 0));
//! assert_eq!(compare_loose("3.9", "3.10"), Some(Ordering::Less));
//! assert_eq!(compare_loose("linux", "3.10"), None);
//! ```

use std::cmp::Ordering;

/// Parse `s` as a loose dotted version.
///
/// Returns `None` for text that is not a version.
pub fn parse_loose(s: &str) -> Option<semver::Version> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() <= 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    {
        let mut nums = [0u64; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part.parse().ok()?;
        }
        return Some(semver::Version::new(nums[0], nums[1], nums[2]));
    }

    // Full semver with pre-release or build metadata
    semver::Version::parse(s).ok()
}

/// Compare two strings as loose versions.
///
/// Returns `None` unless both sides parse.
pub fn compare_loose(a: &str, b: &str) -> Option<Ordering> {
    Some(parse_loose(a)?.cmp(&parse_loose(b)?))
}

/// Whether two strings denote the same value, version-aware.
pub fn loose_eq(a: &str, b: &str) -> bool {
    match compare_loose(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}
