//! Lenient version comparison for release tags.
//!
//! Tags in the wild are not always valid semver (`v1.2`, `2.0-beta`,
//! `release`), so instead of rejecting them we normalize every input to a
//! `major.minor.patch` triple and compare that.

/// Returns `true` if `candidate` is strictly newer than `current`.
///
/// Malformed components degrade to `0`; this never fails.
pub fn is_newer(current: &str, candidate: &str) -> bool {
    normalize(candidate) > normalize(current)
}

/// Normalize a tag such as `" v1.4-rc1 "` into `1.4.0`.
///
/// An optional `v`/`V` prefix and surrounding whitespace are stripped, the
/// first three dot-separated components are kept (missing ones become `0`),
/// and each component is read from its leading run of digits.
pub fn normalize(version: &str) -> semver::Version {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);

    let mut parts = trimmed.split('.').map(leading_number);
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);

    semver::Version::new(major, minor, patch)
}

fn leading_number(component: &str) -> u64 {
    let end = component
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(component.len());
    component[..end].parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_bump_is_newer() {
        assert!(is_newer("1.2.3", "1.2.4"));
    }

    #[test]
    fn test_older_major_is_not_newer() {
        assert!(!is_newer("2.0.0", "1.9.9"));
    }

    #[test]
    fn test_prefix_and_padding() {
        assert!(is_newer("v1.0", "1.0.1"));
        assert!(is_newer("V1", "v1.0.1"));
    }

    #[test]
    fn test_equal_is_not_newer() {
        assert!(!is_newer("1.0.0", "1.0.0"));
        assert!(!is_newer("v1.0", "1.0.0"));
        assert!(!is_newer(" 1.0.0 ", "v1.0.0"));
    }

    #[test]
    fn test_malformed_degrades_to_zero() {
        assert!(!is_newer("1.0.0", "abc"));
        assert!(is_newer("abc", "0.0.1"));
        assert!(!is_newer("", ""));
    }

    #[test]
    fn test_leading_digits_only() {
        assert_eq!(normalize("1.4-rc1.7beta"), semver::Version::new(1, 4, 7));
        assert_eq!(normalize("2.x.3"), semver::Version::new(2, 0, 3));
    }

    #[test]
    fn test_extra_components_ignored() {
        assert_eq!(normalize("1.2.3.4"), semver::Version::new(1, 2, 3));
        assert!(!is_newer("1.2.3", "1.2.3.9"));
    }

    #[test]
    fn test_minor_outranks_patch() {
        assert!(is_newer("1.1.9", "1.2.0"));
        assert!(!is_newer("1.2.0", "1.1.99"));
    }
}
