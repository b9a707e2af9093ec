//! Version string codec.
//!
//! A version string has the shape `v<maj>.<min>[~<pre>][-<tag>]`. It maps to
//! a totally-ordered 32-bit integer `maj*10^6 + min*10^3 + pre`, with `pre`
//! defaulting to 999 when absent so that a release strictly outranks any
//! pre-release of the same `maj.min`. A `-<tag>` suffix is ignored entirely.
//! Empty, missing, or non-`v`-prefixed input maps to 0. There is no failure
//! mode for malformed numeric components; callers that produce garbage here
//! have a programming error upstream, so we map it to 0 rather than thread
//! a `Result` through a pure total-order comparison.

const RELEASE_PRE: u32 = 999;

/// Parse a version string into its totally-ordered numeric code.
///
/// ```
/// assert_eq!(pkgsuper_core::version::to_number(Some("v1.2")), pkgsuper_core::version::to_number(Some("v1.2-large-33")));
/// assert!(pkgsuper_core::version::to_number(Some("v1.2")) > pkgsuper_core::version::to_number(Some("v1.2~3")));
/// ```
pub fn to_number(version: Option<&str>) -> u32 {
    let Some(version) = version else {
        return 0;
    };
    if version.is_empty() {
        return 0;
    }
    let Some(rest) = version.strip_prefix('v') else {
        return 0;
    };
    // Drop the `-<tag>` suffix; it plays no role in ordering.
    let rest = rest.split('-').next().unwrap_or(rest);

    let (numeric, pre) = match rest.split_once('~') {
        Some((numeric, pre)) => (numeric, parse_component(pre)),
        None => (rest, RELEASE_PRE),
    };

    let mut parts = numeric.splitn(2, '.');
    let maj = parts.next().map(parse_component).unwrap_or(0);
    let min = parts.next().map(parse_component).unwrap_or(0);

    maj * 1_000_000 + min * 1_000 + pre
}

fn parse_component(s: &str) -> u32 {
    s.parse().unwrap_or(0)
}

/// Strict ordering between two optional version strings, as integers.
pub fn compare(a: Option<&str>, b: Option<&str>) -> std::cmp::Ordering {
    to_number(a).cmp(&to_number(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_missing_map_to_zero() {
        assert_eq!(to_number(None), 0);
        assert_eq!(to_number(Some("")), 0);
        assert_eq!(to_number(Some("1.2")), 0);
        assert_eq!(to_number(Some("garbage")), 0);
    }

    #[test]
    fn release_beats_prerelease_of_same_majmin() {
        let release = to_number(Some("v1.2"));
        let pre = to_number(Some("v1.2~3"));
        assert!(release > pre);
    }

    #[test]
    fn tag_suffix_is_ignored() {
        assert_eq!(to_number(Some("v1.2")), to_number(Some("v1.2-large-33")));
        assert_eq!(
            to_number(Some("v1.2~3-beta")),
            to_number(Some("v1.2~3-alpha"))
        );
    }

    #[test]
    fn monotone_in_major_then_minor_then_pre() {
        let ordered = ["v0.1", "v0.2~1", "v0.2~2", "v0.2", "v1.0", "v1.1"];
        for pair in ordered.windows(2) {
            assert!(
                to_number(Some(pair[0])) < to_number(Some(pair[1])),
                "{} should be < {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn total_order_is_transitive_on_samples() {
        let samples = ["v0.0", "v0.1~999", "v2.3", "v2.3~1", "v10.0"];
        let mut numbers: Vec<_> = samples.iter().map(|s| to_number(Some(s))).collect();
        numbers.sort_unstable();
        let mut by_value = samples.to_vec();
        by_value.sort_by_key(|s| to_number(Some(s)));
        assert_eq!(numbers.len(), by_value.len());
    }
}
