use std::cmp::Ordering;

/// A free-form version label ordered the way mod authors usually mean it.
///
/// Labels are split into runs of digits and runs of everything else. A
/// pre-release tag (after the first `-`) sorts below the bare version and
/// build metadata (after `+`) is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionString(String);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Segment<'a> {
    Number(u64),
    Text(&'a str),
}

impl VersionString {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(s: &str) -> Vec<Segment<'_>> {
        let mut out = Vec::new();
        for piece in s.split(['.', '-', '_']).filter(|p| !p.is_empty()) {
            let mut start = 0;
            let bytes = piece.as_bytes();
            for i in 1..=bytes.len() {
                let boundary = i == bytes.len()
                    || bytes[i].is_ascii_digit() != bytes[i - 1].is_ascii_digit();
                if !boundary {
                    continue;
                }
                let run = &piece[start..i];
                out.push(match run.parse::<u64>() {
                    Ok(n) => Segment::Number(n),
                    Err(_) => Segment::Text(run),
                });
                start = i;
            }
        }
        out
    }

    fn split(&self) -> (&str, Option<&str>) {
        let core = self.0.split('+').next().unwrap_or_default();
        match core.split_once('-') {
            Some((base, tag)) => (base, Some(tag)),
            None => (core, None),
        }
    }
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    let a = VersionString::segments(a);
    let b = VersionString::segments(b);
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.cmp(y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

impl Ord for VersionString {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a_base, a_tag) = self.split();
        let (b_base, b_tag) = other.split();
        compare_segments(a_base, b_base).then_with(|| match (a_tag, b_tag) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => compare_segments(a, b),
        })
    }
}

impl PartialOrd for VersionString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    VersionString::new(a).cmp(&VersionString::new(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ordering() {
        assert_eq!(compare_versions("1.0.0", "1.0.1"), Ordering::Less);
        assert_eq!(compare_versions("0.14.22", "0.14.21"), Ordering::Greater);
        assert_eq!(compare_versions("1.20.10", "1.20.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.0", "2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.20", "1.20.1"), Ordering::Less);
    }

    #[test]
    fn test_prerelease_sorts_below_release() {
        assert_eq!(compare_versions("1.0.0-beta.1", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0-alpha.1", "1.0.0-beta.1"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0-rc2", "1.0.0-rc10"), Ordering::Less);
    }

    #[test]
    fn test_build_metadata_ignored() {
        assert_eq!(compare_versions("0.5.3+1.20.1", "0.5.3+1.19.2"), Ordering::Equal);
        assert_eq!(compare_versions("mc1.20.1-0.5.3", "mc1.20.1-0.5.4"), Ordering::Less);
    }
}
