//! Skill and host version parsing with pre-release ordering.
//!
//! Accepted forms: `2`, `2.0`, `1.2.0`, optionally prefixed with `v` and
//! suffixed with a pre-release marker `-a<N>`, `-b<N>` or `-rc<N>`
//! (`alpha`/`beta` spelled out are accepted too). Build metadata after `+`
//! is ignored. Ordering: `1.2.0-a1 < 1.2.0-b1 < 1.2.0-rc1 < 1.2.0`.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Release stage. Variant order is the ordering: alpha < beta < rc < release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Alpha(u32),
    Beta(u32),
    ReleaseCandidate(u32),
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub stage: Stage,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            stage: Stage::Release,
        }
    }

    pub fn is_prerelease(&self) -> bool {
        self.stage != Stage::Release
    }
}

/// Compare two version strings.
pub fn compare(a: &str, b: &str) -> Result<Ordering> {
    Ok(a.parse::<Version>()?.cmp(&b.parse::<Version>()?))
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidVersion {
            value: s.to_owned(),
        };

        let trimmed = s.trim().trim_start_matches(['v', 'V']);
        let without_build = trimmed.split_once('+').map_or(trimmed, |(v, _)| v);
        let (core, pre) = match without_build.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (without_build, None),
        };

        let mut numbers = [0u64; 3];
        let mut count = 0;
        for part in core.split('.') {
            if count == numbers.len() {
                return Err(invalid());
            }
            numbers[count] = part.parse().map_err(|_| invalid())?;
            count += 1;
        }

        let stage = match pre {
            None => Stage::Release,
            Some(pre) => parse_stage(pre).ok_or_else(invalid)?,
        };

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            stage,
        })
    }
}

fn parse_stage(pre: &str) -> Option<Stage> {
    let pre = pre.to_ascii_lowercase();
    let split = pre
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(pre.len());
    let (label, digits) = pre.split_at(split);
    let label = label.trim_end_matches('.');
    let number = if digits.is_empty() {
        0
    } else {
        digits.parse().ok()?
    };

    match label {
        "a" | "alpha" => Some(Stage::Alpha(number)),
        "b" | "beta" => Some(Stage::Beta(number)),
        "rc" => Some(Stage::ReleaseCandidate(number)),
        _ => None,
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        match self.stage {
            Stage::Alpha(n) => write!(f, "-a{n}"),
            Stage::Beta(n) => write!(f, "-b{n}"),
            Stage::ReleaseCandidate(n) => write!(f, "-rc{n}"),
            Stage::Release => Ok(()),
        }
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("1.2.0", Version::new(1, 2, 0))]
    #[case("2.0", Version::new(2, 0, 0))]
    #[case("3", Version::new(3, 0, 0))]
    #[case("v1.0.4", Version::new(1, 0, 4))]
    #[case(" 1.0.4+build.7 ", Version::new(1, 0, 4))]
    fn parses_release_versions(#[case] raw: &str, #[case] expected: Version) {
        assert_eq!(raw.parse::<Version>().unwrap(), expected);
    }

    #[rstest]
    #[case("1.2.0-a1", Stage::Alpha(1))]
    #[case("1.2.0-alpha2", Stage::Alpha(2))]
    #[case("1.2.0-b1", Stage::Beta(1))]
    #[case("1.2.0-beta", Stage::Beta(0))]
    #[case("1.2.0-rc1", Stage::ReleaseCandidate(1))]
    #[case("1.2.0-RC.3", Stage::ReleaseCandidate(3))]
    fn parses_prerelease_markers(#[case] raw: &str, #[case] stage: Stage) {
        assert_eq!(raw.parse::<Version>().unwrap().stage, stage);
    }

    #[rstest]
    #[case("")]
    #[case("latest")]
    #[case("1.2.3.4")]
    #[case("1..2")]
    #[case("1.2.0-dev1")]
    fn rejects_malformed(#[case] raw: &str) {
        assert!(matches!(
            raw.parse::<Version>(),
            Err(Error::InvalidVersion { .. })
        ));
    }

    #[test]
    fn prerelease_chain_is_strictly_ordered() {
        let chain = ["1.2.0-a1", "1.2.0-b1", "1.2.0-rc1", "1.2.0", "1.2.1-a1", "1.10.0"];
        let parsed: Vec<Version> = chain.iter().map(|v| v.parse().unwrap()).collect();
        for pair in parsed.windows(2) {
            assert!(pair[0] < pair[1], "{} should be < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn comparison_is_reflexive_antisymmetric_and_transitive() {
        let samples = [
            "0.9", "1.0.0-a1", "1.0.0-a2", "1.0.0-b1", "1.0.0-rc1", "1.0.0", "1.0", "1.0.1",
            "2.0.0-rc2",
        ];
        for a in samples {
            assert_eq!(compare(a, a).unwrap(), Ordering::Equal);
            for b in samples {
                let ab = compare(a, b).unwrap();
                assert_eq!(ab, compare(b, a).unwrap().reverse());
                for c in samples {
                    if ab != Ordering::Greater && compare(b, c).unwrap() != Ordering::Greater {
                        assert_ne!(compare(a, c).unwrap(), Ordering::Greater);
                    }
                }
            }
        }
    }

    #[test]
    fn short_and_long_forms_are_equal() {
        assert_eq!(compare("2.0", "2.0.0").unwrap(), Ordering::Equal);
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!("v2.0".parse::<Version>().unwrap().to_string(), "2.0.0");
        assert_eq!(
            "1.2.0-RC2".parse::<Version>().unwrap().to_string(),
            "1.2.0-rc2"
        );
    }

    #[test]
    fn serde_uses_string_form() {
        let v: Version = serde_json::from_str("\"1.4.0-b2\"").unwrap();
        assert_eq!(v.stage, Stage::Beta(2));
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"1.4.0-b2\"");
    }
}
