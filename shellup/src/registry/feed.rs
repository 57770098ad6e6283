//! Registry feed document and version resolution.
//!
//! ```json
//! {"components": {"shell": {"releases": [
//!     {"version": "1.2.0", "url": "https://…", "sha256": "…", "size": 123, "format": "tar.gz"}
//! ]}}}
//! ```

use std::collections::BTreeMap;

use semver::Version;
use serde::Deserialize;

use super::VersionConstraint;
use crate::component::{ArtifactFormat, ReleaseDescriptor};
use crate::error::{EngineError, EngineResult};

/// Parsed registry feed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub components: BTreeMap<String, FeedComponent>,
}

/// Releases published for one component.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedComponent {
    #[serde(default)]
    pub releases: Vec<FeedRelease>,
}

/// One release entry.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedRelease {
    pub version: Version,
    pub url: String,
    pub sha256: String,
    pub size: u64,
    #[serde(default)]
    pub format: ArtifactFormat,
}

impl Feed {
    /// Parse a feed document fetched from `url`.
    pub fn parse(url: &str, bytes: &[u8]) -> EngineResult<Self> {
        let feed: Feed = serde_json::from_slice(bytes).map_err(|e| EngineError::Feed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        feed.validate(url)?;
        Ok(feed)
    }

    fn validate(&self, url: &str) -> EngineResult<()> {
        for (name, component) in &self.components {
            for release in &component.releases {
                let hash = release.sha256.trim();
                if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(EngineError::Feed {
                        url: url.to_string(),
                        reason: format!(
                            "{} {}: sha256 is not a 64-digit hex digest",
                            name, release.version
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// All releases of `name`, newest first.
    pub fn releases(&self, name: &str) -> EngineResult<Vec<ReleaseDescriptor>> {
        let component = self.component(name)?;
        let mut releases: Vec<_> = component
            .releases
            .iter()
            .map(|r| r.to_descriptor(name))
            .collect();
        releases.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(releases)
    }

    /// Pick the release of `name` satisfying `constraint`.
    pub fn resolve(
        &self,
        name: &str,
        constraint: &VersionConstraint,
    ) -> EngineResult<ReleaseDescriptor> {
        let component = self.component(name)?;
        let chosen = match constraint {
            VersionConstraint::Exact(version) => component
                .releases
                .iter()
                .find(|r| &r.version == version)
                .ok_or_else(|| EngineError::NoMatchingVersion {
                    name: name.to_string(),
                    version: version.clone(),
                })?,
            VersionConstraint::Latest => latest(&component.releases).ok_or_else(|| {
                EngineError::ComponentNotFound {
                    name: name.to_string(),
                }
            })?,
        };
        Ok(chosen.to_descriptor(name))
    }

    fn component(&self, name: &str) -> EngineResult<&FeedComponent> {
        self.components
            .get(name)
            .ok_or_else(|| EngineError::ComponentNotFound {
                name: name.to_string(),
            })
    }
}

impl FeedRelease {
    fn to_descriptor(&self, component: &str) -> ReleaseDescriptor {
        ReleaseDescriptor {
            component: component.to_string(),
            version: self.version.clone(),
            download_url: self.url.clone(),
            expected_hash: self.sha256.trim().to_string(),
            size_bytes: self.size,
            format: self.format,
        }
    }
}

/// Highest stable release, or the highest pre-release when no stable exists.
fn latest(releases: &[FeedRelease]) -> Option<&FeedRelease> {
    releases
        .iter()
        .filter(|r| r.version.pre.is_empty())
        .max_by(|a, b| a.version.cmp(&b.version))
        .or_else(|| releases.iter().max_by(|a, b| a.version.cmp(&b.version)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const HASH: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn feed(json: &str) -> Feed {
        Feed::parse("test://feed", json.as_bytes()).unwrap()
    }

    fn release_json(version: &str) -> String {
        format!(
            r#"{{"version":"{}","url":"https://example.com/{}.tar.gz","sha256":"{}","size":10}}"#,
            version, version, HASH
        )
    }

    fn feed_with(versions: &[&str]) -> Feed {
        let releases: Vec<String> = versions.iter().map(|v| release_json(v)).collect();
        feed(&format!(
            r#"{{"components":{{"shell":{{"releases":[{}]}}}}}}"#,
            releases.join(",")
        ))
    }

    #[test]
    fn test_latest_uses_semver_precedence() {
        let feed = feed_with(&["1.9.0", "1.10.0", "1.2.3"]);
        let release = feed.resolve("shell", &VersionConstraint::Latest).unwrap();
        assert_eq!(release.version, Version::new(1, 10, 0));
        assert_eq!(release.format, ArtifactFormat::TarGz);
    }

    #[test]
    fn test_latest_prefers_stable_over_prerelease() {
        let feed = feed_with(&["2.0.0-beta.1", "1.4.0"]);
        let release = feed.resolve("shell", &VersionConstraint::Latest).unwrap();
        assert_eq!(release.version, Version::new(1, 4, 0));
    }

    #[test]
    fn test_latest_falls_back_to_prerelease() {
        let feed = feed_with(&["2.0.0-alpha.1", "2.0.0-beta.2"]);
        let release = feed.resolve("shell", &VersionConstraint::Latest).unwrap();
        assert_eq!(release.version, Version::parse("2.0.0-beta.2").unwrap());
    }

    #[test]
    fn test_exact_version() {
        let feed = feed_with(&["1.0.0", "1.1.0"]);
        let release = feed
            .resolve("shell", &VersionConstraint::Exact(Version::new(1, 0, 0)))
            .unwrap();
        assert_eq!(release.version, Version::new(1, 0, 0));
        assert_eq!(release.component, "shell");
    }

    #[test]
    fn test_exact_version_missing() {
        let feed = feed_with(&["1.0.0"]);
        let err = feed
            .resolve("shell", &VersionConstraint::Exact(Version::new(3, 0, 0)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMatchingVersion);
    }

    #[test]
    fn test_unknown_component() {
        let feed = feed_with(&["1.0.0"]);
        let err = feed.resolve("greeter", &VersionConstraint::Latest).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ComponentNotFound);
    }

    #[test]
    fn test_component_without_releases() {
        let feed = feed(r#"{"components":{"shell":{"releases":[]}}}"#);
        let err = feed.resolve("shell", &VersionConstraint::Latest).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ComponentNotFound);
    }

    #[test]
    fn test_releases_sorted_newest_first() {
        let feed = feed_with(&["1.0.0", "1.2.0", "1.1.0"]);
        let versions: Vec<_> = feed
            .releases("shell")
            .unwrap()
            .into_iter()
            .map(|r| r.version.to_string())
            .collect();
        assert_eq!(versions, vec!["1.2.0", "1.1.0", "1.0.0"]);
    }

    #[test]
    fn test_single_file_format() {
        let feed = feed(&format!(
            r#"{{"components":{{"qs":{{"releases":[{{"version":"0.1.0","url":"https://x/qs","sha256":"{}","size":1,"format":"file"}}]}}}}}}"#,
            HASH
        ));
        let release = feed.resolve("qs", &VersionConstraint::Latest).unwrap();
        assert_eq!(release.format, ArtifactFormat::File);
    }

    #[test]
    fn test_malformed_feed() {
        let err = Feed::parse("test://feed", b"{\"components\": 3}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Feed);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_version_is_malformed() {
        let json = r#"{"components":{"shell":{"releases":[{"version":"latest","url":"u","sha256":"00","size":1}]}}}"#;
        let err = Feed::parse("test://feed", json.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Feed);
    }

    #[test]
    fn test_bad_digest_is_malformed() {
        let json = r#"{"components":{"shell":{"releases":[{"version":"1.0.0","url":"u","sha256":"xyz","size":1}]}}}"#;
        let err = Feed::parse("test://feed", json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("sha256"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_latest_is_maximum_stable(
                versions in proptest::collection::vec((0u64..20, 0u64..20, 0u64..20), 1..12)
            ) {
                let strings: Vec<String> = versions
                    .iter()
                    .map(|(a, b, c)| format!("{}.{}.{}", a, b, c))
                    .collect();
                let refs: Vec<&str> = strings.iter().map(String::as_str).collect();
                let feed = feed_with(&refs);

                let expected = versions
                    .iter()
                    .map(|(a, b, c)| Version::new(*a, *b, *c))
                    .max()
                    .unwrap();
                let resolved = feed.resolve("shell", &VersionConstraint::Latest).unwrap();
                prop_assert_eq!(resolved.version, expected);
            }
        }
    }
}
