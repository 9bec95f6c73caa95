use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::{ProxyError, ProxyResult};

/// A version as it appears in a file name: either the plain version (which may be a literal
///  `1.0-SNAPSHOT`), or a snapshot deployment identified by timestamp and build number.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum MavenVersion {
    Plain(String),
    Timestamped {
        version: String, // ending in '-SNAPSHOT'
        timestamp: String,
        build_number: Option<u32>,
    }
}
impl MavenVersion {
    /// The version string used in file names, e.g. `1.0-20240101.120000-3` for a snapshot
    pub fn file_version(&self) -> String {
        match self {
            MavenVersion::Plain(v) => v.clone(),
            MavenVersion::Timestamped { version, timestamp, build_number } => {
                let base = version.strip_suffix("-SNAPSHOT").unwrap_or(version);
                match build_number {
                    Some(n) => format!("{}-{}-{}", base, timestamp, n),
                    None => format!("{}-{}", base, timestamp),
                }
            }
        }
    }

    /// The version string used for the version directory
    pub fn directory_version(&self) -> &str {
        match self {
            MavenVersion::Plain(v) => v,
            MavenVersion::Timestamped { version, .. } => version,
        }
    }
}

#[derive(PartialEq, Eq, Clone, Debug, Hash, PartialOrd, Ord)]
pub struct MavenArtifactId(pub String);

#[derive(PartialEq, Eq, Clone, Debug, Hash, PartialOrd, Ord)]
pub struct MavenGroupId(pub String);

impl MavenGroupId {
    pub fn as_path(&self) -> String {
        self.0.replace('.', "/")
    }
}

/// groupId + artifactId, the key of a `maven-metadata.xml` document
#[derive(PartialEq, Eq, Clone, Debug, Hash, PartialOrd, Ord)]
pub struct GaKey {
    pub group_id: MavenGroupId,
    pub artifact_id: MavenArtifactId,
}
impl GaKey {
    pub fn new(group_id: &str, artifact_id: &str) -> GaKey {
        GaKey {
            group_id: MavenGroupId(group_id.to_string()),
            artifact_id: MavenArtifactId(artifact_id.to_string()),
        }
    }
}
impl Display for GaKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.group_id.0, self.artifact_id.0)
    }
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum MavenClassifier {
    Unclassified,
    Classified(String),
}

/// An artifact file as parsed from a repository path
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct MavenArtifactRef {
    pub group_id: MavenGroupId,
    pub artifact_id: MavenArtifactId,
    pub version: MavenVersion,
    pub classifier: MavenClassifier,
    pub file_extension: String, // including leading '.', e.g. ".jar"
}
impl MavenArtifactRef {
    pub fn to_coordinates(&self) -> ArtifactCoordinates {
        ArtifactCoordinates {
            group_id: self.group_id.clone(),
            artifact_id: self.artifact_id.clone(),
            version: self.version.file_version(),
            classifier: match &self.classifier {
                MavenClassifier::Unclassified => None,
                MavenClassifier::Classified(c) => Some(c.clone()),
            },
            artifact_type: self.file_extension.trim_start_matches('.').to_string(),
        }
    }
}

/// Identity of an artifact: `groupId:artifactId:version[:classifier]:type`.
///
/// The version may be a concrete version or an unresolved range like `[1.0,2.0)`.
#[derive(PartialEq, Eq, Clone, Debug, Hash)]
pub struct ArtifactCoordinates {
    pub group_id: MavenGroupId,
    pub artifact_id: MavenArtifactId,
    pub version: String,
    pub classifier: Option<String>,
    pub artifact_type: String,
}

pub const DEFAULT_ARTIFACT_TYPE: &str = "jar";

impl ArtifactCoordinates {
    pub fn new(
        group_id: &str,
        artifact_id: &str,
        version: &str,
        classifier: Option<&str>,
        artifact_type: &str,
    ) -> ProxyResult<ArtifactCoordinates> {
        if group_id.trim().is_empty() {
            return Err(ProxyError::InvalidArgument("groupId must not be empty".to_string()));
        }
        if artifact_id.trim().is_empty() {
            return Err(ProxyError::InvalidArgument("artifactId must not be empty".to_string()));
        }

        Ok(ArtifactCoordinates {
            group_id: MavenGroupId(group_id.to_string()),
            artifact_id: MavenArtifactId(artifact_id.to_string()),
            version: version.to_string(),
            classifier: classifier
                .filter(|c| !c.is_empty())
                .map(|c| c.to_string()),
            artifact_type: if artifact_type.is_empty() { DEFAULT_ARTIFACT_TYPE.to_string() } else { artifact_type.to_string() },
        })
    }

    pub fn ga(&self) -> GaKey {
        GaKey {
            group_id: self.group_id.clone(),
            artifact_id: self.artifact_id.clone(),
        }
    }

    pub fn is_version_range(&self) -> bool {
        self.version.starts_with('[') || self.version.starts_with('(')
    }

    pub fn with_version(&self, version: &str) -> ArtifactCoordinates {
        ArtifactCoordinates {
            version: version.to_string(),
            ..self.clone()
        }
    }
}

impl Display for ArtifactCoordinates {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.classifier {
            None => write!(f, "{}:{}:{}:{}", self.group_id.0, self.artifact_id.0, self.version, self.artifact_type),
            Some(c) => write!(f, "{}:{}:{}:{}:{}", self.group_id.0, self.artifact_id.0, self.version, c, self.artifact_type),
        }
    }
}

impl FromStr for ArtifactCoordinates {
    type Err = ProxyError;

    /// accepts `g:a:v`, `g:a:v:type` and `g:a:v:classifier:type`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [g, a, v] => ArtifactCoordinates::new(g, a, v, None, DEFAULT_ARTIFACT_TYPE),
            [g, a, v, t] => ArtifactCoordinates::new(g, a, v, None, t),
            [g, a, v, c, t] => ArtifactCoordinates::new(g, a, v, Some(c), t),
            _ => Err(ProxyError::InvalidArgument(format!("not a valid artifact coordinate: {:?}", s))),
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    #[rstest]
    #[case::gav("org.x:a:1.0", "org.x:a:1.0:jar")]
    #[case::gavt("org.x:a:1.0:pom", "org.x:a:1.0:pom")]
    #[case::gavct("org.x:a:1.0:sources:jar", "org.x:a:1.0:sources:jar")]
    #[case::empty_classifier("org.x:a:1.0::jar", "org.x:a:1.0:jar")]
    fn test_parse_and_display(#[case] input: &str, #[case] expected: &str) {
        let coordinates: ArtifactCoordinates = input.parse().unwrap();
        assert_eq!(coordinates.to_string(), expected);
    }

    #[rstest]
    #[case::too_short("org.x:a")]
    #[case::too_long("a:b:c:d:e:f")]
    #[case::empty_group(":a:1.0")]
    #[case::empty_artifact("org.x::1.0")]
    fn test_parse_invalid(#[case] input: &str) {
        assert!(input.parse::<ArtifactCoordinates>().is_err());
    }

    #[test]
    fn test_version_range_detection() {
        let c = ArtifactCoordinates::new("g", "a", "[1.0,2.0)", None, "jar").unwrap();
        assert!(c.is_version_range());
        assert!(!c.with_version("1.5").is_version_range());
    }

    #[test]
    fn test_snapshot_file_version() {
        let v = MavenVersion::Timestamped {
            version: "1.0-SNAPSHOT".to_string(),
            timestamp: "20240101.120000".to_string(),
            build_number: Some(3),
        };
        assert_eq!(v.file_version(), "1.0-20240101.120000-3");
        assert_eq!(v.directory_version(), "1.0-SNAPSHOT");
    }
}
