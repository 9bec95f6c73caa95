use anyhow::anyhow;
use lazy_static::lazy_static;
use regex::Regex;

use crate::maven::coordinates::*;
use crate::maven::version::SNAPSHOT_TS_REGEX;
use crate::util::item_path;

lazy_static! {
    static ref FILE_TIMESTAMP_REGEX: Regex = Regex::new(r"^(\d{8}\.\d{6})(?:-(\d+))?").unwrap();
}

pub const METADATA_FILE_NAME: &str = "maven-metadata.xml";
pub const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";
pub const CHECKSUM_SUFFIXES: [&str; 4] = [".sha1", ".md5", ".sha256", ".asc"];

/// `org.x` + `a` -> `org/x/a`
pub fn ga_path(group_id: &str, artifact_id: &str) -> String {
    format!("{}/{}", group_id.replace('.', "/"), artifact_id)
}

pub fn ga_metadata_path(ga: &GaKey) -> String {
    format!("{}/{}", ga_path(&ga.group_id.0, &ga.artifact_id.0), METADATA_FILE_NAME)
}

/// `1.0-20080815.231708-12` -> `1.0`, anything else is returned as it is
pub fn strip_timestamp(version: &str) -> &str {
    match SNAPSHOT_TS_REGEX.captures(version).and_then(|c| c.get(1)) {
        Some(base) => base.as_str(),
        None => version,
    }
}

/// `1.0-20080815.231708-12` -> `1.0-SNAPSHOT`, anything else is returned as it is
pub fn base_version(version: &str) -> String {
    if SNAPSHOT_TS_REGEX.is_match(version) {
        format!("{}{}", strip_timestamp(version), SNAPSHOT_SUFFIX)
    }
    else {
        version.to_string()
    }
}

pub fn calculate_version_dir(coordinates: &ArtifactCoordinates) -> String {
    base_version(&coordinates.version)
}

/// `artifactId-version[-classifier].type`
pub fn artifact_file_name(coordinates: &ArtifactCoordinates) -> String {
    match &coordinates.classifier {
        None => format!("{}-{}.{}", coordinates.artifact_id.0, coordinates.version, coordinates.artifact_type),
        Some(c) => format!("{}-{}-{}.{}", coordinates.artifact_id.0, coordinates.version, c, coordinates.artifact_type),
    }
}

pub fn pom_file_name(coordinates: &ArtifactCoordinates) -> String {
    format!("{}-{}.pom", coordinates.artifact_id.0, coordinates.version)
}

/// the version directory, e.g. `org/x/a/1.0-SNAPSHOT`
pub fn gav_path(coordinates: &ArtifactCoordinates) -> String {
    format!("{}/{}", ga_path(&coordinates.group_id.0, &coordinates.artifact_id.0), calculate_version_dir(coordinates))
}

pub fn rel_path(coordinates: &ArtifactCoordinates) -> String {
    format!("{}/{}", gav_path(coordinates), artifact_file_name(coordinates))
}

pub fn rel_pom_path(coordinates: &ArtifactCoordinates) -> String {
    format!("{}/{}", gav_path(coordinates), pom_file_name(coordinates))
}

/// `rel_path` below `prefix`, with exactly one separator in between
pub fn abs_path(prefix: &str, coordinates: &ArtifactCoordinates) -> String {
    let prefix = prefix.trim_end_matches('/');
    format!("{}/{}", prefix, rel_path(coordinates))
}

pub fn is_metadata_path(path: &str) -> bool {
    item_path::name(path) == METADATA_FILE_NAME
}

pub fn is_checksum_path(path: &str) -> bool {
    CHECKSUM_SUFFIXES.iter().any(|s| path.ends_with(s))
}

/// `a-1.0.jar.sha1` -> `a-1.0.jar`, anything else is returned as it is
pub fn strip_checksum_suffix(path: &str) -> &str {
    CHECKSUM_SUFFIXES.iter()
        .find_map(|s| path.strip_suffix(s))
        .unwrap_or(path)
}

pub fn is_snapshot_path(path: &str) -> bool {
    path.trim_end_matches('/')
        .split('/')
        .any(|segment| segment.ends_with(SNAPSHOT_SUFFIX))
}

pub fn as_maven_path(artifact_ref: &MavenArtifactRef) -> String {
    format!(
        "{}/{}/{}",
        ga_path(&artifact_ref.group_id.0, &artifact_ref.artifact_id.0),
        artifact_ref.version.directory_version(),
        maven_file_name(artifact_ref),
    )
}

fn parse_maven_filename<'a>(file_name: &'a str, artifact_id: &str, version_dir: &str) -> anyhow::Result<ParseFilenameResult<'a>> {
    let full_file_name = file_name;

    let file_name = file_name.strip_prefix(artifact_id)
        .and_then(|s| s.strip_prefix('-'))
        .ok_or_else(|| anyhow!("{} is not a valid maven file name: expected to start with artifact id {}", full_file_name, artifact_id))?;

    let (version, tail) = if let Some(tail) = file_name.strip_prefix(version_dir) {
        // <artifactId>-<version>[-<classifier>].<extension>, which includes literal -SNAPSHOT file names
        (MavenVersion::Plain(version_dir.to_string()), tail)
    }
    else if let Some(base) = version_dir.strip_suffix(SNAPSHOT_SUFFIX) {
        // <artifactId>-<base>-<timestamp>[-<buildNumber>][-<classifier>].<extension>

        let file_name = file_name.strip_prefix(base)
            .and_then(|s| s.strip_prefix('-'))
            .ok_or_else(|| anyhow!("{} is not a valid maven file name: expected to have version {}", full_file_name, base))?;

        let captures = FILE_TIMESTAMP_REGEX.captures(file_name)
            .ok_or_else(|| anyhow!("snapshot file name without timestamp: {}", full_file_name))?;
        let matched = captures.get(0).map(|m| m.end()).unwrap_or(0);
        let timestamp = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let build_number = match captures.get(2) {
            Some(n) => Some(n.as_str().parse::<u32>()?),
            None => None,
        };

        (MavenVersion::Timestamped {
            version: version_dir.to_string(),
            timestamp: timestamp.to_string(),
            build_number,
        }, &file_name[matched..])
    }
    else {
        return Err(anyhow!("{} is not a valid maven file name: expected to have version string {}", full_file_name, version_dir));
    };

    let (stem, extension) = match tail.rfind('.') {
        Some(last_dot) => (&tail[..last_dot], &tail[last_dot..]),
        None => (tail, ""),
    };

    // NB: a classifier can contain any number of '-' characters
    let classifier = if stem.is_empty() {
        None
    }
    else if let Some(classifier) = stem.strip_prefix('-') {
        if classifier.is_empty() {
            return Err(anyhow!("not a valid maven file name - empty classifier: {}", full_file_name));
        }
        Some(classifier)
    }
    else {
        return Err(anyhow!("not a valid maven file name - invalid classifier format: {}", full_file_name));
    };

    if extension.len() < 2 {
        return Err(anyhow!("not a valid maven file name - no extension: {}", full_file_name));
    }

    Ok(ParseFilenameResult {
        version,
        classifier,
        extension,
    })
}

/// path is the relative path inside a maven repository, i.e. it starts with something like
///  "org/..." or "com/..."; a leading '/' is ignored
pub fn parse_maven_path(path: &str) -> anyhow::Result<MavenArtifactRef> {
    let path = path.trim_start_matches('/');

    if let Some((without_filename, file_name)) = path.rsplit_once('/') {
        if let Some((without_version, version)) = without_filename.rsplit_once('/') {
            if let Some((group_id, artifact_id)) = without_version.rsplit_once('/') {
                if group_id.is_empty() || artifact_id.is_empty() || version.is_empty() {
                    return Err(anyhow!("not a valid Maven artifact path: {:?}", path));
                }

                let parsed_filename = parse_maven_filename(file_name, artifact_id, version)?;

                return Ok(MavenArtifactRef {
                    group_id: MavenGroupId(group_id.replace('/', ".")),
                    artifact_id: MavenArtifactId(artifact_id.to_string()),
                    version: parsed_filename.version,
                    classifier: match parsed_filename.classifier {
                        None => MavenClassifier::Unclassified,
                        Some(s) => MavenClassifier::Classified(s.to_string()),
                    },
                    file_extension: parsed_filename.extension.to_string(),
                });
            }
        }
    }

    Err(anyhow!("not a valid Maven artifact path: {:?}", path))
}

/// `org/x/a/maven-metadata.xml` -> `org.x:a`. Only GA-level documents are recognized; version
///  level metadata has a version directory as its parent and would be misread as an artifact id.
pub fn parse_ga_metadata_path(path: &str) -> Option<GaKey> {
    let path = path.trim_start_matches('/');
    let without_filename = path.strip_suffix(METADATA_FILE_NAME)?.strip_suffix('/')?;
    let (group_path, artifact_id) = without_filename.rsplit_once('/')?;
    if group_path.is_empty() || artifact_id.is_empty() || artifact_id.ends_with(SNAPSHOT_SUFFIX) {
        return None;
    }
    Some(GaKey::new(&group_path.replace('/', "."), artifact_id))
}

fn maven_file_name(artifact_ref: &MavenArtifactRef) -> String {
    let classifier_string = match &artifact_ref.classifier {
        MavenClassifier::Unclassified => "".to_string(),
        MavenClassifier::Classified(c) => format!("-{}", c),
    };

    format!("{}-{}{}{}",
            artifact_ref.artifact_id.0,
            artifact_ref.version.file_version(),
            classifier_string,
            artifact_ref.file_extension,
    )
}

#[derive(Debug, Eq, PartialEq)]
struct ParseFilenameResult<'a> {
    version: MavenVersion,
    classifier: Option<&'a str>,
    extension: &'a str, // including leading '.', e.g. ".jar"
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    fn timestamped(version: &str, timestamp: &str, build_number: Option<u32>) -> MavenVersion {
        MavenVersion::Timestamped { version: version.to_string(), timestamp: timestamp.to_string(), build_number }
    }

    #[rstest]
    #[case::release("a-1.0.0.jar", "a", "1.0.0", Some(ParseFilenameResult{ version: MavenVersion::Plain("1.0.0".to_string()), classifier: None, extension: ".jar"} ))]
    #[case::release_with_dash("x-y-1.0.0.jar", "x-y", "1.0.0", Some(ParseFilenameResult{ version: MavenVersion::Plain("1.0.0".to_string()), classifier: None, extension: ".jar"} ))]
    #[case::release_version_with_dash_prefix("x-y-1.0.0.jar", "x", "y-1.0.0", Some(ParseFilenameResult{ version: MavenVersion::Plain("y-1.0.0".to_string()), classifier: None, extension: ".jar"} ))]
    #[case::release_version_with_dash_suffix("x-1.0.0-y.jar", "x", "1.0.0-y", Some(ParseFilenameResult{ version: MavenVersion::Plain("1.0.0-y".to_string()), classifier: None, extension: ".jar"} ))]
    #[case::release_extension("q-1.0.0.abc", "q", "1.0.0", Some(ParseFilenameResult{ version: MavenVersion::Plain("1.0.0".to_string()), classifier: None, extension: ".abc"} ))]
    #[case::release_classifier("a-1.0.0-cla.jar", "a", "1.0.0", Some(ParseFilenameResult{ version: MavenVersion::Plain("1.0.0".to_string()), classifier: Some("cla"), extension: ".jar"} ))]
    #[case::release_classifier_with_dash("a-1.0.0-cla-rst.jar", "a", "1.0.0", Some(ParseFilenameResult{ version: MavenVersion::Plain("1.0.0".to_string()), classifier: Some("cla-rst"), extension: ".jar"} ))]
    #[case::release_classifier_with_dash_suffix("a-1.0.0-cla-rst.jar", "a", "1.0.0-cla", Some(ParseFilenameResult{ version: MavenVersion::Plain("1.0.0-cla".to_string()), classifier: Some("rst"), extension: ".jar"} ))]
    #[case::release_invalid_too_short_1("xxxxxx", "a", "1.0.0", None)]
    #[case::release_invalid_too_short_2("", "a", "1.0.0", None)]
    #[case::release_invalid_wrong_artifact("a-1.0.0.jar", "b", "1.0.0", None)]
    #[case::release_invalid_no_dash_after_artifact("a1.0.0.jar", "a", "1.0.0", None)]
    #[case::release_invalid_wrong_version("a-1.0.0.jar", "a", "1.0.1", None)]
    #[case::release_invalid_longer_version("a-1.0.1.jar", "a", "1.0", None)]
    #[case::release_invalid_no_version("a.jar", "a", "1.0.0", None)]
    #[case::release_invalid_no_dash_before_classifier("a-1.0.0xyz.jar", "a", "1.0.0", None)]
    #[case::release_invalid_no_extension("a-1.0.0", "a", "1.0.0", None)]

    #[case::snapshot_plain("a-1.0.0-SNAPSHOT.jar", "a", "1.0.0-SNAPSHOT", Some(ParseFilenameResult{ version: MavenVersion::Plain("1.0.0-SNAPSHOT".to_string()), classifier: None, extension: ".jar"}))]
    #[case::snapshot_plain_classifier("a-1.0.0-SNAPSHOT-a-b-c.jar", "a", "1.0.0-SNAPSHOT", Some(ParseFilenameResult{ version: MavenVersion::Plain("1.0.0-SNAPSHOT".to_string()), classifier: Some("a-b-c"), extension: ".jar"}))]
    #[case::snapshot("a-1.0.0-12345678.123456.jar", "a", "1.0.0-SNAPSHOT", Some(ParseFilenameResult{ version: timestamped("1.0.0-SNAPSHOT", "12345678.123456", None), classifier: None, extension: ".jar"}))]
    #[case::snapshot_build_number("a-1.0.0-12345678.123456-5.jar", "a", "1.0.0-SNAPSHOT", Some(ParseFilenameResult{ version: timestamped("1.0.0-SNAPSHOT", "12345678.123456", Some(5)), classifier: None, extension: ".jar"}))]
    #[case::snapshot_classifier("a-1.0.0-12345678.123456-5-cla.jar", "a", "1.0.0-SNAPSHOT", Some(ParseFilenameResult{ version: timestamped("1.0.0-SNAPSHOT", "12345678.123456", Some(5)), classifier: Some("cla"), extension: ".jar"}))]
    #[case::snapshot_classifier_like_timestamp("a-1.0.0-22222222.222222-5-11111111.111111.jar", "a", "1.0.0-SNAPSHOT", Some(ParseFilenameResult{ version: timestamped("1.0.0-SNAPSHOT", "22222222.222222", Some(5)), classifier: Some("11111111.111111"), extension: ".jar"}))]
    #[case::snapshot_classifier_with_dash("a-1.0.0-22222222.222222-5-a-b-c.pom", "a", "1.0.0-SNAPSHOT", Some(ParseFilenameResult{ version: timestamped("1.0.0-SNAPSHOT", "22222222.222222", Some(5)), classifier: Some("a-b-c"), extension: ".pom"}))]
    #[case::snapshot_invalid_short_timestamp("a-1.0.0-2024.jar", "a", "1.0.0-SNAPSHOT", None)]
    #[case::snapshot_invalid_too_short("", "a", "1.0.0-SNAPSHOT", None)]
    #[case::snapshot_invalid_wrong_artifact("a-1.0.0-11111111.222222.jar", "b", "1.0.0-SNAPSHOT", None)]
    #[case::snapshot_invalid_no_dash_after_artifact("a1.0.0-11111111.222222.jar", "a", "1.0.0-SNAPSHOT", None)]
    #[case::snapshot_invalid_wrong_version("a-1.0.0-11111111.222222.jar", "a", "1.0.1-SNAPSHOT", None)]
    #[case::snapshot_invalid_no_version("a.jar", "a", "1.0.0-SNAPSHOT", None)]

    #[case::snapshot_lowercase_snapshot("a-1.0.0-snapshot-a.jar", "a", "1.0.0-snapshot", Some(ParseFilenameResult{ version: MavenVersion::Plain("1.0.0-snapshot".to_string()), classifier: Some("a"), extension: ".jar"}))]
    fn test_parse_filename(#[case] file_name: &str, #[case] artifact_id: &str, #[case] version_dir: &str, #[case] expected: Option<ParseFilenameResult>) {
        let actual = parse_maven_filename(file_name, artifact_id, version_dir);

        if let Some(expected) = expected {
            let actual = actual.unwrap();
            assert_eq!(actual, expected);
        }
        else {
            assert!(actual.is_err());
        }
    }

    #[rstest]
    #[case::release("org/x/a/1.0/a-1.0.jar")]
    #[case::leading_slash("/org/x/a/1.0/a-1.0-sources.jar")]
    #[case::snapshot("com/y/b/2.0-SNAPSHOT/b-2.0-20240101.101010-7.pom")]
    #[case::snapshot_classifier("com/y/b/2.0-SNAPSHOT/b-2.0-20240101.101010-7-tests.jar")]
    fn test_parse_maven_path_round_trip(#[case] path: &str) {
        let parsed = parse_maven_path(path).unwrap();
        assert_eq!(as_maven_path(&parsed), path.trim_start_matches('/'));
    }

    #[rstest]
    #[case::too_few_segments("a/1.0/a-1.0.jar")]
    #[case::no_slash("a-1.0.jar")]
    #[case::metadata("org/x/a/maven-metadata.xml")]
    fn test_parse_maven_path_invalid(#[case] path: &str) {
        assert!(parse_maven_path(path).is_err());
    }

    #[test]
    fn test_calculated_paths() {
        let c = ArtifactCoordinates::new("org.x", "a", "1.0", Some("sources"), "jar").unwrap();
        assert_eq!(ga_path("org.x", "a"), "org/x/a");
        assert_eq!(calculate_version_dir(&c), "1.0");
        assert_eq!(artifact_file_name(&c), "a-1.0-sources.jar");
        assert_eq!(pom_file_name(&c), "a-1.0.pom");
        assert_eq!(gav_path(&c), "org/x/a/1.0");
        assert_eq!(rel_path(&c), "org/x/a/1.0/a-1.0-sources.jar");
        assert_eq!(rel_pom_path(&c), "org/x/a/1.0/a-1.0.pom");
        assert_eq!(abs_path("/repo/", &c), "/repo/org/x/a/1.0/a-1.0-sources.jar");
    }

    #[rstest]
    #[case("1.0-20080815.231708-12", "1.0-SNAPSHOT", "1.0")]
    #[case("1.0-20991231.235959-1", "1.0-SNAPSHOT", "1.0")]
    #[case("5.5-5.5-20080815.231708-12", "5.5-5.5-SNAPSHOT", "5.5-5.5")]
    #[case("1.0-SNAPSHOT", "1.0-SNAPSHOT", "1.0-SNAPSHOT")]
    #[case("1.0-20080815.231708-", "1.0-20080815.231708-", "1.0-20080815.231708-")]
    fn test_snapshot_folding(#[case] version: &str, #[case] expected_dir: &str, #[case] expected_stripped: &str) {
        assert_eq!(base_version(version), expected_dir);
        assert_eq!(strip_timestamp(version), expected_stripped);
    }

    #[rstest]
    #[case("20080815.231708", 12)]
    #[case("20240229.000000", 1)]
    #[case("19991231.235959", 4711)]
    fn test_timestamped_snapshot_round_trip(#[case] timestamp: &str, #[case] build_number: u32) {
        let version = format!("2.1-{}-{}", timestamp, build_number);
        let c = ArtifactCoordinates::new("org.x", "lib", &version, Some("tests"), "jar").unwrap();

        assert_eq!(calculate_version_dir(&c), "2.1-SNAPSHOT");

        let parsed = parse_maven_path(&rel_path(&c)).unwrap();
        assert_eq!(parsed.version.directory_version(), "2.1-SNAPSHOT");
        assert_eq!(parsed.to_coordinates(), c);
        assert_eq!(as_maven_path(&parsed), rel_path(&c));
    }

    #[rstest]
    #[case("org/x/a/maven-metadata.xml", true, false)]
    #[case("org/x/a/maven-metadata.xml.sha1", false, true)]
    #[case("org/x/a/1.0/a-1.0.jar.md5", false, true)]
    #[case("org/x/a/1.0/a-1.0.jar", false, false)]
    #[case("maven-metadata.xml", true, false)]
    #[case("org/x/a/foo-maven-metadata.xml", false, false)]
    #[case("org/x/a/foo-maven-metadata.xml.sha1", false, true)]
    fn test_path_classification(#[case] path: &str, #[case] metadata: bool, #[case] checksum: bool) {
        assert_eq!(is_metadata_path(path), metadata);
        assert_eq!(is_checksum_path(path), checksum);
        assert_eq!(strip_checksum_suffix(path).len() < path.len(), checksum);
    }

    #[rstest]
    #[case("org/x/a/maven-metadata.xml", Some(("org.x", "a")))]
    #[case("/a/b/c/maven-metadata.xml", Some(("a.b", "c")))]
    #[case("org/x/a/1.0-SNAPSHOT/maven-metadata.xml", None)]
    #[case("maven-metadata.xml", None)]
    #[case("org/x/a/a-1.0.jar", None)]
    fn test_parse_ga_metadata_path(#[case] path: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(parse_ga_metadata_path(path), expected.map(|(g, a)| GaKey::new(g, a)));
    }
}
