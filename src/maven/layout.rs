//! Conversion between the Maven 2 repository layout and the legacy Maven 1 layout
//!  `<groupId>/<type>s/<artifactId>-<version>[-<classifier>].<extension>`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::maven::coordinates::MavenClassifier;
use crate::maven::paths::{base_version, ga_path, is_metadata_path, parse_maven_path, CHECKSUM_SUFFIXES};

lazy_static! {
    /// the version starts at the first '-' that is followed by a digit
    static ref M1_FILE_REGEX: Regex = Regex::new(r"^(.+?)-(\d.*)$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryLayout {
    Maven1,
    Maven2,
}

impl RepositoryLayout {
    pub fn content_class(&self) -> &'static str {
        match self {
            RepositoryLayout::Maven1 => "maven1",
            RepositoryLayout::Maven2 => "maven2",
        }
    }
}

fn split_checksum(path: &str) -> (&str, &str) {
    for suffix in CHECKSUM_SUFFIXES {
        if let Some(stripped) = path.strip_suffix(suffix) {
            return (stripped, suffix);
        }
    }
    (path, "")
}

/// type directory -> (extension, implied classifier)
fn m1_type_dir(type_dir: &str) -> Option<(String, Option<&'static str>)> {
    match type_dir {
        "java-sources" => Some(("jar".to_string(), Some("sources"))),
        "javadocs" => Some(("jar".to_string(), Some("javadoc"))),
        _ => type_dir.strip_suffix('s')
            .filter(|t| !t.is_empty())
            .map(|t| (t.to_string(), None)),
    }
}

fn m1_type_dir_for(extension: &str, classifier: Option<&str>) -> String {
    match (extension, classifier) {
        ("jar", Some("sources")) => "java-sources".to_string(),
        ("jar", Some("javadoc")) => "javadocs".to_string(),
        (ext, _) => format!("{}s", ext),
    }
}

/// `org.x/jars/a-1.0.jar` -> `org/x/a/1.0/a-1.0.jar`
pub fn m1_to_m2(path: &str) -> Option<String> {
    let (path, checksum) = split_checksum(path.trim_start_matches('/'));

    let mut segments = path.split('/');
    let group_id = segments.next().filter(|s| !s.is_empty())?;
    let type_dir = segments.next()?;
    let file_name = segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    let (extension, classifier) = m1_type_dir(type_dir)?;
    let stem = file_name.strip_suffix(&format!(".{}", extension))?;
    let stem = match classifier {
        Some(c) => stem.strip_suffix(&format!("-{}", c))?,
        None => stem,
    };

    let captures = M1_FILE_REGEX.captures(stem)?;
    let artifact_id = captures.get(1)?.as_str();
    let version = captures.get(2)?.as_str();

    let file_name = match classifier {
        Some(c) => format!("{}-{}-{}.{}", artifact_id, version, c, extension),
        None => format!("{}-{}.{}", artifact_id, version, extension),
    };

    Some(format!("{}/{}/{}{}", ga_path(group_id, artifact_id), base_version(version), file_name, checksum))
}

/// `org/x/a/1.0/a-1.0.jar` -> `org.x/jars/a-1.0.jar`; metadata has no Maven 1 counterpart
pub fn m2_to_m1(path: &str) -> Option<String> {
    let (path, checksum) = split_checksum(path.trim_start_matches('/'));
    if is_metadata_path(path) {
        return None;
    }

    let artifact_ref = parse_maven_path(path).ok()?;
    let extension = artifact_ref.file_extension.trim_start_matches('.');
    let classifier = match &artifact_ref.classifier {
        MavenClassifier::Unclassified => None,
        MavenClassifier::Classified(c) => Some(c.as_str()),
    };
    let version = artifact_ref.version.file_version();

    let file_name = match classifier {
        Some(c) => format!("{}-{}-{}.{}", artifact_ref.artifact_id.0, version, c, extension),
        None => format!("{}-{}.{}", artifact_ref.artifact_id.0, version, extension),
    };

    Some(format!("{}/{}/{}{}", artifact_ref.group_id.0, m1_type_dir_for(extension, classifier), file_name, checksum))
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    #[rstest]
    #[case::jar("org.x/jars/a-1.0.jar", Some("org/x/a/1.0/a-1.0.jar"))]
    #[case::leading_slash("/org.x/poms/a-1.0.pom", Some("org/x/a/1.0/a-1.0.pom"))]
    #[case::dashed_artifact("org.x/jars/commons-lang-2.1.jar", Some("org/x/commons-lang/2.1/commons-lang-2.1.jar"))]
    #[case::sources("org.x/java-sources/a-1.0-sources.jar", Some("org/x/a/1.0/a-1.0-sources.jar"))]
    #[case::checksum("org.x/jars/a-1.0.jar.sha1", Some("org/x/a/1.0/a-1.0.jar.sha1"))]
    #[case::snapshot("org.x/jars/a-1.0-20080815.231708-3.jar", Some("org/x/a/1.0-SNAPSHOT/a-1.0-20080815.231708-3.jar"))]
    #[case::no_version("org.x/jars/a.jar", None)]
    #[case::wrong_extension("org.x/jars/a-1.0.pom", None)]
    #[case::too_deep("org/x/jars/a-1.0.jar", None)]
    #[case::too_shallow("org.x/a-1.0.jar", None)]
    fn test_m1_to_m2(#[case] m1: &str, #[case] expected: Option<&str>) {
        assert_eq!(m1_to_m2(m1).as_deref(), expected);
    }

    #[rstest]
    #[case::jar("org/x/a/1.0/a-1.0.jar", Some("org.x/jars/a-1.0.jar"))]
    #[case::javadoc("org/x/a/1.0/a-1.0-javadoc.jar", Some("org.x/javadocs/a-1.0-javadoc.jar"))]
    #[case::checksum("org/x/a/1.0/a-1.0.pom.md5", Some("org.x/poms/a-1.0.pom.md5"))]
    #[case::metadata("org/x/a/maven-metadata.xml", None)]
    #[case::not_an_artifact("org/x", None)]
    fn test_m2_to_m1(#[case] m2: &str, #[case] expected: Option<&str>) {
        assert_eq!(m2_to_m1(m2).as_deref(), expected);
    }

    #[rstest]
    #[case("org/x/a/1.0/a-1.0-sources.jar")]
    #[case("org/x/a/1.0-SNAPSHOT/a-1.0-20080815.231708-3.jar.sha1")]
    #[case("com/acme/tool-kit/3.2.1/tool-kit-3.2.1.pom")]
    fn test_layouts_agree(#[case] m2: &str) {
        let m1 = m2_to_m1(m2).unwrap();
        assert_eq!(m1_to_m2(&m1).as_deref(), Some(m2));
    }
}
