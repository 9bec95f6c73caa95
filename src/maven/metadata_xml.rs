//! The `maven-metadata.xml` format, see
//!  https://maven.apache.org/ref/3.9.5/maven-repository-metadata/repository-metadata.html

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Deserialize;

use crate::maven::version::{compare_versions, find_latest, sort_versions};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    pub versioning: Option<Versioning>,
    pub plugins: Option<Plugins>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versioning {
    pub latest: Option<String>,
    pub release: Option<String>,
    pub versions: Option<Versions>,
    pub last_updated: Option<String>,
    pub snapshot: Option<Snapshot>,
    pub snapshot_versions: Option<SnapshotVersions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Versions {
    #[serde(default)]
    pub version: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub timestamp: Option<String>,
    pub build_number: Option<u32>,
    pub local_copy: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotVersions {
    #[serde(default)]
    pub snapshot_version: Vec<SnapshotVersion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SnapshotVersion {
    pub classifier: Option<String>,
    pub extension: Option<String>,
    pub value: Option<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Plugins {
    #[serde(default)]
    pub plugin: Vec<Plugin>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plugin {
    pub name: Option<String>,
    pub prefix: Option<String>,
    pub artifact_id: Option<String>,
}

pub fn parse_metadata(bytes: &[u8]) -> anyhow::Result<Metadata> {
    let metadata: Metadata = serde_xml_rs::from_reader(bytes)?;
    Ok(metadata)
}

impl Metadata {
    pub fn versions(&self) -> Vec<String> {
        self.versioning.as_ref()
            .and_then(|v| v.versions.as_ref())
            .map(|v| v.version.clone())
            .unwrap_or_default()
    }

    pub fn last_updated(&self) -> Option<&str> {
        self.versioning.as_ref()
            .and_then(|v| v.last_updated.as_deref())
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata>\n");
        write_element(&mut out, 1, "groupId", self.group_id.as_deref());
        write_element(&mut out, 1, "artifactId", self.artifact_id.as_deref());
        write_element(&mut out, 1, "version", self.version.as_deref());

        if let Some(versioning) = &self.versioning {
            out.push_str("  <versioning>\n");
            write_element(&mut out, 2, "latest", versioning.latest.as_deref());
            write_element(&mut out, 2, "release", versioning.release.as_deref());

            if let Some(snapshot) = &versioning.snapshot {
                out.push_str("    <snapshot>\n");
                write_element(&mut out, 3, "timestamp", snapshot.timestamp.as_deref());
                write_element(&mut out, 3, "buildNumber", snapshot.build_number.map(|n| n.to_string()).as_deref());
                write_element(&mut out, 3, "localCopy", snapshot.local_copy.map(|b| b.to_string()).as_deref());
                out.push_str("    </snapshot>\n");
            }

            if let Some(versions) = &versioning.versions {
                out.push_str("    <versions>\n");
                for v in &versions.version {
                    write_element(&mut out, 3, "version", Some(v));
                }
                out.push_str("    </versions>\n");
            }

            write_element(&mut out, 2, "lastUpdated", versioning.last_updated.as_deref());

            if let Some(snapshot_versions) = &versioning.snapshot_versions {
                out.push_str("    <snapshotVersions>\n");
                for sv in &snapshot_versions.snapshot_version {
                    out.push_str("      <snapshotVersion>\n");
                    write_element(&mut out, 4, "classifier", sv.classifier.as_deref());
                    write_element(&mut out, 4, "extension", sv.extension.as_deref());
                    write_element(&mut out, 4, "value", sv.value.as_deref());
                    write_element(&mut out, 4, "updated", sv.updated.as_deref());
                    out.push_str("      </snapshotVersion>\n");
                }
                out.push_str("    </snapshotVersions>\n");
            }
            out.push_str("  </versioning>\n");
        }

        if let Some(plugins) = &self.plugins {
            out.push_str("  <plugins>\n");
            for p in &plugins.plugin {
                out.push_str("    <plugin>\n");
                write_element(&mut out, 3, "name", p.name.as_deref());
                write_element(&mut out, 3, "prefix", p.prefix.as_deref());
                write_element(&mut out, 3, "artifactId", p.artifact_id.as_deref());
                out.push_str("    </plugin>\n");
            }
            out.push_str("  </plugins>\n");
        }

        out.push_str("</metadata>\n");
        out
    }
}

fn write_element(out: &mut String, indent: usize, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        let _ = writeln!(out, "{}<{}>{}</{}>", "  ".repeat(indent), name, escape(value), name);
    }
}

fn escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            c => result.push(c),
        }
    }
    result
}

fn max_version(a: Option<String>, b: Option<&String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if compare_versions(b, &a).is_gt() { b.clone() } else { a }),
        (a, b) => a.or_else(|| b.cloned()),
    }
}

/// Merges the documents of several repositories for the same path.
///
/// Versions are united and sorted by the version order, `latest` and `release` are recomputed,
///  `lastUpdated` is the maximum. For version level documents the snapshot information of the
///  most recently updated document wins, and snapshot versions are merged per (classifier, extension).
pub fn merge_metadata(documents: &[Metadata]) -> Option<Metadata> {
    let first = documents.first()?;

    let mut versions = Vec::new();
    let mut latest = None;
    let mut last_updated: Option<String> = None;
    let mut snapshot: Option<(String, Snapshot)> = None;
    let mut snapshot_versions: BTreeMap<(Option<String>, Option<String>), SnapshotVersion> = BTreeMap::new();
    let mut plugins: BTreeMap<Option<String>, Plugin> = BTreeMap::new();
    let mut has_versioning = false;
    let mut has_plugins = false;

    for doc in documents {
        if let Some(versioning) = &doc.versioning {
            has_versioning = true;
            versions.extend(doc.versions());
            latest = max_version(latest, versioning.latest.as_ref());

            let updated = versioning.last_updated.clone().unwrap_or_default();
            if let Some(s) = &versioning.snapshot {
                match &snapshot {
                    Some((current, _)) if *current >= updated => {}
                    _ => snapshot = Some((updated.clone(), s.clone())),
                }
            }
            if versioning.last_updated.is_some() && last_updated.as_deref().map_or(true, |l| l < updated.as_str()) {
                last_updated = Some(updated);
            }

            for sv in versioning.snapshot_versions.iter().flat_map(|s| s.snapshot_version.iter()) {
                let key = (sv.classifier.clone(), sv.extension.clone());
                match snapshot_versions.get(&key) {
                    Some(existing) if existing.updated >= sv.updated => {}
                    _ => { snapshot_versions.insert(key, sv.clone()); }
                }
            }
        }

        if let Some(p) = &doc.plugins {
            has_plugins = true;
            for plugin in &p.plugin {
                plugins.entry(plugin.prefix.clone()).or_insert_with(|| plugin.clone());
            }
        }
    }

    sort_versions(&mut versions);
    let latest = max_version(latest, versions.last());
    let release = find_latest(versions.iter().map(|v| v.as_str()), true);

    Some(Metadata {
        group_id: first.group_id.clone(),
        artifact_id: first.artifact_id.clone(),
        version: first.version.clone(),
        versioning: has_versioning.then(|| Versioning {
            latest,
            release,
            versions: (!versions.is_empty()).then(|| Versions { version: versions }),
            last_updated,
            snapshot: snapshot.map(|(_, s)| s),
            snapshot_versions: (!snapshot_versions.is_empty()).then(|| SnapshotVersions {
                snapshot_version: snapshot_versions.into_values().collect(),
            }),
        }),
        plugins: has_plugins.then(|| Plugins { plugin: plugins.into_values().collect() }),
    })
}
