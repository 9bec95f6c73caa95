use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ProxyError, ProxyResult};

lazy_static! {
    /// `<base>-yyyyMMdd.HHmmss-<buildNumber>`
    pub static ref SNAPSHOT_TS_REGEX: Regex = Regex::new(r"^(.+)-(\d{8}\.\d{6})-(\d+)$").unwrap();
    static ref PRE_RELEASE_REGEX: Regex = Regex::new(r"(?i)^(.*?)-(alpha|beta)(?:-?(\d+))?$").unwrap();
}

pub const SNAPSHOT_VERSION: &str = "SNAPSHOT";

/// Maturity bucket of a version string. The declaration order is the sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QualityKind {
    Unknown,
    Snapshot,
    Alpha,
    Beta,
    Release,
}

/// Classification of a version string, e.g. `5.5-alpha-12` is `(Alpha, 12)`.
///
/// Two qualities compare by kind, and by quantity only when both are alpha or beta. So a plain
///  `-SNAPSHOT` and a timestamped snapshot are equal as qualities; `ArtifactVersion` is what
///  puts the timestamped one above.
#[derive(Debug, Clone, Copy)]
pub struct Quality {
    pub kind: QualityKind,
    pub quantity: i32,
}

impl Quality {
    pub const DEFAULT_QUANTITY: i32 = 0;
    pub const SNAPSHOT_TS_QUANTITY: i32 = 1;

    pub const UNKNOWN: Quality = Quality { kind: QualityKind::Unknown, quantity: Quality::DEFAULT_QUANTITY };
    pub const SNAPSHOT: Quality = Quality { kind: QualityKind::Snapshot, quantity: Quality::DEFAULT_QUANTITY };
    pub const SNAPSHOT_TS: Quality = Quality { kind: QualityKind::Snapshot, quantity: Quality::SNAPSHOT_TS_QUANTITY };
    pub const ALPHA: Quality = Quality { kind: QualityKind::Alpha, quantity: Quality::DEFAULT_QUANTITY };
    pub const BETA: Quality = Quality { kind: QualityKind::Beta, quantity: Quality::DEFAULT_QUANTITY };
    pub const RELEASE: Quality = Quality { kind: QualityKind::Release, quantity: Quality::DEFAULT_QUANTITY };

    /// Never fails: anything without a recognized suffix is a release.
    pub fn parse(version: &str) -> Quality {
        split_quality(version).1
    }
}

impl PartialEq for Quality {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Quality {}

impl PartialOrd for Quality {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Quality {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.kind.cmp(&other.kind) {
            Ordering::Equal => match self.kind {
                QualityKind::Alpha | QualityKind::Beta => self.quantity.cmp(&other.quantity),
                _ => Ordering::Equal,
            },
            unequal => unequal,
        }
    }
}

/// Splits a version into its base (without the quality suffix) and its quality.
fn split_quality(version: &str) -> (&str, Quality) {
    if version.is_empty() {
        return (version, Quality::UNKNOWN);
    }

    if let Some(base) = version.strip_suffix(SNAPSHOT_VERSION) {
        return (base.trim_end_matches('-'), Quality::SNAPSHOT);
    }

    if let Some(captures) = SNAPSHOT_TS_REGEX.captures(version) {
        let base = captures.get(1).map(|m| m.as_str()).unwrap_or(version);
        return (base, Quality::SNAPSHOT_TS);
    }

    if let Some(captures) = PRE_RELEASE_REGEX.captures(version) {
        let base = captures.get(1).map(|m| m.as_str()).unwrap_or(version);
        let kind = match captures.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
            Some(s) if s == "alpha" => QualityKind::Alpha,
            _ => QualityKind::Beta,
        };
        let quantity = captures.get(3)
            .map(|m| m.as_str().parse::<i32>().unwrap_or(i32::MAX))
            .unwrap_or(Quality::DEFAULT_QUANTITY);
        return (base, Quality { kind, quantity });
    }

    (version, Quality::RELEASE)
}

pub fn is_snapshot(version: &str) -> bool {
    version.ends_with(SNAPSHOT_VERSION) || SNAPSHOT_TS_REGEX.is_match(version)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    /// digits without leading zeros, "0" for zero
    Number(String),
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Number(a), Segment::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
            (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
        }
    }
}

fn segments(s: &str) -> Vec<Segment> {
    fn push(result: &mut Vec<Segment>, token: &str, numeric: bool) {
        if token.is_empty() {
            return;
        }
        if numeric {
            let trimmed = token.trim_start_matches('0');
            result.push(Segment::Number(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }));
        }
        else {
            result.push(Segment::Text(token.to_ascii_lowercase()));
        }
    }

    let mut result = Vec::new();
    let mut start = 0;
    let mut numeric = false;
    for (idx, ch) in s.char_indices() {
        if ch == '.' || ch == '-' || ch == '_' {
            push(&mut result, &s[start..idx], numeric);
            start = idx + ch.len_utf8();
            continue;
        }
        let is_digit = ch.is_ascii_digit();
        if idx > start && is_digit != numeric {
            push(&mut result, &s[start..idx], numeric);
            start = idx;
        }
        numeric = is_digit;
    }
    push(&mut result, &s[start..], numeric);
    result
}

/// A parsed version string with a strict total order.
///
/// Ordering key, compared in turn: base version segments, quality, snapshot quantity (plain
///  `SNAPSHOT` before timestamped), segments of the full string, raw string. Two versions are equal
///  iff their strings are equal.
#[derive(Debug, Clone)]
pub struct ArtifactVersion {
    raw: String,
    base: Vec<Segment>,
    quality: Quality,
    segments: Vec<Segment>,
}

impl ArtifactVersion {
    pub fn parse(version: &str) -> ArtifactVersion {
        let (base, quality) = split_quality(version);
        ArtifactVersion {
            raw: version.to_string(),
            base: segments(base),
            quality,
            segments: segments(version),
        }
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_snapshot(&self) -> bool {
        self.quality.kind == QualityKind::Snapshot
    }
}

impl Display for ArtifactVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for ArtifactVersion {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl Eq for ArtifactVersion {}

impl PartialOrd for ArtifactVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ArtifactVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.base.cmp(&other.base)
            .then_with(|| self.quality.cmp(&other.quality))
            .then_with(|| self.quality.quantity.cmp(&other.quality.quantity))
            .then_with(|| self.segments.cmp(&other.segments))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

pub fn compare_versions(v1: &str, v2: &str) -> Ordering {
    ArtifactVersion::parse(v1).cmp(&ArtifactVersion::parse(v2))
}

/// Like `compare_versions`, for callers whose inputs may be absent
pub fn checked_compare(v1: Option<&str>, v2: Option<&str>) -> ProxyResult<Ordering> {
    match (v1, v2) {
        (Some(v1), Some(v2)) => Ok(compare_versions(v1, v2)),
        _ => Err(ProxyError::InvalidArgument(format!("cannot compare versions {:?} and {:?}", v1, v2))),
    }
}

/// Single pass, keeping a running maximum. Ties keep the first-seen version.
pub fn find_latest<'a>(versions: impl IntoIterator<Item = &'a str>, exclude_snapshots: bool) -> Option<String> {
    let mut latest: Option<ArtifactVersion> = None;

    for v in versions {
        if exclude_snapshots && is_snapshot(v) {
            continue;
        }
        let candidate = ArtifactVersion::parse(v);
        match &latest {
            Some(current) if candidate.cmp(current) != Ordering::Greater => {}
            _ => latest = Some(candidate),
        }
    }

    latest.map(|v| v.raw)
}

pub fn sort_versions(versions: &mut Vec<String>) {
    versions.sort_by_cached_key(|v| ArtifactVersion::parse(v));
    versions.dedup();
}

/// An interval over qualities, e.g. "releases only"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityRange {
    pub from: Quality,
    pub from_inclusive: bool,
    pub to: Quality,
    pub to_inclusive: bool,
}

impl QualityRange {
    pub const SNAPSHOTS_ONLY: QualityRange = QualityRange { from: Quality::SNAPSHOT, from_inclusive: true, to: Quality::SNAPSHOT_TS, to_inclusive: true };
    pub const ALPHA_ONLY: QualityRange = QualityRange { from: Quality::SNAPSHOT, from_inclusive: false, to: Quality::BETA, to_inclusive: false };
    pub const BETA_ONLY: QualityRange = QualityRange { from: Quality::ALPHA, from_inclusive: false, to: Quality::RELEASE, to_inclusive: false };
    pub const RELEASES_ONLY: QualityRange = QualityRange { from: Quality::RELEASE, from_inclusive: true, to: Quality::RELEASE, to_inclusive: true };
    pub const ALL: QualityRange = QualityRange { from: Quality::SNAPSHOT, from_inclusive: true, to: Quality::RELEASE, to_inclusive: true };

    pub fn create(releases: bool, snapshots: bool) -> ProxyResult<QualityRange> {
        match (releases, snapshots) {
            (true, true) => Ok(QualityRange::ALL),
            (true, false) => Ok(QualityRange { from: Quality::ALPHA, from_inclusive: true, to: Quality::RELEASE, to_inclusive: true }),
            (false, true) => Ok(QualityRange::SNAPSHOTS_ONLY),
            (false, false) => Err(ProxyError::InvalidArgument("a quality range must accept releases or snapshots".to_string())),
        }
    }

    pub fn accepts(&self, quality: &Quality) -> bool {
        let from = quality.cmp(&self.from);
        if from == Ordering::Equal {
            return self.from_inclusive;
        }

        let to = quality.cmp(&self.to);
        if to == Ordering::Equal {
            return self.to_inclusive;
        }

        from == Ordering::Greater && to == Ordering::Less
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: String,
    inclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Restriction {
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl Restriction {
    fn contains(&self, version: &ArtifactVersion) -> bool {
        if let Some(lower) = &self.lower {
            match version.cmp(&ArtifactVersion::parse(&lower.version)) {
                Ordering::Less => return false,
                Ordering::Equal if !lower.inclusive => return false,
                _ => {}
            }
        }
        if let Some(upper) = &self.upper {
            match version.cmp(&ArtifactVersion::parse(&upper.version)) {
                Ordering::Greater => return false,
                Ordering::Equal if !upper.inclusive => return false,
                _ => {}
            }
        }
        true
    }
}

/// A Maven version range such as `[1.0,2.0)`, `(,1.0],[1.2,)` or `[1.5]`.
///
/// A bare version (`1.0`) is treated as an exact match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    restrictions: Vec<Restriction>,
    quality: QualityRange,
}

impl VersionRange {
    pub fn parse(spec: &str) -> ProxyResult<VersionRange> {
        Self::parse_with_quality(spec, QualityRange::ALL)
    }

    pub fn parse_with_quality(spec: &str, quality: QualityRange) -> ProxyResult<VersionRange> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ProxyError::InvalidArgument("empty version range".to_string()));
        }

        if !spec.starts_with('[') && !spec.starts_with('(') {
            let exact = Bound { version: spec.to_string(), inclusive: true };
            return Ok(VersionRange {
                restrictions: vec![Restriction { lower: Some(exact.clone()), upper: Some(exact) }],
                quality,
            });
        }

        let mut restrictions = Vec::new();
        let mut rest = spec;
        while !rest.is_empty() {
            let open_inclusive = match rest.chars().next() {
                Some('[') => true,
                Some('(') => false,
                _ => return Err(invalid_range(spec)),
            };
            let close = rest.find([']', ')']).ok_or_else(|| invalid_range(spec))?;
            let close_inclusive = rest[close..].starts_with(']');
            let body = &rest[1..close];

            let restriction = match body.split_once(',') {
                None => {
                    if !open_inclusive || !close_inclusive || body.trim().is_empty() {
                        return Err(invalid_range(spec));
                    }
                    let exact = Bound { version: body.trim().to_string(), inclusive: true };
                    Restriction { lower: Some(exact.clone()), upper: Some(exact) }
                }
                Some((lower, upper)) => {
                    let lower = lower.trim();
                    let upper = upper.trim();
                    if upper.contains(',') {
                        return Err(invalid_range(spec));
                    }
                    Restriction {
                        lower: (!lower.is_empty()).then(|| Bound { version: lower.to_string(), inclusive: open_inclusive }),
                        upper: (!upper.is_empty()).then(|| Bound { version: upper.to_string(), inclusive: close_inclusive }),
                    }
                }
            };

            if let (Some(lower), Some(upper)) = (&restriction.lower, &restriction.upper) {
                if compare_versions(&lower.version, &upper.version) == Ordering::Greater {
                    return Err(invalid_range(spec));
                }
            }
            restrictions.push(restriction);

            rest = rest[close + 1..].trim_start();
            if let Some(stripped) = rest.strip_prefix(',') {
                rest = stripped.trim_start();
                if rest.is_empty() {
                    return Err(invalid_range(spec));
                }
            }
            else if !rest.is_empty() {
                return Err(invalid_range(spec));
            }
        }

        Ok(VersionRange { restrictions, quality })
    }

    pub fn contains(&self, version: &str) -> bool {
        let parsed = ArtifactVersion::parse(version);
        self.quality.accepts(&parsed.quality())
            && self.restrictions.iter().any(|r| r.contains(&parsed))
    }

    pub fn select_latest<'a>(&self, versions: impl IntoIterator<Item = &'a str>) -> Option<String> {
        versions.into_iter()
            .filter(|v| self.contains(v))
            .map(ArtifactVersion::parse)
            .max()
            .map(|v| v.raw)
    }
}

fn invalid_range(spec: &str) -> ProxyError {
    ProxyError::InvalidArgument(format!("not a valid version range: {:?}", spec))
}
