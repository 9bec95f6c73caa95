//! Maven specific knowledge: coordinates and versions, the repository path layouts, and the
//!  `maven-metadata.xml` documents.

pub mod coordinates;
pub mod layout;
pub mod maven_repo_metadata;
pub mod metadata_xml;
pub mod paths;
pub mod version;
