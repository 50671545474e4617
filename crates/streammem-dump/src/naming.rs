//! Artifact file naming.
//!
//! `<artifact>_<dims joined by x>_<provenance tag>.bin`, e.g.
//! `post_mem_embedding_1x640x256_rs.bin`.  Artifact names may contain `_`;
//! the dims segment and the tag may not, which keeps parsing unambiguous.

use streammem_types::{element_count, shape_label};

use crate::DumpError;

/// Subdirectory of a frame's output directory that holds its artifacts.
pub const ARTIFACT_SUBDIR: &str = "out";

const EXTENSION: &str = ".bin";

/// Build the file name for one artifact.
pub fn artifact_file_name(artifact: &str, shape: &[usize], tag: &str) -> String {
    format!("{artifact}_{}_{tag}{EXTENSION}", shape_label(shape))
}

/// The parts encoded in an artifact file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub artifact: String,
    pub shape: Vec<usize>,
    pub tag: String,
}

impl ArtifactFile {
    /// `None` when the encoded dims overflow `usize`.
    pub fn element_count(&self) -> Option<usize> {
        element_count(&self.shape)
    }
}

/// Split a file name produced by [`artifact_file_name`] back into its parts.
///
/// Returns `None` for anything that does not follow the convention,
/// including dims whose product overflows.
pub fn parse_artifact_file_name(name: &str) -> Option<ArtifactFile> {
    let stem = name.strip_suffix(EXTENSION)?;
    let (rest, tag) = stem.rsplit_once('_')?;
    let (artifact, dims) = rest.rsplit_once('_')?;
    if artifact.is_empty() || tag.is_empty() {
        return None;
    }
    let shape = dims
        .split('x')
        .map(|d| d.parse::<usize>().ok())
        .collect::<Option<Vec<_>>>()?;
    element_count(&shape)?;
    Some(ArtifactFile {
        artifact: artifact.to_string(),
        shape,
        tag: tag.to_string(),
    })
}

/// Reject tags that would make file names unparseable or escape the directory.
pub fn validate_tag(tag: &str) -> Result<(), DumpError> {
    let bad = tag.is_empty()
        || tag
            .chars()
            .any(|c| c == '_' || c == '/' || c == '\\' || c == '.' || c.is_whitespace());
    if bad {
        return Err(DumpError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_matches_reference_convention() {
        assert_eq!(
            artifact_file_name("all_cls_scores", &[6, 1, 428, 10], "pth"),
            "all_cls_scores_6x1x428x10_pth.bin"
        );
    }

    #[test]
    fn parse_inverts_file_name() {
        let name = artifact_file_name("post_mem_egopose", &[1, 640, 4, 4], "rs");
        let parsed = parse_artifact_file_name(&name).unwrap();
        assert_eq!(parsed.artifact, "post_mem_egopose");
        assert_eq!(parsed.shape, vec![1, 640, 4, 4]);
        assert_eq!(parsed.tag, "rs");
        assert_eq!(parsed.element_count(), Some(640 * 16));
    }

    #[test]
    fn parse_rejects_foreign_files() {
        assert!(parse_artifact_file_name("frame.json").is_none());
        assert!(parse_artifact_file_name("notes_pth.bin").is_none());
        assert!(parse_artifact_file_name("x_1xQ_pth.bin").is_none());
        assert!(parse_artifact_file_name("x_1x2_.bin").is_none());
        assert!(parse_artifact_file_name("x_18446744073709551615x2_rs.bin").is_none());
    }

    #[test]
    fn tag_validation() {
        assert!(validate_tag("rs").is_ok());
        assert!(validate_tag("pth").is_ok());
        assert!(validate_tag("").is_err());
        assert!(validate_tag("my_tag").is_err());
        assert!(validate_tag("a/b").is_err());
        assert!(validate_tag("a b").is_err());
    }
}
