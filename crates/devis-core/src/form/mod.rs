//! Purchase-order (BDC) generation.

mod acroform;
mod fields;

use std::path::{Path, PathBuf};

use tracing::debug;

pub use acroform::{AcroFormWriter, FormWriter};
pub use fields::{build_field_values, output_file_name, FieldValues, CHECKBOX_ON, MANDATORY_FIELDS};

use crate::error::FormError;

/// File name of the purchase-order template.
pub const TEMPLATE_NAME: &str = "bon de commande V1.pdf";

/// Subdirectory holding the template under each search directory.
pub const TEMPLATE_SUBDIR: &str = "Templates";

/// Candidate template paths, in search order.
pub fn candidate_template_paths(search_dirs: &[PathBuf]) -> Vec<PathBuf> {
    search_dirs
        .iter()
        .map(|dir| dir.join(TEMPLATE_SUBDIR).join(TEMPLATE_NAME))
        .collect()
}

/// Find the template: an explicit path wins, then each search directory.
pub fn locate_template(
    explicit: Option<&Path>,
    search_dirs: &[PathBuf],
) -> Result<PathBuf, FormError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(FormError::TemplateNotFound(path.display().to_string()));
    }

    let candidates = candidate_template_paths(search_dirs);
    for candidate in &candidates {
        debug!("Looking for template at {}", candidate.display());
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }

    let expected = candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(FormError::TemplateNotFound(format!(
        "place '{}' in one of: {}",
        TEMPLATE_NAME, expected
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_locate_template_search_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let templates = second.path().join(TEMPLATE_SUBDIR);
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(templates.join(TEMPLATE_NAME), b"%PDF-1.5").unwrap();

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(
            locate_template(None, &dirs).unwrap(),
            templates.join(TEMPLATE_NAME)
        );

        let err = locate_template(None, &dirs[..1]).unwrap_err();
        assert!(err.to_string().contains(TEMPLATE_NAME));
    }

    #[test]
    fn test_explicit_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bdc.pdf");
        assert!(matches!(
            locate_template(Some(path.as_path()), &[]),
            Err(FormError::TemplateNotFound(_))
        ));

        std::fs::write(&path, b"%PDF-1.5").unwrap();
        assert_eq!(locate_template(Some(path.as_path()), &[]).unwrap(), path);
    }
}
