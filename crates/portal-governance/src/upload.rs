//! File upload validation.
//!
//! [`validate_uploads`] is pure: it inspects file metadata only and reports
//! every violated constraint rather than stopping at the first.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GovernanceError, Result};

/// Constraints for one upload endpoint.
///
/// Fields missing from a deserialized policy keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileUploadPolicy {
    /// Maximum files per request.
    pub max_files: usize,

    /// Maximum size of a single file in bytes.
    pub max_file_size: usize,

    /// Allowed MIME types. Empty allows any.
    pub allowed_mime_types: Vec<String>,

    /// Allowed extensions without the dot. Empty allows any.
    pub allowed_extensions: Vec<String>,
}

impl Default for FileUploadPolicy {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_file_size: 5 * 1024 * 1024, // 5MB
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
                "application/pdf".to_string(),
            ],
            allowed_extensions: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "webp".to_string(),
                "pdf".to_string(),
            ],
        }
    }
}

impl FileUploadPolicy {
    /// Photos only, e.g. property images.
    #[must_use]
    pub fn images() -> Self {
        Self {
            max_files: 10,
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            allowed_extensions: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "webp".to_string(),
            ],
            ..Self::default()
        }
    }

    /// Set the file count limit.
    #[must_use]
    pub fn with_max_files(mut self, max: usize) -> Self {
        self.max_files = max;
        self
    }

    /// Set the per-file size limit.
    #[must_use]
    pub fn with_max_file_size(mut self, max: usize) -> Self {
        self.max_file_size = max;
        self
    }

    fn mime_allowed(&self, content_type: &str) -> bool {
        if self.allowed_mime_types.is_empty() {
            return true;
        }
        let essence = content_type
            .parse::<mime::Mime>()
            .map_or_else(|_| content_type.trim().to_ascii_lowercase(), |m| {
                m.essence_str().to_ascii_lowercase()
            });
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&essence))
    }

    fn extension_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions.is_empty()
            || self
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }
}

/// Metadata of one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Client supplied file name.
    pub filename: String,
    /// Declared MIME type.
    pub content_type: String,
    /// Size in bytes.
    pub size: usize,
}

impl UploadedFile {
    /// Create file metadata.
    #[must_use]
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, size: usize) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            size,
        }
    }
}

/// Aggregate result of upload validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadValidation {
    /// Whether no constraint was violated.
    pub valid: bool,
    /// Every violated constraint.
    pub errors: Vec<String>,
}

impl UploadValidation {
    /// Convert into a `FileUploadRejected` error when invalid.
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(GovernanceError::FileUploadRejected {
                errors: self.errors,
            })
        }
    }
}

/// Whether a file name tries to escape its directory.
#[must_use]
pub fn has_path_traversal(filename: &str) -> bool {
    filename.contains("..") || filename.contains('/') || filename.contains('\\') || filename.contains('\0')
}

/// Check `files` against `policy`, collecting every violation.
#[must_use]
pub fn validate_uploads(files: &[UploadedFile], policy: &FileUploadPolicy) -> UploadValidation {
    let mut errors = Vec::new();

    if files.len() > policy.max_files {
        errors.push(format!(
            "Too many files: {} uploaded, at most {} allowed",
            files.len(),
            policy.max_files
        ));
    }

    for file in files {
        let name = &file.filename;

        if has_path_traversal(name) {
            errors.push(format!("Invalid filename '{name}': path traversal is not allowed"));
        }

        if file.size > policy.max_file_size {
            errors.push(format!(
                "File '{name}' is {} bytes, exceeding the {} byte limit",
                file.size, policy.max_file_size
            ));
        }

        if !policy.mime_allowed(&file.content_type) {
            errors.push(format!(
                "File '{name}' has disallowed type '{}'",
                file.content_type
            ));
        }

        match Path::new(name).extension().and_then(|ext| ext.to_str()) {
            Some(ext) if policy.extension_allowed(ext) => {}
            Some(ext) => errors.push(format!("File '{name}' has disallowed extension '.{ext}'")),
            None if policy.allowed_extensions.is_empty() => {}
            None => errors.push(format!("File '{name}' has no extension")),
        }
    }

    UploadValidation {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FileUploadPolicy {
        FileUploadPolicy::default().with_max_file_size(1_000)
    }

    #[test]
    fn test_valid_upload() {
        let files = [
            UploadedFile::new("passport.pdf", "application/pdf", 900),
            UploadedFile::new("room.JPG", "image/jpeg", 10),
        ];
        let result = validate_uploads(&files, &policy());
        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn test_reports_every_violation() {
        let files = [UploadedFile::new("setup.exe", "application/x-msdownload", 5_000)];
        let result = validate_uploads(&files, &policy());

        assert!(!result.valid);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors[0].contains("5000 bytes"));
        assert!(result.errors[1].contains("application/x-msdownload"));
        assert!(result.errors[2].contains(".exe"));
    }

    #[test]
    fn test_oversized_and_wrong_mime_gives_two_errors() {
        let files = [UploadedFile::new("scan.pdf", "text/html", 2_000)];
        let result = validate_uploads(&files, &policy());
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_path_traversal_names_the_file() {
        let files = [UploadedFile::new("../../etc/passwd", "application/pdf", 10)];
        let result = validate_uploads(&files, &policy());

        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("../../etc/passwd") && e.contains("path traversal")));
    }

    #[test]
    fn test_separators_are_traversal() {
        assert!(has_path_traversal("a/b.png"));
        assert!(has_path_traversal(r"a\b.png"));
        assert!(has_path_traversal("..png"));
        assert!(!has_path_traversal("beach-house.png"));
    }

    #[test]
    fn test_too_many_files() {
        let files: Vec<_> = (0..7)
            .map(|i| UploadedFile::new(format!("p{i}.png"), "image/png", 10))
            .collect();
        let result = validate_uploads(&files, &policy());
        assert_eq!(result.errors, vec!["Too many files: 7 uploaded, at most 5 allowed"]);
    }

    #[test]
    fn test_mime_parameters_and_case_are_ignored() {
        let files = [UploadedFile::new("a.png", "Image/PNG; charset=binary", 10)];
        assert!(validate_uploads(&files, &policy()).valid);
    }

    #[test]
    fn test_empty_allow_lists_accept_anything() {
        let open = FileUploadPolicy {
            allowed_mime_types: Vec::new(),
            allowed_extensions: Vec::new(),
            ..policy()
        };
        let files = [UploadedFile::new("README", "text/plain", 10)];
        assert!(validate_uploads(&files, &open).valid);
    }

    #[test]
    fn test_partial_policy_keeps_default_allow_lists() {
        let policy: FileUploadPolicy = serde_json::from_str(r#"{"max_files": 2}"#).unwrap();
        assert_eq!(policy.max_files, 2);
        assert_eq!(policy.max_file_size, 5 * 1024 * 1024);
        assert!(policy.allowed_extensions.iter().any(|e| e == "pdf"));
    }

    #[test]
    fn test_rejection_error_body() {
        let files = [UploadedFile::new("x.gif", "image/gif", 10)];
        let err = validate_uploads(&files, &policy()).into_result().unwrap_err();
        let body = err.to_body();
        assert_eq!(body["message"], "File upload rejected");
        assert_eq!(body["errors"].as_array().map(Vec::len), Some(2));
    }
}
