//! Allow-list checks for incoming image uploads and the names they are stored under.

use uuid::Uuid;

pub const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/gif"];
pub const ALLOWED_EXTENSIONS: [&str; 4] = [".jpeg", ".jpg", ".png", ".gif"];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Rejection {
    #[error("content type {0:?} is not allowed")]
    ContentType(Option<String>),
    #[error("extension {0:?} is not allowed")]
    Extension(String),
}

/// The client-supplied metadata of a `file` part. None of it is trusted.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: Option<String>,
}

impl UploadRequest {
    /// Checks both allow-lists and returns the normalized extension to store under.
    pub fn validate(&self) -> Result<String, Rejection> {
        let content_type_allowed = self
            .content_type
            .as_deref()
            .map(essence)
            .is_some_and(|essence| ALLOWED_CONTENT_TYPES.contains(&essence.as_str()));
        if !content_type_allowed {
            return Err(Rejection::ContentType(self.content_type.clone()));
        }

        let ext = extension(&self.file_name).to_ascii_lowercase();
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(Rejection::Extension(ext));
        }
        Ok(ext)
    }
}

/// Suffix of the last path component starting at its final `.`, or `""` if it has none.
pub fn extension(file_name: &str) -> &str {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    match base.rfind('.') {
        Some(dot) => &base[dot..],
        None => "",
    }
}

/// A fresh collision-resistant file name. Nothing from the client goes into it
/// except the already validated extension.
pub fn stored_name(extension: &str) -> String {
    format!("{}{}", Uuid::new_v4(), extension)
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
