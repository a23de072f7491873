use std::path::Path;

/// URL and file helpers shared by the config loader and the HTTP client
pub struct UrlUtils;

impl UrlUtils {
    /// Make sure a base URL ends with exactly one `/` so endpoint paths can be appended
    pub fn normalize_base(endpoint: &str) -> String {
        let trimmed = endpoint.trim().trim_end_matches('/');
        format!("{}/", trimmed)
    }

    /// Whether the endpoint already carries the trailing slash the service paths expect
    pub fn has_trailing_slash(endpoint: &str) -> bool {
        endpoint.trim().ends_with('/')
    }

    /// `<base>upload`
    pub fn upload_url(base: &str) -> String {
        format!("{}upload", base)
    }

    /// `<base>thumbnails/<id>`
    pub fn thumbnails_url(base: &str, id: &str) -> String {
        format!("{}thumbnails/{}", base, id)
    }

    /// Guess a MIME type from the file extension; the service only keys off png/jpeg
    pub fn mime_for_path(path: &Path) -> &'static str {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            _ => "application/octet-stream",
        }
    }
}
