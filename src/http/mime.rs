use std::path::Path;

/// Content type used when a key is not in the table.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Returns the content type for a file extension (without the dot).
///
/// Matching ignores ASCII case. Unknown keys map to [`DEFAULT_CONTENT_TYPE`].
///
/// # Example
///
/// ```
/// # use prefork::http::mime::content_type;
/// assert_eq!(content_type("html"), "text/html");
/// assert_eq!(content_type("PNG"), "image/png");
/// assert_eq!(content_type("xyz"), "text/plain");
/// ```
pub fn content_type(key: &str) -> &'static str {
    match key.to_ascii_lowercase().as_str() {
        // Text
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "csv" => "text/csv",
        "xml" => "application/xml",

        // Images
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",

        // Application
        "json" => "application/json",
        "swf" => "application/x-shockwave-flash",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",

        // Fonts
        "woff" => "font/woff",
        "woff2" => "font/woff2",

        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// The MIME key of a path: the extension of its last segment, or `default`
/// when there is none.
pub fn key_for<'a>(path: &'a Path, default: &'a str) -> &'a str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_entries() {
        assert_eq!(content_type("txt"), "text/plain");
        assert_eq!(content_type("css"), "text/css");
        assert_eq!(content_type("js"), "text/javascript");
        assert_eq!(content_type("jpg"), "image/jpeg");
        assert_eq!(content_type("json"), "application/json");
        assert_eq!(content_type("swf"), "application/x-shockwave-flash");
    }

    #[test]
    fn unknown_falls_back_to_plain_text() {
        assert_eq!(content_type(""), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type("tar"), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn key_from_path() {
        assert_eq!(key_for(Path::new("/a/b/index.html"), "html"), "html");
        assert_eq!(key_for(Path::new("/archive.tar.gz"), "html"), "gz");
        assert_eq!(key_for(Path::new("/README"), "html"), "html");
        assert_eq!(key_for(Path::new("/dir.d/README"), "html"), "html");
    }
}
