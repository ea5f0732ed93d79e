//! Extension → content-type lookup for served site files.

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Resolve a content type from the extension of the final path segment.
///
/// No content sniffing: unknown or missing extensions fall back to
/// `application/octet-stream`.
pub fn resolve_mime_type(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return DEFAULT_MIME_TYPE;
    };

    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" | "cjs" => "application/javascript; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "map" => "application/json; charset=utf-8",
        "webmanifest" => "application/manifest+json",
        "xml" => "application/xml; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",

        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",

        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",

        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",

        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => DEFAULT_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_web_types() {
        assert_eq!(resolve_mime_type("index.html"), "text/html; charset=utf-8");
        assert_eq!(
            resolve_mime_type("assets/app.min.js"),
            "application/javascript; charset=utf-8"
        );
        assert_eq!(resolve_mime_type("styles/site.css"), "text/css; charset=utf-8");
        assert_eq!(resolve_mime_type("img/logo.svg"), "image/svg+xml");
        assert_eq!(resolve_mime_type("fonts/inter.woff2"), "font/woff2");
        assert_eq!(resolve_mime_type("pkg/app_bg.wasm"), "application/wasm");
        assert_eq!(
            resolve_mime_type("assets/app.js.map"),
            "application/json; charset=utf-8"
        );
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert_eq!(resolve_mime_type("PHOTO.JPG"), "image/jpeg");
        assert_eq!(resolve_mime_type("Doc.PdF"), "application/pdf");
    }

    #[test]
    fn unknown_or_missing_extensions_fall_back() {
        assert_eq!(resolve_mime_type("LICENSE"), DEFAULT_MIME_TYPE);
        assert_eq!(resolve_mime_type("archive.xyz"), DEFAULT_MIME_TYPE);
        assert_eq!(resolve_mime_type("v1.2/README"), DEFAULT_MIME_TYPE);
        assert_eq!(resolve_mime_type("trailing."), DEFAULT_MIME_TYPE);
    }
}
