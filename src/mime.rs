//! Extension to MIME type mapping for media objects

/// Content type used when nothing better is known
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const MIME_TABLE: &[(&str, &str)] = &[
    // video
    ("mp4", "video/mp4"),
    ("m4v", "video/x-m4v"),
    ("m4s", "video/iso.segment"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("avi", "video/x-msvideo"),
    ("wmv", "video/x-ms-wmv"),
    ("flv", "video/x-flv"),
    ("mpeg", "video/mpeg"),
    ("mpg", "video/mpeg"),
    ("ts", "video/mp2t"),
    ("3gp", "video/3gpp"),
    ("ogv", "video/ogg"),
    // audio
    ("mp3", "audio/mpeg"),
    ("m4a", "audio/mp4"),
    ("aac", "audio/aac"),
    ("wav", "audio/wav"),
    ("flac", "audio/flac"),
    ("ogg", "audio/ogg"),
    ("oga", "audio/ogg"),
    ("opus", "audio/opus"),
    ("weba", "audio/webm"),
    ("wma", "audio/x-ms-wma"),
    ("mid", "audio/midi"),
    ("midi", "audio/midi"),
    // streaming manifests and subtitles
    ("m3u8", "application/vnd.apple.mpegurl"),
    ("mpd", "application/dash+xml"),
    ("vtt", "text/vtt"),
    ("srt", "application/x-subrip"),
    // images (posters, thumbnails)
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    // misc
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
];

/// MIME type for a file extension (case-insensitive, no leading dot)
pub fn from_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.trim_start_matches('.');
    MIME_TABLE
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
}

/// MIME type for an object name, falling back to `application/octet-stream`
pub fn from_object_name(object: &str) -> &'static str {
    let file_name = object.rsplit('/').next().unwrap_or(object);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            from_extension(ext).unwrap_or(DEFAULT_CONTENT_TYPE)
        }
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Pick the content type for an object
///
/// A specific type reported by the store wins. A missing, blank or generic
/// `application/octet-stream` value falls back to the extension table.
pub fn resolve_content_type(reported: Option<&str>, object: &str) -> String {
    match reported.map(str::trim) {
        Some(ct) if !ct.is_empty() && !ct.eq_ignore_ascii_case(DEFAULT_CONTENT_TYPE) => {
            ct.to_string()
        }
        _ => from_object_name(object).to_string(),
    }
}
