use percent_encoding::percent_decode_str;
use url::Url;

/// Derives the stored file name from the last path segment of the source URL.
///
/// Query strings are ignored. Falls back to `download_<uuid>` when the path
/// has no usable segment (e.g. `http://host/`).
pub fn get_filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().to_string())
        .map(|name| sanitize_filename(&name))
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| format!("download_{}", uuid::Uuid::new_v4()))
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(
        |c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_' && c != ' ',
        "_",
    )
}
