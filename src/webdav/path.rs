//! Mount-relative paths to server paths and URLs

use reqwest::Url;

use crate::mount::MountCredential;

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Join the mount root and `relative` into a server path (no leading slash).
///
/// The root is skipped when the endpoint URL already ends with it, so
/// `https://host/dav/files` with root `files` does not become `files/files`.
pub fn resolve_path(mount: &MountCredential, relative: &str) -> String {
    let root = mount.root_path.trim_matches('/');
    let base_last = Url::parse(mount.endpoint_url.trim_end_matches('/'))
        .ok()
        .and_then(|url| segments(url.path()).last().map(str::to_string));
    let base_contains_root = !root.is_empty() && base_last.as_deref() == Some(root);

    let mut parts: Vec<&str> = Vec::new();
    if !root.is_empty() && !base_contains_root {
        parts.extend(segments(root));
    }
    parts.extend(segments(relative));
    parts.join("/")
}

/// Percent-encode every segment of `path`, keeping the `/` separators
pub fn encode_path(path: &str) -> String {
    segments(path)
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// `base` + encoded `path`
pub fn build_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let encoded = encode_path(path);
    if encoded.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, encoded)
    }
}

/// Decoded path of an href or URL with the outer slashes trimmed.
/// `https://h/dav/a%20b/` and `/dav/a b` both give `dav/a b`.
pub(crate) fn href_path(href: &str) -> String {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    let decoded = urlencoding::decode(&path)
        .map(|s| s.into_owned())
        .unwrap_or(path);
    decoded.trim_matches('/').to_string()
}

/// Last segment of a (possibly percent-encoded) href
pub(crate) fn href_name(href: &str) -> String {
    let decoded = urlencoding::decode(href)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| href.to_string());
    segments(&decoded).last().unwrap_or_default().to_string()
}
