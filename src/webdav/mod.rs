//! WebDAV access to unlocked mounts

mod client;
mod path;

pub use client::{DavClient, RemoteEntry, WebDavClient, WebDavError};
pub use path::{build_url, encode_path, resolve_path};
