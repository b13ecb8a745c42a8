//! WebDAV client seam and its reqwest_dav implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest_dav::list_cmd::ListEntity;
use reqwest_dav::{Auth, ClientBuilder, Depth};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::path::{build_url, encode_path, href_name, href_path, resolve_path};
use crate::mount::MountCredential;

#[derive(Debug, Error)]
pub enum WebDavError {
    #[error("invalid WebDAV configuration for mount {mount_id}: {message}")]
    Config { mount_id: i64, message: String },

    #[error("WebDAV {op} {path} failed on mount {mount_id}: {message}")]
    Operation {
        mount_id: i64,
        op: &'static str,
        path: String,
        message: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A file or directory in a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    /// Path relative to the mount root
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Human-readable size, `-` for directories
    pub fn formatted_size(&self) -> String {
        if self.is_directory {
            return "-".to_string();
        }
        let kb = self.size as f64 / 1024.0;
        let mb = kb / 1024.0;
        let gb = mb / 1024.0;
        if gb >= 1.0 {
            format!("{:.2} GB", gb)
        } else if mb >= 1.0 {
            format!("{:.2} MB", mb)
        } else if kb >= 1.0 {
            format!("{:.2} KB", kb)
        } else {
            format!("{} B", self.size)
        }
    }
}

/// Directory and object operations on one unlocked mount.
/// All paths are relative to the mount root.
#[async_trait]
pub trait WebDavClient: Send + Sync {
    fn credential(&self) -> &MountCredential;

    /// Absolute URL of an object, for raw (ranged) GETs
    fn object_url(&self, relative: &str) -> String {
        let mount = self.credential();
        build_url(&mount.endpoint_url, &resolve_path(mount, relative))
    }

    async fn list(&self, relative: &str) -> Result<Vec<RemoteEntry>, WebDavError>;

    async fn upload(&self, local: &Path, relative: &str) -> Result<(), WebDavError>;

    async fn create_directory(&self, relative: &str) -> Result<(), WebDavError>;

    async fn delete(&self, relative: &str) -> Result<(), WebDavError>;

    async fn move_to(&self, from: &str, to: &str) -> Result<(), WebDavError>;

    /// Whether the mount root can be listed with these credentials
    async fn test_connection(&self) -> bool;
}

/// `WebDavClient` over `reqwest_dav` with Basic auth
pub struct DavClient {
    client: reqwest_dav::Client,
    mount: MountCredential,
}

impl DavClient {
    pub fn new(mount: MountCredential) -> Result<Self, WebDavError> {
        if mount.endpoint_url.trim().is_empty() {
            return Err(WebDavError::Config {
                mount_id: mount.mount_id,
                message: "endpoint URL is empty".to_string(),
            });
        }

        let client = ClientBuilder::new()
            .set_host(mount.endpoint_url.trim_end_matches('/').to_string())
            .set_auth(Auth::Basic(mount.username.clone(), mount.password.clone()))
            .build()
            .map_err(|e| WebDavError::Config {
                mount_id: mount.mount_id,
                message: e.to_string(),
            })?;

        Ok(Self { client, mount })
    }

    /// Encoded server path for a mount-relative path
    fn server_path(&self, relative: &str) -> String {
        encode_path(&resolve_path(&self.mount, relative))
    }

    fn op_error(&self, op: &'static str, path: &str, e: reqwest_dav::Error) -> WebDavError {
        WebDavError::Operation {
            mount_id: self.mount.mount_id,
            op,
            path: path.to_string(),
            message: e.to_string(),
        }
    }
}

fn child_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

#[async_trait]
impl WebDavClient for DavClient {
    fn credential(&self) -> &MountCredential {
        &self.mount
    }

    async fn list(&self, relative: &str) -> Result<Vec<RemoteEntry>, WebDavError> {
        let server_path = self.server_path(relative);
        let listed_dir = href_path(&self.object_url(relative));

        let entities = self
            .client
            .list(&server_path, Depth::Number(1))
            .await
            .map_err(|e| self.op_error("list", relative, e))?;

        let mut entries = Vec::with_capacity(entities.len());
        for (index, entity) in entities.into_iter().enumerate() {
            let (href, is_directory, size, last_modified) = match entity {
                ListEntity::File(file) => (
                    file.href,
                    false,
                    file.content_length.max(0) as u64,
                    file.last_modified,
                ),
                ListEntity::Folder(folder) => (folder.href, true, 0, folder.last_modified),
            };
            // a depth-1 PROPFIND also reports the directory itself, normally first
            if href_path(&href) == listed_dir || (index == 0 && is_directory) {
                continue;
            }
            let name = href_name(&href);
            if name.is_empty() {
                continue;
            }
            entries.push(RemoteEntry {
                path: child_path(relative, &name),
                name,
                is_directory,
                size,
                last_modified: Some(last_modified),
            });
        }

        debug!(
            "webdav_listed: mount={} path={} entries={}",
            self.mount.mount_id,
            relative,
            entries.len()
        );
        Ok(entries)
    }

    async fn upload(&self, local: &Path, relative: &str) -> Result<(), WebDavError> {
        let body = tokio::fs::read(local).await.map_err(|e| WebDavError::Io {
            path: local.to_path_buf(),
            source: e,
        })?;
        let size = body.len();
        self.client
            .put(&self.server_path(relative), body)
            .await
            .map_err(|e| self.op_error("put", relative, e))?;
        info!(
            "webdav_uploaded: mount={} path={} bytes={}",
            self.mount.mount_id, relative, size
        );
        Ok(())
    }

    async fn create_directory(&self, relative: &str) -> Result<(), WebDavError> {
        self.client
            .mkcol(&self.server_path(relative))
            .await
            .map_err(|e| self.op_error("mkcol", relative, e))
    }

    async fn delete(&self, relative: &str) -> Result<(), WebDavError> {
        self.client
            .delete(&self.server_path(relative))
            .await
            .map_err(|e| self.op_error("delete", relative, e))
    }

    async fn move_to(&self, from: &str, to: &str) -> Result<(), WebDavError> {
        self.client
            .mv(&self.server_path(from), &self.server_path(to))
            .await
            .map_err(|e| self.op_error("move", from, e))
    }

    async fn test_connection(&self) -> bool {
        match self.client.list(&self.server_path(""), Depth::Number(0)).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    "webdav_connection_failed: mount={} error={}",
                    self.mount.mount_id, e
                );
                false
            }
        }
    }
}
