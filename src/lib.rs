//! Encrypted WebDAV mount credentials and ranged parallel downloads
//!
//! - `crypto`: server public key codec and the RSA/AES session exchange
//!   used to unlock mount passwords
//! - `mount`: mount settings API; decrypts passwords into `MountCredential`s
//! - `webdav`: path resolution and the `WebDavClient` seam
//! - `download`: transfer registry and background downloads on top of `range_dl`
//! - `config`: JSON-loadable client configuration

pub mod config;
pub mod crypto;
pub mod download;
pub mod mount;
pub mod webdav;

pub use config::{ClientConfig, ConfigError};
pub use download::{DownloadManager, RemoteFileRef, TaskId, TaskSnapshot, TaskStatus, TransferRegistry};
pub use mount::{MountCredential, MountSetting, MountSettingsApi};
pub use webdav::{DavClient, RemoteEntry, WebDavClient, WebDavError};

pub use range_dl;
