//! WebDAV mount settings and credential unlock

mod api;
mod types;

pub use api::{MountApiError, MountList, MountSettingsApi};
pub use types::{MountCredential, MountSetting, MountUnlockFailure};
