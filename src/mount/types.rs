//! Mount settings as served (encrypted) and as unlocked (in memory)

use range_dl::BasicAuth;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{DecryptError, SessionSecret};

/// One WebDAV mount as returned by the API; the password is still encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountSetting {
    pub id: i64,
    #[serde(default)]
    pub group_id: String,
    pub mount_name: String,
    pub webdav_url: String,
    #[serde(default)]
    pub webdav_user_name: String,
    /// Base64 AES-128-CBC ciphertext, empty when no password is set
    #[serde(default)]
    pub webdav_password: String,
    #[serde(default)]
    pub webdav_root_path: String,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub del_flag: i32,
    #[serde(default)]
    pub user_id: String,
}

impl MountSetting {
    pub fn is_deleted(&self) -> bool {
        self.del_flag != 0
    }
}

/// A mount whose password has been decrypted. Never serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct MountCredential {
    pub mount_id: i64,
    pub name: String,
    pub endpoint_url: String,
    pub root_path: String,
    pub username: String,
    pub password: String,
}

impl MountCredential {
    /// Decrypt `setting`'s password with the secret of the exchange that fetched it
    pub fn unlock(setting: &MountSetting, secret: &SessionSecret) -> Result<Self, DecryptError> {
        let password = secret.unwrap_password(&setting.webdav_password)?;
        Ok(Self {
            mount_id: setting.id,
            name: setting.mount_name.clone(),
            endpoint_url: setting.webdav_url.clone(),
            root_path: setting.webdav_root_path.clone(),
            username: setting.webdav_user_name.clone(),
            password,
        })
    }

    pub fn basic_auth(&self) -> BasicAuth {
        BasicAuth::new(&self.username, &self.password)
    }
}

impl fmt::Debug for MountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountCredential")
            .field("mount_id", &self.mount_id)
            .field("name", &self.name)
            .field("endpoint_url", &self.endpoint_url)
            .field("root_path", &self.root_path)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A mount that could not be unlocked
#[derive(Debug)]
pub struct MountUnlockFailure {
    pub mount_id: i64,
    pub mount_name: String,
    pub error: DecryptError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MountListRequest<'a> {
    pub group_id: &'a str,
    pub encrypt_key: &'a str,
    pub encrypt_iv: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MountListResponse {
    pub code: i32,
    #[serde(default)]
    pub data: Option<MountListData>,
    #[serde(default)]
    pub msg: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct MountListData {
    #[serde(default)]
    pub list: Vec<MountSetting>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_mount_json() {
        let json = r#"{
            "id": 42,
            "groupId": "g-1",
            "mountName": "Team share",
            "webdavUrl": "https://dav.example.com/remote.php/dav/files/bob",
            "webdavUserName": "bob",
            "webdavPassword": "",
            "webdavRootPath": "/shared",
            "createTime": 1700000000,
            "delFlag": 0,
            "userId": "u-9"
        }"#;
        let setting: MountSetting = serde_json::from_str(json).unwrap();
        assert_eq!(setting.id, 42);
        assert_eq!(setting.mount_name, "Team share");
        assert_eq!(setting.webdav_root_path, "/shared");
        assert!(!setting.is_deleted());
    }

    #[test]
    fn request_uses_camel_case_keys() {
        let body = serde_json::to_value(MountListRequest {
            group_id: "g-1",
            encrypt_key: "k",
            encrypt_iv: "i",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "groupId": "g-1", "encryptKey": "k", "encryptIv": "i" })
        );
    }

    #[test]
    fn credential_debug_hides_password() {
        let secret = SessionSecret::from_parts([1u8; 16], [2u8; 16]);
        let setting = MountSetting {
            id: 7,
            group_id: String::new(),
            mount_name: "m".into(),
            webdav_url: "https://dav.example.com".into(),
            webdav_user_name: "alice".into(),
            webdav_password: String::new(),
            webdav_root_path: String::new(),
            create_time: 0,
            del_flag: 0,
            user_id: String::new(),
        };
        let mut credential = MountCredential::unlock(&setting, &secret).unwrap();
        assert_eq!(credential.password, "");
        credential.password = "top-secret".into();
        let debug = format!("{:?}", credential);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("top-secret"));
    }
}
