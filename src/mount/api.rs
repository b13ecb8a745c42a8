//! Mount settings API client

use log::{debug, info, warn};
use reqwest::Client;
use thiserror::Error;

use super::types::{
    MountCredential, MountListRequest, MountListResponse, MountSetting, MountUnlockFailure,
};
use crate::crypto::{CredentialExchange, ExchangeError, KeySource};

const MOUNT_LIST_PATH: &str = "v1/mount-setting/list";

/// `code` value the API uses for success
const API_SUCCESS: i32 = 1;

#[derive(Debug, Error)]
pub enum MountApiError {
    #[error("key exchange failed: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("mount API error {code}: {msg}")]
    Api { code: i32, msg: String },
}

/// Result of one `list_mounts` call
#[derive(Debug)]
pub struct MountList {
    pub mounts: Vec<MountCredential>,
    /// Mounts returned by the server whose password could not be decrypted
    pub failures: Vec<MountUnlockFailure>,
    pub key_source: KeySource,
}

pub struct MountSettingsApi {
    client: Client,
    base_url: String,
    token: String,
    exchange: CredentialExchange,
}

impl MountSettingsApi {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        exchange: CredentialExchange,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
            exchange,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Fetch the group's mounts and decrypt their passwords.
    ///
    /// One key exchange covers the whole list. Deleted mounts are skipped.
    pub async fn list_mounts(&self, group_id: &str) -> Result<MountList, MountApiError> {
        let exchange = self.exchange.prepare_exchange().await?;
        let url = self.endpoint(MOUNT_LIST_PATH);

        let response = self
            .client
            .post(&url)
            .header("token", &self.token)
            .json(&MountListRequest {
                group_id,
                encrypt_key: &exchange.encrypted_key,
                encrypt_iv: &exchange.encrypted_iv,
            })
            .send()
            .await
            .map_err(|e| MountApiError::Request {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MountApiError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body: MountListResponse = response.json().await.map_err(|e| MountApiError::Decode {
            url: url.clone(),
            source: e,
        })?;
        if body.code != API_SUCCESS {
            return Err(MountApiError::Api {
                code: body.code,
                msg: body.msg,
            });
        }

        let settings: Vec<MountSetting> = body.data.map(|d| d.list).unwrap_or_default();
        let secret = exchange.secret();
        let mut mounts = Vec::with_capacity(settings.len());
        let mut failures = Vec::new();

        for setting in settings {
            if setting.is_deleted() {
                debug!("mount_skipped_deleted: mount={}", setting.id);
                continue;
            }
            match MountCredential::unlock(&setting, secret) {
                Ok(credential) => mounts.push(credential),
                Err(error) => {
                    warn!(
                        "mount_unlock_failed: mount={} name={} error={}",
                        setting.id, setting.mount_name, error
                    );
                    failures.push(MountUnlockFailure {
                        mount_id: setting.id,
                        mount_name: setting.mount_name,
                        error,
                    });
                }
            }
        }

        info!(
            "mounts_listed: group={} unlocked={} failed={} key_source={}",
            group_id,
            mounts.len(),
            failures.len(),
            exchange.key_source
        );
        Ok(MountList {
            mounts,
            failures,
            key_source: exchange.key_source.clone(),
        })
    }
}
