//! Hybrid credential exchange: RSA-wrapped AES-128 session secret, CBC password unwrap

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use base64::{engine::general_purpose, Engine as _};
use log::{debug, info, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

use super::fallback::{FALLBACK_KEY_VERSION, FALLBACK_PUBLIC_KEY_PEM};
use super::key_codec::{self, KeyEncryptError, KeyParseError, PublicKeyHandle};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES-128 key and CBC IV length
pub const SECRET_LEN: usize = 16;

const AES_BLOCK_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("failed to fetch public key from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("public key endpoint {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("invalid public key: {0}")]
    Key(#[from] KeyParseError),

    #[error("failed to encrypt session secret: {0}")]
    Encrypt(#[from] KeyEncryptError),

    #[error("system random source failed: {0}")]
    Random(#[from] rand::Error),
}

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("encrypted password is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("encrypted password is {len} bytes, not a positive multiple of 16")]
    Length { len: usize },

    #[error("password decryption failed: bad key, IV or padding")]
    Padding,

    #[error("decrypted password is not valid UTF-8")]
    Utf8,
}

/// Where the public key used for an exchange came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KeySource {
    Fetched { url: String },
    Fallback { version: String },
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Fetched { url } => write!(f, "fetched({})", url),
            KeySource::Fallback { version } => write!(f, "fallback(v{})", version),
        }
    }
}

/// Raw AES-128 key and IV of one exchange. Wiped on drop.
pub struct SessionSecret {
    key: [u8; SECRET_LEN],
    iv: [u8; SECRET_LEN],
}

impl SessionSecret {
    pub fn generate() -> Result<Self, ExchangeError> {
        let mut secret = Self {
            key: [0u8; SECRET_LEN],
            iv: [0u8; SECRET_LEN],
        };
        OsRng.try_fill_bytes(&mut secret.key)?;
        OsRng.try_fill_bytes(&mut secret.iv)?;
        Ok(secret)
    }

    pub fn from_parts(key: [u8; SECRET_LEN], iv: [u8; SECRET_LEN]) -> Self {
        Self { key, iv }
    }

    pub fn key(&self) -> &[u8; SECRET_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; SECRET_LEN] {
        &self.iv
    }

    /// Decrypt a server-issued password with this exchange's key and IV
    pub fn unwrap_password(&self, encrypted_b64: &str) -> Result<String, DecryptError> {
        unwrap_password(encrypted_b64, &self.key, &self.iv)
    }
}

impl Drop for SessionSecret {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSecret(<redacted>)")
    }
}

/// Payload for the server plus the secret needed to read its reply
#[derive(Debug)]
pub struct EncryptionExchange {
    /// Base64 of the RSA-encrypted AES key
    pub encrypted_key: String,
    /// Base64 of the RSA-encrypted IV
    pub encrypted_iv: String,
    pub key_source: KeySource,
    secret: SessionSecret,
}

impl EncryptionExchange {
    pub fn secret(&self) -> &SessionSecret {
        &self.secret
    }
}

/// Short SHA-256 fingerprint of a key's SPKI encoding, safe to log
pub fn key_fingerprint(handle: &PublicKeyHandle) -> String {
    let digest = Sha256::digest(handle.spki_der());
    hex::encode(&digest[..8])
}

/// Encrypt a fresh session secret with the given PEM key
pub fn prepare_with_key(pem: &[u8], key_source: KeySource) -> Result<EncryptionExchange, ExchangeError> {
    let handle = key_codec::parse_public_key(pem)?;
    let secret = SessionSecret::generate()?;

    let encrypted_key = general_purpose::STANDARD.encode(key_codec::encrypt(&handle, secret.key())?);
    let encrypted_iv = general_purpose::STANDARD.encode(key_codec::encrypt(&handle, secret.iv())?);

    debug!(
        "exchange_prepared: source={} fingerprint={} ciphertext_len={}",
        key_source,
        key_fingerprint(&handle),
        handle.modulus_len()
    );
    Ok(EncryptionExchange {
        encrypted_key,
        encrypted_iv,
        key_source,
        secret,
    })
}

/// AES-128-CBC/PKCS#7 decryption of a base64 password.
///
/// An empty (or whitespace-only) input means no password is set and yields `""`.
pub fn unwrap_password(
    encrypted_b64: &str,
    key: &[u8; SECRET_LEN],
    iv: &[u8; SECRET_LEN],
) -> Result<String, DecryptError> {
    let encrypted_b64 = encrypted_b64.trim();
    if encrypted_b64.is_empty() {
        return Ok(String::new());
    }

    let mut buf = general_purpose::STANDARD.decode(encrypted_b64)?;
    if buf.is_empty() || buf.len() % AES_BLOCK_LEN != 0 {
        return Err(DecryptError::Length { len: buf.len() });
    }

    let decrypted = Aes128CbcDec::new(key.into(), iv.into()).decrypt_padded_mut::<Pkcs7>(&mut buf);
    let plain_len = match decrypted {
        Ok(plain) => plain.len(),
        Err(_) => {
            buf.zeroize();
            return Err(DecryptError::Padding);
        }
    };
    buf.truncate(plain_len);

    String::from_utf8(buf).map_err(|e| {
        e.into_bytes().zeroize();
        DecryptError::Utf8
    })
}

/// Fetches the server public key (with the compiled-in fallback) and prepares exchanges
#[derive(Debug, Clone)]
pub struct CredentialExchange {
    client: Client,
    public_key_url: String,
    fallback_pem: String,
    fallback_version: String,
}

impl CredentialExchange {
    pub fn new(client: Client, public_key_url: impl Into<String>) -> Self {
        Self {
            client,
            public_key_url: public_key_url.into(),
            fallback_pem: FALLBACK_PUBLIC_KEY_PEM.to_string(),
            fallback_version: FALLBACK_KEY_VERSION.to_string(),
        }
    }

    /// Replace the compiled-in fallback key, e.g. with a pinned key from config
    pub fn with_fallback(mut self, pem: impl Into<String>, version: impl Into<String>) -> Self {
        self.fallback_pem = pem.into();
        self.fallback_version = version.into();
        self
    }

    pub fn public_key_url(&self) -> &str {
        &self.public_key_url
    }

    async fn fetch_public_key(&self) -> Result<Vec<u8>, ExchangeError> {
        let response = self
            .client
            .get(&self.public_key_url)
            .send()
            .await
            .map_err(|e| ExchangeError::Fetch {
                url: self.public_key_url.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExchangeError::Status {
                url: self.public_key_url.clone(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| ExchangeError::Fetch {
            url: self.public_key_url.clone(),
            source: e,
        })?;
        Ok(bytes.to_vec())
    }

    fn fallback_source(&self) -> KeySource {
        KeySource::Fallback {
            version: self.fallback_version.clone(),
        }
    }

    /// Warn when the server has moved to a key the fallback does not match
    fn check_fallback_staleness(&self, fetched: &[u8]) {
        let fetched = match key_codec::parse_public_key(fetched) {
            Ok(handle) => key_fingerprint(&handle),
            Err(_) => return,
        };
        match key_codec::parse_public_key(self.fallback_pem.as_bytes()) {
            Ok(handle) if key_fingerprint(&handle) == fetched => {}
            Ok(handle) => warn!(
                "public_key_fallback_stale: fallback_version={} fallback={} server={}",
                self.fallback_version,
                key_fingerprint(&handle),
                fetched
            ),
            Err(e) => warn!(
                "public_key_fallback_invalid: fallback_version={} error={}",
                self.fallback_version, e
            ),
        }
    }

    /// Fetch the key, generate a random key/IV and encrypt both.
    ///
    /// Any fetch or parse failure of the served key falls back to the
    /// compiled-in key; only a broken fallback key is an error.
    pub async fn prepare_exchange(&self) -> Result<EncryptionExchange, ExchangeError> {
        match self.fetch_public_key().await {
            Ok(pem) => {
                info!(
                    "public_key_fetched: url={} bytes={}",
                    self.public_key_url,
                    pem.len()
                );
                self.check_fallback_staleness(&pem);
                let source = KeySource::Fetched {
                    url: self.public_key_url.clone(),
                };
                match prepare_with_key(&pem, source) {
                    Ok(exchange) => return Ok(exchange),
                    Err(ExchangeError::Key(e)) => {
                        warn!(
                            "public_key_fallback: version={} reason=served key unusable: {}",
                            self.fallback_version, e
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => {
                warn!(
                    "public_key_fallback: version={} reason={}",
                    self.fallback_version, e
                );
            }
        }

        prepare_with_key(self.fallback_pem.as_bytes(), self.fallback_source())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_codec::tests::{test_private_key, TEST_PKCS1_PEM, TEST_SPKI_PEM};
    use aes::cipher::{block_padding::NoPadding, BlockEncryptMut};
    use rsa::Pkcs1v15Encrypt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    const KEY: [u8; 16] = *b"0123456789abcdef";
    const IV: [u8; 16] = *b"fedcba9876543210";

    fn encrypt_password(plain: &str, key: &[u8; 16], iv: &[u8; 16]) -> String {
        let ciphertext =
            Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
        general_purpose::STANDARD.encode(ciphertext)
    }

    #[test]
    fn unwraps_cbc_password() {
        for password in ["hunter2", "exactly16bytes!!", "密码 with spaces", "x"] {
            let encrypted = encrypt_password(password, &KEY, &IV);
            assert_eq!(unwrap_password(&encrypted, &KEY, &IV).unwrap(), password);
        }
    }

    #[test]
    fn empty_password_round_trips() {
        assert_eq!(unwrap_password("", &KEY, &IV).unwrap(), "");
        assert_eq!(unwrap_password("  \n", &KEY, &IV).unwrap(), "");
        let encrypted = encrypt_password("", &KEY, &IV);
        assert_eq!(unwrap_password(&encrypted, &KEY, &IV).unwrap(), "");
    }

    #[test]
    fn session_secret_unwraps_with_its_own_key() {
        let secret = SessionSecret::from_parts(KEY, IV);
        let encrypted = encrypt_password("webdav-pass", secret.key(), secret.iv());
        assert_eq!(secret.unwrap_password(&encrypted).unwrap(), "webdav-pass");
    }

    #[test]
    fn wrong_key_never_yields_the_password() {
        let encrypted = encrypt_password("webdav-pass", &KEY, &IV);
        let other = *b"another key 1234";
        let result = unwrap_password(&encrypted, &other, &IV);
        assert!(!matches!(result, Ok(ref p) if p == "webdav-pass"));
    }

    #[test]
    fn decrypt_errors_are_reported() {
        assert!(matches!(
            unwrap_password("%%%not base64%%%", &KEY, &IV),
            Err(DecryptError::Base64(_))
        ));

        let short = general_purpose::STANDARD.encode([7u8; 15]);
        assert!(matches!(
            unwrap_password(&short, &KEY, &IV),
            Err(DecryptError::Length { len: 15 })
        ));

        // a final block ending in 0x00 is never valid PKCS#7
        let mut block = [0u8; 16];
        block[..5].copy_from_slice(b"hello");
        let ciphertext = Aes128CbcEnc::new((&KEY).into(), (&IV).into())
            .encrypt_padded_vec_mut::<NoPadding>(&block);
        let encoded = general_purpose::STANDARD.encode(ciphertext);
        assert!(matches!(
            unwrap_password(&encoded, &KEY, &IV),
            Err(DecryptError::Padding)
        ));
    }

    #[test]
    fn prepared_exchange_decrypts_to_its_secret() {
        let private = test_private_key();
        for pem in [TEST_SPKI_PEM, TEST_PKCS1_PEM] {
            let exchange = prepare_with_key(
                pem.as_bytes(),
                KeySource::Fallback {
                    version: "test".into(),
                },
            )
            .unwrap();

            let key_ct = general_purpose::STANDARD.decode(&exchange.encrypted_key).unwrap();
            let iv_ct = general_purpose::STANDARD.decode(&exchange.encrypted_iv).unwrap();
            assert_eq!(
                private.decrypt(Pkcs1v15Encrypt, &key_ct).unwrap(),
                exchange.secret().key().to_vec()
            );
            assert_eq!(
                private.decrypt(Pkcs1v15Encrypt, &iv_ct).unwrap(),
                exchange.secret().iv().to_vec()
            );
            assert_ne!(exchange.secret().key(), exchange.secret().iv());
        }
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = SessionSecret::from_parts(KEY, IV);
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("0123"));
        assert_eq!(debug, "SessionSecret(<redacted>)");
    }

    #[tokio::test]
    async fn uses_served_key_when_available() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assets/key/apps_public.pem"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TEST_SPKI_PEM))
            .mount(&server)
            .await;

        let url = format!("{}/assets/key/apps_public.pem", server.uri());
        let exchange = CredentialExchange::new(Client::new(), &url)
            .prepare_exchange()
            .await
            .unwrap();

        assert_eq!(exchange.key_source, KeySource::Fetched { url });
        let key_ct = general_purpose::STANDARD.decode(&exchange.encrypted_key).unwrap();
        let decrypted = test_private_key().decrypt(Pkcs1v15Encrypt, &key_ct).unwrap();
        assert_eq!(decrypted, exchange.secret().key().to_vec());
    }

    #[tokio::test]
    async fn falls_back_when_key_endpoint_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let exchange = CredentialExchange::new(Client::new(), format!("{}/key.pem", server.uri()))
            .prepare_exchange()
            .await
            .unwrap();

        assert_eq!(
            exchange.key_source,
            KeySource::Fallback {
                version: FALLBACK_KEY_VERSION.to_string()
            }
        );
        // 2048-bit fallback key
        let key_ct = general_purpose::STANDARD.decode(&exchange.encrypted_key).unwrap();
        assert_eq!(key_ct.len(), 256);
    }

    #[tokio::test]
    async fn falls_back_when_served_key_is_garbage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let exchange = CredentialExchange::new(Client::new(), format!("{}/key.pem", server.uri()))
            .with_fallback(TEST_PKCS1_PEM, "pinned-test")
            .prepare_exchange()
            .await
            .unwrap();

        assert_eq!(
            exchange.key_source,
            KeySource::Fallback {
                version: "pinned-test".to_string()
            }
        );
        let iv_ct = general_purpose::STANDARD.decode(&exchange.encrypted_iv).unwrap();
        let decrypted = test_private_key().decrypt(Pkcs1v15Encrypt, &iv_ct).unwrap();
        assert_eq!(decrypted, exchange.secret().iv().to_vec());
    }

    #[tokio::test]
    async fn broken_fallback_is_an_error() {
        let exchange = CredentialExchange::new(Client::new(), "http://127.0.0.1:9/key.pem")
            .with_fallback("not a key", "broken");
        assert!(matches!(
            exchange.prepare_exchange().await,
            Err(ExchangeError::Key(_))
        ));
    }
}
