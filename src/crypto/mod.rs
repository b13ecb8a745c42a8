//! Credential crypto: server public key handling and the session key exchange

pub mod exchange;
pub mod fallback;
pub mod key_codec;

pub use exchange::{
    prepare_with_key, unwrap_password, CredentialExchange, DecryptError, EncryptionExchange,
    ExchangeError, KeySource, SessionSecret,
};
pub use fallback::{FALLBACK_KEY_VERSION, FALLBACK_PUBLIC_KEY_PEM};
pub use key_codec::{
    encrypt, parse_public_key, KeyEncryptError, KeyFormat, KeyParseError, PublicKeyHandle,
};
