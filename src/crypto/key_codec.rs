//! RSA public key parsing (PKCS#1 or SPKI) and PKCS#1 v1.5 encryption

use base64::{engine::general_purpose, Engine as _};
use log::debug;
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// `SEQUENCE { OID rsaEncryption, NULL }`
const RSA_ALGORITHM_ID: [u8; 15] = [
    0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, 0x05, 0x00,
];

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;
const TAG_BIT_STRING: u8 = 0x03;

/// PKCS#1 v1.5 encryption padding overhead in bytes
const PKCS1_PADDING_OVERHEAD: usize = 11;

const PEM_LABELS: [&str; 4] = [
    "-----BEGIN PUBLIC KEY-----",
    "-----END PUBLIC KEY-----",
    "-----BEGIN RSA PUBLIC KEY-----",
    "-----END RSA PUBLIC KEY-----",
];

#[derive(Debug, Error)]
pub enum KeyParseError {
    #[error("public key is empty")]
    Empty,

    #[error("public key is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("public key is neither an RSA key nor a SubjectPublicKeyInfo structure")]
    UnknownFormat,

    #[error("malformed DER at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },

    #[error("public key rejected as SubjectPublicKeyInfo ({spki}) and as PKCS#1 ({pkcs1})")]
    Invalid { spki: String, pkcs1: String },
}

#[derive(Debug, Error)]
pub enum KeyEncryptError {
    #[error("plaintext is {len} bytes, key accepts at most {max}")]
    TooLong { len: usize, max: usize },

    #[error("RSA encryption failed: {0}")]
    Rsa(#[from] rsa::Error),
}

/// ASN.1 container the key arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    /// Bare `RSAPublicKey { modulus, publicExponent }`
    Pkcs1,
    /// `SubjectPublicKeyInfo` wrapping a PKCS#1 key
    Spki,
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyFormat::Pkcs1 => write!(f, "pkcs1"),
            KeyFormat::Spki => write!(f, "spki"),
        }
    }
}

/// A parsed RSA public key ready for encryption
#[derive(Debug, Clone)]
pub struct PublicKeyHandle {
    key: RsaPublicKey,
    format: KeyFormat,
    spki_der: Vec<u8>,
}

impl PublicKeyHandle {
    /// Format of the input the handle was parsed from
    pub fn source_format(&self) -> KeyFormat {
        self.format
    }

    /// The key as SubjectPublicKeyInfo DER, regardless of input format
    pub fn spki_der(&self) -> &[u8] {
        &self.spki_der
    }

    pub fn modulus_len(&self) -> usize {
        self.key.size()
    }

    pub fn max_plaintext_len(&self) -> usize {
        self.key.size().saturating_sub(PKCS1_PADDING_OVERHEAD)
    }
}

/// Strip PEM armor and anything outside the base64 alphabet
pub fn normalize_pem(text: &str) -> String {
    let mut body = text.to_string();
    for label in PEM_LABELS {
        body = body.replace(label, "");
    }
    body.retain(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=');
    body
}

/// Decode PEM (either header style, or bare base64) into DER bytes
pub fn pem_to_der(pem: &[u8]) -> Result<Vec<u8>, KeyParseError> {
    let body = normalize_pem(&String::from_utf8_lossy(pem));
    if body.is_empty() {
        return Err(KeyParseError::Empty);
    }
    match general_purpose::STANDARD.decode(&body) {
        Ok(der) => Ok(der),
        Err(first) => general_purpose::STANDARD_NO_PAD
            .decode(body.trim_end_matches('='))
            .map_err(|_| KeyParseError::Base64(first)),
    }
}

/// DER length octets: short form below 128, otherwise 0x81..0x83 long form
pub fn encode_der_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xff {
        vec![0x81, len as u8]
    } else if len <= 0xffff {
        vec![0x82, (len >> 8) as u8, len as u8]
    } else {
        vec![0x83, (len >> 16) as u8, (len >> 8) as u8, len as u8]
    }
}

/// Reads a length field at `offset`; returns `(content_len, octets_used)`
fn read_der_length(der: &[u8], offset: usize) -> Result<(usize, usize), KeyParseError> {
    let first = *der.get(offset).ok_or(KeyParseError::Malformed {
        offset,
        reason: "missing length",
    })?;
    if first < 0x80 {
        return Ok((first as usize, 1));
    }
    let octets = (first & 0x7f) as usize;
    if octets == 0 || octets > 3 {
        return Err(KeyParseError::Malformed {
            offset,
            reason: "unsupported length form",
        });
    }
    let bytes = der
        .get(offset + 1..offset + 1 + octets)
        .ok_or(KeyParseError::Malformed {
            offset,
            reason: "truncated length",
        })?;
    let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((len, 1 + octets))
}

/// Reads the TLV at `offset` and checks its tag; returns `(content_start, content_len)`
fn read_tlv(der: &[u8], offset: usize, tag: u8) -> Result<(usize, usize), KeyParseError> {
    match der.get(offset) {
        Some(found) if *found == tag => {}
        Some(_) => {
            return Err(KeyParseError::Malformed {
                offset,
                reason: "unexpected tag",
            })
        }
        None => {
            return Err(KeyParseError::Malformed {
                offset,
                reason: "unexpected end of input",
            })
        }
    }
    let (len, used) = read_der_length(der, offset + 1)?;
    let start = offset + 1 + used;
    if start + len > der.len() {
        return Err(KeyParseError::Malformed {
            offset,
            reason: "content runs past end of input",
        });
    }
    Ok((start, len))
}

/// Looks at the first element inside the outer SEQUENCE:
/// another SEQUENCE (AlgorithmIdentifier) means SPKI, an INTEGER (modulus) means PKCS#1.
pub fn detect_format(der: &[u8]) -> Result<KeyFormat, KeyParseError> {
    let (start, len) = read_tlv(der, 0, TAG_SEQUENCE).map_err(|_| KeyParseError::UnknownFormat)?;
    if len == 0 {
        return Err(KeyParseError::UnknownFormat);
    }
    match der[start] {
        TAG_SEQUENCE => Ok(KeyFormat::Spki),
        TAG_INTEGER => Ok(KeyFormat::Pkcs1),
        _ => Err(KeyParseError::UnknownFormat),
    }
}

/// Wrap a PKCS#1 `RSAPublicKey` into `SubjectPublicKeyInfo`
pub fn wrap_pkcs1(pkcs1_der: &[u8]) -> Vec<u8> {
    let mut bit_string = vec![TAG_BIT_STRING];
    bit_string.extend(encode_der_length(pkcs1_der.len() + 1));
    bit_string.push(0x00); // no unused bits
    bit_string.extend_from_slice(pkcs1_der);

    let body_len = RSA_ALGORITHM_ID.len() + bit_string.len();
    let mut spki = vec![TAG_SEQUENCE];
    spki.extend(encode_der_length(body_len));
    spki.extend_from_slice(&RSA_ALGORITHM_ID);
    spki.extend(bit_string);
    spki
}

/// Extract the PKCS#1 key from a `SubjectPublicKeyInfo`
pub fn unwrap_spki(spki_der: &[u8]) -> Result<Vec<u8>, KeyParseError> {
    let (outer_start, _) = read_tlv(spki_der, 0, TAG_SEQUENCE)?;
    let (alg_start, alg_len) = read_tlv(spki_der, outer_start, TAG_SEQUENCE)?;
    if spki_der[outer_start..alg_start + alg_len] != RSA_ALGORITHM_ID {
        return Err(KeyParseError::Malformed {
            offset: outer_start,
            reason: "algorithm is not rsaEncryption",
        });
    }
    let (bits_start, bits_len) = read_tlv(spki_der, alg_start + alg_len, TAG_BIT_STRING)?;
    if bits_len < 1 || spki_der[bits_start] != 0x00 {
        return Err(KeyParseError::Malformed {
            offset: bits_start,
            reason: "bit string has unused bits",
        });
    }
    Ok(spki_der[bits_start + 1..bits_start + bits_len].to_vec())
}

/// Parse a PEM public key in either container.
///
/// The SPKI form is always built (wrapping raw keys) and parsed first; the
/// raw PKCS#1 parser is the second attempt. Both failing is an error.
pub fn parse_public_key(pem: &[u8]) -> Result<PublicKeyHandle, KeyParseError> {
    let der = pem_to_der(pem)?;
    let format = detect_format(&der)?;

    let (spki_der, pkcs1_der) = match format {
        KeyFormat::Spki => {
            let raw = unwrap_spki(&der)?;
            (der, raw)
        }
        KeyFormat::Pkcs1 => (wrap_pkcs1(&der), der),
    };

    let key = match RsaPublicKey::from_public_key_der(&spki_der) {
        Ok(key) => key,
        Err(spki_err) => RsaPublicKey::from_pkcs1_der(&pkcs1_der).map_err(|pkcs1_err| {
            KeyParseError::Invalid {
                spki: spki_err.to_string(),
                pkcs1: pkcs1_err.to_string(),
            }
        })?,
    };

    debug!(
        "public_key_parsed: format={} modulus_bits={}",
        format,
        key.size() * 8
    );
    Ok(PublicKeyHandle {
        key,
        format,
        spki_der,
    })
}

/// RSA/ECB/PKCS1Padding encryption of a short plaintext
pub fn encrypt(handle: &PublicKeyHandle, plaintext: &[u8]) -> Result<Vec<u8>, KeyEncryptError> {
    let max = handle.max_plaintext_len();
    if plaintext.len() > max {
        return Err(KeyEncryptError::TooLong {
            len: plaintext.len(),
            max,
        });
    }
    Ok(handle.key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)?)
}
