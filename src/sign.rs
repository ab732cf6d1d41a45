//! Checksums, digests and request signing.
//!
//! The device protocol guards command payloads with an 8-bit additive checksum.
//! The cloud API expects every form to carry a `sign` field: the ascending
//! `key=value&...` rendering of the other fields, signed with RSA PKCS#1 v1.5
//! over SHA-1 and Base64 encoded.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha1::Sha1;
use thiserror::Error;

/// Errors raised while loading key material or producing a signature.
#[derive(Error, Debug)]
pub enum SignError {
    /// No key material was configured.
    #[error("Signing key is missing")]
    MissingKey,

    /// Key material could not be decoded as a PKCS#8 RSA private key.
    #[error("Signing key is invalid: {0}")]
    InvalidKey(String),

    /// A byte-string parameter is not UTF-8 text.
    #[error("Parameter '{0}' is not valid UTF-8")]
    InvalidUtf8(String),

    /// The RSA primitive itself failed.
    #[error("RSA signing failed: {0}")]
    Rsa(#[from] rsa::Error),
}

/// Additive checksum, truncated to 8 bits after every byte.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte))
}

/// Copy of `payload` with its checksum appended.
pub fn with_checksum(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.extend_from_slice(payload);
    out.push(checksum(payload));
    out
}

/// Uppercase hex MD5 digest of `input`.
pub fn md5_hex(input: &str) -> String {
    hex::encode_upper(Md5::digest(input.as_bytes()))
}

/// A scalar form value as it appears in the signed query string.
#[derive(Debug, Clone, PartialEq)]
pub enum SignValue {
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl SignValue {
    /// Text form used in the query string. Byte strings must be valid UTF-8.
    pub fn render(&self) -> Result<String, std::string::FromUtf8Error> {
        Ok(match self {
            SignValue::Text(s) => s.clone(),
            SignValue::Bool(b) => b.to_string(),
            SignValue::Int(n) => n.to_string(),
            // Debug keeps the trailing ".0" on whole floats.
            SignValue::Float(x) => format!("{x:?}"),
            SignValue::Bytes(b) => String::from_utf8(b.clone())?,
        })
    }
}

impl From<&str> for SignValue {
    fn from(value: &str) -> Self {
        SignValue::Text(value.to_string())
    }
}

impl From<String> for SignValue {
    fn from(value: String) -> Self {
        SignValue::Text(value)
    }
}

impl From<bool> for SignValue {
    fn from(value: bool) -> Self {
        SignValue::Bool(value)
    }
}

impl From<i64> for SignValue {
    fn from(value: i64) -> Self {
        SignValue::Int(value)
    }
}

impl From<i32> for SignValue {
    fn from(value: i32) -> Self {
        SignValue::Int(i64::from(value))
    }
}

impl From<u32> for SignValue {
    fn from(value: u32) -> Self {
        SignValue::Int(i64::from(value))
    }
}

impl From<f64> for SignValue {
    fn from(value: f64) -> Self {
        SignValue::Float(value)
    }
}

impl From<Vec<u8>> for SignValue {
    fn from(value: Vec<u8>) -> Self {
        SignValue::Bytes(value)
    }
}

/// Form fields keyed by their raw name; iteration is in ascending key order.
pub type SignParams = BTreeMap<String, SignValue>;

/// Render every value as text, in ascending key order.
pub fn render_params(params: &SignParams) -> Result<Vec<(String, String)>, SignError> {
    params
        .iter()
        .map(|(key, value)| {
            let text = value.render().map_err(|_| SignError::InvalidUtf8(key.clone()))?;
            Ok((key.clone(), text))
        })
        .collect()
}

/// Render `params` as `k1=v1&k2=v2...` in ascending key order.
pub fn build_query_string(params: &SignParams) -> Result<String, SignError> {
    Ok(render_params(params)?
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&"))
}

/// RSA private key used to sign API requests.
#[derive(Clone)]
pub struct Signer {
    key: RsaPrivateKey,
}

impl Signer {
    /// Load a PKCS#8 DER private key.
    pub fn from_der(der: &[u8]) -> Result<Self, SignError> {
        if der.is_empty() {
            return Err(SignError::MissingKey);
        }
        let key = RsaPrivateKey::from_pkcs8_der(der).map_err(|e| SignError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Load a PKCS#8 DER private key given as a hex string (whitespace ignored).
    pub fn from_hex(hex_key: &str) -> Result<Self, SignError> {
        let compact: String = hex_key.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(SignError::MissingKey);
        }
        let der = hex::decode(&compact).map_err(|e| SignError::InvalidKey(format!("not hex: {e}")))?;
        Self::from_der(&der)
    }

    /// Sign an already canonical query string.
    pub fn sign_query(&self, query: &str) -> Result<String, SignError> {
        let digest = Sha1::digest(query.as_bytes());
        let signature = self.key.sign(Pkcs1v15Sign::new::<Sha1>(), &digest)?;
        Ok(STANDARD.encode(signature))
    }

    /// Canonicalize `params` and sign the result.
    pub fn sign_params(&self, params: &SignParams) -> Result<String, SignError> {
        self.sign_query(&build_query_string(params)?)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TEST_KEY_HEX: &str = include_str!("../testdata/sign_key.hex");

    #[test]
    fn test_checksum_truncates_each_step() {
        assert_eq!(checksum(&[0xFF, 0xFF]), 0xFE);
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0xA5, 0xA0, 0x52, 0x03, 0x00]), 0x9A);
    }

    #[test]
    fn test_with_checksum_appends_byte() {
        let framed = with_checksum(&[0x01, 0x02, 0x03]);
        assert_eq!(framed, vec![0x01, 0x02, 0x03, 0x06]);
    }

    #[test]
    fn test_md5_hex_uppercase() {
        assert_eq!(md5_hex("123456"), "E10ADC3949BA59ABBE56E057F20F883E");
        assert_eq!(md5_hex(""), "D41D8CD98F00B204E9800998ECF8427E");
    }

    #[test]
    fn test_query_string_sorted_by_key() {
        let mut params = SignParams::new();
        params.insert("b".to_string(), 1i64.into());
        params.insert("a".to_string(), 2i64.into());
        assert_eq!(build_query_string(&params).unwrap(), "a=2&b=1");
    }

    #[test]
    fn test_query_string_value_rendering() {
        let mut params = SignParams::new();
        params.insert("flag".to_string(), true.into());
        params.insert("raw".to_string(), b"abc".to_vec().into());
        params.insert("ratio".to_string(), 1.0f64.into());
        params.insert("name".to_string(), "x y".into());
        assert_eq!(
            build_query_string(&params).unwrap(),
            "flag=true&name=x y&ratio=1.0&raw=abc"
        );
    }

    #[test]
    fn test_invalid_utf8_bytes_are_rejected() {
        let mut params = SignParams::new();
        params.insert("a".to_string(), "ok".into());
        params.insert("raw".to_string(), vec![0x66, 0xFF, 0x6F].into());

        match build_query_string(&params) {
            Err(SignError::InvalidUtf8(key)) => assert_eq!(key, "raw"),
            other => panic!("unexpected result: {other:?}"),
        }

        let signer = Signer::from_hex(TEST_KEY_HEX).unwrap();
        assert!(matches!(signer.sign_params(&params), Err(SignError::InvalidUtf8(_))));
    }

    #[test]
    fn test_missing_key() {
        assert!(matches!(Signer::from_hex("  "), Err(SignError::MissingKey)));
        assert!(matches!(Signer::from_der(&[]), Err(SignError::MissingKey)));
    }

    #[test]
    fn test_invalid_key() {
        assert!(matches!(Signer::from_hex("zz"), Err(SignError::InvalidKey(_))));
        assert!(matches!(Signer::from_hex("3082"), Err(SignError::InvalidKey(_))));
    }

    #[test]
    fn test_sign_known_vector() {
        let signer = Signer::from_hex(TEST_KEY_HEX).unwrap();
        let mut params = SignParams::new();
        params.insert("b".to_string(), 1i64.into());
        params.insert("a".to_string(), 2i64.into());

        let signature = signer.sign_params(&params).unwrap();
        assert_eq!(
            signature,
            "PEAD1D1GZKswNvr6fU2WRJsKzf210tgR/41gwJsuVS3FTDmNi+8pY8IRRykjgH7ejgZpH+eFADh65dnwNFtfIK5TFZfWyS97p9RhonFUTwOGKHMv/GRLeXe8OZS2cMN1PsBaHovPWvaoL1YQezArz/UGb3OsrQKZZam7zKtQJ70="
        );
        assert!(!signature.contains('\n'));
    }

    #[test]
    fn test_sign_login_form() {
        let signer = Signer::from_hex(TEST_KEY_HEX).unwrap();
        let mut params = SignParams::new();
        params.insert("username".to_string(), "13800000000".into());
        params.insert("password".to_string(), md5_hex("123456").into());
        params.insert("appType".to_string(), "2".into());
        params.insert("appVersion".to_string(), "3.3.3".into());

        assert_eq!(
            signer.sign_params(&params).unwrap(),
            "lzhWm8txhgST1xDu2EBHh32cfJoX2m64cZFZvsMTq2V4pzjn2lwUpQ7E1TF1hLgnT/Y6LtfbCJg4llmSAHGmp9TJ/wByZmGN4/vxIR2IJvYALr/Iz4jTapzgX0YdXvUcglwX0iJFN+M63lIybPwdE8JmVeYq44AzQJyBdqxZa+U="
        );
    }
}
