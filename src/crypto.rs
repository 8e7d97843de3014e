//! Encryption service
//!
//! Secrets travel through templates as `{ENC}<payload>{/ENC}` markers. The
//! payload is `nonce || ciphertext || tag`, base64url without padding. The built-in
//! [`HmacEncryptor`] uses an HMAC-SHA256 keystream for confidentiality and a
//! truncated HMAC-SHA256 tag (encrypt-then-MAC) for integrity.

use std::borrow::Cow;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::errors::{ReqflowError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Opening delimiter of an encrypted value
pub const ENCRYPTED_PREFIX: &str = "{ENC}";

/// Closing delimiter of an encrypted value
pub const ENCRYPTED_SUFFIX: &str = "{/ENC}";

/// Replacement shown instead of an encrypted value
pub const MASK: &str = "******";

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;

static ENCRYPTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{ENC\}([A-Za-z0-9_-]+)\{/ENC\}").unwrap()
});

/// Encryption collaborator
pub trait Encryptor: Send + Sync {
    /// Encrypt `plain` into a single `{ENC}` marker
    fn encrypt(&self, plain: &str) -> Result<String>;

    /// Decrypt a single `{ENC}` marker
    fn decrypt(&self, value: &str) -> Result<String>;

    /// Whether `value` is exactly one encrypted marker
    fn is_encrypted(&self, value: &str) -> bool {
        ENCRYPTED_RE
            .find(value)
            .is_some_and(|m| m.start() == 0 && m.end() == value.len())
    }

    /// Whether `text` contains any encrypted marker
    fn contains_encrypted(&self, text: &str) -> bool {
        ENCRYPTED_RE.is_match(text)
    }

    /// Replace every marker in `text` with [`MASK`]
    fn mask_encrypted_data(&self, text: &str) -> String {
        ENCRYPTED_RE.replace_all(text, MASK).into_owned()
    }

    /// Replace every marker in `text` with its plaintext
    fn decrypt_all(&self, text: &str) -> Result<String> {
        if !self.contains_encrypted(text) {
            return Ok(text.to_string());
        }
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for m in ENCRYPTED_RE.find_iter(text) {
            out.push_str(&text[last..m.start()]);
            out.push_str(&self.decrypt(m.as_str())?);
            last = m.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}

/// HMAC-SHA256 based encryptor
pub struct HmacEncryptor {
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

impl HmacEncryptor {
    /// Derive keys from a shared secret
    pub fn new(secret: &str) -> Self {
        Self {
            enc_key: derive(b"reqflow-enc", secret.as_bytes()),
            mac_key: derive(b"reqflow-mac", secret.as_bytes()),
        }
    }

    /// Process-local random key
    pub fn random() -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self::new(&hex::encode(secret))
    }

    fn keystream_xor(&self, nonce: &[u8], data: &mut [u8]) -> Result<()> {
        for (counter, chunk) in data.chunks_mut(32).enumerate() {
            let mut mac = HmacSha256::new_from_slice(&self.enc_key)
                .map_err(|e| ReqflowError::Encrypt(e.to_string()))?;
            mac.update(nonce);
            mac.update(&(counter as u32).to_be_bytes());
            let block = mac.finalize().into_bytes();
            for (byte, k) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= k;
            }
        }
        Ok(())
    }

    fn tag(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.mac_key)
            .map_err(|e| ReqflowError::Encrypt(e.to_string()))?;
        mac.update(nonce);
        mac.update(ciphertext);
        Ok(mac)
    }
}

fn derive(label: &[u8], secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(secret);
    hasher.finalize().into()
}

impl Encryptor for HmacEncryptor {
    fn encrypt(&self, plain: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let mut data = plain.as_bytes().to_vec();
        self.keystream_xor(&nonce, &mut data)?;
        let tag = self.tag(&nonce, &data)?.finalize().into_bytes();

        let mut payload = Vec::with_capacity(NONCE_LEN + data.len() + TAG_LEN);
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&data);
        payload.extend_from_slice(&tag[..TAG_LEN]);
        Ok(format!(
            "{}{}{}",
            ENCRYPTED_PREFIX,
            URL_SAFE_NO_PAD.encode(payload),
            ENCRYPTED_SUFFIX
        ))
    }

    fn decrypt(&self, value: &str) -> Result<String> {
        let encoded = value
            .strip_prefix(ENCRYPTED_PREFIX)
            .and_then(|v| v.strip_suffix(ENCRYPTED_SUFFIX))
            .ok_or_else(|| ReqflowError::Decrypt("value is not encrypted".into()))?;
        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| ReqflowError::Decrypt(format!("invalid payload encoding: {}", e)))?;
        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(ReqflowError::Decrypt("payload too short".into()));
        }

        let (nonce, rest) = payload.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
        self.tag(nonce, ciphertext)
            .map_err(|e| ReqflowError::Decrypt(e.to_string()))?
            .verify_truncated_left(tag)
            .map_err(|_| ReqflowError::Decrypt("authentication tag mismatch".into()))?;

        let mut data = ciphertext.to_vec();
        self.keystream_xor(nonce, &mut data)
            .map_err(|e| ReqflowError::Decrypt(e.to_string()))?;
        String::from_utf8(data).map_err(|e| ReqflowError::Decrypt(format!("plaintext is not UTF-8: {}", e)))
    }
}

/// Decrypt `value` if it is a marker, otherwise borrow it unchanged
pub fn decrypt_if_needed<'a>(encryptor: &dyn Encryptor, value: &'a str) -> Result<Cow<'a, str>> {
    if encryptor.contains_encrypted(value) {
        Ok(Cow::Owned(encryptor.decrypt_all(value)?))
    } else {
        Ok(Cow::Borrowed(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let enc = HmacEncryptor::new("secret");
        let long = "x".repeat(1000);
        for plain in ["", "p@ssw0rd", "ünïcödé ✓", long.as_str()] {
            let sealed = enc.encrypt(plain).unwrap();
            assert!(enc.is_encrypted(&sealed));
            assert_eq!(enc.decrypt(&sealed).unwrap(), plain);
        }
    }

    #[test]
    fn test_nonce_makes_ciphertexts_differ() {
        let enc = HmacEncryptor::new("secret");
        assert_ne!(enc.encrypt("same").unwrap(), enc.encrypt("same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = HmacEncryptor::new("a").encrypt("hello").unwrap();
        let err = HmacEncryptor::new("b").decrypt(&sealed).unwrap_err();
        assert!(err.to_string().contains("tag mismatch"));
    }

    #[test]
    fn test_mask_hides_plaintext() {
        let enc = HmacEncryptor::new("k");
        let sealed = enc.encrypt("hunter2").unwrap();
        let text = format!("user=admin&pass={}", sealed);
        let masked = enc.mask_encrypted_data(&text);
        assert_eq!(masked, "user=admin&pass=******");
        assert!(!masked.contains("hunter2"));
    }

    #[test]
    fn test_decrypt_all_in_text() {
        let enc = HmacEncryptor::new("k");
        let text = format!("{}:{}", enc.encrypt("user").unwrap(), enc.encrypt("pass").unwrap());
        assert_eq!(enc.decrypt_all(&text).unwrap(), "user:pass");
    }

    #[test]
    fn test_marker_next_to_literal_text() {
        let enc = HmacEncryptor::new("k");
        let sealed = enc.encrypt("abc").unwrap();
        let text = format!("/{}-x/{}v2", sealed, sealed);
        assert_eq!(enc.decrypt_all(&text).unwrap(), "/abc-x/abcv2");
        assert_eq!(enc.mask_encrypted_data(&text), "/******-x/******v2");
        assert!(!enc.is_encrypted(&format!("{}v2", sealed)));
    }

    #[test]
    fn test_unterminated_marker_is_not_encrypted() {
        let enc = HmacEncryptor::new("k");
        let sealed = enc.encrypt("abc").unwrap();
        let open = sealed.trim_end_matches(ENCRYPTED_SUFFIX);
        assert!(!enc.contains_encrypted(open));
        assert!(enc.decrypt(open).is_err());
    }

    #[test]
    fn test_plain_text_untouched() {
        let enc = HmacEncryptor::new("k");
        assert_eq!(enc.decrypt_all("no secrets {here}").unwrap(), "no secrets {here}");
        assert_eq!(enc.mask_encrypted_data("plain"), "plain");
        assert!(!enc.is_encrypted("plain"));
    }
}
