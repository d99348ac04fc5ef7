//! Host-bound AES cipher for credential values.
//!
//! The key and IV are derived from per-host entropy: the MD5 digest of the
//! UTF-8 bytes of `home_path ‖ cpu_brand` is the IV, and the MD5 digest of
//! the same bytes reversed is the key. The derivation is deterministic per
//! host and must stay bit-identical across versions — an existing credential
//! file only decrypts if the same seed produces the same digests.
//!
//! This binds ciphertext to one machine so a copied credential file on
//! another host cannot be decrypted and instead re-prompts. It is an
//! obfuscation boundary, not a secrecy guarantee against a local attacker.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use md5::{Digest, Md5};

use crate::error::GatewayError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES-128-CBC cipher with a process-lifetime key/IV pair.
pub struct AesCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl AesCipher {
    /// Derive the cipher from this machine's entropy (home path + CPU brand).
    pub fn from_host_entropy() -> Self {
        Self::from_seed(&host_seed())
    }

    /// Derive the cipher from an explicit seed. Fixed seeds make encrypted
    /// fixtures reproducible in tests.
    pub fn from_seed(seed: &[u8]) -> Self {
        let iv: [u8; 16] = Md5::digest(seed).into();
        let reversed: Vec<u8> = seed.iter().rev().copied().collect();
        let key: [u8; 16] = Md5::digest(&reversed).into();
        Self { key, iv }
    }

    /// Encrypt a UTF-8 string, returning standard base64 ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let ciphertext = Aes128CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        BASE64.encode(ciphertext)
    }

    /// Decrypt base64 ciphertext back to the original UTF-8 string.
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<String, GatewayError> {
        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|_| GatewayError::CipherCorruptInput)?;
        let plaintext = Aes128CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| GatewayError::CipherCorruptInput)?;
        String::from_utf8(plaintext).map_err(|_| GatewayError::CipherCorruptInput)
    }
}

/// Seed bytes for this host: UTF-8 of the home directory path followed by
/// the CPU brand string.
pub fn host_seed() -> Vec<u8> {
    let home = dirs::home_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut seed = home.into_bytes();
    seed.extend_from_slice(cpu_brand().as_bytes());
    seed
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn cpu_brand() -> String {
    raw_cpuid::CpuId::new()
        .get_processor_brand_string()
        .map(|brand| brand.as_str().trim().to_string())
        .unwrap_or_default()
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn cpu_brand() -> String {
    String::new()
}
