use crate::constants::config::ENCRYPTION_KEY_ENV;
use crate::{BackupError, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};
use std::fmt;

/// AES-GCM 随机数长度（字节）
const NONCE_LENGTH: usize = 12;

/// 密文中 IV 与加密数据之间的分隔符
const SEPARATOR: char = ':';

const CONTROL_TOKEN_DOMAIN: &[u8] = b"backup-manager/control-token:";

/// 解密后的连接密码
///
/// 只在执行引擎内部短暂持有，`Debug` 输出始终脱敏。
#[derive(Clone, PartialEq, Eq)]
pub struct DecryptedSecret(String);

impl DecryptedSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// 取出明文，仅供驱动拼装命令时使用
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DecryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DecryptedSecret(***)")
    }
}

/// 凭据保险箱：对目标数据库密码做静态加密
///
/// 密钥由进程级密钥经 SHA-256 派生为固定 32 字节，每次加密使用随机 IV，
/// 密文格式为 `hex(iv):hex(encrypted)`。
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Aes256Gcm,
    control_token: String,
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// 从进程级密钥创建，密钥为空时直接失败
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(BackupError::MissingEncryptionKey(ENCRYPTION_KEY_ENV));
        }

        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);

        // 令牌与加密密钥使用不同的派生前缀
        let token = Sha256::new()
            .chain_update(CONTROL_TOKEN_DOMAIN)
            .chain_update(secret.as_bytes())
            .finalize();

        Ok(Self {
            cipher: Aes256Gcm::new(key),
            control_token: encode_hex(&token),
        })
    }

    /// 本机控制接口的访问令牌，持有同一密钥的进程得到相同的值
    pub fn control_token(&self) -> &str {
        &self.control_token
    }

    /// 从环境变量 `CREDENTIAL_ENCRYPTION_KEY` 读取密钥
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var(ENCRYPTION_KEY_ENV)
            .map_err(|_| BackupError::MissingEncryptionKey(ENCRYPTION_KEY_ENV))?;
        Self::new(&secret)
    }

    /// 加密明文
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let encrypted = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| BackupError::EncryptionFailed)?;

        Ok(format!(
            "{}{}{}",
            encode_hex(nonce.as_slice()),
            SEPARATOR,
            encode_hex(&encrypted)
        ))
    }

    /// 解密密文
    pub fn decrypt(&self, ciphertext: &str) -> Result<DecryptedSecret> {
        let (iv_hex, data_hex) = ciphertext
            .split_once(SEPARATOR)
            .ok_or(BackupError::MalformedCiphertext)?;
        if data_hex.contains(SEPARATOR) {
            return Err(BackupError::MalformedCiphertext);
        }

        let iv = decode_hex(iv_hex).ok_or(BackupError::MalformedCiphertext)?;
        let data = decode_hex(data_hex).ok_or(BackupError::MalformedCiphertext)?;
        if iv.len() != NONCE_LENGTH || data.is_empty() {
            return Err(BackupError::MalformedCiphertext);
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), data.as_slice())
            .map_err(|_| BackupError::DecryptionFailed)?;

        String::from_utf8(plaintext)
            .map(DecryptedSecret)
            .map_err(|_| BackupError::DecryptionFailed)
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::new("unit-test-secret").unwrap()
    }

    #[test]
    fn test_round_trip() {
        let vault = vault();
        for plaintext in ["p", "s3cr3t!", "密码-with-ünïcödé", &"x".repeat(500)] {
            let ciphertext = vault.encrypt(plaintext).unwrap();
            assert_eq!(vault.decrypt(&ciphertext).unwrap().expose(), plaintext);
        }
    }

    #[test]
    fn test_encrypt_is_not_deterministic() {
        let vault = vault();
        let first = vault.encrypt("same").unwrap();
        let second = vault.encrypt("same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_ciphertext_format() {
        let ciphertext = vault().encrypt("hello").unwrap();
        let (iv, data) = ciphertext.split_once(':').unwrap();
        assert_eq!(iv.len(), NONCE_LENGTH * 2);
        assert!(data.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(matches!(
            CredentialVault::new(""),
            Err(BackupError::MissingEncryptionKey(_))
        ));
    }

    #[test]
    fn test_malformed_ciphertext() {
        let vault = vault();
        for bad in ["no-separator", "zz:00", "abcd:0011", "a:b:c", ""] {
            assert!(
                matches!(vault.decrypt(bad), Err(BackupError::MalformedCiphertext)),
                "{bad} should be malformed"
            );
        }
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let ciphertext = vault().encrypt("hello").unwrap();
        let other = CredentialVault::new("another-secret").unwrap();
        assert!(matches!(
            other.decrypt(&ciphertext),
            Err(BackupError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_control_token_is_shared_per_secret() {
        let a = CredentialVault::new("key-a").unwrap();
        let again = CredentialVault::new("key-a").unwrap();
        let b = CredentialVault::new("key-b").unwrap();

        assert_eq!(a.control_token(), again.control_token());
        assert_ne!(a.control_token(), b.control_token());
        assert_eq!(a.control_token().len(), 64);
        assert!(!a.control_token().contains("key-a"));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = DecryptedSecret::new("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
