//! Envelope encryption for shard lines.
//!
//! A persisted line is either raw JSON or an envelope of the form
//! `base64(salt).base64(ciphertext)`. The cipher is AES-128-CBC; key and IV
//! are derived from the operator passphrase and the per-envelope salt with
//! PBKDF2-HMAC-SHA512 (1024 iterations). The bcrypt hash of the passphrase
//! lives in `config/js2crypt`; its presence means encryption must be
//! unlocked before shards can decode enveloped lines.

use std::fs;
use std::io::{BufRead, Write};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use aws_lc_rs::cipher::{
    DecryptionContext, EncryptionContext, PaddedBlockDecryptingKey, PaddedBlockEncryptingKey,
    UnboundCipherKey, AES_128,
};
use aws_lc_rs::iv::FixedLength;
use aws_lc_rs::pbkdf2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::RwLock;
use rand::RngCore;
use thiserror::Error;
use tracing::{info, warn};

const SALT_LEN: usize = 16;
const KDF_ITERATIONS: u32 = 1024;
// 16 bytes of AES-128 key followed by 16 bytes of IV.
const DERIVED_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("encryption key is locked")]
    Locked,

    #[error("passphrase mismatch")]
    BadPassphrase,

    #[error("malformed envelope")]
    Malformed,

    #[error("decrypt failed")]
    Decrypt,

    #[error("encrypt failed")]
    Encrypt,

    #[error("bcrypt: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    /// No `js2crypt` file; envelopes are never written.
    Disabled,
    /// Hash present, passphrase not yet supplied.
    Locked { hash: String },
    /// Passphrase verified; envelopes can be opened and sealed.
    Unlocked { passphrase: String },
}

/// Process-wide crypt tool. Explicit lifecycle: [`Crypt::load`] at boot,
/// [`Crypt::unlock`] before encrypted databases come up.
pub struct Crypt {
    state: RwLock<State>,
    path: PathBuf,
}

impl Crypt {
    /// Read `config/js2crypt` if it exists.
    pub fn load(config_dir: &Path) -> Result<Self, Error> {
        let path = config_dir.join("js2crypt");

        let state = match fs::read_to_string(&path) {
            Ok(hash) => {
                info!("encryption key configured, waiting for unlock");
                State::Locked {
                    hash: hash.trim().to_owned(),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => State::Disabled,
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            state: RwLock::new(state),
            path,
        })
    }

    /// Encryption is configured, locked or not.
    pub fn enabled(&self) -> bool {
        !matches!(*self.state.read(), State::Disabled)
    }

    /// The key is available for envelope operations.
    pub fn ready(&self) -> bool {
        matches!(*self.state.read(), State::Unlocked { .. })
    }

    /// Accept a passphrase for key derivation.
    ///
    /// The passphrase must verify against the bcrypt hash persisted at
    /// `config/js2crypt` before it is kept; a mismatch fails with
    /// [`Error::BadPassphrase`] and the tool stays locked. No PBKDF2 key
    /// is ever derived from an unverified passphrase.
    pub fn unlock(&self, passphrase: &str) -> Result<(), Error> {
        let hash = match &*self.state.read() {
            State::Disabled => return Err(Error::Locked),
            State::Unlocked { .. } => return Ok(()),
            State::Locked { hash } => hash.clone(),
        };

        // The gate: bcrypt verification against the persisted hash.
        if !bcrypt::verify(passphrase, &hash)? {
            return Err(Error::BadPassphrase);
        }

        *self.state.write() = State::Unlocked {
            passphrase: passphrase.to_owned(),
        };
        info!("🔑 encryption unlocked");
        Ok(())
    }

    /// First-time setup: hash the passphrase, persist the hash and unlock.
    pub fn initialize(&self, passphrase: &str) -> Result<(), Error> {
        let hash = bcrypt::hash(passphrase, bcrypt::DEFAULT_COST)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&self.path)?;
        file.write_all(hash.as_bytes())?;

        *self.state.write() = State::Unlocked {
            passphrase: passphrase.to_owned(),
        };
        info!("🔑 encryption initialized");
        Ok(())
    }

    /// Prompt for the passphrase on the console until it verifies
    /// against the persisted hash. Called at boot when a key hash is
    /// present; three mismatches abort the boot with
    /// [`Error::BadPassphrase`].
    pub fn unlock_interactive(&self) -> Result<(), Error> {
        if !self.enabled() || self.ready() {
            return Ok(());
        }

        let stdin = std::io::stdin();
        for _ in 0..3 {
            print!("encryption passphrase: ");
            std::io::stdout().flush()?;

            let mut line = String::new();
            stdin.lock().read_line(&mut line)?;
            let passphrase = line.trim_end_matches(['\r', '\n']);

            match self.unlock(passphrase) {
                Ok(()) => return Ok(()),
                Err(Error::BadPassphrase) => warn!("passphrase mismatch, try again"),
                Err(err) => return Err(err),
            }
        }

        Err(Error::BadPassphrase)
    }

    /// Seal a plaintext line into an envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, Error> {
        let passphrase = self.passphrase()?;

        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);

        let (key, iv) = derive(&passphrase, &salt);
        let key = UnboundCipherKey::new(&AES_128, &key).map_err(|_| Error::Encrypt)?;
        let key = PaddedBlockEncryptingKey::cbc_pkcs7(key).map_err(|_| Error::Encrypt)?;

        let mut in_out = plaintext.to_vec();
        let iv = FixedLength::try_from(&iv[..]).map_err(|_| Error::Encrypt)?;
        key.less_safe_encrypt(&mut in_out, EncryptionContext::Iv128(iv))
            .map_err(|_| Error::Encrypt)?;

        Ok(format!(
            "{}.{}",
            BASE64.encode(salt),
            BASE64.encode(&in_out)
        ))
    }

    /// Open an envelope back into the plaintext line.
    pub fn decrypt(&self, envelope: &str) -> Result<Vec<u8>, Error> {
        let passphrase = self.passphrase()?;

        let (salt, ciphertext) = envelope.split_once('.').ok_or(Error::Malformed)?;
        let salt = BASE64.decode(salt).map_err(|_| Error::Malformed)?;
        let mut ciphertext = BASE64.decode(ciphertext).map_err(|_| Error::Malformed)?;

        if salt.len() != SALT_LEN {
            return Err(Error::Malformed);
        }

        let (key, iv) = derive(&passphrase, &salt);
        let key = UnboundCipherKey::new(&AES_128, &key).map_err(|_| Error::Decrypt)?;
        let key = PaddedBlockDecryptingKey::cbc_pkcs7(key).map_err(|_| Error::Decrypt)?;

        let iv = FixedLength::try_from(&iv[..]).map_err(|_| Error::Decrypt)?;
        let plaintext = key
            .decrypt(&mut ciphertext, DecryptionContext::Iv128(iv))
            .map_err(|_| Error::Decrypt)?;

        Ok(plaintext.to_vec())
    }

    fn passphrase(&self) -> Result<String, Error> {
        match &*self.state.read() {
            State::Unlocked { passphrase } => Ok(passphrase.clone()),
            _ => Err(Error::Locked),
        }
    }
}

/// A line shaped like `base64.base64` is treated as an envelope.
pub fn looks_enveloped(line: &str) -> bool {
    match line.split_once('.') {
        Some((salt, ciphertext)) => {
            !salt.is_empty()
                && !ciphertext.is_empty()
                && salt.bytes().all(base64_char)
                && ciphertext.bytes().all(base64_char)
        }
        None => false,
    }
}

fn base64_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

fn derive(passphrase: &str, salt: &[u8]) -> ([u8; 16], [u8; 16]) {
    let mut out = [0u8; DERIVED_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA512,
        NonZeroU32::new(KDF_ITERATIONS).unwrap(),
        salt,
        passphrase.as_bytes(),
        &mut out,
    );

    let mut key = [0u8; 16];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&out[..16]);
    iv.copy_from_slice(&out[16..]);
    (key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unlocked(dir: &Path) -> Crypt {
        let crypt = Crypt::load(dir).unwrap();
        crypt.initialize("hunter2").unwrap();
        crypt
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let crypt = unlocked(dir.path());

        let line = br#"{"identifier":"b1","meta":{"t":"x"}}"#;
        let envelope = crypt.encrypt(line).unwrap();

        assert!(looks_enveloped(&envelope));
        assert_eq!(crypt.decrypt(&envelope).unwrap(), line);
    }

    #[test]
    fn test_fresh_salt_per_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let crypt = unlocked(dir.path());

        let a = crypt.encrypt(b"same").unwrap();
        let b = crypt.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let crypt = unlocked(dir.path());
        let envelope = crypt.encrypt(b"secret").unwrap();

        let other_dir = tempfile::tempdir().unwrap();
        let other = Crypt::load(other_dir.path()).unwrap();
        other.initialize("wrong").unwrap();

        // Wrong key never yields the plaintext back; in almost all cases
        // unpadding fails outright.
        match other.decrypt(&envelope) {
            Err(Error::Decrypt) => (),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(plaintext) => assert_ne!(plaintext, b"secret"),
        }
    }

    #[test]
    fn test_unlock() {
        let dir = tempfile::tempdir().unwrap();
        {
            let crypt = Crypt::load(dir.path()).unwrap();
            crypt.initialize("hunter2").unwrap();
        }

        // Fresh load sees the hash and stays locked until the passphrase
        // is supplied.
        let crypt = Crypt::load(dir.path()).unwrap();
        assert!(crypt.enabled());
        assert!(!crypt.ready());
        assert!(matches!(crypt.encrypt(b"x"), Err(Error::Locked)));

        assert!(matches!(
            crypt.unlock("letmein"),
            Err(Error::BadPassphrase)
        ));
        crypt.unlock("hunter2").unwrap();
        assert!(crypt.ready());
    }

    #[test]
    fn test_failed_unlock_derives_no_key() {
        let dir = tempfile::tempdir().unwrap();
        let envelope = {
            let crypt = Crypt::load(dir.path()).unwrap();
            crypt.initialize("hunter2").unwrap();
            crypt.encrypt(b"secret").unwrap()
        };

        // A wrong passphrase is rejected at the bcrypt gate; the tool
        // stays locked and envelope operations still refuse outright
        // instead of running with a wrong derived key.
        let crypt = Crypt::load(dir.path()).unwrap();
        assert!(matches!(
            crypt.unlock("hunter3"),
            Err(Error::BadPassphrase)
        ));
        assert!(!crypt.ready());
        assert!(matches!(crypt.decrypt(&envelope), Err(Error::Locked)));
        assert!(matches!(crypt.encrypt(b"x"), Err(Error::Locked)));

        // The right passphrase still works afterwards.
        crypt.unlock("hunter2").unwrap();
        assert_eq!(crypt.decrypt(&envelope).unwrap(), b"secret");
    }

    #[test]
    fn test_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let crypt = Crypt::load(dir.path()).unwrap();
        assert!(!crypt.enabled());
        assert!(!crypt.ready());
    }

    #[test]
    fn test_looks_enveloped() {
        assert!(looks_enveloped("AAAA.BBBB=="));
        assert!(!looks_enveloped(r#"{"identifier":"a"}"#));
        assert!(!looks_enveloped("no-dot-here"));
        assert!(!looks_enveloped(".leading"));
    }
}
