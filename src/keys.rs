//! Keys - Master key material and BIP44 signing key derivation
//!
//! Wallets hand out their master key either in the clear (base58 xprv) or
//! encrypted under the wallet passphrase. Signing keys live at
//! `m/44'/{coin_type}'/{account}'/{branch}/{index}`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::{Secp256k1, Signing};
use bitcoin::{CompressedPublicKey, ScriptBuf};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::config::Network;
use crate::error::{StoreError, StoreResult};

/// BIP44 purpose.
pub const PURPOSE: u32 = 44;
/// PBKDF2 rounds used by [`MasterKey::encrypt`] when the caller has no preference.
pub const DEFAULT_KDF_ITERATIONS: u32 = 50_000;

const SALT_LENGTH: usize = 16;
const KEY_LENGTH: usize = 32;

/// Master key as reported by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MasterKey {
    Plain { xprv: String },
    /// PBKDF2-HMAC-SHA256 over the passphrase, AES-256-GCM over the base58 xprv.
    Encrypted { salt: String, iterations: u32, nonce: String, ciphertext: String },
}

impl MasterKey {
    pub fn plain(xprv: &Xpriv) -> Self {
        MasterKey::Plain { xprv: xprv.to_string() }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, MasterKey::Encrypted { .. })
    }

    pub fn encrypt(xprv: &Xpriv, passphrase: &str, iterations: u32) -> StoreResult<Self> {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = stretch(passphrase, &salt, iterations);

        let cipher = Aes256Gcm::new_from_slice(key.as_slice()).map_err(|e| StoreError::KeyDerivation(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let plaintext = Zeroizing::new(xprv.to_string());
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| StoreError::KeyDerivation(e.to_string()))?;

        Ok(MasterKey::Encrypted {
            salt: hex::encode(salt),
            iterations,
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        })
    }

    /// Unlock the master key. An encrypted key without a passphrase, or with
    /// the wrong one, fails with [`StoreError::DecryptionFailed`].
    pub fn unlock(&self, passphrase: Option<&str>) -> StoreResult<Xpriv> {
        match self {
            MasterKey::Plain { xprv } => Xpriv::from_str(xprv).map_err(|e| StoreError::KeyDerivation(e.to_string())),
            MasterKey::Encrypted { salt, iterations, nonce, ciphertext } => {
                let passphrase = passphrase.ok_or(StoreError::DecryptionFailed)?;
                let salt = hex::decode(salt).map_err(|e| StoreError::Decode(e.to_string()))?;
                let nonce = hex::decode(nonce).map_err(|e| StoreError::Decode(e.to_string()))?;
                let ciphertext = hex::decode(ciphertext).map_err(|e| StoreError::Decode(e.to_string()))?;
                if nonce.len() != 12 {
                    return Err(StoreError::Decode(format!("nonce length {}", nonce.len())));
                }

                let key = stretch(passphrase, &salt, *iterations);
                let cipher = Aes256Gcm::new_from_slice(key.as_slice()).map_err(|e| StoreError::KeyDerivation(e.to_string()))?;
                let plaintext = Zeroizing::new(
                    cipher
                        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
                        .map_err(|_| StoreError::DecryptionFailed)?,
                );
                let encoded = std::str::from_utf8(&plaintext).map_err(|_| StoreError::DecryptionFailed)?;
                Xpriv::from_str(encoded).map_err(|e| StoreError::KeyDerivation(e.to_string()))
            }
        }
    }
}

fn stretch(passphrase: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LENGTH]> {
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, key.as_mut());
    key
}

/// `m/44'/{coin_type}'/{account_index}'`
pub fn account_path(network: Network, account_index: u32) -> StoreResult<DerivationPath> {
    let hardened = |i: u32| ChildNumber::from_hardened_idx(i).map_err(|e| StoreError::KeyDerivation(e.to_string()));
    Ok(DerivationPath::from(vec![hardened(PURPOSE)?, hardened(network.coin_type())?, hardened(account_index)?]))
}

/// Derive the address key for `account_index / branch / index` from the master key.
pub fn derive_signing_key<C: Signing>(
    secp: &Secp256k1<C>,
    master: &Xpriv,
    network: Network,
    account_index: u32,
    branch: u32,
    index: u32,
) -> StoreResult<Xpriv> {
    let account = master
        .derive_priv(secp, &account_path(network, account_index)?)
        .map_err(|e| StoreError::KeyDerivation(e.to_string()))?;
    let normal = |i: u32| ChildNumber::from_normal_idx(i).map_err(|e| StoreError::KeyDerivation(e.to_string()));
    account
        .derive_priv(secp, &[normal(branch)?, normal(index)?])
        .map_err(|e| StoreError::KeyDerivation(e.to_string()))
}

pub fn compressed_public_key<C: Signing>(secp: &Secp256k1<C>, key: &Xpriv) -> CompressedPublicKey {
    CompressedPublicKey(key.private_key.public_key(secp))
}

/// Scripts the key can sign for: native segwit first, then legacy.
pub fn owned_scripts(pubkey: &CompressedPublicKey) -> [ScriptBuf; 2] {
    [
        ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash()),
        ScriptBuf::new_p2pkh(&bitcoin::PublicKey::from(*pubkey).pubkey_hash()),
    ]
}

/// Native segwit address of the key at the given path.
pub fn derive_address(master: &Xpriv, network: Network, account_index: u32, branch: u32, index: u32) -> StoreResult<String> {
    let secp = Secp256k1::new();
    let key = derive_signing_key(&secp, master, network, account_index, branch, index)?;
    let pubkey = compressed_public_key(&secp, &key);
    Ok(bitcoin::Address::p2wpkh(&pubkey, network.to_bitcoin()).to_string())
}
