//! Signing - SIGHASH_ALL over every input with the derived address key

use bitcoin::bip32::Xpriv;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1, Signing};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ecdsa, ScriptBuf, Transaction, TxOut, Witness};

use crate::error::{StoreError, StoreResult};
use crate::keys::{compressed_public_key, owned_scripts};

/// Sign every input. `spent[i]` is the output consumed by input `i`. Each
/// spent script must belong to `key`, as P2WPKH or P2PKH.
pub fn sign_inputs<C: Signing>(secp: &Secp256k1<C>, tx: &mut Transaction, spent: &[TxOut], key: &Xpriv) -> StoreResult<()> {
    if spent.len() != tx.input.len() {
        return Err(StoreError::SanityCheckFailed(format!("{} inputs but {} spent outputs", tx.input.len(), spent.len())));
    }
    let pubkey = compressed_public_key(secp, key);
    let [wpkh, pkh] = owned_scripts(&pubkey);

    let mut signed: Vec<(ScriptBuf, Witness)> = Vec::with_capacity(spent.len());
    {
        let mut cache = SighashCache::new(&*tx);
        for (index, prev) in spent.iter().enumerate() {
            if prev.script_pubkey == wpkh {
                let sighash = cache
                    .p2wpkh_signature_hash(index, &prev.script_pubkey, prev.value, EcdsaSighashType::All)
                    .map_err(sighash_err)?;
                let msg = Message::from_digest(sighash.to_byte_array());
                let signature = ecdsa::Signature::sighash_all(secp.sign_ecdsa(&msg, &key.private_key));
                signed.push((ScriptBuf::new(), Witness::p2wpkh(&signature, &pubkey.0)));
            } else if prev.script_pubkey == pkh {
                let sighash = cache
                    .legacy_signature_hash(index, &prev.script_pubkey, EcdsaSighashType::All.to_u32())
                    .map_err(sighash_err)?;
                let msg = Message::from_digest(sighash.to_byte_array());
                let signature = ecdsa::Signature::sighash_all(secp.sign_ecdsa(&msg, &key.private_key));
                let sig_push = PushBytesBuf::try_from(signature.to_vec()).map_err(sighash_err)?;
                let script_sig = Builder::new().push_slice(sig_push).push_key(&bitcoin::PublicKey::from(pubkey)).into_script();
                signed.push((script_sig, Witness::new()));
            } else {
                return Err(StoreError::SanityCheckFailed(format!("input {} is not spendable by the derived key", index)));
            }
        }
    }

    for (input, (script_sig, witness)) in tx.input.iter_mut().zip(signed) {
        input.script_sig = script_sig;
        input.witness = witness;
    }
    Ok(())
}

fn sighash_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::SanityCheckFailed(format!("sighash: {}", e))
}
