//! PayloadEncoder - payload bytes ⇄ ordered OP_RETURN outputs

use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{Amount, Script, TxOut};

use crate::error::{StoreError, StoreResult};

/// Largest chunk carried by one data output.
pub const DEFAULT_STRIDE: usize = 220;

/// Split `payload` into consecutive chunks of at most `stride` bytes.
pub fn chunks(payload: &[u8], stride: usize) -> StoreResult<Vec<&[u8]>> {
    if stride == 0 {
        return Err(StoreError::InvalidOption("stride must be positive".into()));
    }
    Ok(payload.chunks(stride).collect())
}

/// One zero-value `OP_RETURN <chunk>` output per chunk, in payload order.
pub fn encode(payload: &[u8], stride: usize) -> StoreResult<Vec<TxOut>> {
    chunks(payload, stride)?
        .into_iter()
        .map(|chunk| {
            let data = PushBytesBuf::try_from(chunk.to_vec()).map_err(|e| StoreError::InvalidOption(e.to_string()))?;
            let script_pubkey = Builder::new().push_opcode(OP_RETURN).push_slice(data).into_script();
            Ok(TxOut { value: Amount::ZERO, script_pubkey })
        })
        .collect()
}

/// Bytes embedded in a data-carrying script, `None` for any other script.
pub fn nulldata(script: &Script) -> Option<Vec<u8>> {
    if !script.is_op_return() {
        return None;
    }
    let mut data = Vec::new();
    for instruction in script.instructions().skip(1) {
        match instruction.ok()? {
            Instruction::PushBytes(bytes) => data.extend_from_slice(bytes.as_bytes()),
            Instruction::Op(_) => return None,
        }
    }
    Some(data)
}

/// Concatenate the data of every data-carrying output, in order.
pub fn decode<'a>(outputs: impl IntoIterator<Item = &'a TxOut>) -> Vec<u8> {
    outputs.into_iter().filter_map(|out| nulldata(&out.script_pubkey)).flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_payload() {
        let outputs = encode(b"1", DEFAULT_STRIDE).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].value, Amount::ZERO);
        assert_eq!(nulldata(&outputs[0].script_pubkey), Some(vec![0x31]));
    }

    #[test]
    fn test_chunks_preserve_order_and_bound() {
        let payload: Vec<u8> = (0..1_000u32).map(|i| (i % 251) as u8).collect();
        for stride in [1, 7, 80, 220, 999, 1_000, 5_000] {
            let outputs = encode(&payload, stride).unwrap();
            assert_eq!(outputs.len(), payload.len().div_ceil(stride));
            assert!(outputs.iter().all(|o| nulldata(&o.script_pubkey).unwrap().len() <= stride));
            assert_eq!(decode(&outputs), payload);
        }
    }

    #[test]
    fn test_last_chunk_shorter() {
        let sizes: Vec<usize> = chunks(&[0u8; 500], 220).unwrap().iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![220, 220, 60]);
    }

    #[test]
    fn test_empty_payload_has_no_outputs() {
        assert!(encode(&[], DEFAULT_STRIDE).unwrap().is_empty());
    }

    #[test]
    fn test_zero_stride_rejected() {
        assert!(matches!(encode(b"abc", 0), Err(StoreError::InvalidOption(_))));
    }

    #[test]
    fn test_spendable_script_is_not_data() {
        let script = bitcoin::ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_raw_hash(
            bitcoin::hashes::Hash::all_zeros(),
        ));
        assert_eq!(nulldata(&script), None);
    }
}
