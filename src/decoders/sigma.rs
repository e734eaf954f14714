use super::common::{hash160_address, op_return_pushes};
use crate::owners::OwnerSet;
use crate::parser::ParseContext;
use crate::txo::{Address, DecoderOutput};
use bitcoin::blockdata::script::Script;
use ripemd::Ripemd160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use sha2::{Digest, Sha256};

const SIGMA_PREFIX: &[u8] = b"SIGMA";

/// `OP_RETURN "SIGMA" <address> <signature> [<vin>]` (spec.md §4.2 #4). The
/// signature is a 65-byte recoverable ECDSA signature (64-byte compact form
/// plus a recovery id); `parse` stores it unverified along with the
/// indicated input index and the script bytes preceding the frame, and
/// `summarize` resolves validity once the full transaction is available,
/// trying every recovery id since the pushed byte isn't guaranteed to carry
/// the right one. `<vin>` defaults to input 0 when omitted — the common
/// case of a single-input signed transaction.
pub struct SigmaDecoder;

fn hash160(bytes: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(bytes);
    let rip = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&rip);
    out
}

/// Bytes of `script` preceding the `OP_RETURN "SIGMA"` frame — the part of
/// the locking script that was actually signed over, alongside the
/// indicated input's outpoint.
fn sigma_frame_prefix(script: &[u8]) -> Option<Vec<u8>> {
    let mut needle = vec![SIGMA_PREFIX.len() as u8];
    needle.extend_from_slice(SIGMA_PREFIX);
    let push_pos = script.windows(needle.len()).position(|w| w == needle)?;
    if push_pos == 0 || script[push_pos - 1] != 0x6a {
        return None;
    }
    let mut start = push_pos - 1;
    if start > 0 && script[start - 1] == 0x00 {
        start -= 1;
    }
    Some(script[..start].to_vec())
}

#[async_trait::async_trait]
impl crate::parser::Decoder for SigmaDecoder {
    fn tag(&self) -> &'static str {
        "sigma"
    }

    fn parse(&self, script: &[u8], _satoshis: u64, _owners: &OwnerSet) -> Option<crate::txo::ParseResult> {
        let pushes = op_return_pushes(Script::from_bytes(script))?;
        if pushes.len() < 3 || pushes[0] != SIGMA_PREFIX {
            return None;
        }
        let address = if pushes[1].len() == 20 {
            hash160_address(pushes[1].clone().try_into().ok()?)
        } else {
            Address(String::from_utf8_lossy(&pushes[1]).to_string())
        };
        let signature = pushes[2].clone();
        let vin = match pushes.get(3) {
            Some(raw) => std::str::from_utf8(raw).ok()?.parse().ok()?,
            None => 0,
        };
        Some(crate::txo::ParseResult::new(DecoderOutput::Sigma {
            address,
            signature,
            vin,
            valid: false,
        }))
    }

    async fn summarize(
        &self,
        ctx: &mut ParseContext,
        _is_broadcast: bool,
        _indexer: &crate::indexer::IndexerClient,
        _owners: &OwnerSet,
    ) -> crate::error::Result<Option<crate::txo::IndexSummary>> {
        let secp = Secp256k1::verification_only();
        let mut verified_count = 0i64;
        let spends = ctx.spends.clone();
        for txo in ctx.txos.iter_mut() {
            let Some(prefix) = sigma_frame_prefix(&txo.locking_script) else { continue };
            let Some(entry) = txo.data.get_mut(self.tag()) else { continue };
            let DecoderOutput::Sigma { address, signature, vin, valid } = &mut entry.data else { continue };
            if signature.len() != 65 {
                continue;
            }
            let Some(input) = spends.get(*vin as usize) else { continue };
            let mut signed_bytes = input.outpoint.to_big_endian_bytes();
            signed_bytes.extend_from_slice(&prefix);
            let digest = Sha256::digest(&signed_bytes);
            let Ok(msg) = Message::from_digest_slice(&digest) else { continue };
            let mut matched = false;
            for recid_val in 0..4 {
                let Ok(recid) = RecoveryId::from_i32(recid_val) else { continue };
                let Ok(rsig) = RecoverableSignature::from_compact(&signature[..64], recid) else { continue };
                if let Ok(pubkey) = secp.recover_ecdsa(&msg, &rsig) {
                    if hash160_address(hash160(&pubkey.serialize())) == *address {
                        matched = true;
                        break;
                    }
                }
            }
            *valid = matched;
            if matched {
                verified_count += 1;
            }
        }
        if verified_count == 0 {
            Ok(None)
        } else {
            Ok(Some(crate::txo::IndexSummary {
                id: None,
                amount: Some(verified_count),
                icon: None,
                data: None,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Decoder;
    use bitcoin::blockdata::opcodes::all as op;
    use bitcoin::blockdata::script::Builder;

    #[test]
    fn parses_sigma_fields() {
        let script = Builder::new()
            .push_opcode(op::OP_RETURN)
            .push_slice(b"SIGMA")
            .push_slice([9u8; 20])
            .push_slice([0u8; 65])
            .into_script()
            .to_bytes();
        let result = SigmaDecoder.parse(&script, 1, &OwnerSet::new()).unwrap();
        match result.data {
            DecoderOutput::Sigma { valid, signature, .. } => {
                assert!(!valid);
                assert_eq!(signature.len(), 65);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_non_sigma_return() {
        let script = Builder::new()
            .push_opcode(op::OP_RETURN)
            .push_slice(b"OTHER")
            .into_script()
            .to_bytes();
        assert!(SigmaDecoder.parse(&script, 1, &OwnerSet::new()).is_none());
    }
}
