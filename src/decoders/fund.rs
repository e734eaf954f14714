use super::common::{hash160_address, p2pkh_hash160};
use crate::owners::OwnerSet;
use crate::txo::{DecoderOutput, ParseResult};

/// Standard pay-to-pubkey-hash outputs with more than 1 satoshi (spec.md
/// §4.2 #1) — ordinary spendable funds, as opposed to the 1-sat outputs the
/// overlay protocols repurpose.
pub struct FundDecoder;

impl crate::parser::Decoder for FundDecoder {
    fn tag(&self) -> &'static str {
        "fund"
    }

    fn parse(&self, script: &[u8], satoshis: u64, _owners: &OwnerSet) -> Option<ParseResult> {
        if satoshis <= 1 {
            return None;
        }
        let hash = p2pkh_hash160(bitcoin::Script::from_bytes(script))?;
        let owner = hash160_address(hash);
        Some(
            ParseResult::new(DecoderOutput::Fund)
                .with_owner(owner)
                .with_basket("fund"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Decoder;
    use bitcoin::blockdata::opcodes::all as op;
    use bitcoin::blockdata::script::Builder;

    fn p2pkh(hash: [u8; 20]) -> Vec<u8> {
        Builder::new()
            .push_opcode(op::OP_DUP)
            .push_opcode(op::OP_HASH160)
            .push_slice(hash)
            .push_opcode(op::OP_EQUALVERIFY)
            .push_opcode(op::OP_CHECKSIG)
            .into_script()
            .to_bytes()
    }

    #[test]
    fn matches_funded_p2pkh() {
        let owners = OwnerSet::new();
        let script = p2pkh([1u8; 20]);
        let result = FundDecoder.parse(&script, 5000, &owners).unwrap();
        assert_eq!(result.basket.as_deref(), Some("fund"));
        assert!(result.owner.is_some());
    }

    #[test]
    fn rejects_one_satoshi() {
        let owners = OwnerSet::new();
        let script = p2pkh([1u8; 20]);
        assert!(FundDecoder.parse(&script, 1, &owners).is_none());
    }

    #[test]
    fn rejects_non_p2pkh() {
        let owners = OwnerSet::new();
        let script = Builder::new().push_opcode(op::OP_RETURN).into_script().to_bytes();
        assert!(FundDecoder.parse(&script, 5000, &owners).is_none());
    }
}
