use super::common::hash160_address;
use crate::owners::OwnerSet;
use crate::txo::{DecoderOutput, ParseResult};
use bitcoin::blockdata::opcodes::all as op;
use bitcoin::blockdata::script::{Instruction, Script};

/// A 2-of-2 cosigner template (spec.md §4.2 #10): `<primary pubkey>
/// OP_CHECKSIGVERIFY <cosigner pubkey> OP_CHECKSIG`. Sets `owner` to the
/// primary signer's address; the cosigner is not itself tracked.
pub struct CosignDecoder;

fn parse_template(script: &Script) -> Option<[u8; 20]> {
    let ops: Vec<Instruction> = script.instructions().collect::<Result<_, _>>().ok()?;
    if ops.len() != 4 {
        return None;
    }
    let primary_pubkey = match &ops[0] {
        Instruction::PushBytes(p) if p.len() == 33 || p.len() == 65 => p.as_bytes(),
        _ => return None,
    };
    let is_template = matches!(ops[1], Instruction::Op(o) if o == op::OP_CHECKSIGVERIFY)
        && matches!(ops[2], Instruction::PushBytes(_))
        && matches!(ops[3], Instruction::Op(o) if o == op::OP_CHECKSIG);
    if !is_template {
        return None;
    }
    Some(hash160(primary_pubkey))
}

fn hash160(bytes: &[u8]) -> [u8; 20] {
    use ripemd::Ripemd160;
    use sha2::{Digest, Sha256};
    let sha = Sha256::digest(bytes);
    let rip = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&rip);
    out
}

impl crate::parser::Decoder for CosignDecoder {
    fn tag(&self) -> &'static str {
        "cosign"
    }

    fn parse(&self, script: &[u8], _satoshis: u64, _owners: &OwnerSet) -> Option<ParseResult> {
        let hash = parse_template(Script::from_bytes(script))?;
        let primary = hash160_address(hash);
        Some(ParseResult::new(DecoderOutput::Cosign { primary: primary.clone() }).with_owner(primary))
    }
}
