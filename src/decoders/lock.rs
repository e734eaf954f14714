use super::common::hash160_address;
use crate::owners::OwnerSet;
use crate::txo::{DecoderOutput, ParseResult};
use bitcoin::blockdata::opcodes::all as op;
use bitcoin::blockdata::script::{Instruction, Script};

/// A CLTV timelock template: `<height> OP_CLTV OP_DROP OP_DUP OP_HASH160
/// <hash> OP_EQUALVERIFY OP_CHECKSIG` (spec.md §4.2 #2).
pub struct LockDecoder;

fn parse_template(script: &Script) -> Option<(u32, [u8; 20])> {
    let ops: Vec<Instruction> = script.instructions().collect::<Result<_, _>>().ok()?;
    if ops.len() != 8 {
        return None;
    }
    let height = match &ops[0] {
        Instruction::PushBytes(p) => bytes_to_height(p.as_bytes()),
        _ => return None,
    }?;
    let hash_push = match &ops[4] {
        Instruction::PushBytes(p) if p.len() == 20 => p.as_bytes(),
        _ => return None,
    };
    let is_template = matches!(ops[1], Instruction::Op(o) if o == op::OP_CLTV)
        && matches!(ops[2], Instruction::Op(o) if o == op::OP_DROP)
        && matches!(ops[3], Instruction::Op(o) if o == op::OP_DUP)
        && matches!(ops[5], Instruction::Op(o) if o == op::OP_HASH160)
        && matches!(ops[6], Instruction::Op(o) if o == op::OP_EQUALVERIFY)
        && matches!(ops[7], Instruction::Op(o) if o == op::OP_CHECKSIG);
    if !is_template {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(hash_push);
    Some((height, hash))
}

fn bytes_to_height(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 4 {
        return None;
    }
    let mut buf = [0u8; 4];
    buf[..bytes.len()].copy_from_slice(bytes);
    Some(u32::from_le_bytes(buf))
}

impl crate::parser::Decoder for LockDecoder {
    fn tag(&self) -> &'static str {
        "lock"
    }

    fn parse(&self, script: &[u8], _satoshis: u64, owners: &OwnerSet) -> Option<ParseResult> {
        let (height, hash) = parse_template(Script::from_bytes(script))?;
        let owner = hash160_address(hash);
        let mut result = ParseResult::new(DecoderOutput::Lock { until_height: Some(height) })
            .with_owner(owner.clone())
            .with_basket("lock");
        if owners.contains(&owner) {
            result = result.with_tag(format!("lock:until:{height}"));
        }
        Some(result)
    }
}
