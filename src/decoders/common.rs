//! Shared script-recognition helpers used by more than one decoder. None of
//! this is specified byte-for-byte by spec.md §1 ("detailed byte-layout of
//! every protocol decoder" is explicitly out of scope) — these are
//! reasonable, idiomatic recognisers for the templates spec.md §4.2 names.

use crate::txo::Address;
use bitcoin::blockdata::opcodes::all as op;
use bitcoin::blockdata::script::{Instruction, Script};

/// Hex-encodes a hash160 into the crate's address representation. Real
/// base58check/bech32 encoding is chain-specific and out of this crate's
/// scope (spec.md §1 treats key derivation as an external collaborator);
/// callers only need a stable, comparable identity for the owner field.
pub fn hash160_address(hash: [u8; 20]) -> Address {
    Address(hex::encode(hash))
}

/// Recognises a standard `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY
/// OP_CHECKSIG` template and returns the embedded hash160.
pub fn p2pkh_hash160(script: &Script) -> Option<[u8; 20]> {
    let ops: Vec<Instruction> = script.instructions().collect::<Result<_, _>>().ok()?;
    if ops.len() != 5 {
        return None;
    }
    let push = match &ops[2] {
        Instruction::PushBytes(p) if p.len() == 20 => p.as_bytes(),
        _ => return None,
    };
    let is_template = matches!(ops[0], Instruction::Op(o) if o == op::OP_DUP)
        && matches!(ops[1], Instruction::Op(o) if o == op::OP_HASH160)
        && matches!(ops[3], Instruction::Op(o) if o == op::OP_EQUALVERIFY)
        && matches!(ops[4], Instruction::Op(o) if o == op::OP_CHECKSIG);
    if !is_template {
        return None;
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(push);
    Some(out)
}

/// Returns the raw pushdata items carried in an `OP_RETURN` (optionally
/// `OP_FALSE OP_RETURN`) frame, in order.
pub fn op_return_pushes(script: &Script) -> Option<Vec<Vec<u8>>> {
    let ops: Vec<Instruction> = script.instructions().collect::<Result<_, _>>().ok()?;
    let mut idx = 0;
    if matches!(ops.first(), Some(Instruction::PushBytes(p)) if p.is_empty()) {
        idx += 1;
    }
    match ops.get(idx) {
        Some(Instruction::Op(o)) if *o == op::OP_RETURN => {}
        _ => return None,
    }
    idx += 1;
    let mut pushes = Vec::new();
    for inst in &ops[idx..] {
        match inst {
            Instruction::PushBytes(p) => pushes.push(p.as_bytes().to_vec()),
            Instruction::Op(o) if *o == op::OP_0 => pushes.push(Vec::new()),
            _ => return None,
        }
    }
    Some(pushes)
}

/// A decoded `OP_FALSE OP_IF "ord" ...` inscription envelope (spec.md §4.2
/// #3), plus the script bytes that surround it so owner-scanning decoders
/// can inspect the prefix/suffix for a spender template.
pub struct OrdEnvelope {
    pub content_type: Option<String>,
    pub content: Vec<u8>,
    pub fields: std::collections::HashMap<String, String>,
    pub prefix: Vec<u8>,
    pub suffix: Vec<u8>,
}

const ORD_TAG: &[u8] = b"ord";

/// Scans `script` for the inscription envelope anywhere in the byte stream
/// (it is typically wrapped in an otherwise-ordinary spend script), and
/// splits out the bytes before/after it for owner recovery.
pub fn find_ord_envelope(script: &Script) -> Option<OrdEnvelope> {
    let bytes = script.as_bytes();
    // OP_FALSE OP_IF "ord" -> 0x00 0x63 0x03 'o' 'r' 'd'
    let needle = {
        let mut n = vec![0x00u8, 0x63, 0x03];
        n.extend_from_slice(ORD_TAG);
        n
    };
    let start = find_subslice(bytes, &needle)?;
    let envelope_start = start;
    // Find the matching OP_ENDIF (0x68) scanning forward; inscriptions
    // don't nest, so the first OP_ENDIF after the tag closes it.
    let end_rel = bytes[envelope_start..].iter().position(|&b| b == 0x68)?;
    let envelope_end = envelope_start + end_rel + 1;

    let inner = &bytes[envelope_start + needle.len()..envelope_end - 1];
    let (content_type, fields, content) = parse_envelope_body(inner);

    Some(OrdEnvelope {
        content_type,
        content,
        fields,
        prefix: bytes[..envelope_start].to_vec(),
        suffix: bytes[envelope_end..].to_vec(),
    })
}

/// Field tag `3` is the conventional "parent" pointer; everything else
/// besides content-type (`1`) is surfaced keyed by the tag bytes decoded as
/// UTF-8 (ord field tags outside the reserved single-byte range are
/// typically short ASCII identifiers for app-specific extensions).
const FIELD_TAG_PARENT: &[u8] = &[0x03];

fn parse_envelope_body(inner: &[u8]) -> (Option<String>, std::collections::HashMap<String, String>, Vec<u8>) {
    // Body shape: (field_tag push, field_value push)* OP_0 content_push*
    let mut content_type = None;
    let mut fields = std::collections::HashMap::new();
    let mut pos = 0;
    let mut content = Vec::new();
    while pos < inner.len() {
        if inner[pos] == 0x00 {
            // OP_0 marks the start of content pushes.
            pos += 1;
            while pos < inner.len() {
                if let Some((data, next)) = read_push(inner, pos) {
                    content.extend_from_slice(data);
                    pos = next;
                } else {
                    break;
                }
            }
            break;
        }
        let (tag, next) = match read_push(inner, pos) {
            Some(v) => v,
            None => break,
        };
        pos = next;
        let (value, next) = match read_push(inner, pos) {
            Some(v) => v,
            None => break,
        };
        pos = next;
        if tag == [0x01u8] {
            content_type = Some(String::from_utf8_lossy(value).to_string());
        } else if tag == FIELD_TAG_PARENT {
            fields.insert("parent".to_owned(), String::from_utf8_lossy(value).to_string());
        } else {
            fields.insert(String::from_utf8_lossy(tag).to_string(), String::from_utf8_lossy(value).to_string());
        }
    }
    (content_type, fields, content)
}

fn read_push(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let op = *data.get(pos)?;
    match op {
        0x01..=0x4b => {
            let len = op as usize;
            let start = pos + 1;
            let end = start + len;
            if end > data.len() {
                return None;
            }
            Some((&data[start..end], end))
        }
        0x4c => {
            let len = *data.get(pos + 1)? as usize;
            let start = pos + 2;
            let end = start + len;
            if end > data.len() {
                return None;
            }
            Some((&data[start..end], end))
        }
        _ => None,
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Scans the bytes surrounding an envelope (prefix then suffix) for the
/// first recognisable P2PKH spender template — used by Inscription/OpNS to
/// recover `owner` without a full script interpreter.
pub fn scan_for_owner(prefix: &[u8], suffix: &[u8]) -> Option<Address> {
    for buf in [prefix, suffix] {
        let script = Script::from_bytes(buf);
        if let Some(hash) = p2pkh_hash160(script) {
            return Some(hash160_address(hash));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::script::Builder;
    use bitcoin::hashes::Hash;

    #[test]
    fn recognises_p2pkh_template() {
        let hash = [7u8; 20];
        let script = Builder::new()
            .push_opcode(op::OP_DUP)
            .push_opcode(op::OP_HASH160)
            .push_slice(hash)
            .push_opcode(op::OP_EQUALVERIFY)
            .push_opcode(op::OP_CHECKSIG)
            .into_script();
        assert_eq!(p2pkh_hash160(&script), Some(hash));
    }

    #[test]
    fn rejects_non_template_script() {
        let script = Builder::new().push_opcode(op::OP_RETURN).into_script();
        assert_eq!(p2pkh_hash160(&script), None);
    }

    #[test]
    fn extracts_op_return_pushes() {
        let script = Builder::new()
            .push_opcode(op::OP_RETURN)
            .push_slice(b"MAP")
            .push_slice(b"SET")
            .into_script();
        let pushes = op_return_pushes(&script).unwrap();
        assert_eq!(pushes[0], b"MAP");
        assert_eq!(pushes[1], b"SET");
    }

    #[test]
    fn hash_bytes_roundtrip() {
        let h = bitcoin::hashes::sha256::Hash::hash(b"x");
        assert_eq!(h.as_byte_array().len(), 32);
    }
}
