use super::common::op_return_pushes;
use crate::owners::OwnerSet;
use crate::txo::{DecoderOutput, ParseResult};
use bitcoin::blockdata::script::Script;
use std::collections::HashMap;

const MAP_PREFIX: &[u8] = b"MAP";
const MAP_SET: &[u8] = b"SET";

/// A standalone `OP_RETURN "MAP" "SET" <key> <value> ...` output (spec.md
/// §4.2 #5) — key/value metadata not attached to an inscription. Only `SET`
/// is handled; `ADD`/`DEL` operations are left for a future revision since
/// they require replaying prior MAP state this decoder doesn't have access
/// to.
pub struct MapDecoder;

impl crate::parser::Decoder for MapDecoder {
    fn tag(&self) -> &'static str {
        "map"
    }

    fn parse(&self, script: &[u8], _satoshis: u64, _owners: &OwnerSet) -> Option<ParseResult> {
        let pushes = op_return_pushes(Script::from_bytes(script))?;
        if pushes.len() < 2 || pushes[0] != MAP_PREFIX || pushes[1] != MAP_SET {
            return None;
        }
        let mut data = HashMap::new();
        let mut iter = pushes[2..].chunks_exact(2);
        for pair in &mut iter {
            let key = String::from_utf8_lossy(&pair[0]).to_string();
            let value = String::from_utf8_lossy(&pair[1]).to_string();
            data.insert(key, value);
        }
        if data.is_empty() {
            return None;
        }
        Some(ParseResult::new(DecoderOutput::Map { data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Decoder;
    use bitcoin::blockdata::opcodes::all as op;
    use bitcoin::blockdata::script::Builder;

    #[test]
    fn parses_set_pairs() {
        let script = Builder::new()
            .push_opcode(op::OP_RETURN)
            .push_slice(b"MAP")
            .push_slice(b"SET")
            .push_slice(b"app")
            .push_slice(b"myapp")
            .into_script()
            .to_bytes();
        let result = MapDecoder.parse(&script, 0, &OwnerSet::new()).unwrap();
        match result.data {
            DecoderOutput::Map { data } => assert_eq!(data.get("app").map(String::as_str), Some("myapp")),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_non_map() {
        let script = Builder::new().push_opcode(op::OP_RETURN).push_slice(b"OTHER").into_script().to_bytes();
        assert!(MapDecoder.parse(&script, 0, &OwnerSet::new()).is_none());
    }
}
