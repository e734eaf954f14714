use super::common::{find_ord_envelope, scan_for_owner};
use crate::outpoint::Outpoint;
use crate::owners::OwnerSet;
use crate::txo::{DecoderOutput, IndexData, ParseResult};
use bitcoin::blockdata::script::Script;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::str::FromStr;

/// The 1-sat ordinal inscription envelope (spec.md §4.2 #3): content,
/// content-type and arbitrary fields wrapped in an `OP_FALSE OP_IF "ord"`
/// frame. A `parent` field pointing at an outpoint is inherited as the
/// inscription's parent; any other fields are deposited under the `map`
/// tag as a side effect rather than reached into by the Map decoder.
pub struct InscriptionDecoder;

impl crate::parser::Decoder for InscriptionDecoder {
    fn tag(&self) -> &'static str {
        "insc"
    }

    fn parse(&self, script: &[u8], _satoshis: u64, _owners: &OwnerSet) -> Option<ParseResult> {
        let envelope = find_ord_envelope(Script::from_bytes(script))?;

        let file_hash = if envelope.content.is_empty() {
            None
        } else {
            Some(hex::encode(Sha256::digest(&envelope.content)))
        };

        let parent = envelope
            .fields
            .get("parent")
            .and_then(|p| Outpoint::from_str(p).ok());

        let mut result = ParseResult::new(DecoderOutput::Inscription {
            file_hash,
            file_size: envelope.content.len() as u64,
            file_type: envelope.content_type.clone(),
            fields: envelope.fields.clone(),
            parent,
            content: Some(envelope.content.clone()),
        });

        if let Some(owner) = scan_for_owner(&envelope.prefix, &envelope.suffix) {
            result = result.with_owner(owner);
        }

        let map_fields: HashMap<String, String> =
            envelope.fields.into_iter().filter(|(k, _)| k != "parent").collect();
        if !map_fields.is_empty() {
            result.extra = Some((
                "map".to_owned(),
                IndexData {
                    data: DecoderOutput::Map { data: map_fields },
                    tags: Vec::new(),
                    content: None,
                },
            ));
        }

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Decoder;
    use bitcoin::blockdata::opcodes::all as op;
    use bitcoin::blockdata::script::Builder;

    fn envelope_script(content_type: &[u8], content: &[u8], extra_field: Option<(&[u8], &[u8])>) -> Vec<u8> {
        let mut b = Builder::new()
            .push_opcode(op::OP_FALSE)
            .push_opcode(op::OP_IF)
            .push_slice(b"ord")
            .push_slice([0x01u8])
            .push_slice(content_type);
        if let Some((tag, value)) = extra_field {
            b = b.push_slice(tag).push_slice(value);
        }
        b.push_opcode(op::OP_0)
            .push_slice(content)
            .push_opcode(op::OP_ENDIF)
            .into_script()
            .to_bytes()
    }

    #[test]
    fn extracts_content_type_and_hash() {
        let script = envelope_script(b"text/plain", b"hello", None);
        let result = InscriptionDecoder.parse(&script, 1, &OwnerSet::new()).unwrap();
        match result.data {
            DecoderOutput::Inscription { file_type, file_size, file_hash, content, .. } => {
                assert_eq!(file_type.as_deref(), Some("text/plain"));
                assert_eq!(file_size, 5);
                assert!(file_hash.is_some());
                assert_eq!(content.as_deref(), Some(b"hello".as_slice()));
            }
            _ => panic!("wrong variant"),
        }
        assert!(result.basket.is_none());
    }

    #[test]
    fn rejects_script_without_envelope() {
        let script = Builder::new().push_opcode(op::OP_RETURN).into_script().to_bytes();
        assert!(InscriptionDecoder.parse(&script, 1, &OwnerSet::new()).is_none());
    }

    #[test]
    fn non_parent_fields_deposit_into_map_slot() {
        let script = envelope_script(b"text/plain", b"hi", Some((b"app", b"myapp")));
        let result = InscriptionDecoder.parse(&script, 1, &OwnerSet::new()).unwrap();
        let (tag, data) = result.extra.expect("expected a map side-effect write");
        assert_eq!(tag, "map");
        match data.data {
            DecoderOutput::Map { data } => assert_eq!(data.get("app").map(String::as_str), Some("myapp")),
            _ => panic!("wrong variant"),
        }
    }
}
