use super::common::find_ord_envelope;
use crate::owners::OwnerSet;
use crate::txo::{DecoderOutput, ParseResult};
use bitcoin::blockdata::script::Script;

const OPNS_CONTENT_TYPE: &str = "application/op-ns";

/// A name-system inscription (spec.md §4.2 #9): an ordinary inscription
/// envelope whose content type marks it as a name registration, content
/// being the UTF-8 name itself.
pub struct OpnsDecoder;

impl crate::parser::Decoder for OpnsDecoder {
    fn tag(&self) -> &'static str {
        "opns"
    }

    fn parse(&self, script: &[u8], _satoshis: u64, _owners: &OwnerSet) -> Option<ParseResult> {
        let envelope = find_ord_envelope(Script::from_bytes(script))?;
        if envelope.content_type.as_deref() != Some(OPNS_CONTENT_TYPE) {
            return None;
        }
        let name = if envelope.content.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&envelope.content).to_string())
        };
        let mut result = ParseResult::new(DecoderOutput::Opns { name: name.clone() }).with_basket("opns");
        if let Some(name) = &name {
            result = result.with_tag(format!("name:{name}"));
        }
        Some(result)
    }
}
