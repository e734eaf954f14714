use super::common::hash160_address;
use crate::owners::OwnerSet;
use crate::parser::ParseContext;
use crate::txo::{DecoderOutput, ParseResult};
use bitcoin::blockdata::script::Script;

const ORDLOCK_PREFIX: &[u8] = b"ORDLOCK";

/// A marketplace listing template (spec.md §4.2 #8): `OP_RETURN "ORDLOCK"
/// <price LE u64> <seller hash160>`. `summarize` looks at whether the
/// template appears on an output (a new listing, "creation") or is being
/// spent (a "cancel" or "purchase", told apart by the shape of the
/// unlocking script — a bare signature reclaims it, anything richer pays
/// for it).
pub struct OrdLockDecoder;

fn unlock_item_count(script_sig: &Script) -> usize {
    script_sig.instructions().filter_map(Result::ok).count()
}

#[async_trait::async_trait]
impl crate::parser::Decoder for OrdLockDecoder {
    fn tag(&self) -> &'static str {
        "ordlock"
    }

    fn parse(&self, script: &[u8], _satoshis: u64, _owners: &OwnerSet) -> Option<ParseResult> {
        let pushes = super::common::op_return_pushes(Script::from_bytes(script))?;
        if pushes.len() < 3 || pushes[0] != ORDLOCK_PREFIX || pushes[2].len() != 20 {
            return None;
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&pushes[2]);
        let seller = hash160_address(hash);
        Some(
            ParseResult::new(DecoderOutput::OrdLock { seller: seller.clone() })
                .with_owner(seller)
                .with_basket("ordlock")
                .with_tag("ordlock"),
        )
    }

    async fn summarize(
        &self,
        ctx: &mut ParseContext,
        _is_broadcast: bool,
        _indexer: &crate::indexer::IndexerClient,
        _owners: &OwnerSet,
    ) -> crate::error::Result<Option<crate::txo::IndexSummary>> {
        let has_listing_output = ctx.txos.iter().any(|t| t.data.contains_key(self.tag()));
        let spent_listing_index = ctx.spends.iter().position(|t| t.data.contains_key(self.tag()));

        let amount = match spent_listing_index {
            Some(idx) => {
                let unlock_len = ctx
                    .tx
                    .input
                    .get(idx)
                    .map(|input| unlock_item_count(&input.script_sig) + input.witness.len())
                    .unwrap_or(0);
                if unlock_len > 2 {
                    1
                } else {
                    0
                }
            }
            None if has_listing_output => -1,
            None => return Ok(None),
        };

        Ok(Some(crate::txo::IndexSummary { id: None, amount: Some(amount), icon: None, data: None }))
    }
}
