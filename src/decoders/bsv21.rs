use crate::owners::OwnerSet;
use crate::parser::ParseContext;
use crate::txo::{Bsv21Op, Bsv21Status, DecoderOutput, ParseResult};
use bitcoin::blockdata::script::Script;

use super::common::{find_ord_envelope, op_return_pushes};

const BSV21_CONTENT_TYPE: &str = "application/bsv-20";

/// A BSV21 fungible-token payload (spec.md §4.2 #7) — an inscription whose
/// content type is `application/bsv-20` carrying a JSON `{p, op, id?, amt,
/// sym?, icon?, dec?}` body, or a bare `OP_RETURN BSV21 <op> <id> <amt>`
/// transfer marker for outputs that don't need a fresh inscription.
pub struct Bsv21Decoder;

#[derive(serde::Deserialize)]
struct Bsv21Payload {
    op: String,
    #[serde(default)]
    id: Option<String>,
    amt: String,
    #[serde(default)]
    sym: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    dec: Option<u8>,
}

fn parse_op(op: &str) -> Option<Bsv21Op> {
    match op {
        "deploy+mint" | "deploy" => Some(Bsv21Op::Deploy),
        "mint" => Some(Bsv21Op::Mint),
        "transfer" => Some(Bsv21Op::Transfer),
        "burn" => Some(Bsv21Op::Burn),
        _ => None,
    }
}

#[async_trait::async_trait]
impl crate::parser::Decoder for Bsv21Decoder {
    fn tag(&self) -> &'static str {
        "bsv21"
    }

    fn parse(&self, script: &[u8], satoshis: u64, _owners: &OwnerSet) -> Option<ParseResult> {
        if satoshis != 1 {
            return None;
        }
        let script = Script::from_bytes(script);

        if let Some(envelope) = find_ord_envelope(script) {
            if envelope.content_type.as_deref() != Some(BSV21_CONTENT_TYPE) {
                return None;
            }
            let payload: Bsv21Payload = serde_json::from_slice(&envelope.content).ok()?;
            let op = parse_op(&payload.op)?;
            let amt: u64 = payload.amt.parse().ok()?;
            let token_id = payload.id.clone().unwrap_or_default();
            return Some(
                ParseResult::new(DecoderOutput::Bsv21 {
                    token_id,
                    op,
                    amt,
                    status: Bsv21Status::Pending,
                    sym: payload.sym,
                    icon: payload.icon,
                    dec: payload.dec,
                })
                .with_basket("bsv21"),
            );
        }

        let pushes = op_return_pushes(script)?;
        if pushes.len() < 4 || pushes[0] != b"BSV21" {
            return None;
        }
        let op = parse_op(std::str::from_utf8(&pushes[1]).ok()?)?;
        let token_id = String::from_utf8_lossy(&pushes[2]).to_string();
        let amt: u64 = std::str::from_utf8(&pushes[3]).ok()?.parse().ok()?;
        Some(
            ParseResult::new(DecoderOutput::Bsv21 {
                token_id,
                op,
                amt,
                status: Bsv21Status::Pending,
                sym: None,
                icon: None,
                dec: None,
            })
            .with_basket("bsv21"),
        )
    }

    async fn summarize(
        &self,
        ctx: &mut ParseContext,
        _is_broadcast: bool,
        indexer: &crate::indexer::IndexerClient,
        owners: &OwnerSet,
    ) -> crate::error::Result<Option<crate::txo::IndexSummary>> {
        let token_ids: Vec<String> = ctx
            .txos
            .iter()
            .chain(ctx.spends.iter())
            .filter_map(|txo| match txo.data.get(self.tag()).map(|d| &d.data) {
                Some(DecoderOutput::Bsv21 { token_id, .. }) => Some(token_id.clone()),
                _ => None,
            })
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();

        if token_ids.is_empty() {
            return Ok(None);
        }

        let mut touched = 0i64;
        for token_id in &token_ids {
            let input_amts: Vec<u64> = ctx
                .spends
                .iter()
                .filter_map(|txo| match txo.data.get(self.tag()).map(|d| &d.data) {
                    Some(DecoderOutput::Bsv21 { token_id: id, amt, op, .. }) if id == token_id => {
                        matches!(op, Bsv21Op::Transfer | Bsv21Op::Burn).then_some(*amt)
                    }
                    _ => None,
                })
                .collect();
            let has_inputs = ctx
                .spends
                .iter()
                .any(|txo| matches!(txo.data.get(self.tag()).map(|d| &d.data), Some(DecoderOutput::Bsv21 { token_id: id, .. }) if id == token_id));

            let mut pending = false;
            for spend in &ctx.spends {
                let Some(DecoderOutput::Bsv21 { token_id: id, .. }) = spend.data.get(self.tag()).map(|d| &d.data) else { continue };
                if id != token_id {
                    continue;
                }
                match indexer.bsv21_tx(token_id, &spend.outpoint.txid).await {
                    Ok(_) => {}
                    Err(crate::error::Error::NotFound) => pending = true,
                    Err(e) => return Err(e),
                }
            }

            let tokens_in: u64 = input_amts.iter().sum();
            let tokens_out: u64 = ctx
                .txos
                .iter()
                .filter_map(|txo| match txo.data.get(self.tag()).map(|d| &d.data) {
                    Some(DecoderOutput::Bsv21 { token_id: id, amt, op, .. }) if id == token_id => {
                        matches!(op, Bsv21Op::Transfer | Bsv21Op::Burn).then_some(*amt)
                    }
                    _ => None,
                })
                .sum();

            let metadata = indexer.bsv21_token(token_id).await.ok();

            for txo in ctx.txos.iter_mut() {
                let matches_id = matches!(
                    txo.data.get(self.tag()).map(|d| &d.data),
                    Some(DecoderOutput::Bsv21 { token_id: id, .. }) if id == token_id
                );
                if !matches_id {
                    continue;
                }
                let status = if pending {
                    Bsv21Status::Pending
                } else if !has_inputs {
                    Bsv21Status::Invalid
                } else if tokens_in >= tokens_out {
                    Bsv21Status::Valid
                } else {
                    Bsv21Status::Invalid
                };

                let mut amt_for_tags = 0u64;
                if let Some(entry) = txo.data.get_mut(self.tag()) {
                    if let DecoderOutput::Bsv21 { status: s, sym, icon, dec, amt, .. } = &mut entry.data {
                        *s = status;
                        amt_for_tags = *amt;
                        if let Some(meta) = &metadata {
                            *sym = meta.sym.clone().or_else(|| sym.clone());
                            *icon = meta.icon.clone().or_else(|| icon.clone());
                            *dec = meta.dec.or(*dec);
                        }
                    }
                    if txo.owner.as_ref().is_some_and(|o| owners.contains(o)) {
                        entry.tags = vec![
                            format!("id:{token_id}"),
                            format!("id:{token_id}:{status}"),
                            format!("amt:{amt_for_tags}"),
                        ];
                    }
                }
                touched += 1;
            }
        }

        if touched == 0 {
            Ok(None)
        } else {
            Ok(Some(crate::txo::IndexSummary { id: None, amount: Some(touched), icon: None, data: None }))
        }
    }
}
