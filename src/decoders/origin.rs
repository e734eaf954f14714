use crate::outpoint::Outpoint;
use crate::owners::OwnerSet;
use crate::parser::ParseContext;
use crate::txo::{DecoderOutput, ParseResult};
use std::collections::HashMap;

/// 1-sat ordinal provenance (spec.md §4.2 #6). `parse` only records that an
/// output is a 1-sat candidate; the real work — transfer detection via
/// cumulative satoshi position, OrdFS lookups, MAP inheritance — happens in
/// `summarize` once the whole transaction (inputs and outputs) is visible.
pub struct OriginDecoder;

#[async_trait::async_trait]
impl crate::parser::Decoder for OriginDecoder {
    fn tag(&self) -> &'static str {
        "origin"
    }

    fn parse(&self, _script: &[u8], satoshis: u64, _owners: &OwnerSet) -> Option<ParseResult> {
        if satoshis != 1 {
            return None;
        }
        Some(
            ParseResult::new(DecoderOutput::Origin {
                outpoint: Outpoint::from_pair([0u8; 32], 0),
                sequence: 0,
                nonce: 0,
                map: HashMap::new(),
                parent: None,
            })
            .with_basket("1sat"),
        )
    }

    async fn summarize(
        &self,
        ctx: &mut ParseContext,
        _is_broadcast: bool,
        indexer: &crate::indexer::IndexerClient,
        owners: &OwnerSet,
    ) -> crate::error::Result<Option<crate::txo::IndexSummary>> {
        let mut off_in = Vec::with_capacity(ctx.spends.len());
        let mut running = 0u64;
        for spend in &ctx.spends {
            off_in.push(running);
            running += spend.satoshis;
        }

        let mut off_out = Vec::with_capacity(ctx.txos.len());
        running = 0;
        for txo in &ctx.txos {
            off_out.push(running);
            running += txo.satoshis;
        }

        let mut touched = 0i64;
        for i in 0..ctx.txos.len() {
            if !ctx.txos[i].data.contains_key(self.tag()) {
                continue;
            }
            // Fungible-token payloads are handled by the Bsv21 decoder
            // instead; its parse has already run by the time we get here.
            if ctx.txos[i].data.contains_key("bsv21") {
                ctx.txos[i].data.remove(self.tag());
                continue;
            }

            let own_insc = ctx.txos[i].data.get("insc").cloned();
            let own_map = ctx.txos[i].data.get("map").cloned();

            let target = off_out[i];
            let transfer_source = ctx
                .spends
                .iter()
                .enumerate()
                .find(|(j, spend)| spend.satoshis == 1 && off_in[*j] == target)
                .map(|(_, spend)| spend.outpoint);

            let mut origin_outpoint = ctx.txos[i].outpoint;
            let mut sequence = 0u64;
            let mut nonce = 0u64;
            let mut inherited_map = HashMap::new();
            let mut content_type = None;
            let mut content_length = 0u64;
            let mut own_content = None;
            let mut parent = None;

            if let Some(source) = transfer_source {
                match indexer.ordfs_metadata(&source).await {
                    Ok(meta) => {
                        origin_outpoint = meta
                            .origin
                            .as_deref()
                            .and_then(|s| Outpoint::from_string(s).ok())
                            .unwrap_or(source);
                        sequence = meta.sequence;
                        nonce = meta.sequence + 1;
                        inherited_map = meta.map.unwrap_or_default();
                        content_type = meta.content_type;
                        content_length = meta.content_length.unwrap_or(0);
                        parent = meta.parent.as_deref().and_then(|s| Outpoint::from_string(s).ok());
                    }
                    Err(crate::error::Error::NotFound) => {
                        origin_outpoint = source;
                        sequence = 0;
                        nonce = 1;
                    }
                    Err(e) => return Err(e),
                }
            } else if let Some(insc) = &own_insc {
                if let DecoderOutput::Inscription { file_type, file_size, content, .. } = &insc.data {
                    content_type = file_type.clone();
                    content_length = *file_size;
                    own_content = content.clone();
                }
            }

            // Validate a declared parent claim against fresh metadata; a
            // 404 means the parent no longer resolves, so drop it.
            if parent.is_none() {
                if let Some(insc) = &own_insc {
                    if let DecoderOutput::Inscription { parent: claimed, .. } = &insc.data {
                        if let Some(claimed_parent) = claimed {
                            match indexer.ordfs_metadata(claimed_parent).await {
                                Ok(_) => parent = Some(*claimed_parent),
                                Err(crate::error::Error::NotFound) => parent = None,
                                Err(e) => return Err(e),
                            }
                        }
                    }
                }
            }

            let mut map = inherited_map;
            if let Some(current) = &own_map {
                if let DecoderOutput::Map { data } = &current.data {
                    for (k, v) in data {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }

            let mut tags = Vec::new();
            let owned = ctx.txos[i]
                .owner
                .as_ref()
                .is_some_and(|o| owners.contains(o));
            if owned {
                tags.push(format!("origin:{origin_outpoint}"));
                if let Some(ct) = &content_type {
                    if let Some((category, _)) = ct.split_once('/') {
                        tags.push(format!("type:{category}"));
                    }
                    tags.push(format!("type:{ct}"));
                }
                if let Some(name) = map.get("name") {
                    tags.push(format!("name:{name}"));
                }
            }

            let mut content = None;
            if let Some(ct) = &content_type {
                let texty = ct.starts_with("text/") || ct.ends_with("json") || ct == "application/json";
                if texty && content_length <= 1000 {
                    if let Some(bytes) = &own_content {
                        // Freshly minted in this same transaction — the bytes
                        // are already in hand, no indexer round-trip needed
                        // (and none would succeed yet: this output isn't
                        // indexed until the transaction is broadcast).
                        content = Some(String::from_utf8_lossy(bytes).to_string());
                    } else if let Ok(resp) = indexer.ordfs_content(&ctx.txos[i].outpoint).await {
                        content = Some(String::from_utf8_lossy(&resp.bytes).to_string());
                    }
                }
            }

            if let Some(entry) = ctx.txos[i].data.get_mut(self.tag()) {
                entry.data = DecoderOutput::Origin {
                    outpoint: origin_outpoint,
                    sequence,
                    nonce,
                    map,
                    parent,
                };
                entry.tags = tags;
                if content.is_some() {
                    entry.content = content;
                }
            }
            touched += 1;
        }

        if touched == 0 {
            Ok(None)
        } else {
            Ok(Some(crate::txo::IndexSummary {
                id: None,
                amount: Some(touched),
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

    #[test]
    fn parse_only_matches_one_satoshi() {
        assert!(OriginDecoder.parse(&[], 1, &OwnerSet::new()).is_some());
        assert!(OriginDecoder.parse(&[], 2, &OwnerSet::new()).is_none());
    }
}
