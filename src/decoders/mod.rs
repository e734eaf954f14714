//! The ten protocol decoders (spec.md §4.2), exposed in the fixed evaluation
//! order the parser pipeline relies on.

pub mod common;

pub mod bsv21;
pub mod cosign;
pub mod fund;
pub mod inscription;
pub mod lock;
pub mod map;
pub mod opns;
pub mod ordlock;
pub mod origin;
pub mod sigma;

use crate::parser::Decoder;

/// Builds the fixed-order decoder registry: Fund, Lock, Inscription, Sigma,
/// Map, Origin, Bsv21, OrdLock, OpNS, Cosign. Order matters — Origin reads
/// the `insc`/`sigma`/`map` entries Inscription/Sigma/Map have already
/// written, and Bsv21 gates whether Origin's data survives (spec.md §4.2).
pub fn decoders() -> Vec<Box<dyn Decoder>> {
    vec![
        Box::new(fund::FundDecoder),
        Box::new(lock::LockDecoder),
        Box::new(inscription::InscriptionDecoder),
        Box::new(sigma::SigmaDecoder),
        Box::new(map::MapDecoder),
        Box::new(origin::OriginDecoder),
        Box::new(bsv21::Bsv21Decoder),
        Box::new(ordlock::OrdLockDecoder),
        Box::new(opns::OpnsDecoder),
        Box::new(cosign::CosignDecoder),
    ]
}
