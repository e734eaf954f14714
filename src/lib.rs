pub mod config;
pub mod decoders;
pub mod error;
pub mod events;
pub mod indexer;
pub mod orchestrator;
pub mod outpoint;
pub mod owners;
pub mod parser;
pub mod queue;
pub mod storage;
pub mod txo;
pub mod wallet;
pub mod writer;
