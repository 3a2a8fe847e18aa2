//! Consensus validation logic and core chain state machine.

pub mod block_assembly;
pub mod chain_manager;
pub mod chain_tree;
pub mod engine;
pub mod fork_choice_manager;
pub mod genesis;
pub mod import;
pub mod orphans;
pub mod reorg;
pub mod status;

pub mod errors;
