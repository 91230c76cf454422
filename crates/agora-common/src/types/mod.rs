//! Core data types for the Agora engine

pub mod ids;
pub mod performance;
pub mod rank_tier;
pub mod skill;
pub mod task;
pub mod token;
pub mod worker;
