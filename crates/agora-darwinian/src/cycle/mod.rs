//! Transactional ranking cycle
pub mod engine;

pub use self::engine::TournamentEngine;
