//! Band classification and forfeit redistribution
pub mod policy;
pub mod redistribution;

pub use self::policy::{Band, BandPolicy, Bands};
