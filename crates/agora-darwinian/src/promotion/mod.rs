//! Tier promotion
pub mod allocator;

pub use self::allocator::PromotionAllocator;
