pub mod delivery;
pub mod order;
