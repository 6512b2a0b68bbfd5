pub mod inflight;
pub mod intake;
pub mod nearest;
pub mod tracker;
