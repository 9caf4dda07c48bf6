pub mod control_plane;
pub mod kafka;
pub mod msk;
pub mod persistence;
pub mod rate_limit;
