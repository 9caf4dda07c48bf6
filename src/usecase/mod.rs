pub mod discovery_usecase;
pub mod scan_usecase;
