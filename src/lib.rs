//! Inventory of Amazon MSK clusters across regions.
//!
//! `discover` walks the AWS control plane and records every cluster it can
//! see; `scan` connects to each discovered cluster's brokers and records
//! topics, ACLs and self-managed Kafka Connect connectors. Both write into
//! one JSON state file.

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod usecase;
