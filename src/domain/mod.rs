pub mod acl;
pub mod auth;
pub mod cluster;
pub mod connector;
pub mod topic;
