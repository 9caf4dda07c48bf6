pub mod credentials_store;
pub mod keyring_secret_repository;
pub mod state_store;
