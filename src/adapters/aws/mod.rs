pub mod credential_chain;
pub mod profile_utils;
pub mod region_provider;
pub mod token_signer;
pub mod types;
