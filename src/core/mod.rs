pub mod connection_url;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod interceptor;
pub mod token_cache;
pub mod types;
