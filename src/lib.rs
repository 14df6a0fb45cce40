//! Short-lived AWS IAM database auth tokens in place of static passwords.
//!
//! A wrapper URL such as `jdbc:iam:mysql://app@db.abc.eu-west-1.rds.amazonaws.com:3306/shop`
//! is parsed into a [`ConnectionIdentity`], a presigned token is fetched from the
//! [`TokenCache`] and the connection is handed to a registered [`DelegateDriver`]
//! with the token as password.

pub mod adapters;
pub mod app_context;
pub mod config;
pub mod core;
pub mod ports;

pub use crate::app_context::AppContext;
pub use crate::config::models::AppConfig;
pub use crate::core::dispatcher::DriverDispatcher;
pub use crate::core::driver::IamAuthDriver;
pub use crate::core::error::{ConnectError, CredentialError, TokenError};
pub use crate::core::interceptor::{ConnectionInterceptor, InterceptedConnection};
pub use crate::core::token_cache::TokenCache;
pub use crate::core::types::{ConnectionIdentity, ConnectionProperties, Token};
pub use crate::ports::DelegateDriver;
