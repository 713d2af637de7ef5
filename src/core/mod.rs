//! Core implementation: policy model, evaluation, audit and collaborators

pub mod audit;
pub mod client;
pub mod config;
pub mod encryption;
pub mod error;
pub mod external;
pub mod gateway;
pub mod iam;
