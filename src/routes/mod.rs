//! Route modules for Vault Server

pub mod fetch;
pub mod health;
pub mod upload;
