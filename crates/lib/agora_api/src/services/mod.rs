//! Service layer between handlers and `agora_core`.

pub mod auth;
