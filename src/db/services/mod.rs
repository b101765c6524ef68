//! Data access for the control-plane store. Each sub-module owns one entity;
//! callers pass the `DatabaseConnection` (or an open transaction) explicitly.

pub mod api_key_service;
pub mod container_service;
pub mod host_service;
pub mod user_service;
pub mod vpn_profile_service;
