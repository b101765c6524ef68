//! SeaORM entities for the control-plane store.

pub mod api_key;
pub mod container;
pub mod host;
pub mod user;
pub mod vpn_profile;

