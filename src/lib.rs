pub mod agent_modules;
pub mod agent_protocol;
pub mod db;
pub mod error;
pub mod server;
pub mod services;
pub mod version;
pub mod vpn;
pub mod web;

#[cfg(test)]
pub(crate) mod test_support;
