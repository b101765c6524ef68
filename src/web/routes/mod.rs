pub mod auth_routes;
pub mod container_routes;
pub mod host_routes;
pub mod vpn_routes;
