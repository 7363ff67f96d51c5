pub mod prelude;

pub mod access_capabilities;
pub mod assets;
pub mod audit_logs;
pub mod client_memberships;
pub mod provider_credentials;
pub mod thumbnail_cache;
pub mod users;
