pub use super::access_capabilities::Entity as AccessCapabilities;
pub use super::assets::Entity as Assets;
pub use super::audit_logs::Entity as AuditLogs;
pub use super::client_memberships::Entity as ClientMemberships;
pub use super::provider_credentials::Entity as ProviderCredentials;
pub use super::thumbnail_cache::Entity as ThumbnailCache;
pub use super::users::Entity as Users;
