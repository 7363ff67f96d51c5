//! Pure authorization for asset operations.
//!
//! `PermissionEngine::check` maps (role, client membership, ownership,
//! visibility, Drive sharing metadata, action) to allow/deny. It performs no
//! I/O; `services::directory` builds its inputs from the database.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    Standard,
    Editor,
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Guest,
        Role::Standard,
        Role::Editor,
        Role::Admin,
        Role::SuperAdmin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Standard => "standard",
            Role::Editor => "editor",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Role::Guest => 0,
            Role::Standard => 1,
            Role::Editor => 2,
            Role::Admin => 3,
            Role::SuperAdmin => 4,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Role::Guest),
            "standard" => Ok(Role::Standard),
            "editor" => Ok(Role::Editor),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
    Share,
    Import,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Read,
        Action::Write,
        Action::Delete,
        Action::Share,
        Action::Import,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
            Action::Share => "share",
            Action::Import => "import",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    #[default]
    Shared,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Shared => "shared",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Visibility::Private),
            "shared" => Ok(Visibility::Shared),
            other => Err(format!("unknown visibility: {}", other)),
        }
    }
}

/// Sharing state recorded from Drive when the file was imported
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingMetadata {
    pub owner_email: Option<String>,
    pub is_shared: bool,
    pub has_public_link: bool,
    pub importer_role: Option<Role>,
    pub shared_with: Vec<String>,
}

impl SharingMetadata {
    fn shared_with_email(&self, email: &str) -> bool {
        self.shared_with
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(email))
    }

    fn owned_by_email(&self, email: &str) -> bool {
        self.owner_email
            .as_deref()
            .is_some_and(|owner| owner.eq_ignore_ascii_case(email))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    Local,
    Drive {
        file_id: String,
        sharing: Option<SharingMetadata>,
    },
}

/// The acting user as the engine sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub role: Role,
    pub email: String,
    pub client_ids: HashSet<String>,
}

impl Subject {
    fn is_member_of(&self, client_id: &str) -> bool {
        self.role == Role::SuperAdmin || self.client_ids.contains(client_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetView {
    pub id: String,
    pub client_id: String,
    pub uploaded_by: String,
    pub visibility: Visibility,
    pub source: AssetSource,
    pub deleted: bool,
}

impl AssetView {
    pub fn provider_file_id(&self) -> Option<&str> {
        match &self.source {
            AssetSource::Drive { file_id, .. } => Some(file_id),
            AssetSource::Local => None,
        }
    }

    fn sharing(&self) -> Option<&SharingMetadata> {
        match &self.source {
            AssetSource::Drive { sharing, .. } => sharing.as_ref(),
            AssetSource::Local => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenyReason {
    NotClientMember { client_id: String },
    AssetDeleted,
    RoleForbids { role: Role, action: Action },
    NotOwner { role: Role, action: Action },
    GuestRequiresShared,
    ProviderRestricted { importer_role: Role },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NotClientMember { client_id } => {
                write!(f, "not a member of client {}", client_id)
            }
            DenyReason::AssetDeleted => f.write_str("asset has been deleted"),
            DenyReason::RoleForbids { role, action } => {
                write!(f, "role {} may not {} assets", role, action)
            }
            DenyReason::NotOwner { role, action } => {
                write!(f, "role {} may only {} assets it uploaded", role, action)
            }
            DenyReason::GuestRequiresShared => {
                f.write_str("guests may only read shared assets")
            }
            DenyReason::ProviderRestricted { importer_role } => write!(
                f,
                "Drive file is unshared and was imported by role {}",
                importer_role
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionResult {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl PermissionResult {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    pub fn into_result(self) -> Result<(), DenyReason> {
        match self.reason {
            Some(reason) if !self.allowed => Err(reason),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    Yes,
    OwnOnly,
    SharedOnly,
    No,
}

fn base_grant(role: Role, action: Action) -> Grant {
    use Action::*;
    match (role, action) {
        (Role::Guest, Read) => Grant::SharedOnly,
        (Role::Guest, _) => Grant::No,
        (Role::Standard, Read | Import) => Grant::Yes,
        (Role::Standard, Write | Delete | Share) => Grant::OwnOnly,
        (Role::Editor, Delete) => Grant::OwnOnly,
        (Role::Editor, _) => Grant::Yes,
        (Role::Admin | Role::SuperAdmin, _) => Grant::Yes,
    }
}

pub struct PermissionEngine;

impl PermissionEngine {
    pub fn check(subject: &Subject, asset: &AssetView, action: Action) -> PermissionResult {
        if !subject.is_member_of(&asset.client_id) {
            return PermissionResult::deny(DenyReason::NotClientMember {
                client_id: asset.client_id.clone(),
            });
        }

        if asset.deleted {
            return PermissionResult::deny(DenyReason::AssetDeleted);
        }

        match base_grant(subject.role, action) {
            Grant::Yes => PermissionResult::allow(),
            Grant::No => PermissionResult::deny(DenyReason::RoleForbids {
                role: subject.role,
                action,
            }),
            Grant::OwnOnly if asset.uploaded_by == subject.id => PermissionResult::allow(),
            Grant::OwnOnly => PermissionResult::deny(DenyReason::NotOwner {
                role: subject.role,
                action,
            }),
            Grant::SharedOnly if Self::visible_to_guest(subject, asset) => {
                PermissionResult::allow()
            }
            Grant::SharedOnly => PermissionResult::deny(DenyReason::GuestRequiresShared),
        }
    }

    fn visible_to_guest(subject: &Subject, asset: &AssetView) -> bool {
        if asset.visibility == Visibility::Shared {
            return true;
        }
        asset
            .sharing()
            .is_some_and(|meta| meta.has_public_link || meta.shared_with_email(&subject.email))
    }

    /// Drive-side restriction applied when a capability is redeemed.
    /// An unshared Drive file stays with its uploader, its Drive owner and
    /// roles at or above the role that imported it.
    pub fn check_provider_overlay(subject: &Subject, asset: &AssetView) -> PermissionResult {
        let Some(meta) = asset.sharing() else {
            return PermissionResult::allow();
        };
        let Some(importer_role) = meta.importer_role else {
            return PermissionResult::allow();
        };

        let unshared = !meta.is_shared && !meta.has_public_link;
        if !unshared
            || asset.uploaded_by == subject.id
            || meta.owned_by_email(&subject.email)
            || subject.role.rank() >= importer_role.rank()
        {
            return PermissionResult::allow();
        }

        PermissionResult::deny(DenyReason::ProviderRestricted { importer_role })
    }
}
