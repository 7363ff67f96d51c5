use crate::entities::{assets, client_memberships, prelude::*, users};
use crate::services::errors::AccessError;
use crate::services::permissions::{
    Action, AssetSource, AssetView, PermissionEngine, PermissionResult, Role, SharingMetadata,
    Subject, Visibility,
};
use anyhow::anyhow;
use chrono::Utc;
use sea_orm::*;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

/// Where a newly registered asset's bytes live
#[derive(Debug, Clone)]
pub enum AssetOrigin {
    Local { storage_key: String },
    Drive { file_id: String, sharing: SharingMetadata },
}

#[derive(Debug, Clone)]
pub struct NewAsset {
    pub client_id: String,
    pub mime_type: String,
    /// Defaults to shared
    pub visibility: Option<Visibility>,
    pub source_version: String,
    pub origin: AssetOrigin,
}

/// Loads users, memberships and assets and turns them into permission
/// engine inputs. Also owns asset registration and visibility changes.
#[derive(Clone)]
pub struct AccessDirectory {
    db: DatabaseConnection,
}

impl AccessDirectory {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create_user(&self, email: &str, role: Role) -> Result<users::Model, AccessError> {
        let user = users::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            email: Set(email.to_string()),
            role: Set(role.to_string()),
            created_at: Set(Some(Utc::now())),
        };
        Ok(user.insert(&self.db).await?)
    }

    pub async fn add_membership(&self, user_id: &str, client_id: &str) -> Result<(), AccessError> {
        let exists = ClientMemberships::find_by_id((user_id.to_string(), client_id.to_string()))
            .one(&self.db)
            .await?
            .is_some();
        if exists {
            return Ok(());
        }

        client_memberships::ActiveModel {
            user_id: Set(user_id.to_string()),
            client_id: Set(client_id.to_string()),
            created_at: Set(Some(Utc::now())),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    pub async fn subject(&self, user_id: &str) -> Result<Subject, AccessError> {
        let user = Users::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or(AccessError::UserNotFound)?;

        let role: Role = user
            .role
            .parse()
            .map_err(|e: String| AccessError::Internal(anyhow!(e)))?;

        let client_ids: HashSet<String> = ClientMemberships::find()
            .filter(client_memberships::Column::UserId.eq(user_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| m.client_id)
            .collect();

        Ok(Subject {
            id: user.id,
            role,
            email: user.email,
            client_ids,
        })
    }

    /// Fetch an asset row, tombstoned ones included
    pub async fn asset(&self, asset_id: &str) -> Result<assets::Model, AccessError> {
        Assets::find_by_id(asset_id)
            .one(&self.db)
            .await?
            .ok_or(AccessError::AssetNotFound)
    }

    /// The live asset backed by a Drive file, else its latest tombstone
    pub async fn asset_by_provider_file(
        &self,
        provider_file_id: &str,
    ) -> Result<assets::Model, AccessError> {
        if let Some(live) = self.live_asset_by_provider_file(provider_file_id).await? {
            return Ok(live);
        }

        Assets::find()
            .filter(assets::Column::ProviderFileId.eq(provider_file_id))
            .order_by_desc(assets::Column::DeletedAt)
            .one(&self.db)
            .await?
            .ok_or(AccessError::AssetNotFound)
    }

    async fn live_asset_by_provider_file(
        &self,
        provider_file_id: &str,
    ) -> Result<Option<assets::Model>, AccessError> {
        Ok(Assets::find()
            .filter(assets::Column::ProviderFileId.eq(provider_file_id))
            .filter(assets::Column::DeletedAt.is_null())
            .one(&self.db)
            .await?)
    }

    pub fn view(asset: &assets::Model) -> Result<AssetView, AccessError> {
        let visibility: Visibility = asset
            .visibility
            .parse()
            .map_err(|e: String| AccessError::Internal(anyhow!(e)))?;

        let source = match (&asset.provider_file_id, asset.is_provider_file) {
            (Some(file_id), true) => AssetSource::Drive {
                file_id: file_id.clone(),
                sharing: Some(Self::sharing_metadata(asset)?),
            },
            _ => AssetSource::Local,
        };

        Ok(AssetView {
            id: asset.id.clone(),
            client_id: asset.client_id.clone(),
            uploaded_by: asset.uploaded_by.clone(),
            visibility,
            source,
            deleted: asset.deleted_at.is_some(),
        })
    }

    fn sharing_metadata(asset: &assets::Model) -> Result<SharingMetadata, AccessError> {
        let importer_role = asset
            .provider_importer_role
            .as_deref()
            .map(str::parse::<Role>)
            .transpose()
            .map_err(|e| AccessError::Internal(anyhow!(e)))?;

        let shared_with = match &asset.provider_shared_with {
            Some(raw) => serde_json::from_str::<Vec<String>>(raw)
                .map_err(|e| AccessError::Internal(anyhow!("bad shared_with list: {}", e)))?,
            None => Vec::new(),
        };

        Ok(SharingMetadata {
            owner_email: asset.provider_owner_email.clone(),
            is_shared: asset.provider_is_shared,
            has_public_link: asset.provider_has_public_link,
            importer_role,
            shared_with,
        })
    }

    /// Load both sides and run the engine
    pub async fn check(
        &self,
        user_id: &str,
        asset_id: &str,
        action: Action,
    ) -> Result<PermissionResult, AccessError> {
        let subject = self.subject(user_id).await?;
        let asset = self.asset(asset_id).await?;
        Ok(PermissionEngine::check(&subject, &Self::view(&asset)?, action))
    }

    /// Same as `check`, failing with `PERMISSION_DENIED` on a denial
    pub async fn authorize(
        &self,
        user_id: &str,
        asset_id: &str,
        action: Action,
    ) -> Result<assets::Model, AccessError> {
        let subject = self.subject(user_id).await?;
        let asset = self.asset(asset_id).await?;
        PermissionEngine::check(&subject, &Self::view(&asset)?, action)
            .into_result()
            .map_err(AccessError::PermissionDenied)?;
        Ok(asset)
    }

    /// Record an uploaded or imported asset owned by `actor`. Drive imports
    /// need `import`; local uploads need `write` on the new asset.
    pub async fn register_asset(
        &self,
        actor: &Subject,
        new: NewAsset,
    ) -> Result<assets::Model, AccessError> {
        let visibility = new.visibility.unwrap_or_default();
        let (action, source) = match &new.origin {
            AssetOrigin::Local { .. } => (Action::Write, AssetSource::Local),
            AssetOrigin::Drive { file_id, sharing } => (
                Action::Import,
                AssetSource::Drive {
                    file_id: file_id.clone(),
                    sharing: Some(sharing.clone()),
                },
            ),
        };

        let prospective = AssetView {
            id: String::new(),
            client_id: new.client_id.clone(),
            uploaded_by: actor.id.clone(),
            visibility,
            source,
            deleted: false,
        };
        PermissionEngine::check(actor, &prospective, action)
            .into_result()
            .map_err(AccessError::PermissionDenied)?;

        if let AssetOrigin::Drive { file_id, .. } = &new.origin {
            if self.live_asset_by_provider_file(file_id).await?.is_some() {
                return Err(AccessError::InvalidRequest(format!(
                    "Drive file {} is already imported",
                    file_id
                )));
            }
        }

        let mut model = assets::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            client_id: Set(new.client_id),
            uploaded_by: Set(actor.id.clone()),
            visibility: Set(visibility.as_str().to_string()),
            mime_type: Set(new.mime_type),
            storage_key: Set(None),
            source_version: Set(new.source_version),
            is_provider_file: Set(false),
            provider_file_id: Set(None),
            provider_owner_email: Set(None),
            provider_is_shared: Set(false),
            provider_has_public_link: Set(false),
            provider_importer_role: Set(None),
            provider_shared_with: Set(None),
            created_at: Set(Some(Utc::now())),
            deleted_at: Set(None),
        };

        match new.origin {
            AssetOrigin::Local { storage_key } => {
                model.storage_key = Set(Some(storage_key));
            }
            AssetOrigin::Drive { file_id, sharing } => {
                let shared_with = serde_json::to_string(&sharing.shared_with)
                    .map_err(|e| AccessError::Internal(e.into()))?;
                model.is_provider_file = Set(true);
                model.provider_file_id = Set(Some(file_id));
                model.provider_owner_email = Set(sharing.owner_email);
                model.provider_is_shared = Set(sharing.is_shared);
                model.provider_has_public_link = Set(sharing.has_public_link);
                model.provider_importer_role = Set(sharing
                    .importer_role
                    .map(|role| role.to_string()));
                model.provider_shared_with = Set(Some(shared_with));
            }
        }

        let asset = model.insert(&self.db).await?;
        info!("📎 Asset {} registered by {}", asset.id, actor.id);
        Ok(asset)
    }

    pub async fn set_visibility(
        &self,
        actor: &Subject,
        asset_id: &str,
        visibility: Visibility,
    ) -> Result<assets::Model, AccessError> {
        let asset = self.asset(asset_id).await?;
        PermissionEngine::check(actor, &Self::view(&asset)?, Action::Share)
            .into_result()
            .map_err(AccessError::PermissionDenied)?;

        let mut active_model: assets::ActiveModel = asset.into();
        active_model.visibility = Set(visibility.as_str().to_string());
        Ok(active_model.update(&self.db).await?)
    }

    /// Soft delete. Rows are never removed.
    pub async fn tombstone(&self, actor: &Subject, asset_id: &str) -> Result<(), AccessError> {
        let asset = self.asset(asset_id).await?;
        PermissionEngine::check(actor, &Self::view(&asset)?, Action::Delete)
            .into_result()
            .map_err(AccessError::PermissionDenied)?;

        let mut active_model: assets::ActiveModel = asset.into();
        active_model.deleted_at = Set(Some(Utc::now()));
        active_model.update(&self.db).await?;
        Ok(())
    }
}
