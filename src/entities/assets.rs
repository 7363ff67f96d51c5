use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub client_id: String,
    pub uploaded_by: String,
    pub visibility: String, // "private" or "shared"
    pub mime_type: String,
    /// Key in local storage; None for Drive-backed assets
    pub storage_key: Option<String>,
    /// Last-modified marker of the origin file, used to address thumbnails
    pub source_version: String,
    #[sea_orm(default_expr = "Expr::value(false)")]
    pub is_provider_file: bool,
    /// Tombstoned rows keep this, so it is only unique among live assets
    pub provider_file_id: Option<String>,
    pub provider_owner_email: Option<String>,
    #[sea_orm(default_expr = "Expr::value(false)")]
    pub provider_is_shared: bool,
    #[sea_orm(default_expr = "Expr::value(false)")]
    pub provider_has_public_link: bool,
    pub provider_importer_role: Option<String>,
    /// JSON array of e-mail addresses the Drive file is shared with
    #[sea_orm(column_type = "Text", nullable)]
    pub provider_shared_with: Option<String>,
    pub created_at: Option<DateTimeUtc>,
    pub deleted_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UploadedBy",
        to = "super::users::Column::Id",
        on_update = "Cascade",
        on_delete = "Restrict"
    )]
    Uploader,
    #[sea_orm(has_many = "super::thumbnail_cache::Entity")]
    Thumbnails,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Uploader.def()
    }
}

impl Related<super::thumbnail_cache::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Thumbnails.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
