//! `SeaORM` active enums mirroring PostgreSQL enum types.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// `attachment_kind` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "attachment_kind")]
pub enum AttachmentKind {
    /// Regular file attachment.
    #[sea_orm(string_value = "attachment")]
    Attachment,
    /// Image embedded in an HTML body.
    #[sea_orm(string_value = "embedded_image")]
    EmbeddedImage,
}
