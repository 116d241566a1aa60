//! Attachment catalog migration.
//!
//! Creates the attachments table. Keys are content addressed and shared by
//! rows holding identical bytes, so `key` is indexed but not unique.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(ATTACHMENTS_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS attachments CASCADE; DROP TYPE IF EXISTS attachment_kind;",
        )
        .await?;
        Ok(())
    }
}

const ATTACHMENTS_SQL: &str = r"
CREATE TYPE attachment_kind AS ENUM ('attachment', 'embedded_image');

CREATE TABLE attachments (
    id BIGSERIAL PRIMARY KEY,
    key VARCHAR(512) NOT NULL,
    user_id BIGINT,
    account_id BIGINT,
    email_id BIGINT,
    filename TEXT NOT NULL,
    mime_type VARCHAR(255) NOT NULL,
    size BIGINT NOT NULL,
    kind attachment_kind NOT NULL DEFAULT 'attachment',
    content_id VARCHAR(64),
    create_time TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_attachments_size CHECK (size >= 0),
    CONSTRAINT chk_attachments_content_id CHECK (content_id IS NULL OR kind = 'embedded_image')
);

-- Reference counting by key
CREATE INDEX idx_attachments_key ON attachments(key, id DESC);

-- Eviction and expiration walk oldest first
CREATE INDEX idx_attachments_create_time ON attachments(create_time, id);

-- Bulk removal by owner
CREATE INDEX idx_attachments_user ON attachments(user_id) WHERE user_id IS NOT NULL;
CREATE INDEX idx_attachments_account ON attachments(account_id) WHERE account_id IS NOT NULL;
CREATE INDEX idx_attachments_email ON attachments(email_id, user_id) WHERE email_id IS NOT NULL;
";
