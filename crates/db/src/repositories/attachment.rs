//! Attachment repository for database operations.
//!
//! Implements the attachment catalog using SeaORM.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
    TransactionTrait,
};
use tracing::debug;

use crate::entities::{attachments, sea_orm_active_enums::AttachmentKind as DbAttachmentKind};
use postvault_core::attachment::{
    Attachment, AttachmentError, AttachmentKind, AttachmentRepository as AttachmentRepoTrait,
    FieldRemoval, NewAttachment, Owner, OwnerField,
};
use postvault_shared::types::{AccountId, AttachmentId, EmailId, UserId};

/// Attachment repository implementation.
#[derive(Debug, Clone)]
pub struct AttachmentRepository {
    db: DatabaseConnection,
}

impl AttachmentRepository {
    /// Create a new attachment repository.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromQueryResult)]
struct KeyRow {
    key: String,
}

impl AttachmentRepoTrait for AttachmentRepository {
    async fn insert_many(&self, rows: Vec<NewAttachment>) -> Result<Vec<Attachment>, AttachmentError> {
        let txn = self.db.begin().await.map_err(repo_err)?;
        let now = Utc::now();

        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            let size = i64::try_from(row.size)
                .map_err(|_| AttachmentError::repository(format!("size out of range: {}", row.size)))?;
            let model = attachments::ActiveModel {
                key: Set(row.key),
                user_id: Set(row.owner.user_id.map(UserId::into_inner)),
                account_id: Set(row.owner.account_id.map(AccountId::into_inner)),
                email_id: Set(row.owner.email_id.map(EmailId::into_inner)),
                filename: Set(row.filename),
                mime_type: Set(row.mime_type),
                size: Set(size),
                kind: Set(to_db_kind(row.kind)),
                content_id: Set(row.content_id),
                create_time: Set(now.into()),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(repo_err)?;
            inserted.push(to_domain(model));
        }

        txn.commit().await.map_err(repo_err)?;
        Ok(inserted)
    }

    async fn total_size(&self) -> Result<u64, AttachmentError> {
        let total: Option<i64> = attachments::Entity::find()
            .select_only()
            .column_as(Expr::cust("COALESCE(SUM(size), 0)::BIGINT"), "total")
            .into_tuple()
            .one(&self.db)
            .await
            .map_err(repo_err)?;

        Ok(total.map_or(0, |total| u64::try_from(total).unwrap_or(0)))
    }

    async fn list_oldest_first(&self) -> Result<Vec<Attachment>, AttachmentError> {
        let models = attachments::Entity::find()
            .order_by_asc(attachments::Column::CreateTime)
            .order_by_asc(attachments::Column::Id)
            .all(&self.db)
            .await
            .map_err(repo_err)?;

        Ok(models.into_iter().map(to_domain).collect())
    }

    async fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        let models = attachments::Entity::find()
            .filter(attachments::Column::CreateTime.lt(cutoff))
            .order_by_asc(attachments::Column::CreateTime)
            .order_by_asc(attachments::Column::Id)
            .all(&self.db)
            .await
            .map_err(repo_err)?;

        Ok(models.into_iter().map(to_domain).collect())
    }

    async fn find_latest_by_keys(&self, keys: &[String]) -> Result<Vec<Attachment>, AttachmentError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let models = attachments::Entity::find()
            .filter(attachments::Column::Key.is_in(keys.iter().cloned()))
            .distinct_on([attachments::Column::Key])
            .order_by_asc(attachments::Column::Key)
            .order_by_desc(attachments::Column::Id)
            .all(&self.db)
            .await
            .map_err(repo_err)?;

        Ok(models.into_iter().map(to_domain).collect())
    }

    async fn delete_by_id(&self, id: AttachmentId) -> Result<Option<u64>, AttachmentError> {
        let txn = self.db.begin().await.map_err(repo_err)?;

        let Some(model) = attachments::Entity::find_by_id(id.into_inner())
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(repo_err)?
        else {
            txn.rollback().await.map_err(repo_err)?;
            return Ok(None);
        };

        attachments::Entity::delete_by_id(model.id)
            .exec(&txn)
            .await
            .map_err(repo_err)?;

        let remaining = attachments::Entity::find()
            .filter(attachments::Column::Key.eq(model.key.as_str()))
            .count(&txn)
            .await
            .map_err(repo_err)?;

        txn.commit().await.map_err(repo_err)?;
        Ok(Some(remaining))
    }

    async fn remove_by_field(
        &self,
        field: OwnerField,
        values: &[i64],
    ) -> Result<FieldRemoval, AttachmentError> {
        let column = owner_column(field);
        let unreferenced_sql = format!(
            "SELECT DISTINCT a.key FROM attachments a \
             WHERE a.{col} = $1 \
             AND NOT EXISTS ( \
                 SELECT 1 FROM attachments b \
                 WHERE b.key = a.key AND b.{col} IS DISTINCT FROM $1 \
             ) \
             ORDER BY a.key",
            col = field.column()
        );

        let txn = self.db.begin().await.map_err(repo_err)?;
        let mut removal = FieldRemoval::default();

        for &value in values {
            let keys = KeyRow::find_by_statement(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &unreferenced_sql,
                [value.into()],
            ))
            .all(&txn)
            .await
            .map_err(repo_err)?;

            let deleted = attachments::Entity::delete_many()
                .filter(column.eq(value))
                .exec(&txn)
                .await
                .map_err(repo_err)?;

            debug!(
                field = field.column(),
                value,
                rows = deleted.rows_affected,
                keys = keys.len(),
                "attachment rows removed"
            );
            removal.rows_deleted += deleted.rows_affected;
            removal
                .unreferenced_keys
                .extend(keys.into_iter().map(|row| row.key));
        }

        txn.commit().await.map_err(repo_err)?;
        Ok(removal)
    }

    async fn list_for_email(
        &self,
        email_id: EmailId,
        user_id: UserId,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        let models = attachments::Entity::find()
            .filter(attachments::Column::EmailId.eq(email_id.into_inner()))
            .filter(attachments::Column::UserId.eq(user_id.into_inner()))
            .filter(attachments::Column::Kind.eq(DbAttachmentKind::Attachment))
            .filter(attachments::Column::ContentId.is_null())
            .order_by_asc(attachments::Column::Id)
            .all(&self.db)
            .await
            .map_err(repo_err)?;

        Ok(models.into_iter().map(to_domain).collect())
    }

    async fn list_by_email_ids(
        &self,
        email_ids: &[EmailId],
    ) -> Result<Vec<Attachment>, AttachmentError> {
        if email_ids.is_empty() {
            return Ok(Vec::new());
        }

        let models = attachments::Entity::find()
            .filter(attachments::Column::EmailId.is_in(email_ids.iter().map(|id| id.into_inner())))
            .filter(attachments::Column::Kind.eq(DbAttachmentKind::Attachment))
            .order_by_asc(attachments::Column::Id)
            .all(&self.db)
            .await
            .map_err(repo_err)?;

        Ok(models.into_iter().map(to_domain).collect())
    }
}

#[allow(clippy::needless_pass_by_value)]
fn repo_err(e: DbErr) -> AttachmentError {
    AttachmentError::repository(e.to_string())
}

fn owner_column(field: OwnerField) -> attachments::Column {
    match field {
        OwnerField::User => attachments::Column::UserId,
        OwnerField::Account => attachments::Column::AccountId,
        OwnerField::Email => attachments::Column::EmailId,
    }
}

/// Convert domain attachment kind to database enum.
fn to_db_kind(kind: AttachmentKind) -> DbAttachmentKind {
    match kind {
        AttachmentKind::Attachment => DbAttachmentKind::Attachment,
        AttachmentKind::EmbeddedImage => DbAttachmentKind::EmbeddedImage,
    }
}

/// Convert database attachment kind to domain enum.
fn from_db_kind(kind: DbAttachmentKind) -> AttachmentKind {
    match kind {
        DbAttachmentKind::Attachment => AttachmentKind::Attachment,
        DbAttachmentKind::EmbeddedImage => AttachmentKind::EmbeddedImage,
    }
}

/// Convert database model to domain model.
fn to_domain(model: attachments::Model) -> Attachment {
    Attachment {
        id: AttachmentId::new(model.id),
        key: model.key,
        owner: Owner {
            user_id: model.user_id.map(UserId::new),
            account_id: model.account_id.map(AccountId::new),
            email_id: model.email_id.map(EmailId::new),
        },
        filename: model.filename,
        mime_type: model.mime_type,
        size: u64::try_from(model.size).unwrap_or(0),
        kind: from_db_kind(model.kind),
        content_id: model.content_id,
        create_time: model.create_time.with_timezone(&Utc),
    }
}
