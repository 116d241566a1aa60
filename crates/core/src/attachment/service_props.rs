//! Property-based tests for AttachmentService.
//!
//! - Quota convergence
//! - FIFO eviction order
//! - Key determinism
//! - Dedup integrity

use std::sync::Arc;

use chrono::Duration;
use proptest::prelude::*;

use postvault_shared::AttachmentSettings;
use postvault_shared::types::{AccountId, EmailId, UserId};

use super::key::derive_key;
use super::mock::{FlakyStore, MockCatalog};
use super::service::{AttachmentRepository, AttachmentService};
use super::types::{AttachmentKind, NewAttachment, Owner, UploadedAttachment};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn row(index: usize, size: u64) -> NewAttachment {
    let filename = format!("{index}.bin");
    NewAttachment {
        key: derive_key(&index.to_be_bytes(), &filename),
        owner: Owner::new(UserId::new(1), AccountId::new(1), EmailId::new(index as i64)),
        filename,
        mime_type: "application/octet-stream".to_string(),
        size,
        kind: AttachmentKind::Attachment,
        content_id: None,
    }
}

/// Insert one row per size with strictly increasing creation times.
async fn seed(catalog: &MockCatalog, sizes: &[u64]) {
    for (index, size) in sizes.iter().enumerate() {
        catalog.insert_many(vec![row(index, *size)]).await.unwrap();
        catalog.advance(Duration::seconds(1));
    }
}

fn service(
    catalog: &Arc<MockCatalog>,
    ceiling: u64,
) -> AttachmentService<MockCatalog, FlakyStore, AttachmentSettings> {
    AttachmentService::new(
        Arc::clone(catalog),
        Arc::new(FlakyStore::new()),
        Arc::new(AttachmentSettings::with_ceiling(ceiling)),
    )
}

proptest! {
    /// After one pass the aggregate plus the incoming hint fits the ceiling,
    /// unless every row was evicted.
    #[test]
    fn prop_quota_converges(
        sizes in prop::collection::vec(1u64..500, 0..20),
        ceiling in 0u64..5_000,
        incoming in 0u64..2_000,
    ) {
        let catalog = Arc::new(MockCatalog::new());
        let report = runtime().block_on(async {
            seed(&catalog, &sizes).await;
            service(&catalog, ceiling).enforce_quota(incoming).await.unwrap()
        });

        let after = catalog.sum();
        prop_assert!(after + incoming <= ceiling || catalog.rows().is_empty());
        prop_assert_eq!(report.exhausted, after + incoming > ceiling);
        prop_assert_eq!(after + report.freed, sizes.iter().sum::<u64>());
    }

    /// Evicted rows are always older than every surviving row.
    #[test]
    fn prop_eviction_is_fifo(
        sizes in prop::collection::vec(1u64..500, 1..20),
        ceiling in 0u64..5_000,
    ) {
        let catalog = Arc::new(MockCatalog::new());
        runtime().block_on(async {
            seed(&catalog, &sizes).await;
            service(&catalog, ceiling).enforce_quota(0).await.unwrap();
        });

        let survivors: Vec<String> = catalog.rows().into_iter().map(|r| r.filename).collect();
        let evicted = sizes.len() - survivors.len();
        let expected: Vec<String> = (evicted..sizes.len()).map(|i| format!("{i}.bin")).collect();
        prop_assert_eq!(survivors, expected);
    }

    /// Same bytes give the same key; flipping one bit changes it.
    #[test]
    fn prop_key_is_deterministic(
        bytes in prop::collection::vec(any::<u8>(), 1..256),
        bit in 0usize..2048,
        filename in "[a-z]{1,8}\\.[a-z]{1,4}",
    ) {
        prop_assert_eq!(derive_key(&bytes, &filename), derive_key(&bytes, &filename));

        let mut flipped = bytes.clone();
        let bit = bit % (bytes.len() * 8);
        flipped[bit / 8] ^= 1 << (bit % 8);
        prop_assert_ne!(derive_key(&bytes, &filename), derive_key(&flipped, &filename));
    }

    /// The shared object survives until its last row is removed.
    #[test]
    fn prop_shared_object_outlives_all_but_last_row(
        copies in 2usize..6,
        order in Just((1..=6).collect::<Vec<i64>>()).prop_shuffle(),
    ) {
        let catalog = Arc::new(MockCatalog::new());
        let store = Arc::new(FlakyStore::new());
        let service = AttachmentService::new(
            Arc::clone(&catalog),
            Arc::clone(&store),
            Arc::new(AttachmentSettings::default()),
        );
        let emails: Vec<i64> = order.into_iter().filter(|id| *id <= copies as i64).collect();

        runtime().block_on(async {
            let uploads = (1..=copies as i64)
                .map(|email| UploadedAttachment {
                    owner: Owner::new(UserId::new(1), AccountId::new(1), EmailId::new(email)),
                    filename: "shared.pdf".to_string(),
                    mime_type: "application/pdf".to_string(),
                    content: bytes::Bytes::from_static(b"shared content"),
                    content_id: None,
                })
                .collect();
            let rows = service.add_attachments(uploads).await.unwrap();
            let key = rows[0].key.clone();

            for (removed, email) in emails.iter().enumerate() {
                service.remove_by_email_ids(&[EmailId::new(*email)]).await.unwrap();
                let last = removed + 1 == emails.len();
                assert_eq!(store.exists(&key).await, !last);
                assert_eq!(catalog.has_key(&key), !last);
            }
        });
    }
}
