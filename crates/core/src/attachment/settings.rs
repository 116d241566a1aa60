//! Read-only source of quota, retention and domain settings.

use std::future::Future;

use postvault_shared::AttachmentSettings;

use super::error::AttachmentError;

/// Settings consulted on every quota pass, sweep and HTML rewrite.
///
/// Values are re-read on each call so an operator change takes effect on the
/// next pass.
pub trait SettingsProvider: Send + Sync {
    /// Current attachment settings.
    fn attachment_settings(
        &self,
    ) -> impl Future<Output = Result<AttachmentSettings, AttachmentError>> + Send;
}

/// Static settings loaded once from configuration.
impl SettingsProvider for AttachmentSettings {
    async fn attachment_settings(&self) -> Result<AttachmentSettings, AttachmentError> {
        Ok(self.clone())
    }
}
