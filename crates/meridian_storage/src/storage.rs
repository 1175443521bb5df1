//! Storage trait definition.

use meridian_error::MeridianResult;

/// Backend holding artifact bytes by filename.
///
/// Implementations only move bytes; existence and expiry are tracked by
/// [`crate::ObjectCache`] in the key-value index.
#[async_trait::async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Write `data` under `filename`, replacing any previous content.
    ///
    /// Writes must be atomic: a concurrent reader sees either the old bytes
    /// or the new bytes, never a partial file.
    async fn store(&self, filename: &str, data: &[u8]) -> MeridianResult<()>;

    /// Read the bytes stored under `filename`.
    async fn retrieve(&self, filename: &str) -> MeridianResult<Vec<u8>>;

    /// Remove `filename`. Returns whether it existed.
    async fn delete(&self, filename: &str) -> MeridianResult<bool>;

    /// Whether `filename` is present.
    async fn exists(&self, filename: &str) -> MeridianResult<bool>;

    /// Every stored filename.
    async fn list(&self) -> MeridianResult<Vec<String>>;
}
