use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use baraza_store::Store;
use baraza_types::models::ActorProfile;

use crate::error::RealtimeError;
use crate::guard;

/// Stateless profile lookup substituting for a server-side join: callers
/// batch the distinct actor ids of a page and resolve them in one query,
/// or resolve a single id for a live event. Nothing is cached across
/// calls.
#[derive(Clone)]
pub struct ProfileResolver {
    store: Arc<Store>,
}

impl ProfileResolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Single-row lookup for a live event. `None` means no matching actor
    /// (deleted account, or the profiles relation is not deployed).
    pub async fn one(&self, id: Uuid) -> Result<Option<ActorProfile>, RealtimeError> {
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || store.profile_by_id(id))
            .await
            .map_err(|e| RealtimeError::Task(e.to_string()))?
            .map_err(RealtimeError::from);
        guard::soften("profile_by_id", result)
    }

    /// One batched lookup over the distinct actor ids of a backfill page.
    /// Cost is O(distinct actors) regardless of message count.
    pub async fn many(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, ActorProfile>, RealtimeError> {
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || store.profiles_by_ids(&ids))
            .await
            .map_err(|e| RealtimeError::Task(e.to_string()))?
            .map_err(RealtimeError::from);
        let profiles = guard::soften("profiles_by_ids", result)?;
        Ok(profiles.into_iter().map(|p| (p.id, p)).collect())
    }

    /// Display name for announcing presence; misses fall back rather than
    /// blocking the announce.
    pub async fn display_name(&self, id: Uuid, fallback: &str) -> (String, Option<String>) {
        match self.one(id).await {
            Ok(Some(profile)) => (
                profile.full_name.unwrap_or_else(|| fallback.to_string()),
                profile.avatar_url,
            ),
            Ok(None) => (fallback.to_string(), None),
            Err(err) => {
                warn!(%err, "profile lookup failed, using fallback identity");
                (fallback.to_string(), None)
            }
        }
    }
}
