use tracing::warn;

use baraza_store::StoreError;

use crate::error::RealtimeError;

/// Degradation guard: a relation that has not been deployed yet is an
/// expected condition during incremental schema rollout, so the operation
/// degrades to its empty/no-op result instead of failing. Every other
/// error — constraint violations in particular — passes through untouched.
pub fn soften<T: Default>(op: &'static str, result: Result<T, RealtimeError>) -> Result<T, RealtimeError> {
    match result {
        Err(RealtimeError::Store(err)) if err.is_missing_relation() => {
            warn!(op, %err, "relation not deployed yet, degrading to empty result");
            Ok(T::default())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_relation_becomes_empty_result() {
        let result: Result<Vec<u32>, RealtimeError> = Err(RealtimeError::Store(
            StoreError::MissingRelation {
                relation: "user_notifications".to_string(),
            },
        ));
        assert_eq!(soften("list", result).unwrap(), Vec::<u32>::new());

        let count: Result<u64, RealtimeError> = Err(RealtimeError::Store(
            StoreError::MissingRelation {
                relation: "user_notifications".to_string(),
            },
        ));
        assert_eq!(soften("unread_count", count).unwrap(), 0);
    }

    #[test]
    fn genuine_data_errors_pass_through() {
        let result: Result<u64, RealtimeError> = Err(RealtimeError::Store(
            StoreError::Constraint("UNIQUE constraint failed".to_string()),
        ));
        assert!(matches!(
            soften("mark_read", result),
            Err(RealtimeError::Store(StoreError::Constraint(_)))
        ));

        let validation: Result<u64, RealtimeError> =
            Err(RealtimeError::Validation("empty title".to_string()));
        assert!(matches!(
            soften("create", validation),
            Err(RealtimeError::Validation(_))
        ));
    }

    #[test]
    fn success_is_untouched() {
        let result: Result<u64, RealtimeError> = Ok(7);
        assert_eq!(soften("unread_count", result).unwrap(), 7);
    }
}
