//! Conflict resolution for two-way sync.

use chrono::{DateTime, Utc};

use crate::job::ConflictStrategy;

/// Outcome of resolving one divergent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Write the source version to the target.
    WriteSource,

    /// Keep the target version; the source row is left unchanged.
    KeepTarget,

    /// Neither side is written; the row id is recorded for later manual
    /// resolution. The only outcome that can leave a row permanently
    /// unsynchronized.
    Defer,
}

/// Pick a winner between two row versions with differing change timestamps.
///
/// `last_write_wins` keeps the target on a tie: rewriting an identical-age
/// row would churn the target for no benefit.
pub fn resolve(
    strategy: ConflictStrategy,
    source_updated_at: DateTime<Utc>,
    target_updated_at: DateTime<Utc>,
) -> Resolution {
    match strategy {
        ConflictStrategy::LastWriteWins => {
            if source_updated_at > target_updated_at {
                Resolution::WriteSource
            } else {
                Resolution::KeepTarget
            }
        }
        ConflictStrategy::SourceWins => Resolution::WriteSource,
        ConflictStrategy::TargetWins => Resolution::KeepTarget,
        ConflictStrategy::Manual => Resolution::Defer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_last_write_wins_picks_newer() {
        let older = Utc::now();
        let newer = older + Duration::seconds(30);

        assert_eq!(
            resolve(ConflictStrategy::LastWriteWins, newer, older),
            Resolution::WriteSource
        );
        assert_eq!(
            resolve(ConflictStrategy::LastWriteWins, older, newer),
            Resolution::KeepTarget
        );
    }

    #[test]
    fn test_last_write_wins_tie_keeps_target() {
        let t = Utc::now();
        assert_eq!(
            resolve(ConflictStrategy::LastWriteWins, t, t),
            Resolution::KeepTarget
        );
    }

    #[test]
    fn test_unconditional_strategies() {
        let older = Utc::now();
        let newer = older + Duration::seconds(30);

        assert_eq!(
            resolve(ConflictStrategy::SourceWins, older, newer),
            Resolution::WriteSource
        );
        assert_eq!(
            resolve(ConflictStrategy::TargetWins, newer, older),
            Resolution::KeepTarget
        );
    }

    #[test]
    fn test_manual_defers() {
        let t = Utc::now();
        assert_eq!(
            resolve(ConflictStrategy::Manual, t + Duration::seconds(1), t),
            Resolution::Defer
        );
    }
}
