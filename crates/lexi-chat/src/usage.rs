//! Cumulative token accounting against an optional cap

use std::sync::Arc;

use crate::{
    error::Result,
    settings::{Settings, SettingsStore},
};

/// Where cumulative usage stands relative to the cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapStatus {
    Unlimited { used: u64 },
    Within { used: u64, cap: u64 },
    Exceeded { used: u64, cap: u64 },
}

impl CapStatus {
    pub fn new(used: u64, cap: Option<u64>) -> Self {
        match cap {
            None => CapStatus::Unlimited { used },
            Some(cap) if used >= cap => CapStatus::Exceeded { used, cap },
            Some(cap) => CapStatus::Within { used, cap },
        }
    }

    pub fn used(&self) -> u64 {
        match *self {
            CapStatus::Unlimited { used }
            | CapStatus::Within { used, .. }
            | CapStatus::Exceeded { used, .. } => used,
        }
    }

    pub fn is_exceeded(&self) -> bool {
        matches!(self, CapStatus::Exceeded { .. })
    }

    /// Fraction of the cap consumed, clamped to 1.0
    pub fn fraction(&self) -> Option<f64> {
        match *self {
            CapStatus::Unlimited { .. } => None,
            CapStatus::Within { used, cap } | CapStatus::Exceeded { used, cap } => {
                if cap == 0 {
                    Some(1.0)
                } else {
                    Some((used as f64 / cap as f64).min(1.0))
                }
            }
        }
    }
}

/// Reads and updates the usage record held in the settings store
#[derive(Clone)]
pub struct UsageTracker {
    store: Arc<dyn SettingsStore>,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Tokens consumed so far
    pub async fn current(&self) -> Result<u64> {
        Ok(self.store.load().await?.token_usage)
    }

    /// Add `tokens` to the running total and return the new total.
    ///
    /// Zero is a no-op so an unreported usage never triggers a write.
    pub async fn add(&self, tokens: u64) -> Result<u64> {
        if tokens == 0 {
            return self.current().await;
        }
        let settings = self
            .store
            .update(Box::new(move |s: &mut Settings| {
                s.token_usage = s.token_usage.saturating_add(tokens)
            }))
            .await?;
        tracing::debug!(added = tokens, total = settings.token_usage, "token usage recorded");
        Ok(settings.token_usage)
    }

    pub async fn reset(&self) -> Result<()> {
        self.store.update(Box::new(|s: &mut Settings| s.token_usage = 0)).await?;
        Ok(())
    }

    /// Set or clear the cap
    pub async fn set_cap(&self, cap: Option<u64>) -> Result<()> {
        self.store.update(Box::new(move |s: &mut Settings| s.token_cap = cap)).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<CapStatus> {
        let settings = self.store.load().await?;
        Ok(CapStatus::new(settings.token_usage, settings.token_cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettingsStore;

    fn tracker() -> UsageTracker {
        UsageTracker::new(Arc::new(MemorySettingsStore::default()))
    }

    #[test]
    fn test_cap_status_boundaries() {
        assert_eq!(CapStatus::new(5, None), CapStatus::Unlimited { used: 5 });
        assert_eq!(
            CapStatus::new(9, Some(10)),
            CapStatus::Within { used: 9, cap: 10 }
        );
        assert!(CapStatus::new(10, Some(10)).is_exceeded());
        assert_eq!(CapStatus::new(20, Some(10)).fraction(), Some(1.0));
        assert_eq!(CapStatus::new(5, Some(10)).fraction(), Some(0.5));
        assert_eq!(CapStatus::new(5, None).fraction(), None);
        assert_eq!(CapStatus::new(5, None).used(), 5);
        assert_eq!(CapStatus::new(20, Some(10)).used(), 20);
    }

    #[tokio::test]
    async fn test_add_accumulates() {
        let usage = tracker();
        assert_eq!(usage.add(5).await.unwrap(), 5);
        assert_eq!(usage.add(7).await.unwrap(), 12);
        assert_eq!(usage.current().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_add_zero_does_not_write() {
        let store = Arc::new(MemorySettingsStore::default());
        let mut rx = store.subscribe();
        let usage = UsageTracker::new(store);
        assert_eq!(usage.add(0).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reset_and_cap() {
        let usage = tracker();
        usage.add(100).await.unwrap();
        usage.set_cap(Some(50)).await.unwrap();
        assert!(usage.status().await.unwrap().is_exceeded());

        usage.reset().await.unwrap();
        assert_eq!(
            usage.status().await.unwrap(),
            CapStatus::Within { used: 0, cap: 50 }
        );

        usage.set_cap(None).await.unwrap();
        assert_eq!(usage.status().await.unwrap(), CapStatus::Unlimited { used: 0 });
    }
}
