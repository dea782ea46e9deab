//! Summarization of older context
//!
//! After every commit the orchestrator asks [`decide`] whether the curated
//! entries have outgrown [`SUMMARY_THRESHOLD`]. If so, older full-history
//! messages are summarized by the model and all but the last
//! [`KEEP_RECENT`](crate::store::KEEP_RECENT) entries are replaced by the
//! summary.

use lexi_ai::{Credentials, Generation, Message, TextGenerator};
use tokio_util::sync::CancellationToken;

use crate::{
    context::build_summarization_context,
    error::Result,
    settings::Settings,
    store::SUMMARY_THRESHOLD,
};

/// Outcome of the post-commit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryDecision {
    /// Forgetful mode drops context instead of condensing it
    SkipForgetful,
    /// Few enough entries that nothing needs condensing
    SkipBelowThreshold,
    /// Vendor, model or key missing
    SkipNotConfigured,
    Summarize(Credentials),
}

/// Decide whether a summary should be requested for `entries` curated entries
pub fn decide(settings: &Settings, entries: usize) -> SummaryDecision {
    if settings.forgetful_mode {
        return SummaryDecision::SkipForgetful;
    }
    if entries <= SUMMARY_THRESHOLD {
        return SummaryDecision::SkipBelowThreshold;
    }
    match settings.credentials() {
        Some(credentials) => SummaryDecision::Summarize(credentials),
        None => SummaryDecision::SkipNotConfigured,
    }
}

/// Ask the model to summarize everything in `history` but the recent tail
pub async fn summarize(
    generator: &dyn TextGenerator,
    history: &[Message],
    credentials: &Credentials,
    cancel: CancellationToken,
) -> Result<Generation> {
    let messages = build_summarization_context(history);
    tracing::debug!(messages = messages.len(), "requesting summary");
    Ok(generator.generate(messages, credentials, cancel).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexi_ai::Vendor;

    fn connected() -> Settings {
        Settings {
            vendor: Some(Vendor::Gemini),
            model: Some("gemini-2.0-flash".into()),
            api_key: Some("key".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_forgetful_never_summarizes() {
        let settings = Settings {
            forgetful_mode: true,
            ..connected()
        };
        for entries in [0, 12, 13, 100] {
            assert_eq!(decide(&settings, entries), SummaryDecision::SkipForgetful);
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let settings = connected();
        assert_eq!(decide(&settings, 12), SummaryDecision::SkipBelowThreshold);
        assert!(matches!(
            decide(&settings, 13),
            SummaryDecision::Summarize(_)
        ));
    }

    #[test]
    fn test_missing_credentials_skip() {
        assert_eq!(
            decide(&Settings::default(), 14),
            SummaryDecision::SkipNotConfigured
        );
    }
}
