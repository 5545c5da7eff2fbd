//! Best-effort insight resolution.

use super::InsightGenerator;
use crate::audit::SharedAuditLog;
use crate::core::report::{Insight, InsightRequest};
use std::sync::Arc;

/// Resolves every request to an insight, genuine or fallback.
#[derive(Clone)]
pub struct InsightOrchestrator {
    generator: Arc<dyn InsightGenerator>,
    audit: Option<SharedAuditLog>,
}

impl InsightOrchestrator {
    pub fn new(generator: Arc<dyn InsightGenerator>) -> Self {
        Self {
            generator,
            audit: None,
        }
    }

    /// Record outcomes in an audit log.
    pub fn with_audit(mut self, audit: SharedAuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Issue exactly one generation call and settle it.
    ///
    /// Never fails: any error yields [`Insight::fallback`].
    pub async fn resolve(&self, request: &InsightRequest) -> Insight {
        let (insight, fallback) = match self.generator.generate(request).await {
            Ok(insight) => (insight, false),
            Err(e) => {
                tracing::warn!("AI insight unavailable, using fallback: {}", e);
                (Insight::fallback(), true)
            }
        };

        if let Some(audit) = &self.audit {
            audit.record_insight(fallback);
        }
        insight
    }
}
