//! Attaches visit metadata to visitor sessions

use crate::domain::session::PersonSession;
use crate::domain::types::{Origin, VisitorMeta};
use crate::io::store::EventStore;
use crate::services::source::day_window;
use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// Enrich visitor sessions in place, returning how many were enriched
///
/// Metadata is fetched once for the distinct visitor identities over today's
/// window. When several rows exist for an identity the last one wins. A store
/// failure leaves every session unenriched.
pub async fn enrich_visitors(
    store: &dyn EventStore,
    sessions: &mut [PersonSession],
    today: NaiveDate,
) -> usize {
    let mut identities: Vec<String> = sessions
        .iter()
        .filter(|s| s.origin == Origin::Visitor)
        .map(|s| s.identity_id.clone())
        .collect();
    identities.sort();
    identities.dedup();
    if identities.is_empty() {
        return 0;
    }

    let rows = match store.fetch_visit_meta(&identities, day_window(today)).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(visitors = %identities.len(), error = %e, "visitor_enrichment_failed");
            return 0;
        }
    };

    let mut latest: FxHashMap<String, VisitorMeta> = FxHashMap::default();
    for row in rows {
        latest.insert(row.identity_id.clone(), row);
    }

    let mut enriched = 0;
    for session in sessions.iter_mut().filter(|s| s.origin == Origin::Visitor) {
        if let Some(meta) = latest.get(&session.identity_id) {
            session.visitor = Some(meta.clone());
            enriched += 1;
        }
    }
    debug!(visitors = %identities.len(), enriched = %enriched, "visitors_enriched");
    enriched
}
