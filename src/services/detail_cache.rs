//! Identity detail lookup with a bounded process-lifetime cache
//!
//! Details (name, gender, plate, custom attributes) change rarely, so the
//! first successful lookup per identity is kept until the process exits.
//! The attribute-name to extension-slot mapping is resolved once, on the
//! first successful lookup, and shared by every identity.

use crate::domain::session::PersonSession;
use crate::domain::snapshot::PersonDetail;
use crate::domain::types::TIME_FORMAT;
use crate::io::store::{AttributeSlot, EventStore, StoreError};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Display label for a stored gender code
pub fn gender_label(code: Option<&str>) -> &'static str {
    match code.map(str::trim) {
        Some("M") => "Male",
        Some("F") => "Female",
        _ => "",
    }
}

pub struct IdentityDetailCache {
    attribute_keys: Vec<String>,
    capacity: usize,
    entries: Mutex<FxHashMap<String, PersonDetail>>,
    slots: OnceCell<Vec<AttributeSlot>>,
}

impl IdentityDetailCache {
    pub fn new(attribute_keys: &[String], capacity: usize) -> Self {
        Self {
            attribute_keys: attribute_keys.iter().map(|k| k.trim().to_lowercase()).collect(),
            capacity,
            entries: Mutex::new(FxHashMap::default()),
            slots: OnceCell::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Detail for an inside session; never fails
    ///
    /// Cached copies get the session's time and (when present) name. A lookup
    /// failure or unknown identity yields a minimal detail that is not cached.
    pub async fn get_detail(&self, store: &dyn EventStore, session: &PersonSession) -> PersonDetail {
        let time = session.last_transition_time.format(TIME_FORMAT).to_string();

        let cached = self.entries.lock().get(&session.identity_id).cloned();
        if let Some(mut detail) = cached {
            detail.time = time;
            if !session.display_name.is_empty() {
                detail.name = session.display_name.clone();
            }
            return detail;
        }

        match self.lookup(store, &session.identity_id).await {
            Ok(Some(mut detail)) => {
                self.insert(&session.identity_id, &detail);
                detail.time = time;
                if !session.display_name.is_empty() {
                    detail.name = session.display_name.clone();
                }
                detail
            }
            Ok(None) => {
                debug!(identity = %session.identity_id, "person_not_found");
                minimal_detail(session, time)
            }
            Err(e) => {
                warn!(identity = %session.identity_id, error = %e, "detail_lookup_failed");
                minimal_detail(session, time)
            }
        }
    }

    fn insert(&self, identity: &str, detail: &PersonDetail) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(identity) {
            debug!(capacity = %self.capacity, "detail_cache_full");
            return;
        }
        entries.insert(identity.to_string(), detail.clone());
    }

    async fn attribute_slots(&self, store: &dyn EventStore) -> Result<&[AttributeSlot], StoreError> {
        if self.attribute_keys.is_empty() {
            return Ok(&[]);
        }
        let slots = self
            .slots
            .get_or_try_init(|| async {
                let slots = store.fetch_attribute_slots(&self.attribute_keys).await?;
                debug!(requested = %self.attribute_keys.len(), resolved = %slots.len(), "attribute_slots_resolved");
                Ok::<_, StoreError>(slots)
            })
            .await?;
        Ok(slots)
    }

    async fn lookup(
        &self,
        store: &dyn EventStore,
        identity: &str,
    ) -> Result<Option<PersonDetail>, StoreError> {
        let Some(person) = store.fetch_person(identity).await? else {
            return Ok(None);
        };

        let plate = store.fetch_plate(&person.person_id).await?.unwrap_or_default();

        let mut attributes = BTreeMap::new();
        let slots = self.attribute_slots(store).await?;
        if !slots.is_empty() {
            if let Some(row) = store.fetch_attribute_row(&person.person_id).await? {
                for slot in slots {
                    if let Some(value) = row.get(slot.index) {
                        attributes.insert(slot.name.clone(), value.clone().unwrap_or_default());
                    }
                }
            }
        }

        Ok(Some(PersonDetail {
            id: person.identity_id,
            name: person.name,
            time: String::new(),
            gender: gender_label(person.gender.as_deref()).to_string(),
            plate,
            attributes,
            ..Default::default()
        }))
    }
}

fn minimal_detail(session: &PersonSession, time: String) -> PersonDetail {
    PersonDetail {
        id: session.identity_id.clone(),
        name: session.display_name.clone(),
        time,
        ..Default::default()
    }
}
