//! Device role classification for one zone
//!
//! Configured names are trimmed and uppercased once at construction. A name
//! ending in `-READER` is reader-qualified: its physical reader reports the
//! canonical device under the event point name instead of the alias.

use crate::domain::types::{DeviceRole, NormalizedEvent};
use rustc_hash::FxHashSet;

/// Suffix marking a reader-qualified configured device
pub const READER_SUFFIX: &str = "-READER";

/// Outcome of classifying one event: the role and the key it was resolved by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub role: DeviceRole,
    /// Effective device key (event point name or alias)
    pub device: String,
    /// True when the event point name was used instead of the alias
    pub via_event_point: bool,
}

/// Classifies devices against a zone's entry and exit lists
#[derive(Debug, Clone)]
pub struct DeviceClassifier {
    /// Suffix-stripped entry names
    in_set: FxHashSet<String>,
    /// Suffix-stripped exit names
    out_set: FxHashSet<String>,
    /// Stripped forms of reader-qualified entry names
    reader_in: FxHashSet<String>,
    /// Stripped forms of reader-qualified exit names
    reader_out: FxHashSet<String>,
}

fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}

fn strip_reader(name: &str) -> String {
    name.replace(READER_SUFFIX, "").trim().to_string()
}

impl DeviceClassifier {
    pub fn new<S: AsRef<str>>(in_devices: &[S], out_devices: &[S]) -> Self {
        let split = |devices: &[S]| {
            let mut all = FxHashSet::default();
            let mut readers = FxHashSet::default();
            for name in devices.iter().map(|d| normalize_name(d.as_ref())) {
                if name.is_empty() {
                    continue;
                }
                let stripped = strip_reader(&name);
                if name.contains(READER_SUFFIX) {
                    readers.insert(stripped.clone());
                }
                all.insert(stripped);
            }
            (all, readers)
        };

        let (in_set, reader_in) = split(in_devices);
        let (out_set, reader_out) = split(out_devices);
        Self { in_set, out_set, reader_in, reader_out }
    }

    /// True when both entry and exit lists are non-empty
    pub fn is_configured(&self) -> bool {
        !self.in_set.is_empty() && !self.out_set.is_empty()
    }

    /// Classify a device alias / event point name pair
    pub fn classify(&self, device_alias: &str, event_point_name: &str) -> Classification {
        let point = normalize_name(event_point_name);

        // Reader-qualified entries win when the event point name matches
        if !point.is_empty() {
            if self.reader_in.contains(&point) {
                return Classification { role: DeviceRole::Entry, device: point, via_event_point: true };
            }
            if self.reader_out.contains(&point) {
                return Classification { role: DeviceRole::Exit, device: point, via_event_point: true };
            }
        }

        let device = normalize_name(device_alias);
        let role = self.role_of(&device);
        Classification { role, device, via_event_point: false }
    }

    /// Classify a normalized event
    #[inline]
    pub fn classify_event(&self, event: &NormalizedEvent) -> Classification {
        self.classify(&event.device_alias, &event.event_point_name)
    }

    /// Role of an already-resolved device key
    pub fn role_of(&self, device: &str) -> DeviceRole {
        if device.is_empty() {
            DeviceRole::Unknown
        } else if self.in_set.contains(device) {
            DeviceRole::Entry
        } else if self.out_set.contains(device) {
            DeviceRole::Exit
        } else {
            DeviceRole::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_classification() {
        let c = DeviceClassifier::new(&["gate-in-1", " GATE-IN-2 "], &["GATE-OUT-1"]);
        assert_eq!(c.classify("GATE-IN-1", "").role, DeviceRole::Entry);
        assert_eq!(c.classify(" gate-in-2", "").role, DeviceRole::Entry);
        assert_eq!(c.classify("GATE-OUT-1", "").role, DeviceRole::Exit);
        assert_eq!(c.classify("LOBBY", "").role, DeviceRole::Unknown);
    }

    #[test]
    fn test_reader_qualified_event_point_wins() {
        let c = DeviceClassifier::new(&["GATE-A"], &["GATE-A-READER"]);
        let result = c.classify("GATE-B", "GATE-A");
        assert_eq!(result.role, DeviceRole::Exit);
        assert_eq!(result.device, "GATE-A");
        assert!(result.via_event_point);
    }

    #[test]
    fn test_event_point_ignored_without_reader_entry() {
        let c = DeviceClassifier::new(&["GATE-A"], &["GATE-B"]);
        let result = c.classify("GATE-B", "GATE-A");
        assert_eq!(result.role, DeviceRole::Exit);
        assert_eq!(result.device, "GATE-B");
        assert!(!result.via_event_point);
    }

    #[test]
    fn test_reader_entry_matches_stripped_alias() {
        let c = DeviceClassifier::new(&["TURNSTILE-READER"], &["EXIT-1"]);
        assert_eq!(c.classify("turnstile", "").role, DeviceRole::Entry);
        assert_eq!(c.classify("", "TURNSTILE").role, DeviceRole::Entry);
    }

    #[test]
    fn test_empty_device_is_unknown() {
        let c = DeviceClassifier::new(&["GATE-A"], &["GATE-B"]);
        assert_eq!(c.classify("", "").role, DeviceRole::Unknown);
        assert_eq!(c.classify("", "SOMETHING").role, DeviceRole::Unknown);
    }

    #[test]
    fn test_is_configured() {
        assert!(DeviceClassifier::new(&["A"], &["B"]).is_configured());
        assert!(!DeviceClassifier::new(&["A"], &[] as &[&str]).is_configured());
        assert!(!DeviceClassifier::new(&["  "], &["B"]).is_configured());
    }
}
