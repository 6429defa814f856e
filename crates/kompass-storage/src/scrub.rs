//! PII removal for fitness records.
//!
//! Scrubbing is one-way: identity and location fields are dropped, the
//! athlete id is replaced by a salted SHA-256 digest, and numeric
//! performance metrics are left untouched. Running the scrubber on its own
//! output changes nothing.

use kompass_types::Category;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// Sections holding the athlete profile.
const PROFILE_SECTIONS: &[&str] = &["basic_info", "athlete"];

/// Sections holding lists of activities.
const ACTIVITY_SECTIONS: &[&str] = &["recent_activities", "activities"];

/// Identity fields dropped from profiles and from the top level.
const IDENTITY_FIELDS: &[&str] = &[
    "name",
    "firstname",
    "lastname",
    "username",
    "email",
    "profile",
    "profile_medium",
    "city",
    "state",
    "country",
];

/// Location and free-text fields dropped from every activity.
const ACTIVITY_FIELDS: &[&str] = &[
    "name",
    "description",
    "start_latlng",
    "end_latlng",
    "map",
    "location_city",
    "location_state",
    "location_country",
    "start_latitude",
    "start_longitude",
    "end_latitude",
    "end_longitude",
    "photos",
    "gear",
    "gear_id",
    "athlete",
    "location",
];

const HASH_FIELD: &str = "user_hash";
const HASH_SALT: &str = "kompass-athlete:";
const MARKER_FIELD: &str = "anonymization";

/// Return a copy of `payload` with PII removed.
///
/// Categories that carry no PII are returned unchanged. Payloads that are
/// not JSON objects have no recognizable sections and are returned as-is.
pub fn scrub(category: Category, payload: &Value) -> Value {
    let mut out = payload.clone();
    if !category.is_pii_bearing() {
        return out;
    }
    let Some(root) = out.as_object_mut() else {
        return out;
    };

    remove_fields(root, IDENTITY_FIELDS);

    for section in PROFILE_SECTIONS {
        if let Some(Value::Object(profile)) = root.get_mut(*section) {
            scrub_profile(profile);
        }
    }

    for section in ACTIVITY_SECTIONS {
        if let Some(Value::Array(activities)) = root.get_mut(*section) {
            for activity in activities.iter_mut().filter_map(Value::as_object_mut) {
                remove_fields(activity, ACTIVITY_FIELDS);
            }
        }
    }

    root.insert(
        MARKER_FIELD.to_string(),
        json!({ "pii_removed": true, "method": "field_removal" }),
    );
    out
}

/// Stable anonymized identifier for an athlete id.
pub fn user_hash(athlete_id: &str) -> String {
    let digest = Sha256::digest(format!("{HASH_SALT}{athlete_id}").as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

fn scrub_profile(profile: &mut Map<String, Value>) {
    if let Some(id) = profile.remove("id") {
        if !profile.contains_key(HASH_FIELD) {
            let id = match id {
                Value::String(s) => s,
                other => other.to_string(),
            };
            profile.insert(HASH_FIELD.to_string(), Value::String(user_hash(&id)));
        }
    }
    remove_fields(profile, IDENTITY_FIELDS);
}

fn remove_fields(map: &mut Map<String, Value>, fields: &[&str]) {
    for field in fields {
        map.remove(*field);
    }
}
