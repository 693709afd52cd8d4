//! A record: a map from field names to JSON values, owned by a table.
//!
//! Three field names are reserved and immutable: `database`, `table` and
//! `identifier`. They are set at construction, always equal the parents'
//! identifiers (case-folded), and can never be overwritten or removed.
//! Field access is case-insensitive; storage canonicalizes to lowercase.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde_json::{Map, Value};

use super::error::Error;
use super::settings::ACTIVE_RECORDS;
use super::stats::{Op, OpStats};
use super::tokens;

pub const RESERVED_FIELDS: [&str; 3] = ["database", "table", "identifier"];

/// Exclusive update rights to one field, for a short while.
pub const TOKEN_TTL: Duration = Duration::from_secs(11);

#[derive(Debug, Clone)]
pub struct UpdateToken {
    pub token: String,
    pub deadline: Instant,
}

impl UpdateToken {
    fn live(&self) -> bool {
        self.deadline > Instant::now()
    }
}

pub struct Record {
    database: String,
    table: String,
    identifier: String,
    fields: RwLock<Map<String, Value>>,
    /// Field name -> live update token. Separate mutex so different
    /// fields can be acquired concurrently with reads of the field map.
    tokens: Mutex<HashMap<String, UpdateToken>>,
    stats: OpStats,
    retired: AtomicBool,
}

pub fn reserved(field: &str) -> bool {
    RESERVED_FIELDS.contains(&field)
}

impl Record {
    /// Empty record holding only its reserved fields.
    pub fn new(database: &str, table: &str, identifier: &str) -> Arc<Self> {
        let database = database.to_lowercase();
        let table = table.to_lowercase();
        let identifier = identifier.to_lowercase();

        let mut fields = Map::new();
        fields.insert("database".into(), Value::String(database.clone()));
        fields.insert("table".into(), Value::String(table.clone()));
        fields.insert("identifier".into(), Value::String(identifier.clone()));

        ACTIVE_RECORDS.fetch_add(1, Ordering::Relaxed);

        Arc::new(Self {
            database,
            table,
            identifier,
            fields: RwLock::new(fields),
            tokens: Mutex::new(HashMap::new()),
            stats: OpStats::default(),
            retired: AtomicBool::new(false),
        })
    }

    /// Build a record from a full JSON document, e.g. a shard file line or
    /// an insert body. The embedded reserved fields must agree with the
    /// owning table.
    pub fn from_value(database: &str, table: &str, value: &Value) -> Result<Arc<Self>, Error> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::validation("record body must be a JSON object"))?;

        let identifier = object
            .get("identifier")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::validation("record body is missing \"identifier\""))?
            .to_lowercase();

        check_embedded(object, database, table, Some(&identifier))?;

        let record = Self::new(database, table, &identifier);
        {
            let mut fields = record.fields.write();
            for (name, field_value) in object {
                let name = name.to_lowercase();
                if !reserved(&name) {
                    fields.insert(name, field_value.clone());
                }
            }
        }
        Ok(record)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn stats(&self) -> &OpStats {
        &self.stats
    }

    /// Deep copy of the whole field map.
    pub fn full_data(&self) -> Value {
        Value::Object(self.fields.read().clone())
    }

    /// Serialized form for shard persistence.
    pub fn to_line(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(&self.full_data())?)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.read().contains_key(&field.to_lowercase())
    }

    /// Copy one field. With `acquire` set and the table enforcing secure
    /// updates, also try to install a fresh update token for the field;
    /// the token comes back alongside the value. Acquisition fails
    /// silently (no token in the result) when another holder has a live
    /// token or the field is reserved.
    pub fn get(
        self: &Arc<Self>,
        field: &str,
        acquire: bool,
        secure: bool,
    ) -> Option<(Value, Option<String>)> {
        let field = field.to_lowercase();

        let value = match self.fields.read().get(&field) {
            Some(value) => value.clone(),
            None => {
                self.stats.record(Op::Get, false);
                return None;
            }
        };

        let token = if acquire && secure && !reserved(&field) {
            self.acquire_token(&field)
        } else {
            None
        };

        self.stats.record(Op::Get, true);
        Some((value, token))
    }

    fn acquire_token(self: &Arc<Self>, field: &str) -> Option<String> {
        let mut tokens = self.tokens.lock();

        if tokens.get(field).map(UpdateToken::live).unwrap_or(false) {
            return None;
        }

        let mut raw = [0u8; 8];
        rand::rng().fill_bytes(&mut raw);
        let token = BASE64.encode(raw);
        let deadline = Instant::now() + TOKEN_TTL;

        tokens.insert(
            field.to_owned(),
            UpdateToken {
                token: token.clone(),
                deadline,
            },
        );
        tokens::schedule(self, field, &token, deadline);

        self.stats.record(Op::Acquire, true);
        Some(token)
    }

    /// Replace one field's value from an update body. The body must embed
    /// matching reserved fields and carry the new value under the field's
    /// name. With secure updates on, a live matching token is required
    /// and consumed.
    pub fn update(
        &self,
        field: &str,
        payload: &Value,
        token: Option<&str>,
        secure: bool,
        template: Option<&Value>,
    ) -> Result<(), Error> {
        let field = field.to_lowercase();

        let result = self.update_inner(&field, payload, token, secure, template);
        self.stats.record(Op::Update, result.is_ok());
        result
    }

    fn update_inner(
        &self,
        field: &str,
        payload: &Value,
        token: Option<&str>,
        secure: bool,
        template: Option<&Value>,
    ) -> Result<(), Error> {
        if reserved(field) {
            return Err(Error::validation("field is reserved"));
        }

        let object = payload
            .as_object()
            .ok_or_else(|| Error::validation("update body must be a JSON object"))?;
        check_embedded(object, &self.database, &self.table, Some(&self.identifier))?;

        let new_value = object
            .get(field)
            .ok_or_else(|| Error::validation(format!("update body is missing \"{}\"", field)))?;

        if let Some(template) = template.and_then(|t| t.get(field)) {
            if !structure_matches(new_value, template) {
                return Err(Error::validation("value does not match the table structure"));
            }
        }

        let mut fields = self.fields.write();

        if !fields.contains_key(field) {
            return Err(Error::NotFound("field"));
        }

        if secure {
            let mut tokens = self.tokens.lock();
            let matches = tokens
                .get(field)
                .filter(|t| t.live())
                .map(|t| token == Some(t.token.as_str()))
                .unwrap_or(false);

            if !matches {
                return Err(Error::TokenRequired);
            }
            // Consumed; the queued timer entry becomes a no-op.
            tokens.remove(field);
        }

        fields.insert(field.to_owned(), new_value.clone());
        Ok(())
    }

    /// Insert a new field, empty or from an insert body. Templated tables
    /// only accept fields the template names; the empty form seeds the
    /// field with the template's skeleton.
    pub fn insert_field(
        &self,
        field: &str,
        payload: Option<&Value>,
        template: Option<&Value>,
    ) -> Result<(), Error> {
        let field = field.to_lowercase();

        let result = self.insert_field_inner(&field, payload, template);
        self.stats.record(Op::Insert, result.is_ok());
        result
    }

    fn insert_field_inner(
        &self,
        field: &str,
        payload: Option<&Value>,
        template: Option<&Value>,
    ) -> Result<(), Error> {
        if reserved(field) {
            return Err(Error::validation("field is reserved"));
        }

        let field_template = match template {
            Some(template) => match template.get(field) {
                Some(field_template) => Some(field_template),
                None => {
                    return Err(Error::validation(
                        "field is not part of the table structure",
                    ))
                }
            },
            None => None,
        };

        let new_value = match payload {
            Some(payload) => {
                let object = payload
                    .as_object()
                    .ok_or_else(|| Error::validation("insert body must be a JSON object"))?;
                check_embedded(object, &self.database, &self.table, Some(&self.identifier))?;

                let value = object.get(field).ok_or_else(|| {
                    Error::validation(format!("insert body is missing \"{}\"", field))
                })?;

                if let Some(field_template) = field_template {
                    if !structure_matches(value, field_template) {
                        return Err(Error::validation(
                            "value does not match the table structure",
                        ));
                    }
                }
                value.clone()
            }
            None => match field_template {
                Some(field_template) => field_template.clone(),
                None => Value::Object(Map::new()),
            },
        };

        let mut fields = self.fields.write();
        if fields.contains_key(field) {
            return Err(Error::AlreadyExists(field.to_owned()));
        }
        fields.insert(field.to_owned(), new_value);
        Ok(())
    }

    /// Remove a field. Refused for reserved fields, fields locked by a
    /// live update token, and fields the table structure requires.
    pub fn delete_field(&self, field: &str, template: Option<&Value>) -> Result<(), Error> {
        let field = field.to_lowercase();

        let result = self.delete_field_inner(&field, template);
        self.stats.record(Op::Delete, result.is_ok());
        result
    }

    fn delete_field_inner(&self, field: &str, template: Option<&Value>) -> Result<(), Error> {
        if reserved(field) {
            return Err(Error::validation("field is reserved"));
        }

        if self
            .tokens
            .lock()
            .get(field)
            .map(UpdateToken::live)
            .unwrap_or(false)
        {
            return Err(Error::TokenHeld);
        }

        if template.map(|t| t.get(field).is_some()).unwrap_or(false) {
            return Err(Error::validation("field is required by the table structure"));
        }

        match self.fields.write().remove(field) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound("field")),
        }
    }

    /// Called by the timer pool once a token deadline elapses. Only
    /// removes the exact token it was scheduled for.
    pub fn clear_expired_token(&self, field: &str, token: &str) {
        let mut tokens = self.tokens.lock();
        if let Some(existing) = tokens.get(field) {
            if existing.token == token && !existing.live() {
                tokens.remove(field);
            }
        }
    }

    /// A live token exists for the field.
    pub fn field_acquired(&self, field: &str) -> bool {
        self.tokens
            .lock()
            .get(&field.to_lowercase())
            .map(UpdateToken::live)
            .unwrap_or(false)
    }

    /// Unload side-effect: the record no longer counts as active.
    pub fn retire(&self) {
        if !self.retired.swap(true, Ordering::Relaxed) {
            ACTIVE_RECORDS.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl Drop for Record {
    fn drop(&mut self) {
        self.retire();
    }
}

/// Reserved fields embedded in a client body must agree with the record's
/// coordinates, case-insensitively.
fn check_embedded(
    object: &Map<String, Value>,
    database: &str,
    table: &str,
    identifier: Option<&str>,
) -> Result<(), Error> {
    let check = |name: &str, expected: &str| -> Result<(), Error> {
        match object.get(name).and_then(|v| v.as_str()) {
            Some(embedded) if embedded.eq_ignore_ascii_case(expected) => Ok(()),
            Some(_) => Err(Error::validation(format!(
                "embedded \"{}\" does not match the record",
                name
            ))),
            None => Ok(()),
        }
    };

    check("database", database)?;
    check("table", table)?;
    if let Some(identifier) = identifier {
        // A wrong embedded identifier is never acceptable.
        if let Some(embedded) = object.get("identifier").and_then(|v| v.as_str()) {
            if !embedded.eq_ignore_ascii_case(identifier) {
                return Err(Error::validation(
                    "embedded \"identifier\" does not match the record",
                ));
            }
        }
    }
    Ok(())
}

/// Structural match against a template skeleton: objects must carry
/// exactly the template's keys (recursively), arrays must hold elements
/// shaped like the template's first element, `null` accepts anything, and
/// scalars must agree on JSON type.
pub fn structure_matches(value: &Value, template: &Value) -> bool {
    match template {
        Value::Null => true,
        Value::Object(template) => match value.as_object() {
            Some(object) => {
                object.len() == template.len()
                    && template.iter().all(|(key, sub)| {
                        object.get(key).map(|v| structure_matches(v, sub)).unwrap_or(false)
                    })
            }
            None => false,
        },
        Value::Array(template) => match value.as_array() {
            Some(array) => match template.first() {
                Some(element) => array.iter().all(|v| structure_matches(v, element)),
                None => true,
            },
            None => false,
        },
        Value::String(_) => value.is_string(),
        Value::Number(_) => value.is_number(),
        Value::Bool(_) => value.is_boolean(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Arc<Record> {
        Record::from_value(
            "lib",
            "books",
            &json!({
                "database": "lib",
                "table": "books",
                "identifier": "b1",
                "meta": {"t": "x"},
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_reserved_fields_set_at_construction() {
        let record = record();
        let data = record.full_data();
        assert_eq!(data["database"], "lib");
        assert_eq!(data["table"], "books");
        assert_eq!(data["identifier"], "b1");
        assert_eq!(data["meta"]["t"], "x");
    }

    #[test]
    fn test_identifiers_case_folded() {
        let record = Record::new("LIB", "Books", "B1");
        assert_eq!(record.identifier(), "b1");
        assert_eq!(record.full_data()["database"], "lib");
    }

    #[test]
    fn test_embedded_mismatch_rejected() {
        let result = Record::from_value(
            "lib",
            "books",
            &json!({"database": "other", "identifier": "b1"}),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_get_absent_field() {
        let record = record();
        assert!(record.get("nope", false, false).is_none());
    }

    #[test]
    fn test_get_is_case_insensitive() {
        let record = record();
        assert!(record.get("META", false, false).is_some());
    }

    #[test]
    fn test_acquire_returns_token_once() {
        let record = record();

        let (_, first) = record.get("meta", true, true).unwrap();
        assert!(first.is_some());

        // Second holder doesn't get a token while the first is live.
        let (_, second) = record.get("meta", true, true).unwrap();
        assert!(second.is_none());
        assert!(record.field_acquired("meta"));
    }

    #[test]
    fn test_acquire_skipped_without_secure_update() {
        let record = record();
        let (_, token) = record.get("meta", true, false).unwrap();
        assert!(token.is_none());
    }

    #[test]
    fn test_acquire_refused_for_reserved() {
        let record = record();
        let (_, token) = record.get("identifier", true, true).unwrap();
        assert!(token.is_none());
    }

    #[test]
    fn test_update_replaces_value() {
        let record = record();
        let body = json!({
            "database": "lib", "table": "books", "identifier": "b1",
            "meta": {"t": "y"},
        });

        record.update("meta", &body, None, false, None).unwrap();
        assert_eq!(record.full_data()["meta"]["t"], "y");
    }

    #[test]
    fn test_update_reserved_refused() {
        let record = record();
        let body = json!({"identifier": "b1", "database": "evil"});
        assert!(matches!(
            record.update("database", &body, None, false, None),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_update_missing_payload_field() {
        let record = record();
        let body = json!({"identifier": "b1"});
        assert!(matches!(
            record.update("meta", &body, None, false, None),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_secure_update_token_protocol() {
        let record = record();
        let (_, token) = record.get("meta", true, true).unwrap();
        let token = token.unwrap();

        let body = json!({"identifier": "b1", "meta": {"t": "z"}});

        // Missing token.
        assert!(matches!(
            record.update("meta", &body, None, true, None),
            Err(Error::TokenRequired)
        ));
        // Wrong token.
        assert!(matches!(
            record.update("meta", &body, Some("bogus"), true, None),
            Err(Error::TokenRequired)
        ));
        // Right token.
        record.update("meta", &body, Some(&token), true, None).unwrap();
        assert_eq!(record.full_data()["meta"]["t"], "z");

        // Token was consumed; replay fails.
        assert!(matches!(
            record.update("meta", &body, Some(&token), true, None),
            Err(Error::TokenRequired)
        ));
        assert!(!record.field_acquired("meta"));
    }

    #[test]
    fn test_insert_and_delete_field() {
        let record = record();

        record.insert_field("tags", None, None).unwrap();
        assert!(record.has_field("tags"));
        assert!(matches!(
            record.insert_field("tags", None, None),
            Err(Error::AlreadyExists(_))
        ));

        record.delete_field("tags", None).unwrap();
        assert!(!record.has_field("tags"));
        assert!(matches!(
            record.delete_field("tags", None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_insert_with_payload() {
        let record = record();
        let body = json!({"identifier": "b1", "tags": ["x", "y"]});
        record.insert_field("tags", Some(&body), None).unwrap();
        assert_eq!(record.full_data()["tags"], json!(["x", "y"]));
    }

    #[test]
    fn test_delete_refused_while_token_live() {
        let record = record();
        let (_, token) = record.get("meta", true, true).unwrap();
        assert!(token.is_some());

        assert!(matches!(
            record.delete_field("meta", None),
            Err(Error::TokenHeld)
        ));
    }

    #[test]
    fn test_template_enforced() {
        let record = record();
        let template = json!({"meta": {"t": ""}, "pages": 0});

        // Insert outside the template.
        assert!(matches!(
            record.insert_field("extra", None, Some(&template)),
            Err(Error::Validation(_))
        ));

        // Empty insert seeds the skeleton.
        record.insert_field("pages", None, Some(&template)).unwrap();
        assert_eq!(record.full_data()["pages"], 0);

        // Update must keep the shape.
        let bad = json!({"identifier": "b1", "meta": "flat"});
        assert!(matches!(
            record.update("meta", &bad, None, false, Some(&template)),
            Err(Error::Validation(_))
        ));

        let good = json!({"identifier": "b1", "meta": {"t": "q"}});
        record.update("meta", &good, None, false, Some(&template)).unwrap();

        // Required fields can't be deleted.
        assert!(matches!(
            record.delete_field("meta", Some(&template)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_structure_matches() {
        let template = json!({"a": "", "b": {"c": 0}, "d": [0], "e": null});

        assert!(structure_matches(
            &json!({"a": "x", "b": {"c": 5}, "d": [1, 2], "e": {"any": true}}),
            &template
        ));
        // Extra key.
        assert!(!structure_matches(
            &json!({"a": "x", "b": {"c": 5}, "d": [], "e": 0, "f": 1}),
            &template
        ));
        // Wrong scalar type.
        assert!(!structure_matches(
            &json!({"a": 1, "b": {"c": 5}, "d": [], "e": 0}),
            &template
        ));
        // Wrong array element type.
        assert!(!structure_matches(
            &json!({"a": "x", "b": {"c": 5}, "d": ["s"], "e": 0}),
            &template
        ));
    }
}
