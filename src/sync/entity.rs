use crate::core::{FieldPatch, Result, Row, SyncError, values_equal};
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::BTreeSet;

/// A record type that can be held in a synchronized collection.
///
/// Records travel as JSON rows; field-level patches are applied by merging
/// into the serialized form and decoding again, so a patch that does not fit
/// the record's types is rejected instead of corrupting the snapshot.
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn record_id(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;
}

pub fn to_row<E: SyncEntity>(entity: &E) -> Result<Row> {
    match serde_json::to_value(entity)? {
        Value::Object(row) => Ok(row),
        other => Err(SyncError::Decode(format!(
            "record did not serialize to an object: {other}"
        ))),
    }
}

pub fn from_row<E: SyncEntity>(row: Row) -> Result<E> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Current values of `fields`; absent fields read as `null`.
pub fn read_fields<'a, E: SyncEntity>(
    entity: &E,
    fields: impl IntoIterator<Item = &'a String>,
) -> Result<FieldPatch> {
    let row = to_row(entity)?;
    Ok(fields
        .into_iter()
        .map(|field| (field.clone(), row.get(field).cloned().unwrap_or(Value::Null)))
        .collect())
}

pub fn apply_patch<E: SyncEntity>(entity: &E, patch: &FieldPatch) -> Result<E> {
    let mut row = to_row(entity)?;
    for (field, value) in patch {
        row.insert(field.clone(), value.clone());
    }
    from_row(row)
}

/// Fields of `incoming` that differ from `local`.
///
/// Columns the local record does not carry are ignored, as are the
/// `skip` columns (identity and creation time never change in place).
pub fn changed_fields(local: &Row, incoming: &Row, skip: &[&str]) -> BTreeSet<String> {
    incoming
        .iter()
        .filter(|(field, _)| !skip.contains(&field.as_str()))
        .filter_map(|(field, value)| {
            let current = local.get(field)?;
            if values_equal(current, value) {
                None
            } else {
                Some(field.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::patch_of;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        uid: String,
        created_at: DateTime<Utc>,
        ativo: bool,
        nome: String,
    }

    impl SyncEntity for Item {
        fn record_id(&self) -> &str {
            &self.uid
        }

        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }
    }

    fn item() -> Item {
        Item {
            uid: "i1".to_string(),
            created_at: Utc::now(),
            ativo: true,
            nome: "Base".to_string(),
        }
    }

    #[test]
    fn patch_applies_and_type_mismatch_is_rejected() {
        let original = item();
        let patched = apply_patch(&original, &patch_of("ativo", false)).expect("patch");
        assert!(!patched.ativo);
        assert_eq!(patched.nome, original.nome);

        let err = apply_patch(&original, &patch_of("ativo", "nope")).unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
    }

    #[test]
    fn reads_previous_values() {
        let fields = vec!["nome".to_string(), "missing".to_string()];
        let values = read_fields(&item(), &fields).expect("read");
        assert_eq!(values["nome"], json!("Base"));
        assert_eq!(values["missing"], Value::Null);
    }

    #[test]
    fn diff_ignores_unknown_and_skipped_columns() {
        let local = to_row(&item()).expect("row");
        let mut incoming = local.clone();
        incoming.insert("ativo".to_string(), json!(false));
        incoming.insert("server_only".to_string(), json!(1));
        incoming.insert("created_at".to_string(), json!("2020-01-01T00:00:00+00:00"));

        let changed = changed_fields(&local, &incoming, &["uid", "created_at"]);
        assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec!["ativo".to_string()]);
    }
}
