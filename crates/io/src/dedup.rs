// Folding rows that share a key into one row per key

use std::collections::{BTreeSet, HashMap};

use deltagrid_recon::{KeySpec, Record, RecordKey, ReconError, Schema, Value};
use log::warn;

/// Separator between distinct values of a merged field.
pub const MERGE_SEPARATOR: &str = " | ";

/// Drop exact duplicate rows, then merge rows sharing a key.
///
/// Every non-key field of a merged group becomes the distinct lower-cased
/// texts of its non-null values, sorted and joined with `" | "`, so
/// `("Ann", "Ann")` gives `"ann"` and `("Boston", null)` gives `"boston"`.
/// A field that is null on every row stays null. Key fields agree across the
/// group and keep their value. Groups keep the position of their first row.
pub fn merge_duplicate_keys(schema: &Schema, key: &KeySpec, records: Vec<Record>) -> Result<Vec<Record>, ReconError> {
    let mut order: Vec<RecordKey> = Vec::new();
    let mut groups: HashMap<RecordKey, Vec<Record>> = HashMap::new();

    for (row, record) in records.into_iter().enumerate() {
        let k = key.key_for(schema, &record, row)?;
        match groups.get_mut(&k) {
            Some(group) => {
                if !group.iter().any(|r| same_row(r, &record)) {
                    group.push(record);
                }
            }
            None => {
                order.push(k.clone());
                groups.insert(k, vec![record]);
            }
        }
    }

    let keep: Vec<usize> = key.carried_fields().iter().filter_map(|f| schema.index_of(f)).collect();
    let mut merged_keys = 0usize;
    let mut out = Vec::with_capacity(order.len());
    for k in order {
        let Some(mut group) = groups.remove(&k) else {
            continue;
        };
        if group.len() == 1 {
            out.extend(group.pop());
            continue;
        }
        merged_keys += 1;
        out.push(merge_group(&keep, &group));
    }
    if merged_keys > 0 {
        warn!("merged {merged_keys} keys that appeared on more than one distinct row");
    }
    Ok(out)
}

fn same_row(a: &Record, b: &Record) -> bool {
    a.values().len() == b.values().len() && a.values().iter().zip(b.values()).all(|(x, y)| x.same_as(y))
}

/// `keep` lists the key columns, copied from the first row.
fn merge_group(keep: &[usize], group: &[Record]) -> Record {
    let width = group.first().map_or(0, |r| r.values().len());
    let values = (0..width)
        .map(|field| {
            if keep.contains(&field) {
                return group.first().and_then(|r| r.get(field)).cloned().unwrap_or(Value::Null);
            }
            let distinct: BTreeSet<String> = group
                .iter()
                .filter_map(|r| r.get(field))
                .filter(|v| !v.is_null())
                .map(|v| v.to_string().to_lowercase())
                .collect();
            if distinct.is_empty() {
                Value::Null
            } else {
                Value::Text(distinct.into_iter().collect::<Vec<_>>().join(MERGE_SEPARATOR))
            }
        })
        .collect();
    Record::new(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(values: &[&str]) -> Record {
        Record::new(
            values
                .iter()
                .map(|v| if v.is_empty() { Value::Null } else { Value::from(*v) })
                .collect(),
        )
    }

    #[test]
    fn exact_duplicates_collapse() {
        let schema = Schema::text(&["id", "v"]);
        let out = merge_duplicate_keys(
            &schema,
            &KeySpec::Field("id".into()),
            vec![rec(&["1", "a"]), rec(&["1", "a"]), rec(&["2", "b"])],
        )
        .unwrap();
        assert_eq!(out, vec![rec(&["1", "a"]), rec(&["2", "b"])]);
    }

    #[test]
    fn conflicting_values_are_joined_sorted_and_lowercased() {
        let schema = Schema::text(&["id", "phone", "city"]);
        let out = merge_duplicate_keys(
            &schema,
            &KeySpec::Field("id".into()),
            vec![
                rec(&["7", "555-2", "Boston"]),
                rec(&["3", "x", "y"]),
                rec(&["7", "555-1", "Boston"]),
                rec(&["7", "", "BOSTON"]),
            ],
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        // Group 7 keeps its first position.
        assert_eq!(out[0].values()[0], Value::from("7"));
        assert_eq!(out[0].values()[1], Value::from("555-1 | 555-2"));
        assert_eq!(out[0].values()[2], Value::from("boston"));
        assert_eq!(out[1], rec(&["3", "x", "y"]));
    }

    #[test]
    fn merged_fields_are_always_lowercased() {
        let schema = Schema::text(&["id", "name", "note", "city", "fax"]);
        let out = merge_duplicate_keys(
            &schema,
            &KeySpec::Field("id".into()),
            vec![
                rec(&["1", "Ann", "a", "Boston", ""]),
                rec(&["1", "Ann", "", "", ""]),
                rec(&["1", "", "b", "", ""]),
            ],
        )
        .unwrap();
        assert_eq!(out, vec![rec(&["1", "ann", "a | b", "boston", ""])]);
    }

    #[test]
    fn mixed_case_keys_survive_a_merge() {
        let schema = Schema::text(&["code", "v"]);
        let out = merge_duplicate_keys(
            &schema,
            &KeySpec::Field("code".into()),
            vec![rec(&["AB-1", "X"]), rec(&["AB-1", "y"])],
        )
        .unwrap();
        assert_eq!(out, vec![rec(&["AB-1", "x | y"])]);
    }

    #[test]
    fn null_key_is_an_error() {
        let schema = Schema::text(&["id"]);
        let err = merge_duplicate_keys(&schema, &KeySpec::Field("id".into()), vec![rec(&[""])]).unwrap_err();
        assert!(matches!(err, ReconError::NullKey { .. }));
    }
}
