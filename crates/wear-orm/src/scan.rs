//! Row scanning and join assembly.
//!
//! A result row holds the root record's selected columns followed by the
//! selected columns of every joined model, in join order. The assembler
//! folds rows that belong to the same root (same non-empty primary key) into
//! one destination entry, attaching the related records of each row.

use std::collections::{HashMap, HashSet};
use std::vec;

use crate::error::{OrmError, Result};
use crate::model::{Field, JoinKind, JoinSlot, Model, Record, Related};
use crate::query::BuildRelated;
use crate::value::{Affinity, Value};

/// A join resolved against its target model, ready to decode rows.
pub(crate) struct JoinPlan<'a> {
    pub(crate) model: &'a Model,
    pub(crate) fields: Vec<&'a Field>,
    pub(crate) slot: JoinSlot,
    pub(crate) build: BuildRelated,
}

/// Decodes the next `fields.len()` values into `record`.
///
/// With `strict`, NULL in a column that is neither nullable nor JSON is an
/// error; otherwise NULL decodes to the field's zero value (LEFT JOIN rows).
/// Fields outside `fields` keep their current value.
pub(crate) fn fill_record<T: Record>(
    record: &mut T,
    fields: &[&Field],
    values: &mut vec::IntoIter<Value>,
    strict: bool,
) -> Result<()> {
    for field in fields {
        let value = values.next().ok_or_else(|| OrmError::Decode {
            column: field.column().to_string(),
            message: "missing from result row".to_string(),
        })?;
        if strict && value.is_null() && !field.nullable() && field.affinity() != Affinity::Json {
            return Err(OrmError::UnexpectedNull(field.column().to_string()));
        }
        record.set_column(field.pos(), value)?;
    }
    Ok(())
}

fn decode_record<T: Record>(
    fields: &[&Field],
    values: &mut vec::IntoIter<Value>,
    strict: bool,
) -> Result<T> {
    let mut record = T::default();
    fill_record(&mut record, fields, values, strict)?;
    Ok(record)
}

/// Primary key identity of a record, empty when unset or absent.
pub(crate) fn pk_key<T: Record>(model: &Model, record: &T) -> String {
    model
        .primary_key()
        .map(|f| record.column_value(f.pos()).key())
        .unwrap_or_default()
}

pub(crate) fn build_related<T: Record>(
    model: &Model,
    fields: &[&Field],
    values: &mut vec::IntoIter<Value>,
) -> Result<(String, Related)> {
    let record: T = decode_record(fields, values, false)?;
    let pk = pk_key(model, &record);
    Ok((pk, Related::new(record)))
}

/// Folds `rows` into `dest`, replacing its contents.
///
/// Rows of one root do not need to be contiguous: roots are grouped by
/// primary key. Roots without a primary key value are always appended.
pub(crate) fn assemble<T: Record>(
    model: &Model,
    fields: &[&Field],
    joins: &[JoinPlan<'_>],
    rows: Vec<Vec<Value>>,
    dest: &mut Vec<T>,
) -> Result<()> {
    dest.clear();
    dest.reserve(rows.len());

    let mut seen: HashMap<String, usize> = HashMap::new();
    // per destination entry, per join: related keys already attached
    let mut attached: Vec<Vec<HashSet<String>>> = Vec::new();

    for row in rows {
        let mut values = row.into_iter();
        let record: T = decode_record(fields, &mut values, true)?;
        let related = joins
            .iter()
            .map(|join| (join.build)(join.model, &join.fields, &mut values))
            .collect::<Result<Vec<_>>>()?;

        let pk = pk_key(model, &record);
        let idx = match seen.get(&pk) {
            Some(&idx) if !pk.is_empty() => idx,
            _ => {
                dest.push(record);
                attached.push(vec![HashSet::new(); joins.len()]);
                if !pk.is_empty() {
                    seen.insert(pk, dest.len() - 1);
                }
                dest.len() - 1
            }
        };

        for (j, (join, (related_pk, related))) in joins.iter().zip(related).enumerate() {
            if related_pk.is_empty() {
                continue;
            }
            match join.slot.kind {
                JoinKind::One => dest[idx].attach(join.slot.pos, related)?,
                JoinKind::Many => {
                    if attached[idx][j].insert(related_pk) {
                        dest[idx].attach(join.slot.pos, related)?;
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::any::TypeId;

    use super::*;
    use crate::model::resolve;
    use crate::Record;

    #[derive(Debug, Default, Clone, PartialEq, Record)]
    struct Item {
        id: String,
        label: String,
    }

    #[derive(Debug, Default, Record)]
    #[table(name = "root")]
    struct Root {
        id: String,
        name: String,
        #[column(join)]
        items: Vec<Item>,
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn row(root: &str, name: &str, item: Option<(&str, &str)>) -> Vec<Value> {
        let (id, label) = item.map_or((Value::Null, Value::Null), |(i, l)| (text(i), text(l)));
        vec![text(root), text(name), id, label]
    }

    fn run(rows: Vec<Vec<Value>>) -> Result<Vec<Root>> {
        let model = resolve::<Root>()?;
        let item = resolve::<Item>()?;
        let plans = [JoinPlan {
            model: &item,
            fields: item.fields().iter().collect(),
            slot: model
                .join_slot(TypeId::of::<Item>())
                .cloned()
                .expect("items slot"),
            build: build_related::<Item>,
        }];
        let fields: Vec<&Field> = model.fields().iter().collect();
        let mut dest = Vec::new();
        assemble(&model, &fields, &plans, rows, &mut dest)?;
        Ok(dest)
    }

    #[test]
    fn test_groups_non_contiguous_roots() {
        let roots = run(vec![
            row("r1", "A", Some(("i1", "x"))),
            row("r2", "B", None),
            row("r1", "A", Some(("i2", "y"))),
            row("r1", "A", Some(("i1", "x"))),
        ])
        .unwrap();

        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].id, "r1");
        let ids: Vec<_> = roots[0].items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["i1", "i2"]);
        assert_eq!(roots[1].id, "r2");
        assert!(roots[1].items.is_empty());
    }

    #[test]
    fn test_null_root_column_is_an_error() {
        let err = run(vec![vec![text("r1"), Value::Null, Value::Null, Value::Null]]).unwrap_err();
        assert!(matches!(err, OrmError::UnexpectedNull(c) if c == "name"));
    }

    #[test]
    fn test_short_row_is_a_decode_error() {
        let err = run(vec![vec![text("r1")]]).unwrap_err();
        assert!(matches!(err, OrmError::Decode { .. }));
    }
}
