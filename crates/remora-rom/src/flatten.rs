//! Value ⇄ wire conversion.
//!
//! Flattening is shape-free: scalars stay scalars, enums become their variant
//! name, object handles become their reference string, lists map
//! element-wise and records become string-keyed objects.
//!
//! Unflattening is driven by the expected [`RomType`]:
//!
//! | target | accepts |
//! |---|---|
//! | any | `null` → [`RomValue::Null`] |
//! | scalar / enum | bare scalar or `{"value": scalar}`; arrays rejected |
//! | record | bare object matching the record shape, else `{"value": record}` |
//! | list | bare array or `{"value": array}` |
//! | class | reference string (bare or wrapped) resolved through an [`ObjectResolver`] |

use std::collections::BTreeMap;

use remora_core::ObjectRef;
use remora_core::constants::PARAM_VALUE;
use serde_json::{Map, Number, Value};

use crate::errors::FlattenError;
use crate::types::{RomType, TypeSchema};
use crate::value::RomValue;

/// Resolves object references found while unflattening.
pub trait ObjectResolver {
    /// Succeed if `object` is live and assignable to `expected_class`.
    fn resolve(&self, object: &ObjectRef, expected_class: &str) -> Result<(), FlattenError>;
}

/// Accepts every reference without checking. Used on the client, which
/// learns about remote objects from the values it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct UncheckedResolver;

impl ObjectResolver for UncheckedResolver {
    fn resolve(&self, _object: &ObjectRef, _expected_class: &str) -> Result<(), FlattenError> {
        Ok(())
    }
}

/// Convert a native value into its wire form.
///
/// Fails only on NaN or infinite floats, which JSON cannot carry.
pub fn flatten(value: &RomValue) -> Result<Value, FlattenError> {
    Ok(match value {
        RomValue::Null => Value::Null,
        RomValue::Bool(b) => Value::Bool(*b),
        RomValue::Int(n) => Value::Number((*n).into()),
        RomValue::Float(f) => Value::Number(
            Number::from_f64(*f).ok_or(FlattenError::NonFinite { value: *f })?,
        ),
        RomValue::String(s) | RomValue::Enum(s) => Value::String(s.clone()),
        RomValue::Object(r) => Value::String(r.as_str().to_owned()),
        RomValue::List(items) => {
            Value::Array(items.iter().map(flatten).collect::<Result<Vec<_>, _>>()?)
        }
        RomValue::Record(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), flatten(v)?)))
                .collect::<Result<Map<String, Value>, FlattenError>>()?,
        ),
    })
}

/// Convert a wire value into a native value of type `target`.
pub fn unflatten(
    value: &Value,
    target: &RomType,
    schema: &TypeSchema,
    resolver: &dyn ObjectResolver,
) -> Result<RomValue, FlattenError> {
    if value.is_null() {
        return Ok(RomValue::Null);
    }
    match target {
        RomType::Void => Ok(RomValue::Null),
        RomType::Bool
        | RomType::Int
        | RomType::Float
        | RomType::String
        | RomType::Enum(_)
        | RomType::Class(_) => {
            let scalar = unwrap_value(value).unwrap_or(value);
            if scalar.is_null() {
                return Ok(RomValue::Null);
            }
            scalar_from(scalar, target, schema, resolver)
        }
        RomType::List(inner) => {
            let items = match value {
                Value::Array(items) => items,
                other => match unwrap_value(other) {
                    Some(Value::Array(items)) => items,
                    Some(Value::Null) => return Ok(RomValue::Null),
                    _ => return Err(FlattenError::mismatch(value, target)),
                },
            };
            items
                .iter()
                .map(|item| unflatten(item, inner, schema, resolver))
                .collect::<Result<Vec<_>, _>>()
                .map(RomValue::List)
        }
        RomType::Record(name) => {
            let fields = schema
                .record_fields(name)
                .ok_or_else(|| FlattenError::UnknownType { name: name.clone() })?;
            let Value::Object(obj) = value else {
                return Err(FlattenError::mismatch(value, target));
            };
            if matches_shape(obj, fields) {
                return record_from(obj, name, fields, schema, resolver);
            }
            match obj.get(PARAM_VALUE) {
                Some(Value::Object(inner)) if obj.len() == 1 => {
                    record_from(inner, name, fields, schema, resolver)
                }
                Some(Value::Null) if obj.len() == 1 => Ok(RomValue::Null),
                _ => record_from(obj, name, fields, schema, resolver),
            }
        }
    }
}

/// `{"value": x}` → `x`.
fn unwrap_value(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(obj) if obj.len() == 1 => obj.get(PARAM_VALUE),
        _ => None,
    }
}

fn scalar_from(
    value: &Value,
    target: &RomType,
    schema: &TypeSchema,
    resolver: &dyn ObjectResolver,
) -> Result<RomValue, FlattenError> {
    let mismatch = || FlattenError::mismatch(value, target);
    match target {
        RomType::Bool => value.as_bool().map(RomValue::Bool).ok_or_else(mismatch),
        RomType::Int => value.as_i64().map(RomValue::Int).ok_or_else(mismatch),
        RomType::Float => value.as_f64().map(RomValue::Float).ok_or_else(mismatch),
        RomType::String => value
            .as_str()
            .map(|s| RomValue::String(s.to_owned()))
            .ok_or_else(mismatch),
        RomType::Enum(name) => {
            let variant = value.as_str().ok_or_else(mismatch)?;
            let variants = schema
                .enum_variants(name)
                .ok_or_else(|| FlattenError::UnknownType { name: name.clone() })?;
            if variants.iter().any(|v| v == variant) {
                Ok(RomValue::Enum(variant.to_owned()))
            } else {
                Err(FlattenError::UnknownVariant {
                    enum_name: name.clone(),
                    variant: variant.to_owned(),
                })
            }
        }
        RomType::Class(class) => {
            let reference = ObjectRef::from(value.as_str().ok_or_else(mismatch)?);
            resolver.resolve(&reference, class)?;
            Ok(RomValue::Object(reference))
        }
        RomType::Void | RomType::List(_) | RomType::Record(_) => Err(mismatch()),
    }
}

/// Every key is a declared field and every required field is present.
fn matches_shape(obj: &Map<String, Value>, fields: &[crate::types::FieldSpec]) -> bool {
    obj.keys().all(|k| fields.iter().any(|f| &f.name == k))
        && fields
            .iter()
            .filter(|f| !f.optional)
            .all(|f| obj.contains_key(&f.name))
}

fn record_from(
    obj: &Map<String, Value>,
    name: &str,
    fields: &[crate::types::FieldSpec],
    schema: &TypeSchema,
    resolver: &dyn ObjectResolver,
) -> Result<RomValue, FlattenError> {
    let mut out = BTreeMap::new();
    for field in fields {
        match obj.get(&field.name) {
            Some(raw) => {
                let _ = out.insert(
                    field.name.clone(),
                    unflatten(raw, &field.ty, schema, resolver)?,
                );
            }
            None if field.optional => {}
            None => {
                return Err(FlattenError::MissingField {
                    record: name.to_owned(),
                    field: field.name.clone(),
                });
            }
        }
    }
    if let Some(extra) = obj.keys().find(|k| !fields.iter().any(|f| &f.name == *k)) {
        return Err(FlattenError::ShapeMismatch {
            value: format!("field {extra}"),
            target: name.to_owned(),
        });
    }
    Ok(RomValue::Record(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldSpec;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    struct LiveSet(Vec<(&'static str, &'static str)>);

    impl ObjectResolver for LiveSet {
        fn resolve(&self, object: &ObjectRef, expected: &str) -> Result<(), FlattenError> {
            match self.0.iter().find(|(r, _)| *r == object.as_str()) {
                None => Err(FlattenError::NoSuchObject {
                    object: object.clone(),
                }),
                Some((_, class)) if *class == expected => Ok(()),
                Some((_, class)) => Err(FlattenError::ClassMismatch {
                    object: object.clone(),
                    expected: expected.to_owned(),
                    actual: (*class).to_owned(),
                }),
            }
        }
    }

    fn schema() -> TypeSchema {
        TypeSchema::new()
            .with_enum("State", ["IDLE", "PLAYING"])
            .with_record(
                "Size",
                vec![
                    FieldSpec::required("width", RomType::Int),
                    FieldSpec::required("height", RomType::Int),
                    FieldSpec::optional("label", RomType::String),
                ],
            )
            .with_record("Wrapped", vec![FieldSpec::required("value", RomType::Int)])
            .with_class("Pipeline", None)
    }

    fn un(value: &Value, target: &RomType) -> Result<RomValue, FlattenError> {
        unflatten(value, target, &schema(), &LiveSet(vec![("p1", "Pipeline")]))
    }

    #[test]
    fn null_accepted_for_any_target() {
        for target in [
            RomType::Int,
            RomType::record("Size"),
            RomType::list(RomType::Int),
            RomType::class("Pipeline"),
        ] {
            assert_eq!(un(&Value::Null, &target).unwrap(), RomValue::Null);
        }
    }

    #[test]
    fn scalars_bare_or_wrapped() {
        assert_eq!(un(&json!(5), &RomType::Int).unwrap(), RomValue::Int(5));
        assert_eq!(un(&json!({"value": 5}), &RomType::Int).unwrap(), RomValue::Int(5));
        assert_eq!(
            un(&json!({"value": "PLAYING"}), &RomType::enumeration("State")).unwrap(),
            RomValue::Enum("PLAYING".into())
        );
        assert_eq!(un(&json!(2), &RomType::Float).unwrap(), RomValue::Float(2.0));
    }

    #[test]
    fn scalars_reject_arrays_and_wrong_kinds() {
        assert_matches!(
            un(&json!([1]), &RomType::Int),
            Err(FlattenError::ShapeMismatch { .. })
        );
        assert_matches!(
            un(&json!(1.5), &RomType::Int),
            Err(FlattenError::ShapeMismatch { .. })
        );
        assert_matches!(
            un(&json!("x"), &RomType::Bool),
            Err(FlattenError::ShapeMismatch { .. })
        );
    }

    #[test]
    fn enum_variant_validated() {
        assert_matches!(
            un(&json!("STOPPED"), &RomType::enumeration("State")),
            Err(FlattenError::UnknownVariant { .. })
        );
    }

    #[test]
    fn record_bare_and_wrapped() {
        let bare = un(&json!({"width": 1, "height": 2}), &RomType::record("Size")).unwrap();
        assert_eq!(bare.field("width"), Some(&RomValue::Int(1)));
        assert_eq!(bare.field("label"), None);
        let wrapped = un(
            &json!({"value": {"width": 1, "height": 2, "label": "hd"}}),
            &RomType::record("Size"),
        )
        .unwrap();
        assert_eq!(wrapped.field("label"), Some(&RomValue::String("hd".into())));
    }

    #[test]
    fn record_whose_shape_is_value_not_unwrapped() {
        let v = un(&json!({"value": 9}), &RomType::record("Wrapped")).unwrap();
        assert_eq!(v.field("value"), Some(&RomValue::Int(9)));
    }

    #[test]
    fn record_missing_field() {
        assert_matches!(
            un(&json!({"width": 1}), &RomType::record("Size")),
            Err(FlattenError::MissingField { .. })
        );
        assert_matches!(
            un(&json!({"width": 1, "height": 2, "depth": 3}), &RomType::record("Size")),
            Err(FlattenError::ShapeMismatch { .. })
        );
    }

    #[test]
    fn list_bare_and_wrapped() {
        let target = RomType::list(RomType::Int);
        assert_eq!(
            un(&json!([1, 2]), &target).unwrap(),
            RomValue::List(vec![RomValue::Int(1), RomValue::Int(2)])
        );
        assert_eq!(
            un(&json!({"value": [3]}), &target).unwrap(),
            RomValue::List(vec![RomValue::Int(3)])
        );
        assert_matches!(un(&json!(3), &target), Err(FlattenError::ShapeMismatch { .. }));
    }

    #[test]
    fn object_refs_resolved() {
        let target = RomType::class("Pipeline");
        assert_eq!(
            un(&json!("p1"), &target).unwrap(),
            RomValue::Object(ObjectRef::from("p1"))
        );
        assert_eq!(
            un(&json!({"value": "p1"}), &target).unwrap(),
            RomValue::Object(ObjectRef::from("p1"))
        );
        assert_matches!(
            un(&json!("p2"), &target),
            Err(FlattenError::NoSuchObject { .. })
        );
    }

    #[test]
    fn nested_refs_resolved_inside_lists() {
        let target = RomType::list(RomType::class("Pipeline"));
        assert_matches!(
            un(&json!(["p1", "ghost"]), &target),
            Err(FlattenError::NoSuchObject { object }) if object.as_str() == "ghost"
        );
    }

    #[test]
    fn flatten_shapes() {
        let v = RomValue::record([
            ("state", RomValue::Enum("IDLE".into())),
            ("owner", RomValue::Object(ObjectRef::from("p1"))),
            ("sizes", RomValue::List(vec![RomValue::Float(0.5)])),
        ]);
        assert_eq!(
            flatten(&v).unwrap(),
            json!({"state": "IDLE", "owner": "p1", "sizes": [0.5]})
        );
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        assert_matches!(
            flatten(&RomValue::Float(f64::NAN)),
            Err(FlattenError::NonFinite { value }) if value.is_nan()
        );
        let nested = RomValue::record([(
            "sizes",
            RomValue::List(vec![RomValue::Float(1.0), RomValue::Float(f64::INFINITY)]),
        )]);
        assert_matches!(
            flatten(&nested),
            Err(FlattenError::NonFinite { value }) if value == f64::INFINITY
        );
    }

    // ── Round trip ──────────────────────────────────────────────────

    fn arb_size() -> impl Strategy<Value = RomValue> {
        (any::<i64>(), any::<i64>(), proptest::option::of("[a-z]{0,8}")).prop_map(
            |(w, h, label)| {
                let mut fields = vec![("width", RomValue::Int(w)), ("height", RomValue::Int(h))];
                if let Some(l) = label {
                    fields.push(("label", RomValue::String(l)));
                }
                RomValue::record(fields)
            },
        )
    }

    proptest! {
        #[test]
        fn int_lists_round_trip(items in proptest::collection::vec(any::<i64>(), 0..16)) {
            let v = RomValue::List(items.into_iter().map(RomValue::Int).collect());
            let target = RomType::list(RomType::Int);
            prop_assert_eq!(un(&flatten(&v).unwrap(), &target).unwrap(), v);
        }

        #[test]
        fn finite_floats_round_trip(f in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
            let v = RomValue::Float(f);
            prop_assert_eq!(un(&flatten(&v).unwrap(), &RomType::Float).unwrap(), v);
        }

        #[test]
        fn strings_round_trip(s in ".*") {
            let v = RomValue::String(s);
            prop_assert_eq!(un(&flatten(&v).unwrap(), &RomType::String).unwrap(), v);
        }

        #[test]
        fn records_with_enums_round_trip(
            sizes in proptest::collection::vec(arb_size(), 0..4),
            playing in any::<bool>(),
        ) {
            let schema = schema()
                .with_record("Frame", vec![
                    FieldSpec::required("sizes", RomType::list(RomType::record("Size"))),
                    FieldSpec::required("state", RomType::enumeration("State")),
                    FieldSpec::optional("owner", RomType::class("Pipeline")),
                ]);
            let state = if playing { "PLAYING" } else { "IDLE" };
            let v = RomValue::record([
                ("sizes", RomValue::List(sizes)),
                ("state", RomValue::Enum(state.into())),
                ("owner", RomValue::Object(ObjectRef::from("p1"))),
            ]);
            let back = unflatten(
                &flatten(&v).unwrap(),
                &RomType::record("Frame"),
                &schema,
                &LiveSet(vec![("p1", "Pipeline")]),
            ).unwrap();
            prop_assert_eq!(back, v);
        }
    }
}
