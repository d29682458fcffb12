//! Native value model.
//!
//! Object implementations receive and return [`RomValue`]s; the flattener
//! converts them to and from wire JSON. Enums and object references are
//! distinct variants even though both travel as strings.

use std::collections::BTreeMap;

use remora_core::ObjectRef;

/// A value crossing the object boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum RomValue {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integral number.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// Text.
    String(String),
    /// Symbolic enum variant name.
    Enum(String),
    /// Ordered list.
    List(Vec<RomValue>),
    /// Named fields of a structured value.
    Record(BTreeMap<String, RomValue>),
    /// Handle to a remote object.
    Object(ObjectRef),
}

impl RomValue {
    /// Build a record from `(name, value)` pairs.
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, RomValue)>) -> Self {
        Self::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build an enum value.
    pub fn enum_variant(name: impl Into<String>) -> Self {
        Self::Enum(name.into())
    }

    /// Whether this is [`RomValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric payload, widening integers.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Text or enum variant name.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Object handle.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(r) => Some(r),
            _ => None,
        }
    }

    /// List elements.
    pub fn as_list(&self) -> Option<&[RomValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Record fields.
    pub fn as_record(&self) -> Option<&BTreeMap<String, RomValue>> {
        match self {
            Self::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Field of a record.
    pub fn field(&self, name: &str) -> Option<&RomValue> {
        self.as_record()?.get(name)
    }
}

impl From<bool> for RomValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for RomValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for RomValue {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for RomValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for RomValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for RomValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<ObjectRef> for RomValue {
    fn from(r: ObjectRef) -> Self {
        Self::Object(r)
    }
}

impl<T: Into<RomValue>> From<Vec<T>> for RomValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<RomValue>> From<Option<T>> for RomValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_variants() {
        assert_eq!(RomValue::from(true).as_bool(), Some(true));
        assert_eq!(RomValue::from(3).as_i64(), Some(3));
        assert_eq!(RomValue::from(3).as_f64(), Some(3.0));
        assert_eq!(RomValue::enum_variant("PLAYING").as_str(), Some("PLAYING"));
        assert_eq!(RomValue::from("x").as_i64(), None);
        assert!(RomValue::from(None::<i64>).is_null());
    }

    #[test]
    fn record_field_lookup() {
        let rec = RomValue::record([("width", RomValue::Int(640)), ("label", "cam".into())]);
        assert_eq!(rec.field("width"), Some(&RomValue::Int(640)));
        assert_eq!(rec.field("height"), None);
        assert_eq!(RomValue::Null.field("width"), None);
    }

    #[test]
    fn list_from_vec() {
        let v = RomValue::from(vec![1, 2, 3]);
        assert_eq!(v.as_list().map(<[RomValue]>::len), Some(3));
    }
}
