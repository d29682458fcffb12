//! Declared types.
//!
//! A [`TypeSchema`] names every enum, record and class that may cross the
//! wire. Both sides build one: the server from its class registry, the
//! client from the types it expects back.

use std::collections::HashMap;
use std::fmt;

use crate::errors::RomError;

/// Expected shape of a value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RomType {
    /// No value (operation returns nothing).
    Void,
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// Floating-point (accepts integers).
    Float,
    /// Text.
    String,
    /// Declared enum.
    Enum(String),
    /// Declared record.
    Record(String),
    /// List of the inner type.
    List(Box<RomType>),
    /// Reference to an object of the class or a subclass.
    Class(String),
}

impl RomType {
    /// `List<inner>`.
    pub fn list(inner: RomType) -> Self {
        Self::List(Box::new(inner))
    }

    /// Reference to an object of `name`.
    pub fn class(name: impl Into<String>) -> Self {
        Self::Class(name.into())
    }

    /// Declared enum `name`.
    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::Enum(name.into())
    }

    /// Declared record `name`.
    pub fn record(name: impl Into<String>) -> Self {
        Self::Record(name.into())
    }
}

impl fmt::Display for RomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Bool => f.write_str("boolean"),
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::String => f.write_str("String"),
            Self::Enum(n) | Self::Record(n) | Self::Class(n) => f.write_str(n),
            Self::List(inner) => write!(f, "List<{inner}>"),
        }
    }
}

/// One field of a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    /// Wire key.
    pub name: String,
    /// Field type.
    pub ty: RomType,
    /// Whether the key may be absent.
    pub optional: bool,
}

impl FieldSpec {
    /// A field that must be present.
    pub fn required(name: impl Into<String>, ty: RomType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
        }
    }

    /// A field that may be absent.
    pub fn optional(name: impl Into<String>, ty: RomType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: true,
        }
    }
}

/// Named enums, records and the class hierarchy.
#[derive(Clone, Debug, Default)]
pub struct TypeSchema {
    enums: HashMap<String, Vec<String>>,
    records: HashMap<String, Vec<FieldSpec>>,
    classes: HashMap<String, Option<String>>,
}

impl TypeSchema {
    /// Empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an enum with its variants.
    #[must_use]
    pub fn with_enum<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        variants: impl IntoIterator<Item = S>,
    ) -> Self {
        let _ = self
            .enums
            .insert(name.into(), variants.into_iter().map(Into::into).collect());
        self
    }

    /// Declare a record with its fields.
    #[must_use]
    pub fn with_record(mut self, name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        let _ = self.records.insert(name.into(), fields);
        self
    }

    /// Declare a class and its parent.
    #[must_use]
    pub fn with_class(mut self, name: impl Into<String>, parent: Option<&str>) -> Self {
        self.add_class(name, parent);
        self
    }

    pub(crate) fn add_class(&mut self, name: impl Into<String>, parent: Option<&str>) {
        let _ = self.classes.insert(name.into(), parent.map(str::to_owned));
    }

    /// Variants of a declared enum.
    pub fn enum_variants(&self, name: &str) -> Option<&[String]> {
        self.enums.get(name).map(Vec::as_slice)
    }

    /// Fields of a declared record.
    pub fn record_fields(&self, name: &str) -> Option<&[FieldSpec]> {
        self.records.get(name).map(Vec::as_slice)
    }

    /// Whether `name` is a declared class.
    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Parent of a declared class.
    pub fn parent_of(&self, name: &str) -> Option<&str> {
        self.classes.get(name)?.as_deref()
    }

    /// Whether an object of class `class` may stand where `expected` is declared.
    pub fn is_assignable(&self, class: &str, expected: &str) -> bool {
        let mut current = Some(class);
        let mut hops = 0;
        while let Some(name) = current {
            if name == expected {
                return true;
            }
            hops += 1;
            if hops > self.classes.len() {
                return false;
            }
            current = self.parent_of(name);
        }
        false
    }

    /// Ensure every name a type mentions is declared.
    pub fn check_type(&self, ty: &RomType) -> Result<(), RomError> {
        match ty {
            RomType::Void | RomType::Bool | RomType::Int | RomType::Float | RomType::String => {
                Ok(())
            }
            RomType::Enum(n) if self.enums.contains_key(n) => Ok(()),
            RomType::Record(n) if self.records.contains_key(n) => Ok(()),
            RomType::Class(n) if self.classes.contains_key(n) => Ok(()),
            RomType::List(inner) => self.check_type(inner),
            RomType::Enum(n) | RomType::Record(n) | RomType::Class(n) => Err(RomError::Schema {
                message: format!("undeclared type {n}"),
            }),
        }
    }

    /// Validate internal consistency: record fields and class parents resolve,
    /// and the class hierarchy has no cycles.
    pub fn validate(&self) -> Result<(), RomError> {
        for (record, fields) in &self.records {
            for field in fields {
                self.check_type(&field.ty).map_err(|_| RomError::Schema {
                    message: format!(
                        "record {record} field {} has undeclared type {}",
                        field.name, field.ty
                    ),
                })?;
            }
        }
        for (class, parent) in &self.classes {
            if let Some(parent) = parent {
                if !self.classes.contains_key(parent) {
                    return Err(RomError::Schema {
                        message: format!("class {class} extends undeclared class {parent}"),
                    });
                }
            }
            let mut seen = vec![class.as_str()];
            let mut current = self.parent_of(class);
            while let Some(name) = current {
                if seen.contains(&name) {
                    return Err(RomError::Schema {
                        message: format!("class hierarchy of {class} is cyclic"),
                    });
                }
                seen.push(name);
                current = self.parent_of(name);
            }
        }
        Ok(())
    }
}
