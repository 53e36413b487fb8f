use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde_json::Value;

use crate::RemoteRef;

/// Coarse classification of a remote value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeTag {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Function,
    Array,
}

impl TypeTag {
    fn from_wire(raw: &str) -> TypeTag {
        match raw {
            "undefined" => TypeTag::Undefined,
            "null" => TypeTag::Null,
            "boolean" => TypeTag::Boolean,
            "number" => TypeTag::Number,
            "string" => TypeTag::String,
            "function" => TypeTag::Function,
            "array" => TypeTag::Array,
            _ => TypeTag::Object,
        }
    }

    pub fn has_properties(self) -> bool {
        matches!(self, TypeTag::Object | TypeTag::Function | TypeTag::Array)
    }
}

/// Primitive payload carried inline in a value descriptor.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    fn from_wire(value: &Value) -> Option<Scalar> {
        match value {
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Scalar::Number),
            Value::String(s) => Some(Scalar::Text(s.clone())),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Scalar::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }
}

/// One named member of a [`PropertySet`].
#[derive(Clone)]
pub struct Property {
    pub name: String,
    pub value: Arc<ValueMirror>,
}

struct ArrayView {
    length: i64,
    // property name parsed as a non-negative integer -> index into `properties`
    indexes: BTreeMap<u64, usize>,
}

/// The fetched members of one remote object, immutable once built.
///
/// Carries the epoch the fetch was issued under; staleness is judged against
/// the owning cache's current epoch, never by wall-clock age.
pub struct PropertySet {
    epoch: u64,
    properties: Vec<Property>,
    array_view: OnceLock<ArrayView>,
}

impl PropertySet {
    pub fn new(epoch: u64, properties: Vec<Property>) -> Self {
        Self {
            epoch,
            properties,
            array_view: OnceLock::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Array length per the `length` property, `-1` when absent.
    pub fn array_length(&self) -> i64 {
        self.array_view().length
    }

    /// The property whose name is the decimal rendering of `index`.
    pub fn indexed(&self, index: u64) -> Option<&Property> {
        self.array_view()
            .indexes
            .get(&index)
            .map(|&slot| &self.properties[slot])
    }

    // The indexed view is derived on first use; most property sets are never
    // treated as arrays.
    fn array_view(&self) -> &ArrayView {
        self.array_view.get_or_init(|| {
            let length = self
                .get("length")
                .and_then(|p| p.value.scalar())
                .and_then(Scalar::as_integer)
                .unwrap_or(-1);
            let indexes = self
                .properties
                .iter()
                .enumerate()
                .filter_map(|(slot, p)| p.name.parse::<u64>().ok().map(|i| (i, slot)))
                .collect();
            ArrayView { length, indexes }
        })
    }
}

/// Immutable snapshot of one remote value.
///
/// Mirrors never mutate in place: refreshing or completing a value produces a
/// new mirror, and [`ValueMirror::merged`] keeps the most complete data when
/// two mirrors of the same ref meet.
pub struct ValueMirror {
    remote_ref: Option<RemoteRef>,
    type_tag: TypeTag,
    class_name: Option<String>,
    scalar: Option<Scalar>,
    properties: Option<Arc<PropertySet>>,
    epoch: u64,
}

impl ValueMirror {
    /// Decode a canonical value descriptor, tagging the mirror with the epoch
    /// its fetch was issued under.
    pub(crate) fn parse(descriptor: &Value, epoch: u64) -> Result<ValueMirror, String> {
        let obj = descriptor
            .as_object()
            .ok_or_else(|| format!("value descriptor is not an object: {descriptor}"))?;
        let type_tag = obj
            .get("type")
            .and_then(Value::as_str)
            .map(TypeTag::from_wire)
            .ok_or_else(|| "value descriptor without a type".to_string())?;
        let remote_ref = obj
            .get("ref")
            .and_then(Value::as_str)
            .map(RemoteRef::new);
        let class_name = obj
            .get("className")
            .and_then(Value::as_str)
            .map(str::to_string);
        let scalar = obj.get("value").and_then(Scalar::from_wire);
        Ok(ValueMirror {
            remote_ref,
            type_tag,
            class_name,
            scalar,
            properties: None,
            epoch,
        })
    }

    /// Placeholder for an object known only by ref, e.g. a scope object named
    /// in a pause payload before anything about it has been fetched.
    pub(crate) fn object_stub(remote_ref: RemoteRef, epoch: u64) -> ValueMirror {
        ValueMirror {
            remote_ref: Some(remote_ref),
            type_tag: TypeTag::Object,
            class_name: None,
            scalar: None,
            properties: None,
            epoch,
        }
    }

    pub(crate) fn with_properties(&self, properties: Arc<PropertySet>) -> ValueMirror {
        ValueMirror {
            remote_ref: self.remote_ref.clone(),
            type_tag: self.type_tag,
            class_name: self.class_name.clone(),
            scalar: self.scalar.clone(),
            properties: Some(properties),
            epoch: self.epoch,
        }
    }

    pub fn remote_ref(&self) -> Option<&RemoteRef> {
        self.remote_ref.as_ref()
    }

    pub fn type_tag(&self) -> TypeTag {
        self.type_tag
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn scalar(&self) -> Option<&Scalar> {
        self.scalar.as_ref()
    }

    pub fn properties(&self) -> Option<&Arc<PropertySet>> {
        self.properties.as_ref()
    }

    /// Epoch this mirror's data was fetched under.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_fresh(&self, current_epoch: u64) -> bool {
        self.epoch == current_epoch
    }

    // Rough ordering of how much this mirror knows; used when two mirrors of
    // the same ref collide in the cache.
    fn completeness(&self) -> u8 {
        let mut rank = 0;
        if self.scalar.is_some() || self.class_name.is_some() {
            rank += 1;
        }
        if self.properties.is_some() {
            rank += 2;
        }
        rank
    }

    /// Combine two mirrors of the same ref, keeping the most complete data.
    ///
    /// The more complete side wins field-by-field; its gaps are filled from
    /// the other. The result carries the winning side's epoch, so stale but
    /// complete data never masquerades as fresh.
    pub fn merged(a: &Arc<ValueMirror>, b: &Arc<ValueMirror>) -> Arc<ValueMirror> {
        let (base, other) = if b.completeness() > a.completeness()
            || (b.completeness() == a.completeness() && b.epoch >= a.epoch)
        {
            (b, a)
        } else {
            (a, b)
        };
        Arc::new(ValueMirror {
            remote_ref: base.remote_ref.clone().or_else(|| other.remote_ref.clone()),
            type_tag: base.type_tag,
            class_name: base
                .class_name
                .clone()
                .or_else(|| other.class_name.clone()),
            scalar: base.scalar.clone().or_else(|| other.scalar.clone()),
            properties: base
                .properties
                .clone()
                .or_else(|| other.properties.clone()),
            epoch: base.epoch,
        })
    }
}
