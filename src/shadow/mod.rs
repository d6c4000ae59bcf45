//! Shadows and shelved instances
//!
//! A shadow describes a value that does not exist yet; consuming it with
//! [`Shadow::make_instance`] yields an instance bound to one named
//! region. [`Shadow::existing_instance`] probes a name and binds only
//! when the stored header carries the shadow's type tag.

pub mod dtype;
pub mod list;
pub mod ndarray;
pub mod number;
pub mod tensor;

use std::fmt;

use crate::{
    error::{Result, ShelfError},
    header::{Header, TypeTag},
    shelf::Shelf,
};

pub use dtype::{DType, Element, Order};
pub use list::{List, ListElement, ShelvedList};
pub use ndarray::{ArrayMeta, NdArray, ShelvedArray, TransientArray};
pub use number::{FloatNumber, IntegerNumber, NumberShadow, ScalarNumber, ShelvedNumber};
pub use tensor::{ShelvedTensor, Tensor};

/// Unrealized description of a shelved value
pub trait Shadow: Sized {
    /// Live handle produced from this shadow
    type Instance;

    /// Tag written into the header of every region of this type
    const TYPE_TAG: TypeTag;

    /// Create `name` from this description.
    ///
    /// An existing region of the same type is bound instead; one of a
    /// different type is a [`ShelfError::TypeMismatch`].
    fn make_instance(self, shelf: &Shelf, name: &str) -> Result<Self::Instance>;

    /// Bind `name` if it holds a value of this type, `None` otherwise
    fn existing_instance(shelf: &Shelf, name: &str) -> Result<Option<Self::Instance>>;
}

/// Tag stored in the header of `name`, `None` when absent or foreign
pub fn probe_tag(shelf: &Shelf, name: &str) -> Result<Option<TypeTag>> {
    Ok(shelf
        .store()
        .open_named_memory(name)?
        .and_then(|region| Header::probe(region.as_slice())))
}

/// Resolve the tag of an existing `name` against the tag a shadow creates
pub(crate) fn check_existing(shelf: &Shelf, name: &str, expected: TypeTag) -> Result<bool> {
    match probe_tag(shelf, name)? {
        None => Ok(false),
        Some(tag) if tag == expected => Ok(true),
        Some(tag) => Err(ShelfError::type_mismatch(expected.name(), tag.name())),
    }
}

/// Whether `bytes` belong to a region whose creation never committed.
///
/// Creation sizes a zeroed region and only the first committed
/// transaction writes the header, so such a region is all zeros.
pub(crate) fn is_uncommitted(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

/// Erase `name` if it is left over from an interrupted creation
pub(crate) fn reclaim_uncommitted(shelf: &Shelf, name: &str) -> Result<bool> {
    let Some(region) = shelf.store().open_named_memory(name)? else {
        return Ok(false);
    };
    if !is_uncommitted(region.as_slice()) {
        return Ok(false);
    }
    drop(region);
    log::warn!("erasing {}: creation never committed", name);
    shelf.store().erase_named_memory(name)?;
    Ok(true)
}

/// A whole value for [`ShelvedValue::atomic_update`]
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Integer(i64),
    List(Vec<ListElement>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Float(_) => TypeTag::FloatNumber.name(),
            Value::Integer(_) => TypeTag::IntegerNumber.name(),
            Value::List(_) => TypeTag::List.name(),
        }
    }
}

/// Any shelved instance, as found by probing a name
#[derive(Debug)]
pub enum ShelvedValue {
    Float(ShelvedNumber<f64>),
    Integer(ShelvedNumber<i64>),
    Array(ShelvedArray),
    Tensor(ShelvedTensor),
    List(ShelvedList),
}

impl ShelvedValue {
    /// Probe `name` against every known type in [`TypeTag::PROBE_ORDER`]
    pub fn resolve(shelf: &Shelf, name: &str) -> Result<Option<ShelvedValue>> {
        for tag in TypeTag::PROBE_ORDER {
            let found = match tag {
                TypeTag::FloatNumber => {
                    FloatNumber::existing_instance(shelf, name)?.map(ShelvedValue::Float)
                }
                TypeTag::IntegerNumber => {
                    IntegerNumber::existing_instance(shelf, name)?.map(ShelvedValue::Integer)
                }
                TypeTag::Tensor => Tensor::existing_instance(shelf, name)?.map(ShelvedValue::Tensor),
                TypeTag::NdArray => NdArray::existing_instance(shelf, name)?.map(ShelvedValue::Array),
                TypeTag::List => List::existing_instance(shelf, name)?.map(ShelvedValue::List),
            };
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Type tag of the bound region
    pub fn type_tag(&self) -> TypeTag {
        match self {
            ShelvedValue::Float(_) => TypeTag::FloatNumber,
            ShelvedValue::Integer(_) => TypeTag::IntegerNumber,
            ShelvedValue::Array(_) => TypeTag::NdArray,
            ShelvedValue::Tensor(_) => TypeTag::Tensor,
            ShelvedValue::List(_) => TypeTag::List,
        }
    }

    /// Name of the bound region
    pub fn name(&self) -> &str {
        match self {
            ShelvedValue::Float(v) => v.name(),
            ShelvedValue::Integer(v) => v.name(),
            ShelvedValue::Array(v) => v.name(),
            ShelvedValue::Tensor(v) => v.name(),
            ShelvedValue::List(v) => v.name(),
        }
    }

    /// Replace the whole value through the atomic update protocol.
    ///
    /// A value of another logical type is rejected before the store is
    /// touched. Arrays and tensors are updated element-wise instead.
    pub fn atomic_update(&mut self, value: Value) -> Result<()> {
        match (self, value) {
            (ShelvedValue::Float(v), Value::Float(x)) => v.atomic_update(x).map(|_| ()),
            (ShelvedValue::Integer(v), Value::Integer(x)) => v.atomic_update(x).map(|_| ()),
            (ShelvedValue::List(v), Value::List(x)) => v.atomic_update(x),
            (this, value) => Err(ShelfError::type_mismatch(this.type_tag().name(), value.kind())),
        }
    }

    /// Erase the bound regions
    pub fn erase(self) -> Result<()> {
        match self {
            ShelvedValue::Float(v) => v.erase(),
            ShelvedValue::Integer(v) => v.erase(),
            ShelvedValue::Array(v) => v.erase(),
            ShelvedValue::Tensor(v) => v.erase(),
            ShelvedValue::List(v) => v.erase(),
        }
    }

    pub fn as_float(&self) -> Option<&ShelvedNumber<f64>> {
        match self {
            ShelvedValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<&ShelvedNumber<i64>> {
        match self {
            ShelvedValue::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ShelvedArray> {
        match self {
            ShelvedValue::Array(v) => Some(v),
            ShelvedValue::Tensor(v) => Some(v.as_array()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ShelvedList> {
        match self {
            ShelvedValue::List(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ShelvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShelvedValue::Float(v) => write!(f, "{}", v),
            ShelvedValue::Integer(v) => write!(f, "{}", v),
            ShelvedValue::Array(v) => write!(f, "{}", v),
            ShelvedValue::Tensor(v) => write!(f, "{}", v),
            ShelvedValue::List(v) => write!(f, "{}", v),
        }
    }
}

/// A transient value that can be copied onto a shelf
pub trait Transient {
    /// Create `name` holding a copy of this value
    fn build_from_copy(&self, shelf: &Shelf, name: &str) -> Result<ShelvedValue>;
}

impl Transient for f64 {
    fn build_from_copy(&self, shelf: &Shelf, name: &str) -> Result<ShelvedValue> {
        FloatNumber::build_from_copy(shelf, name, *self).map(ShelvedValue::Float)
    }
}

impl Transient for i64 {
    fn build_from_copy(&self, shelf: &Shelf, name: &str) -> Result<ShelvedValue> {
        IntegerNumber::build_from_copy(shelf, name, *self).map(ShelvedValue::Integer)
    }
}

impl<T: Element> Transient for TransientArray<T> {
    fn build_from_copy(&self, shelf: &Shelf, name: &str) -> Result<ShelvedValue> {
        NdArray::build_from_copy(shelf, name, self).map(ShelvedValue::Array)
    }
}

impl Transient for Vec<ListElement> {
    fn build_from_copy(&self, shelf: &Shelf, name: &str) -> Result<ShelvedValue> {
        List::build_from_copy(shelf, name, self).map(ShelvedValue::List)
    }
}
