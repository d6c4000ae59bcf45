//! Persistent lists of inline numbers and references to other items
//!
//! The region holds the header followed by `bincode(Vec<ListElement>)`.
//! Every mutation builds the new element vector and replaces the region
//! through the atomic update protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    config::DEFAULT_ALIGNMENT,
    error::{Result, ShelfError},
    header::{frame, Header, TypeTag, ENCODED_LEN},
    shelf::{Lease, Shelf},
    store::{transact, NamedMemory},
    update::atomic_replace,
};

use super::{check_existing, reclaim_uncommitted, Shadow, ShelvedValue};

/// One list element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ListElement {
    /// Name of another item on the same shelf
    Reference(String),
    Float(f64),
    Integer(i64),
}

impl From<f64> for ListElement {
    fn from(value: f64) -> Self {
        ListElement::Float(value)
    }
}

impl From<i64> for ListElement {
    fn from(value: i64) -> Self {
        ListElement::Integer(value)
    }
}

impl fmt::Display for ListElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListElement::Reference(name) => write!(f, "<{}>", name),
            ListElement::Float(v) => write!(f, "{}", v),
            ListElement::Integer(v) => write!(f, "{}", v),
        }
    }
}

fn encode(elements: &[ListElement]) -> Result<Vec<u8>> {
    let payload = bincode::serialize(elements)?;
    Ok(frame(TypeTag::List, &payload))
}

fn decode(name: &str, bytes: &[u8]) -> Result<Vec<ListElement>> {
    let header = Header::decode(bytes)?;
    if header.type_tag != TypeTag::List {
        return Err(ShelfError::type_mismatch(TypeTag::List.name(), header.type_tag.name()));
    }
    bincode::deserialize(&bytes[ENCODED_LEN..])
        .map_err(|e| ShelfError::corruption(name, format!("list payload: {}", e)))
}

/// Shadow of a persistent list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct List {
    elements: Vec<ListElement>,
}

impl List {
    /// An empty list
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_elements(elements: Vec<ListElement>) -> Self {
        Self { elements }
    }

    /// Create `name` holding a copy of `elements`; fails if `name` exists
    pub fn build_from_copy(shelf: &Shelf, name: &str, elements: &[ListElement]) -> Result<ShelvedList> {
        ShelvedList::create(shelf, name, elements.to_vec())
    }
}

impl Shadow for List {
    type Instance = ShelvedList;

    const TYPE_TAG: TypeTag = TypeTag::List;

    fn make_instance(self, shelf: &Shelf, name: &str) -> Result<ShelvedList> {
        if check_existing(shelf, name, TypeTag::List)? {
            return Self::existing_instance(shelf, name)?
                .ok_or_else(|| ShelfError::region_not_found(name));
        }
        reclaim_uncommitted(shelf, name)?;
        ShelvedList::create(shelf, name, self.elements)
    }

    fn existing_instance(shelf: &Shelf, name: &str) -> Result<Option<ShelvedList>> {
        let Some(region) = shelf.store().open_named_memory(name)? else {
            return Ok(None);
        };
        if !Header::is_instance_of(region.as_slice(), TypeTag::List) {
            return Ok(None);
        }
        let lease = shelf.lease(name)?;
        let elements = decode(name, region.as_slice())?;
        Ok(Some(ShelvedList {
            shelf: shelf.clone(),
            name: name.to_string(),
            region: Some(region),
            elements,
            _lease: lease,
        }))
    }
}

/// A live persistent list
pub struct ShelvedList {
    shelf: Shelf,
    name: String,
    region: Option<Box<dyn NamedMemory>>,
    elements: Vec<ListElement>,
    _lease: Lease,
}

impl ShelvedList {
    fn create(shelf: &Shelf, name: &str, elements: Vec<ListElement>) -> Result<Self> {
        for element in &elements {
            check_reference(shelf, element)?;
        }
        let lease = shelf.lease(name)?;
        let image = encode(&elements)?;
        let store = shelf.store();

        let mut region = store.create_named_memory(name, image.len(), DEFAULT_ALIGNMENT, false)?;
        let written = transact(region.as_mut(), |buf| {
            buf.copy_from_slice(&image);
            Ok(())
        });
        if let Err(err) = written {
            drop(region);
            if let Err(erase_err) = store.erase_named_memory(name) {
                log::warn!("could not erase uncommitted list {}: {}", name, erase_err);
            }
            return Err(err);
        }
        log::debug!("created list {} with {} elements", name, elements.len());

        Ok(Self {
            shelf: shelf.clone(),
            name: name.to_string(),
            region: Some(region),
            elements,
            _lease: lease,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ListElement> {
        self.elements.get(index)
    }

    pub fn elements(&self) -> &[ListElement] {
        &self.elements
    }

    pub fn iter(&self) -> impl Iterator<Item = &ListElement> {
        self.elements.iter()
    }

    /// Bind the item a reference element points to
    pub fn resolve(&self, index: usize) -> Result<Option<ShelvedValue>> {
        match self.elements.get(index) {
            Some(ListElement::Reference(target)) => self.shelf.get(target),
            _ => Ok(None),
        }
    }

    /// Replace every element in one crash-consistent step
    pub fn atomic_update(&mut self, elements: Vec<ListElement>) -> Result<()> {
        for element in &elements {
            check_reference(&self.shelf, element)?;
        }
        let image = encode(&elements)?;
        let replaced = atomic_replace(self.shelf.store().as_ref(), &self.name, &mut self.region, &image);
        match replaced {
            Ok(()) => {
                self.elements = elements;
                Ok(())
            }
            Err(err) => {
                if let Some(region) = self.region.as_ref() {
                    match decode(&self.name, region.as_slice()) {
                        Ok(current) => self.elements = current,
                        Err(e) => log::warn!("could not re-read {} after failed update: {}", self.name, e),
                    }
                }
                Err(err)
            }
        }
    }

    pub fn append(&mut self, element: impl Into<ListElement>) -> Result<()> {
        let mut next = self.elements.clone();
        next.push(element.into());
        self.atomic_update(next)
    }

    /// Append a reference to another item on the shelf
    pub fn append_reference(&mut self, target: &str) -> Result<()> {
        self.append(ListElement::Reference(target.to_string()))
    }

    pub fn set(&mut self, index: usize, element: impl Into<ListElement>) -> Result<()> {
        let mut next = self.elements.clone();
        let slot = next.get_mut(index).ok_or_else(|| out_of_range(index, self.elements.len()))?;
        *slot = element.into();
        self.atomic_update(next)
    }

    pub fn remove(&mut self, index: usize) -> Result<ListElement> {
        if index >= self.elements.len() {
            return Err(out_of_range(index, self.elements.len()));
        }
        let mut next = self.elements.clone();
        let removed = next.remove(index);
        self.atomic_update(next)?;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.atomic_update(Vec::new())
    }

    /// Erase the bound region and release the name
    pub fn erase(self) -> Result<()> {
        let Self { shelf, name, region, _lease, .. } = self;
        drop(region);
        drop(_lease);
        shelf.erase(&name)
    }
}

fn out_of_range(index: usize, len: usize) -> ShelfError {
    ShelfError::invalid_parameter("index", format!("index {} out of range for list of {}", index, len))
}

fn check_reference(shelf: &Shelf, element: &ListElement) -> Result<()> {
    match element {
        ListElement::Reference(target) if !shelf.contains(target)? => {
            Err(ShelfError::region_not_found(target))
        }
        _ => Ok(()),
    }
}

impl fmt::Debug for ShelvedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShelvedList")
            .field("name", &self.name)
            .field("elements", &self.elements)
            .finish()
    }
}

impl fmt::Display for ShelvedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", element)?;
        }
        f.write_str("]")
    }
}
