//! Persistent n-dimensional arrays
//!
//! An array named `x` occupies two regions:
//!
//! ```text
//! x-meta   header + bincode(ArrayMeta)        written last, in one put
//! x        header + raw little-endian elements
//! ```
//!
//! The metadata put is the commit point of creation: data without
//! metadata is an interrupted creation and is reclaimed. Element-wise
//! writes run as region-local transactions on `x`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    config::{DEFAULT_ALIGNMENT, META_SUFFIX},
    error::{Result, ShelfError},
    header::{frame, Header, TypeTag, ENCODED_LEN},
    proxy::{Arith, CompoundOp},
    shelf::{Lease, Shelf},
    store::{transact, NamedMemory},
};

use super::{
    check_existing, reclaim_uncommitted,
    dtype::{contiguous_strides, DType, Element, Order},
    Shadow,
};

/// Name of the metadata region of array `name`
pub fn meta_name(name: &str) -> String {
    format!("{}{}", name, META_SUFFIX)
}

/// Layout of a stored array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// Byte strides, one per axis
    pub strides: Vec<usize>,
    pub order: Order,
}

impl ArrayMeta {
    /// Contiguous layout for `shape`
    pub fn contiguous(dtype: DType, shape: &[usize], order: Order) -> Result<Self> {
        let overflow = || ShelfError::invalid_parameter("shape", "Array size overflows usize");
        let strides = contiguous_strides(shape, dtype.itemsize(), order).ok_or_else(overflow)?;
        let meta = Self {
            dtype,
            shape: shape.to_vec(),
            strides,
            order,
        };
        meta.checked_nbytes()?;
        Ok(meta)
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of element data
    pub fn nbytes(&self) -> usize {
        self.len() * self.dtype.itemsize()
    }

    fn checked_nbytes(&self) -> Result<usize> {
        self.shape
            .iter()
            .try_fold(self.dtype.itemsize(), |acc, &extent| acc.checked_mul(extent))
            .ok_or_else(|| ShelfError::invalid_parameter("shape", "Array size overflows usize"))
    }

    /// Whether every element addressed by the strides lies inside the data
    fn strides_in_bounds(&self) -> bool {
        if self.is_empty() {
            return true;
        }
        let last = self
            .shape
            .iter()
            .zip(&self.strides)
            .try_fold(0usize, |acc, (&extent, &stride)| {
                (extent - 1).checked_mul(stride).and_then(|span| acc.checked_add(span))
            });
        matches!(
            last.and_then(|offset| offset.checked_add(self.dtype.itemsize())),
            Some(end) if end <= self.nbytes()
        )
    }

    /// Byte offsets into the element data, in row-major logical order
    pub fn logical_offsets(&self) -> Vec<usize> {
        let total = self.len();
        let mut offsets = Vec::with_capacity(total);
        if total == 0 {
            return offsets;
        }
        let mut index = vec![0usize; self.shape.len()];
        for _ in 0..total {
            offsets.push(index.iter().zip(&self.strides).map(|(i, s)| i * s).sum());
            for axis in (0..index.len()).rev() {
                index[axis] += 1;
                if index[axis] < self.shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        offsets
    }

    /// Byte offset of one element
    pub fn offset_of(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.shape.len() {
            return Err(ShelfError::invalid_parameter(
                "index",
                format!("expected {} indices, got {}", self.shape.len(), index.len()),
            ));
        }
        let mut offset = 0;
        for (axis, (&i, &extent)) in index.iter().zip(&self.shape).enumerate() {
            if i >= extent {
                return Err(ShelfError::invalid_parameter(
                    "index",
                    format!("index {} out of bounds for axis {} with size {}", i, axis, extent),
                ));
            }
            offset += i * self.strides[axis];
        }
        Ok(offset)
    }

    fn encode(&self, tag: TypeTag) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        Ok(frame(tag, &payload))
    }

    fn decode(name: &str, bytes: &[u8]) -> Result<Self> {
        let meta: ArrayMeta = bincode::deserialize(&bytes[ENCODED_LEN..])
            .map_err(|e| ShelfError::corruption(name, format!("array metadata: {}", e)))?;
        if meta.strides.len() != meta.shape.len() {
            return Err(ShelfError::corruption(name, "strides do not match shape"));
        }
        meta.checked_nbytes()
            .map_err(|_| ShelfError::corruption(name, "array size overflows usize"))?;
        if !meta.strides_in_bounds() {
            return Err(ShelfError::corruption(
                name,
                format!("strides {:?} reach outside shape {:?}", meta.strides, meta.shape),
            ));
        }
        Ok(meta)
    }
}

/// A volatile array, used to import values and to export copies
#[derive(Debug, Clone, PartialEq)]
pub struct TransientArray<T: Element> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Element> TransientArray<T> {
    /// Array of `shape` over row-major `data`
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ShelfError::invalid_parameter(
                "data",
                format!("shape {:?} needs {} elements, got {}", shape, expected, data.len()),
            ));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array over `data`
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Same elements under a new shape
    pub fn reshaped(self, shape: Vec<usize>) -> Result<Self> {
        Self::new(shape, self.data)
    }
}

/// Shadow of a persistent array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdArray {
    shape: Vec<usize>,
    dtype: DType,
    order: Order,
}

impl NdArray {
    /// Zero-filled array of `shape` and `dtype`, row-major
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
            order: Order::C,
        }
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Create `name` holding a copy of `source`; fails if `name` exists
    pub fn build_from_copy<T: Element>(
        shelf: &Shelf,
        name: &str,
        source: &TransientArray<T>,
    ) -> Result<ShelvedArray> {
        let meta = ArrayMeta::contiguous(T::DTYPE, source.shape(), Order::C)?;
        create_array(shelf, name, TypeTag::NdArray, meta, Some(&encode_elements(source.data())))
    }
}

impl Shadow for NdArray {
    type Instance = ShelvedArray;

    const TYPE_TAG: TypeTag = TypeTag::NdArray;

    fn make_instance(self, shelf: &Shelf, name: &str) -> Result<ShelvedArray> {
        let meta = ArrayMeta::contiguous(self.dtype, &self.shape, self.order)?;
        make_array(shelf, name, TypeTag::NdArray, meta)
    }

    fn existing_instance(shelf: &Shelf, name: &str) -> Result<Option<ShelvedArray>> {
        existing_array(shelf, name, TypeTag::NdArray)
    }
}

pub(crate) fn encode_elements<T: Element>(values: &[T]) -> Vec<u8> {
    let size = T::DTYPE.itemsize();
    let mut bytes = vec![0u8; values.len() * size];
    for (chunk, &value) in bytes.chunks_exact_mut(size).zip(values) {
        value.write_le(chunk);
    }
    bytes
}

/// Create or bind an array region pair of type `tag`
pub(crate) fn make_array(shelf: &Shelf, name: &str, tag: TypeTag, meta: ArrayMeta) -> Result<ShelvedArray> {
    if check_existing(shelf, name, tag)? {
        if let Some(array) = existing_array(shelf, name, tag)? {
            return Ok(array);
        }
        // Data region without metadata: creation was interrupted.
        log::warn!("erasing {}: array creation never committed", name);
        shelf.store().erase_named_memory(name)?;
    } else {
        reclaim_uncommitted(shelf, name)?;
    }
    create_array(shelf, name, tag, meta, None)
}

/// Create the data region, then commit by writing the metadata region.
///
/// `initial` holds row-major element bytes; `None` leaves the array zeroed.
pub(crate) fn create_array(
    shelf: &Shelf,
    name: &str,
    tag: TypeTag,
    meta: ArrayMeta,
    initial: Option<&[u8]>,
) -> Result<ShelvedArray> {
    let lease = shelf.lease(name)?;
    let store = shelf.store();
    let meta_region = meta_name(name);
    if store.exists(&meta_region)? {
        return Err(ShelfError::region_exists(meta_region));
    }

    let itemsize = meta.dtype.itemsize();
    let alignment = DEFAULT_ALIGNMENT.max(itemsize);
    let mut region = store.create_named_memory(name, ENCODED_LEN + meta.nbytes(), alignment, true)?;

    let offsets = meta.logical_offsets();
    let written = transact(region.as_mut(), |buf| {
        buf[..ENCODED_LEN].copy_from_slice(&Header::encode(tag));
        if let Some(bytes) = initial {
            let data = &mut buf[ENCODED_LEN..];
            for (src, &offset) in bytes.chunks_exact(itemsize).zip(&offsets) {
                data[offset..offset + itemsize].copy_from_slice(src);
            }
        }
        Ok(())
    })
    .and_then(|()| meta.encode(tag))
    .and_then(|image| store.put_named_memory(&meta_region, &image));

    if let Err(err) = written {
        drop(region);
        if let Err(erase_err) = store.erase_named_memory(name) {
            log::warn!("could not erase uncommitted array {}: {}", name, erase_err);
        }
        return Err(err);
    }
    log::debug!(
        "created {} {} shape {:?} dtype {}",
        tag,
        name,
        meta.shape,
        meta.dtype
    );

    Ok(ShelvedArray {
        shelf: shelf.clone(),
        name: name.to_string(),
        tag,
        meta,
        region,
        _lease: lease,
    })
}

/// Bind an array of type `tag`, `None` when `name` holds anything else
pub(crate) fn existing_array(shelf: &Shelf, name: &str, tag: TypeTag) -> Result<Option<ShelvedArray>> {
    let store = shelf.store();
    let Some(meta_bytes) = store.get_named_memory(&meta_name(name))? else {
        return Ok(None);
    };
    if !Header::is_instance_of(&meta_bytes, tag) {
        return Ok(None);
    }
    let meta = ArrayMeta::decode(name, &meta_bytes)?;

    let region = store
        .open_named_memory(name)?
        .ok_or_else(|| ShelfError::corruption(name, "metadata present but data region missing"))?;
    if !Header::is_instance_of(region.as_slice(), tag) {
        return Err(ShelfError::corruption(name, "data region header does not match metadata"));
    }
    if region.len() != ENCODED_LEN + meta.nbytes() {
        return Err(ShelfError::corruption(
            name,
            format!(
                "data region holds {} bytes, metadata describes {}",
                region.len() - ENCODED_LEN.min(region.len()),
                meta.nbytes()
            ),
        ));
    }

    let lease = shelf.lease(name)?;
    Ok(Some(ShelvedArray {
        shelf: shelf.clone(),
        name: name.to_string(),
        tag,
        meta,
        region,
        _lease: lease,
    }))
}

/// A live array bound to its data region
pub struct ShelvedArray {
    shelf: Shelf,
    name: String,
    tag: TypeTag,
    meta: ArrayMeta,
    region: Box<dyn NamedMemory>,
    _lease: Lease,
}

impl ShelvedArray {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.meta.shape
    }

    pub fn dtype(&self) -> DType {
        self.meta.dtype
    }

    /// Byte strides per axis
    pub fn strides(&self) -> &[usize] {
        &self.meta.strides
    }

    pub fn order(&self) -> Order {
        self.meta.order
    }

    pub fn ndim(&self) -> usize {
        self.meta.shape.len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    pub fn nbytes(&self) -> usize {
        self.meta.nbytes()
    }

    pub fn meta(&self) -> &ArrayMeta {
        &self.meta
    }

    pub(crate) fn type_tag(&self) -> TypeTag {
        self.tag
    }

    fn check_dtype<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.meta.dtype {
            return Err(ShelfError::type_mismatch(self.meta.dtype.name(), T::DTYPE.name()));
        }
        Ok(())
    }

    fn data(&self) -> &[u8] {
        &self.region.as_slice()[ENCODED_LEN..]
    }

    /// Elements in row-major logical order
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_dtype::<T>()?;
        let size = self.meta.dtype.itemsize();
        let data = self.data();
        Ok(self
            .meta
            .logical_offsets()
            .into_iter()
            .map(|offset| T::read_le(&data[offset..offset + size]))
            .collect())
    }

    /// Volatile copy with the same shape
    pub fn to_transient<T: Element>(&self) -> Result<TransientArray<T>> {
        TransientArray::new(self.meta.shape.clone(), self.to_vec()?)
    }

    pub fn get<T: Element>(&self, index: &[usize]) -> Result<T> {
        self.check_dtype::<T>()?;
        let offset = self.meta.offset_of(index)?;
        Ok(T::read_le(&self.data()[offset..offset + self.meta.dtype.itemsize()]))
    }

    /// Run `write` over the element bytes in one region transaction
    fn write_elements(&mut self, write: impl FnOnce(&mut [u8]) -> Result<()>) -> Result<()> {
        transact(self.region.as_mut(), |buf| write(&mut buf[ENCODED_LEN..]))
    }

    pub fn fill<T: Element>(&mut self, value: T) -> Result<()> {
        self.check_dtype::<T>()?;
        let size = self.meta.dtype.itemsize();
        self.write_elements(|data| {
            for chunk in data.chunks_exact_mut(size) {
                value.write_le(chunk);
            }
            Ok(())
        })
    }

    pub fn set<T: Element>(&mut self, index: &[usize], value: T) -> Result<()> {
        self.check_dtype::<T>()?;
        let offset = self.meta.offset_of(index)?;
        let size = self.meta.dtype.itemsize();
        self.write_elements(|data| {
            value.write_le(&mut data[offset..offset + size]);
            Ok(())
        })
    }

    /// Overwrite elements `start..start + values.len()` in row-major order
    pub fn assign_slice<T: Element>(&mut self, start: usize, values: &[T]) -> Result<()> {
        self.check_dtype::<T>()?;
        let end = start
            .checked_add(values.len())
            .filter(|&end| end <= self.len())
            .ok_or_else(|| {
                ShelfError::invalid_parameter(
                    "values",
                    format!(
                        "{} elements at {} exceed array of {}",
                        values.len(),
                        start,
                        self.len()
                    ),
                )
            })?;
        let offsets = self.meta.logical_offsets();
        let size = self.meta.dtype.itemsize();
        self.write_elements(|data| {
            for (&value, &offset) in values.iter().zip(&offsets[start..end]) {
                value.write_le(&mut data[offset..offset + size]);
            }
            Ok(())
        })
    }

    /// Apply `f` to every element; any error aborts the whole transaction
    pub fn map_in_place<T: Element>(&mut self, mut f: impl FnMut(T) -> Result<T>) -> Result<()> {
        self.check_dtype::<T>()?;
        let size = self.meta.dtype.itemsize();
        self.write_elements(|data| {
            for chunk in data.chunks_exact_mut(size) {
                f(T::read_le(chunk))?.write_le(chunk);
            }
            Ok(())
        })
    }

    /// `self <op>= operand` element-wise
    pub fn apply<T: Element + Arith>(&mut self, op: CompoundOp, operand: T) -> Result<()> {
        log::debug!("{} {} {} over {} elements", self.name, op, operand, self.len());
        self.map_in_place(|value: T| value.compound(op, operand))
    }

    /// Erase the data and metadata regions and release the name
    pub fn erase(self) -> Result<()> {
        let Self { shelf, name, region, _lease, .. } = self;
        drop(region);
        drop(_lease);
        shelf.erase(&name)
    }
}

impl fmt::Debug for ShelvedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShelvedArray")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("meta", &self.meta)
            .finish()
    }
}

impl fmt::Display for ShelvedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} {} ({:?} order)",
            self.tag, self.meta.shape, self.meta.dtype, self.meta.order
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FaultPoint, NamedMemoryStore, SimStore};
    use std::sync::Arc;

    fn shelf() -> (SimStore, Shelf) {
        let store = SimStore::new();
        let shelf = Shelf::with_store(Arc::new(store.clone())).unwrap();
        (store, shelf)
    }

    #[test]
    fn test_logical_offsets_follow_order() {
        let c = ArrayMeta::contiguous(DType::Int32, &[2, 3], Order::C).unwrap();
        assert_eq!(c.logical_offsets(), vec![0, 4, 8, 12, 16, 20]);

        let f = ArrayMeta::contiguous(DType::Int32, &[2, 3], Order::Fortran).unwrap();
        assert_eq!(f.logical_offsets(), vec![0, 8, 16, 4, 12, 20]);

        let scalar = ArrayMeta::contiguous(DType::Float64, &[], Order::C).unwrap();
        assert_eq!(scalar.logical_offsets(), vec![0]);
    }

    #[test]
    fn test_shape_overflow_rejected() {
        for shape in [&[usize::MAX, 2][..], &[2, usize::MAX, 2], &[usize::MAX, usize::MAX]] {
            assert!(matches!(
                ArrayMeta::contiguous(DType::Float64, shape, Order::C),
                Err(ShelfError::InvalidParameter { .. })
            ));
        }
        let empty = ArrayMeta::contiguous(DType::UInt8, &[0, usize::MAX], Order::Fortran).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_out_of_bounds_strides_are_corruption() {
        let (store, shelf) = shelf();
        drop(NdArray::new([4], DType::Int32).make_instance(&shelf, "a").unwrap());

        let mut meta = ArrayMeta::contiguous(DType::Int32, &[4], Order::C).unwrap();
        meta.strides = vec![1000];
        store
            .put_named_memory("a-meta", &meta.encode(TypeTag::NdArray).unwrap())
            .unwrap();
        assert!(matches!(
            NdArray::existing_instance(&shelf, "a"),
            Err(ShelfError::Corruption { .. })
        ));

        meta.strides = vec![usize::MAX];
        let bytes = meta.encode(TypeTag::NdArray).unwrap();
        assert!(ArrayMeta::decode("a", &bytes).is_err());

        // Overlapping strides stay inside the data and are readable.
        meta.strides = vec![0];
        let bytes = meta.encode(TypeTag::NdArray).unwrap();
        assert_eq!(ArrayMeta::decode("a", &bytes).unwrap().strides, vec![0]);
    }

    #[test]
    fn test_make_instance_is_zeroed() {
        let (store, shelf) = shelf();
        let a = NdArray::new([2, 2], DType::Float64).make_instance(&shelf, "a").unwrap();
        assert_eq!(a.to_vec::<f64>().unwrap(), vec![0.0; 4]);
        assert!(store.exists("a-meta").unwrap());
    }

    #[test]
    fn test_fortran_order_assignment() {
        let (_store, shelf) = shelf();
        let mut a = NdArray::new([2, 3], DType::Int64)
            .with_order(Order::Fortran)
            .make_instance(&shelf, "f")
            .unwrap();
        a.assign_slice(0, &[1i64, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(a.get::<i64>(&[1, 0]).unwrap(), 4);
        assert_eq!(a.strides(), &[8, 16]);
        assert_eq!(a.to_vec::<i64>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_dtype_checked() {
        let (_store, shelf) = shelf();
        let a = NdArray::new([3], DType::Float32).make_instance(&shelf, "a").unwrap();
        assert!(matches!(
            a.to_vec::<f64>(),
            Err(ShelfError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_failed_apply_leaves_array_intact() {
        let (_store, shelf) = shelf();
        let source = TransientArray::from_vec(vec![10i32, 20, 30]);
        let mut a = NdArray::build_from_copy(&shelf, "a", &source).unwrap();

        assert!(a.apply(CompoundOp::Div, 0i32).is_err());
        assert_eq!(a.to_vec::<i32>().unwrap(), vec![10, 20, 30]);

        a.apply(CompoundOp::Mul, 2i32).unwrap();
        assert_eq!(a.to_vec::<i32>().unwrap(), vec![20, 40, 60]);
    }

    #[test]
    fn test_failed_meta_put_leaves_nothing() {
        let (store, shelf) = shelf();
        store.inject_fault(FaultPoint::Put, 1).unwrap();

        assert!(NdArray::new([4], DType::UInt8).make_instance(&shelf, "a").is_err());
        assert!(store.names().unwrap().is_empty());
    }

    #[test]
    fn test_interrupted_creation_is_reclaimed() {
        let (store, shelf) = shelf();
        let mut half = frame(TypeTag::NdArray, &[]);
        half.resize(ENCODED_LEN + 8, 0);
        store.put_named_memory("a", &half).unwrap();

        assert!(NdArray::existing_instance(&shelf, "a").unwrap().is_none());
        let a = NdArray::new([2], DType::Int32).make_instance(&shelf, "a").unwrap();
        assert_eq!(a.to_vec::<i32>().unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_out_of_bounds() {
        let (_store, shelf) = shelf();
        let mut a = NdArray::new([2, 2], DType::Int8).make_instance(&shelf, "a").unwrap();
        assert!(a.get::<i8>(&[2, 0]).is_err());
        assert!(a.get::<i8>(&[0]).is_err());
        assert!(a.assign_slice(3, &[1i8, 2]).is_err());
    }
}
