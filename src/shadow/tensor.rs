//! Persistent tensors: arrays whose regions carry the `Tensor` tag

use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use crate::{
    error::Result,
    header::TypeTag,
    shelf::Shelf,
};

use super::{
    dtype::{DType, Element, Order},
    ndarray::{create_array, encode_elements, existing_array, make_array, ArrayMeta, ShelvedArray, TransientArray},
    Shadow,
};

/// Shadow of a persistent tensor; always row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: DType,
}

impl Tensor {
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
        }
    }

    /// Create `name` holding a copy of `source`
    pub fn build_from_copy<T: Element>(
        shelf: &Shelf,
        name: &str,
        source: &TransientArray<T>,
    ) -> Result<ShelvedTensor> {
        let meta = ArrayMeta::contiguous(T::DTYPE, source.shape(), Order::C)?;
        create_array(shelf, name, TypeTag::Tensor, meta, Some(&encode_elements(source.data())))
            .map(ShelvedTensor)
    }
}

impl Shadow for Tensor {
    type Instance = ShelvedTensor;

    const TYPE_TAG: TypeTag = TypeTag::Tensor;

    fn make_instance(self, shelf: &Shelf, name: &str) -> Result<ShelvedTensor> {
        let meta = ArrayMeta::contiguous(self.dtype, &self.shape, Order::C)?;
        make_array(shelf, name, TypeTag::Tensor, meta).map(ShelvedTensor)
    }

    fn existing_instance(shelf: &Shelf, name: &str) -> Result<Option<ShelvedTensor>> {
        Ok(existing_array(shelf, name, TypeTag::Tensor)?.map(ShelvedTensor))
    }
}

/// A live tensor. Dereferences to the underlying [`ShelvedArray`].
#[derive(Debug)]
pub struct ShelvedTensor(ShelvedArray);

impl ShelvedTensor {
    pub fn as_array(&self) -> &ShelvedArray {
        &self.0
    }

    /// Volatile copy under a new shape with the same element count
    pub fn reshaped<T: Element>(&self, shape: impl Into<Vec<usize>>) -> Result<TransientArray<T>> {
        self.0.to_transient::<T>()?.reshaped(shape.into())
    }

    pub fn erase(self) -> Result<()> {
        self.0.erase()
    }
}

impl Deref for ShelvedTensor {
    type Target = ShelvedArray;

    fn deref(&self) -> &ShelvedArray {
        &self.0
    }
}

impl DerefMut for ShelvedTensor {
    fn deref_mut(&mut self) -> &mut ShelvedArray {
        &mut self.0
    }
}

impl fmt::Display for ShelvedTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShelfError;
    use crate::proxy::CompoundOp;
    use crate::shadow::NdArray;
    use crate::store::SimStore;
    use std::sync::Arc;

    fn shelf() -> Shelf {
        Shelf::with_store(Arc::new(SimStore::new())).unwrap()
    }

    #[test]
    fn test_tensor_is_not_an_ndarray() {
        let shelf = shelf();
        let t = Tensor::new([2, 2], DType::Float32).make_instance(&shelf, "t").unwrap();
        assert_eq!(t.as_array().type_tag(), TypeTag::Tensor);
        drop(t);

        assert!(NdArray::existing_instance(&shelf, "t").unwrap().is_none());
        assert!(matches!(
            NdArray::new([2, 2], DType::Float32).make_instance(&shelf, "t"),
            Err(ShelfError::TypeMismatch { .. })
        ));
        assert!(Tensor::existing_instance(&shelf, "t").unwrap().is_some());
    }

    #[test]
    fn test_reshaped_copy_leaves_tensor_alone() {
        let shelf = shelf();
        let source = TransientArray::new(vec![2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let mut t = Tensor::build_from_copy(&shelf, "t", &source).unwrap();

        let flat = t.reshaped::<f32>([6]).unwrap();
        assert_eq!(flat.shape(), &[6]);
        assert_eq!(t.shape(), &[2, 3]);
        assert!(t.reshaped::<f32>([4]).is_err());

        t.apply(CompoundOp::Add, 0.5f32).unwrap();
        assert_eq!(t.get::<f32>(&[1, 2]).unwrap(), 6.5);
    }
}
