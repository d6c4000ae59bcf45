//! Array and tensor tests over the file-backed store

use pmshelf::{
    CompoundOp, DType, NdArray, Order, Shadow, ShelfConfig, ShelfError, Shelf, Tensor,
    TransientArray,
};
use tempfile::TempDir;

#[cfg(test)]
mod ndarray_tests {
    use super::*;

    fn open(dir: &TempDir) -> Shelf {
        Shelf::open(&ShelfConfig::new("arrays", 32).with_path(dir.path())).unwrap()
    }

    #[test]
    fn ndarray_elementwise_writes_persist() {
        let temp_dir = TempDir::new().unwrap();
        {
            let shelf = open(&temp_dir);
            let mut a = shelf.create("a", NdArray::new([2, 3], DType::Int32)).unwrap();
            a.fill(1i32).unwrap();
            a.set(&[1, 2], 7i32).unwrap();
            a.assign_slice(1, &[5i32, 6]).unwrap();
            a.apply(CompoundOp::Mul, 10i32).unwrap();
        }

        let shelf = open(&temp_dir);
        let a = shelf.bind::<NdArray>("a").unwrap().unwrap();
        assert_eq!(a.to_vec::<i32>().unwrap(), vec![10, 50, 60, 10, 10, 70]);
        assert_eq!(a.strides(), &[12, 4]);
        assert_eq!(a.order(), Order::C);
        assert_eq!(a.nbytes(), 24);
    }

    #[test]
    fn ndarray_fortran_layout_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let shelf = open(&temp_dir);
            let mut a = shelf
                .create("f", NdArray::new([3, 2], DType::Float64).with_order(Order::Fortran))
                .unwrap();
            a.assign_slice(0, &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        }

        let shelf = open(&temp_dir);
        let a = shelf.bind::<NdArray>("f").unwrap().unwrap();
        assert_eq!(a.order(), Order::Fortran);
        assert_eq!(a.strides(), &[8, 24]);
        assert_eq!(a.get::<f64>(&[2, 1]).unwrap(), 6.0);
        assert_eq!(a.to_transient::<f64>().unwrap().shape(), &[3, 2]);
    }

    #[test]
    fn ndarray_existing_shape_wins_over_shadow() {
        let temp_dir = TempDir::new().unwrap();
        let shelf = open(&temp_dir);
        drop(shelf.create("a", NdArray::new([4], DType::UInt8)).unwrap());

        let again = shelf.create("a", NdArray::new([9, 9], DType::UInt8)).unwrap();
        assert_eq!(again.shape(), &[4]);
    }

    #[test]
    fn ndarray_bool_elements() {
        let temp_dir = TempDir::new().unwrap();
        let shelf = open(&temp_dir);
        let source = TransientArray::from_vec(vec![true, false, true]);
        let mut mask = NdArray::build_from_copy(&shelf, "mask", &source).unwrap();
        mask.set(&[1], true).unwrap();
        assert_eq!(mask.to_vec::<bool>().unwrap(), vec![true; 3]);
        assert_eq!(mask.dtype(), DType::Bool);
    }

    #[test]
    fn ndarray_float_bitwise_is_a_type_error() {
        let temp_dir = TempDir::new().unwrap();
        let shelf = open(&temp_dir);
        let mut a = shelf.create("a", NdArray::new([2], DType::Float32)).unwrap();
        a.fill(1.5f32).unwrap();

        assert!(matches!(
            a.apply(CompoundOp::BitOr, 1.0f32),
            Err(ShelfError::TypeMismatch { .. })
        ));
        assert!(matches!(
            a.apply(CompoundOp::Add, 1i32),
            Err(ShelfError::TypeMismatch { .. })
        ));
        assert_eq!(a.to_vec::<f32>().unwrap(), vec![1.5, 1.5]);
    }

    #[test]
    fn tensor_roundtrip_and_reshape() {
        let temp_dir = TempDir::new().unwrap();
        {
            let shelf = open(&temp_dir);
            let source = TransientArray::new(vec![2, 2], vec![1i64, 2, 3, 4]).unwrap();
            let mut t = Tensor::build_from_copy(&shelf, "t", &source).unwrap();
            t.apply(CompoundOp::Pow, 2i64).unwrap();
        }

        let shelf = open(&temp_dir);
        assert!(NdArray::existing_instance(&shelf, "t").unwrap().is_none());
        let t = Tensor::existing_instance(&shelf, "t").unwrap().unwrap();
        let flat = t.reshaped::<i64>([4]).unwrap();
        assert_eq!(flat.into_vec(), vec![1, 4, 9, 16]);
        assert_eq!(t.shape(), &[2, 2]);
    }
}
