//! Atomic update protocol tests
//! Every compound operator reaches the protocol, readers only ever see
//! complete values, and read operators never touch the persisted bytes

use std::sync::Arc;

use pmshelf::{
    header::{Header, ENCODED_LEN},
    shadow::ScalarNumber,
    update::atomic_replace_observed,
    CompoundOp, FloatNumber, IntegerNumber, NamedMemoryStore, Shadow, ShelfError, Shelf, SimStore,
    TypeTag, UpdateStep,
};

#[cfg(test)]
mod atomic_update_tests {
    use super::*;

    fn sim_shelf() -> (SimStore, Shelf) {
        let store = SimStore::new();
        let shelf = Shelf::with_store(Arc::new(store.clone())).unwrap();
        (store, shelf)
    }

    fn stored<N: ScalarNumber>(store: &SimStore, name: &str) -> N {
        let bytes = store.get_named_memory(name).unwrap().unwrap();
        assert!(Header::is_instance_of(&bytes, N::TYPE_TAG));
        N::decode_payload(&bytes[ENCODED_LEN..]).unwrap()
    }

    #[test]
    fn every_integer_operator_goes_through_the_protocol() {
        let cases = [
            (CompoundOp::Add, 12, 5, 17),
            (CompoundOp::Sub, 12, 5, 7),
            (CompoundOp::Mul, 12, 5, 60),
            (CompoundOp::Div, -12, 5, -3),
            (CompoundOp::Rem, -12, 5, 3),
            (CompoundOp::Pow, 3, 4, 81),
            (CompoundOp::Shl, 3, 4, 48),
            (CompoundOp::Shr, 48, 4, 3),
            (CompoundOp::BitAnd, 0b1100, 0b1010, 0b1000),
            (CompoundOp::BitXor, 0b1100, 0b1010, 0b0110),
            (CompoundOp::BitOr, 0b1100, 0b1010, 0b1110),
        ];
        assert_eq!(cases.len(), CompoundOp::ALL.len());

        for (op, start, operand, expected) in cases {
            let (store, shelf) = sim_shelf();
            let mut n = shelf.create("n", IntegerNumber::new(start)).unwrap();
            let before = store.stats().unwrap();

            n.apply(op, operand).unwrap();

            let after = store.stats().unwrap();
            assert_eq!(after.swaps, before.swaps + 1, "{} did not swap", op);
            assert_eq!(n.read(), expected, "{}", op);
            assert_eq!(stored::<i64>(&store, "n"), expected, "{}", op);
            assert!(!store.exists("n-tmp").unwrap(), "{} left a side region", op);
        }
    }

    #[test]
    fn every_float_operator_goes_through_the_protocol() {
        let cases = [
            (CompoundOp::Add, 7.5, 2.0, 9.5),
            (CompoundOp::Sub, 7.5, 2.0, 5.5),
            (CompoundOp::Mul, 7.5, 2.0, 15.0),
            (CompoundOp::Div, 7.5, 2.0, 3.75),
            (CompoundOp::Rem, -7.5, 2.0, 0.5),
            (CompoundOp::Pow, 1.5, 2.0, 2.25),
        ];

        for (op, start, operand, expected) in cases {
            let (store, shelf) = sim_shelf();
            let mut x = shelf.create("x", FloatNumber::new(start)).unwrap();

            x.apply(op, operand).unwrap();

            assert_eq!(store.stats().unwrap().swaps, 1, "{}", op);
            assert_eq!(stored::<f64>(&store, "x"), expected, "{}", op);
            assert!(!store.exists("x-tmp").unwrap());
        }
    }

    #[test]
    fn bitwise_operators_on_floats_do_not_touch_the_store() {
        let (store, shelf) = sim_shelf();
        let mut x = shelf.create("x", FloatNumber::new(1.0)).unwrap();
        let before = store.stats().unwrap();

        for op in CompoundOp::ALL.into_iter().filter(CompoundOp::is_bitwise) {
            assert!(x.apply(op, 1.0).is_err(), "{}", op);
        }
        assert_eq!(store.stats().unwrap(), before);
        assert_eq!(stored::<f64>(&store, "x"), 1.0);
    }

    #[test]
    fn arithmetic_errors_do_not_touch_the_store() {
        let (store, shelf) = sim_shelf();
        let mut n = shelf.create("n", IntegerNumber::new(i64::MAX)).unwrap();
        let before = store.stats().unwrap();

        assert!(n.try_add_assign(1).is_err());
        assert!(n.try_div_assign(0).is_err());
        assert!(n.try_shl_assign(64).is_err());
        assert_eq!(store.stats().unwrap(), before);
        assert_eq!(n.read(), i64::MAX);
    }

    #[test]
    fn read_operators_leave_bytes_unchanged() {
        let (store, shelf) = sim_shelf();
        let x = shelf.create("x", FloatNumber::new(6.0)).unwrap();
        let raw_before = store.get_named_memory("x").unwrap().unwrap();

        for _ in 0..3 {
            assert_eq!((&x + 1.0).unwrap(), 7.0);
            assert_eq!((&x - 1.0).unwrap(), 5.0);
            assert_eq!((&x * 2.0).unwrap(), 12.0);
            assert_eq!((&x / 4.0).unwrap(), 1.5);
            assert_eq!((&x % 4.0).unwrap(), 2.0);
            assert_eq!((-&x).unwrap(), -6.0);
            assert_eq!((1.0 + &x).unwrap(), 7.0);
            assert_eq!((12.0 / &x).unwrap(), 2.0);
            assert!(x > 5.0);
            assert!(x == 6.0);
            assert_eq!(x.floor_div(4.0).unwrap(), 1.0);
            assert_eq!(x.pow(2.0).unwrap(), 36.0);
            assert!(x.to_bool());
        }

        assert_eq!(store.get_named_memory("x").unwrap().unwrap(), raw_before);
        assert_eq!(x.persisted_bytes(), raw_before.as_slice());
        assert_eq!(store.stats().unwrap().swaps, 0);
    }

    #[test]
    fn read_operators_match_compound_operators() {
        let (_store, shelf) = sim_shelf();
        for (start, operand) in [(-7i64, 3i64), (7, -3), (-7, 2), (-7, -2)] {
            for op in [CompoundOp::Div, CompoundOp::Rem] {
                let mut n = shelf.create("n", IntegerNumber::new(start)).unwrap();
                let read = match op {
                    CompoundOp::Div => &n / operand,
                    _ => &n % operand,
                }
                .unwrap();
                n.apply(op, operand).unwrap();
                assert_eq!(read, n.read(), "{} {} {}", start, op, operand);
                n.erase().unwrap();
            }
        }

        let mut x = shelf.create("x", FloatNumber::new(-7.5)).unwrap();
        let read = (&x % 2.0).unwrap();
        x.try_rem_assign(2.0).unwrap();
        assert_eq!(read, 0.5);
        assert_eq!(x.read(), read);
    }

    #[test]
    fn read_operators_report_arithmetic_errors() {
        let (store, shelf) = sim_shelf();
        let n = shelf.create("n", IntegerNumber::new(7)).unwrap();
        let min = shelf.create("min", IntegerNumber::new(i64::MIN)).unwrap();
        let max = shelf.create("max", IntegerNumber::new(i64::MAX)).unwrap();
        let zero = IntegerNumber::new(0).make_instance(&shelf, "zero").unwrap();

        assert_eq!((&n / -2).unwrap(), -4);
        assert!(matches!(&n / 0, Err(ShelfError::Arithmetic { .. })));
        assert!(matches!(&n % 0, Err(ShelfError::Arithmetic { .. })));
        assert!(matches!(1i64 / &zero, Err(ShelfError::Arithmetic { .. })));
        assert!(matches!(&min / -1, Err(ShelfError::Arithmetic { .. })));
        assert!(matches!(-&min, Err(ShelfError::Arithmetic { .. })));
        assert!(matches!(&max + 1, Err(ShelfError::Arithmetic { .. })));
        assert!(matches!(&max * 2, Err(ShelfError::Arithmetic { .. })));
        assert!(matches!(&min - 1, Err(ShelfError::Arithmetic { .. })));
        assert_eq!(stored::<i64>(&store, "n"), 7);
    }

    #[test]
    fn readers_see_old_value_until_swap_then_new() {
        let store = SimStore::new();
        let old = pmshelf::header::frame(TypeTag::FloatNumber, &1.0f64.encode_payload());
        let new = pmshelf::header::frame(TypeTag::FloatNumber, &2.0f64.encode_payload());
        store.put_named_memory("x", &old).unwrap();
        let mut handle = store.open_named_memory("x").unwrap();

        let observer = store.clone();
        let mut seen = Vec::new();
        atomic_replace_observed(&store, "x", &mut handle, &new, &mut |step| {
            let value: f64 = stored(&observer, "x");
            seen.push((step, value));
        })
        .unwrap();

        assert_eq!(
            seen,
            vec![
                (UpdateStep::CreateSide, 1.0),
                (UpdateStep::CommitSide, 1.0),
                (UpdateStep::ReleaseOld, 1.0),
                (UpdateStep::Swap, 2.0),
                (UpdateStep::EraseOld, 2.0),
                (UpdateStep::Refresh, 2.0),
            ]
        );
    }

    #[test]
    fn repeated_updates_accumulate() {
        let (store, shelf) = sim_shelf();
        let mut n = shelf.create("n", IntegerNumber::new(0)).unwrap();
        for _ in 0..100 {
            n.try_add_assign(1).unwrap();
        }
        assert_eq!(stored::<i64>(&store, "n"), 100);
        assert_eq!(store.stats().unwrap().swaps, 100);
        assert_eq!(store.names().unwrap(), vec!["n"]);
    }
}
