//! Basic usage of a pmshelf shelf: create, update, reopen and probe

use pmshelf::{
    CompoundOp, DType, FloatNumber, IntegerNumber, NdArray, Result, Shadow, Shelf, ShelfConfig,
    Tensor,
};

fn main() -> Result<()> {
    env_logger::init();

    println!("pmshelf Basic Usage Example");
    println!("===========================");

    let path = std::env::temp_dir().join("pmshelf_example");
    let config = ShelfConfig::new("example", 16).with_path(&path);

    {
        let shelf = Shelf::open(&config)?;
        println!("Opened shelf {} at {}", shelf.name(), path.display());

        let mut x = shelf.create("x", FloatNumber::new(2.0))?;
        x.try_add_assign(3.0)?;
        println!("  x = {}", x);

        let mut n = shelf.create("n", IntegerNumber::new(-7))?;
        println!("  n / 2 = {} (not stored)", (&n / 2)?);
        n.try_rem_assign(3)?;
        println!("  n %= 3 -> {}", n);

        let mut a = shelf.create("a", NdArray::new([2, 3], DType::Float64))?;
        a.assign_slice(0, &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0])?;
        a.apply(CompoundOp::Mul, 10.0f64)?;
        println!("  a = {:?}", a.to_vec::<f64>()?);
    }

    // Every handle is dropped: reopening reads what was committed.
    println!("\nReopening shelf...");
    let shelf = Shelf::open(&config)?;
    for name in shelf.item_names()? {
        if let Some(value) = shelf.get(&name)? {
            println!("  {} ({}): {}", name, value.type_tag(), value);
        }
    }

    // Probing with the wrong type is a plain miss.
    let as_tensor = Tensor::existing_instance(&shelf, "x")?;
    println!("\nx as a tensor: {}", if as_tensor.is_some() { "found" } else { "not found" });

    for name in shelf.item_names()? {
        shelf.erase(&name)?;
    }
    println!("Shelf cleared");
    Ok(())
}
