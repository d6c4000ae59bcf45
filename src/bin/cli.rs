use clap::{Arg, ArgAction, ArgMatches, Command};
use pmshelf::{
    error::ShelfError, CompoundOp, DType, FloatNumber, Shadow, ShelfConfig, Shelf, ShelvedArray,
    ShelvedValue, Result,
};
use std::path::PathBuf;

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("pmshelf-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect and update a persistent shelf")
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .value_name("DIR")
                .help("Directory holding the shelf (default /tmp/pmshelf_<name>)")
                .global(true),
        )
        .arg(
            Arg::new("name")
                .short('n')
                .long("name")
                .value_name("NAME")
                .help("Shelf name")
                .default_value("default")
                .global(true),
        )
        .arg(
            Arg::new("size_mb")
                .short('s')
                .long("size-mb")
                .value_name("MB")
                .help("Shelf capacity in megabytes")
                .value_parser(clap::value_parser!(usize))
                .default_value("64")
                .global(true),
        )
        .arg(
            Arg::new("no_gc")
                .long("no-gc")
                .help("Do not collect orphaned regions on open")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("list").about("List items on the shelf"))
        .subcommand(
            Command::new("show")
                .about("Show the type and value of an item")
                .arg(Arg::new("item").required(true)),
        )
        .subcommand(
            Command::new("erase")
                .about("Erase an item and its metadata")
                .arg(Arg::new("item").required(true)),
        )
        .subcommand(Command::new("gc").about("Erase regions left by interrupted operations"))
        .subcommand(
            Command::new("set-float")
                .about("Create or atomically replace a float item")
                .arg(Arg::new("item").required(true))
                .arg(
                    Arg::new("value")
                        .required(true)
                        .allow_negative_numbers(true)
                        .value_parser(clap::value_parser!(f64)),
                ),
        )
        .subcommand(
            Command::new("update")
                .about("Apply a compound operator (+=, -=, *=, ...) to an item")
                .arg(Arg::new("item").required(true))
                .arg(Arg::new("op").required(true))
                .arg(Arg::new("operand").required(true).allow_negative_numbers(true)),
        )
        .subcommand(Command::new("info").about("Show build information"))
        .get_matches();

    if let Some(("info", _)) = matches.subcommand() {
        return show_info();
    }

    let shelf = open_shelf(&matches)?;
    match matches.subcommand() {
        Some(("list", _)) => list_items(&shelf),
        Some(("show", sub)) => show_item(&shelf, item_arg(sub)),
        Some(("erase", sub)) => {
            shelf.erase(item_arg(sub))?;
            println!("Erased '{}'", item_arg(sub));
            Ok(())
        }
        Some(("gc", _)) => {
            let collected = shelf.collect_orphans()?;
            if collected.is_empty() {
                println!("No orphaned regions");
            }
            for name in collected {
                println!("Collected {}", name);
            }
            Ok(())
        }
        Some(("set-float", sub)) => {
            let value = sub.get_one::<f64>("value").copied().unwrap_or_default();
            set_float(&shelf, item_arg(sub), value)
        }
        Some(("update", sub)) => {
            let op_text = sub.get_one::<String>("op").map(String::as_str).unwrap_or_default();
            let op = CompoundOp::parse(op_text)
                .ok_or_else(|| ShelfError::invalid_parameter("op", format!("unknown operator {:?}", op_text)))?;
            let operand = sub.get_one::<String>("operand").map(String::as_str).unwrap_or_default();
            update_item(&shelf, item_arg(sub), op, operand)
        }
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn open_shelf(matches: &ArgMatches) -> Result<Shelf> {
    let name = matches
        .get_one::<String>("name")
        .cloned()
        .unwrap_or_else(|| "default".to_string());
    let size_mb = matches.get_one::<usize>("size_mb").copied().unwrap_or(64);

    let mut config = ShelfConfig::new(name, size_mb).with_collect_orphans(!matches.get_flag("no_gc"));
    if let Some(path) = matches.get_one::<String>("path") {
        config = config.with_path(PathBuf::from(path));
    }
    Shelf::open(&config)
}

fn item_arg(matches: &ArgMatches) -> &str {
    matches.get_one::<String>("item").map(String::as_str).unwrap_or_default()
}

fn list_items(shelf: &Shelf) -> Result<()> {
    let names = shelf.item_names()?;
    if names.is_empty() {
        println!("No items found");
        return Ok(());
    }
    println!("Items:");
    for name in names {
        match shelf.get(&name)? {
            Some(value) => println!("  - {} ({})", name, value.type_tag()),
            None => println!("  - {} (unknown)", name),
        }
    }
    Ok(())
}

fn show_item(shelf: &Shelf, name: &str) -> Result<()> {
    let value = shelf
        .get(name)?
        .ok_or_else(|| ShelfError::region_not_found(name))?;
    println!("{} ({}): {}", name, value.type_tag(), value);
    if let Some(array) = value.as_array() {
        println!("  strides: {:?}", array.strides());
        print_elements(array)?;
    }
    Ok(())
}

fn print_elements(array: &ShelvedArray) -> Result<()> {
    let rendered: Vec<String> = match array.dtype() {
        DType::Bool => array.to_vec::<bool>()?.iter().map(ToString::to_string).collect(),
        DType::UInt8 => array.to_vec::<u8>()?.iter().map(ToString::to_string).collect(),
        DType::Int8 => array.to_vec::<i8>()?.iter().map(ToString::to_string).collect(),
        DType::Int16 => array.to_vec::<i16>()?.iter().map(ToString::to_string).collect(),
        DType::Int32 => array.to_vec::<i32>()?.iter().map(ToString::to_string).collect(),
        DType::Int64 => array.to_vec::<i64>()?.iter().map(ToString::to_string).collect(),
        DType::Float32 => array.to_vec::<f32>()?.iter().map(ToString::to_string).collect(),
        DType::Float64 => array.to_vec::<f64>()?.iter().map(ToString::to_string).collect(),
    };
    println!("  elements: [{}]", rendered.join(", "));
    Ok(())
}

fn set_float(shelf: &Shelf, name: &str, value: f64) -> Result<()> {
    match FloatNumber::existing_instance(shelf, name)? {
        Some(mut x) => {
            x.atomic_update(value)?;
            println!("{} = {}", name, x);
        }
        None => {
            let x = shelf.create(name, FloatNumber::new(value))?;
            println!("Created {} = {}", name, x);
        }
    }
    Ok(())
}

fn parse_operand<T: std::str::FromStr>(text: &str) -> Result<T> {
    text.parse()
        .map_err(|_| ShelfError::invalid_parameter("operand", format!("cannot parse {:?}", text)))
}

fn update_item(shelf: &Shelf, name: &str, op: CompoundOp, operand: &str) -> Result<()> {
    let mut value = shelf
        .get(name)?
        .ok_or_else(|| ShelfError::region_not_found(name))?;
    match &mut value {
        ShelvedValue::Float(x) => {
            x.apply(op, parse_operand(operand)?)?;
        }
        ShelvedValue::Integer(n) => {
            n.apply(op, parse_operand(operand)?)?;
        }
        ShelvedValue::Array(array) => apply_to_array(array, op, operand)?,
        ShelvedValue::Tensor(tensor) => apply_to_array(tensor, op, operand)?,
        ShelvedValue::List(_) => {
            return Err(ShelfError::type_mismatch("number or array", "list"));
        }
    }
    println!("{} {} {} -> {}", name, op, operand, value);
    Ok(())
}

fn apply_to_array(array: &mut ShelvedArray, op: CompoundOp, operand: &str) -> Result<()> {
    match array.dtype() {
        DType::UInt8 => array.apply(op, parse_operand::<u8>(operand)?),
        DType::Int8 => array.apply(op, parse_operand::<i8>(operand)?),
        DType::Int16 => array.apply(op, parse_operand::<i16>(operand)?),
        DType::Int32 => array.apply(op, parse_operand::<i32>(operand)?),
        DType::Int64 => array.apply(op, parse_operand::<i64>(operand)?),
        DType::Float32 => array.apply(op, parse_operand::<f32>(operand)?),
        DType::Float64 => array.apply(op, parse_operand::<f64>(operand)?),
        DType::Bool => Err(ShelfError::type_mismatch("numeric array", "bool")),
    }
}

fn show_info() -> Result<()> {
    println!("pmshelf - crash-consistent persistent numeric objects");
    println!("Version: {}", pmshelf::VERSION);
    println!("\nStores:");
    println!("  - File-backed regions (mmap, undo-logged transactions)");
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    println!("  - Atomic name swap via renameat2(RENAME_EXCHANGE)");
    println!("\nItem types:");
    println!("  - float-number, integer-number, ndarray, tensor, list");
    Ok(())
}
