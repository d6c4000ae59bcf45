//! # pmshelf - Crash-Consistent Persistent Numeric Objects
//!
//! pmshelf keeps numbers, arrays, tensors and lists in named persistent
//! memory regions and updates them so that a crash at any point leaves
//! either the complete old value or the complete new value readable.
//!
//! ## Features
//!
//! - **Self-describing regions**: every region starts with a size-prefixed
//!   header carrying a magic, a format version and a type tag
//! - **Shadows and instances**: describe a value, then materialize or bind
//!   it by name with type probing
//! - **Atomic update protocol**: copy to `<name>-tmp`, commit, swap names,
//!   erase the old region
//! - **Arithmetic proxy**: shelved numbers read like numbers; every
//!   compound assignment goes through the update protocol
//! - **Pluggable stores**: a file-backed store and a simulated store with
//!   fault injection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                    Shelf                        │
//! ├─────────────────────────────────────────────────┤
//! │  Shadows / Instances      │  Arithmetic proxy   │
//! │  - numbers, lists         │  - read operators   │
//! │  - arrays, tensors        │  - compound ops     │
//! ├─────────────────────────────────────────────────┤
//! │  Header codec             │  Atomic update      │
//! └─────────────────────────────────────────────────┘
//!           │                         │
//!           ▼                         ▼
//! ┌─────────────────┐    ┌─────────────────────────┐
//! │   FileStore     │    │       SimStore          │
//! │  (mmap, fsync)  │    │  (fault injection)      │
//! └─────────────────┘    └─────────────────────────┘
//! ```
//!
//! ```no_run
//! use pmshelf::{FloatNumber, Shelf, ShelfConfig};
//!
//! # fn main() -> pmshelf::Result<()> {
//! let shelf = Shelf::open(&ShelfConfig::new("demo", 16))?;
//! let mut x = shelf.create("x", FloatNumber::new(2.0))?;
//! x.try_add_assign(3.0)?;
//! assert_eq!(x.read(), 5.0);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod header;
pub mod proxy;
pub mod shadow;
pub mod shelf;
pub mod store;
pub mod update;

pub use error::{Result, ShelfError};
pub use header::{Header, TypeTag};
pub use proxy::{Arith, CompoundOp};
pub use shadow::{
    DType, Element, FloatNumber, IntegerNumber, List, ListElement, NdArray, Order, Shadow,
    ShelvedArray, ShelvedList, ShelvedNumber, ShelvedTensor, ShelvedValue, Tensor, TransientArray,
    Transient, Value,
};
pub use shelf::Shelf;
pub use store::{
    FaultPoint, FileStore, NamedMemory, NamedMemoryStore, ShelfConfig, SimStats, SimStore, StoreRef,
};
pub use update::{atomic_replace, UpdateStep};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod config {
    /// Default alignment for region allocations
    pub const DEFAULT_ALIGNMENT: usize = 8;

    /// Default shelf capacity (64MB)
    pub const DEFAULT_SHELF_SIZE_MB: usize = 64;

    /// Suffix of the side region used by the atomic update protocol
    pub const TMP_SUFFIX: &str = "-tmp";

    /// Suffix of an array's metadata region
    pub const META_SUFFIX: &str = "-meta";
}
