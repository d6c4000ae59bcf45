//! Persistent scalars
//!
//! A scalar region holds the header followed by the value's 64 raw bits
//! as 16 lowercase hex digits. Every mutation replaces the whole region
//! through [`crate::update::atomic_replace`].

use std::{
    fmt,
    ops::{Add, Div, Mul, Neg, Rem, Sub},
};

use crate::{
    config::DEFAULT_ALIGNMENT,
    error::{Result, ShelfError},
    header::{frame, Header, TypeTag, ENCODED_LEN},
    proxy::{Arith, CompoundOp},
    shelf::{Lease, Shelf},
    store::{transact, NamedMemory},
    update::atomic_replace,
};

use super::{check_existing, reclaim_uncommitted, Shadow};

/// Length of the hex payload
pub const PAYLOAD_LEN: usize = 16;

/// A number type that can live on a shelf
pub trait ScalarNumber:
    Arith
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Rem<Output = Self>
    + Neg<Output = Self>
{
    const TYPE_TAG: TypeTag;

    /// Raw 64-bit pattern of the value
    fn to_bits64(self) -> u64;

    /// Value from its raw 64-bit pattern
    fn from_bits64(bits: u64) -> Self;

    /// Conversion to an integer, truncating towards zero
    fn to_i64(self) -> Result<i64>;

    /// Hex text of the value's bits
    fn encode_payload(self) -> Vec<u8> {
        format!("{:016x}", self.to_bits64()).into_bytes()
    }

    /// Inverse of [`ScalarNumber::encode_payload`]
    fn decode_payload(payload: &[u8]) -> Option<Self> {
        let text = payload.get(..PAYLOAD_LEN)?;
        let text = std::str::from_utf8(text).ok()?;
        let bits = u64::from_str_radix(text, 16).ok()?;
        Some(Self::from_bits64(bits))
    }
}

impl ScalarNumber for f64 {
    const TYPE_TAG: TypeTag = TypeTag::FloatNumber;

    fn to_bits64(self) -> u64 {
        self.to_bits()
    }

    fn from_bits64(bits: u64) -> Self {
        f64::from_bits(bits)
    }

    fn to_i64(self) -> Result<i64> {
        if !self.is_finite() {
            return Err(ShelfError::arithmetic(format!(
                "cannot convert {} to an integer",
                self
            )));
        }
        let truncated = self.trunc();
        if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
            return Err(ShelfError::arithmetic(format!("{} overflows i64", self)));
        }
        Ok(truncated as i64)
    }
}

impl ScalarNumber for i64 {
    const TYPE_TAG: TypeTag = TypeTag::IntegerNumber;

    fn to_bits64(self) -> u64 {
        self as u64
    }

    fn from_bits64(bits: u64) -> Self {
        bits as i64
    }

    fn to_i64(self) -> Result<i64> {
        Ok(self)
    }
}

/// Shadow of a persistent scalar, carrying its initial value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberShadow<N: ScalarNumber> {
    value: N,
}

/// Shadow of a persistent `f64`
pub type FloatNumber = NumberShadow<f64>;

/// Shadow of a persistent `i64`
pub type IntegerNumber = NumberShadow<i64>;

impl<N: ScalarNumber> NumberShadow<N> {
    pub fn new(value: N) -> Self {
        Self { value }
    }

    pub fn value(&self) -> N {
        self.value
    }

    /// Create `name` holding a copy of `value`; fails if `name` exists
    pub fn build_from_copy(shelf: &Shelf, name: &str, value: N) -> Result<ShelvedNumber<N>> {
        ShelvedNumber::create(shelf, name, value)
    }
}

impl<N: ScalarNumber> Shadow for NumberShadow<N> {
    type Instance = ShelvedNumber<N>;

    const TYPE_TAG: TypeTag = N::TYPE_TAG;

    fn make_instance(self, shelf: &Shelf, name: &str) -> Result<ShelvedNumber<N>> {
        if check_existing(shelf, name, N::TYPE_TAG)? {
            return Self::existing_instance(shelf, name)?
                .ok_or_else(|| ShelfError::region_not_found(name));
        }
        reclaim_uncommitted(shelf, name)?;
        ShelvedNumber::create(shelf, name, self.value)
    }

    fn existing_instance(shelf: &Shelf, name: &str) -> Result<Option<ShelvedNumber<N>>> {
        let Some(region) = shelf.store().open_named_memory(name)? else {
            return Ok(None);
        };
        if !Header::is_instance_of(region.as_slice(), N::TYPE_TAG) {
            return Ok(None);
        }
        let lease = shelf.lease(name)?;
        ShelvedNumber::bind(shelf, name, region, lease).map(Some)
    }
}

/// A live scalar bound to one named region.
///
/// Reads are served from a cached copy of the committed value. Writes
/// go through [`ShelvedNumber::atomic_update`] and update the cache only
/// once the new value is reachable under the name.
pub struct ShelvedNumber<N: ScalarNumber> {
    shelf: Shelf,
    name: String,
    region: Option<Box<dyn NamedMemory>>,
    cached: N,
    _lease: Lease,
}

fn decode_region<N: ScalarNumber>(name: &str, bytes: &[u8]) -> Result<N> {
    let header = Header::decode(bytes)?;
    if header.type_tag != N::TYPE_TAG {
        return Err(ShelfError::type_mismatch(
            N::TYPE_TAG.name(),
            header.type_tag.name(),
        ));
    }
    N::decode_payload(&bytes[ENCODED_LEN..])
        .ok_or_else(|| ShelfError::corruption(name, "scalar payload is not 16 hex digits"))
}

impl<N: ScalarNumber> ShelvedNumber<N> {
    fn create(shelf: &Shelf, name: &str, value: N) -> Result<Self> {
        let lease = shelf.lease(name)?;
        let image = frame(N::TYPE_TAG, &value.encode_payload());
        let store = shelf.store();

        let mut region = store.create_named_memory(name, image.len(), DEFAULT_ALIGNMENT, false)?;
        let written = transact(region.as_mut(), |buf| {
            buf.copy_from_slice(&image);
            Ok(())
        });
        if let Err(err) = written {
            drop(region);
            if let Err(erase_err) = store.erase_named_memory(name) {
                log::warn!("could not erase uncommitted region {}: {}", name, erase_err);
            }
            return Err(err);
        }
        log::debug!("created {} {} = {}", N::TYPE_TAG, name, value);

        Ok(Self {
            shelf: shelf.clone(),
            name: name.to_string(),
            region: Some(region),
            cached: value,
            _lease: lease,
        })
    }

    fn bind(shelf: &Shelf, name: &str, region: Box<dyn NamedMemory>, lease: Lease) -> Result<Self> {
        let cached = decode_region::<N>(name, region.as_slice())?;
        Ok(Self {
            shelf: shelf.clone(),
            name: name.to_string(),
            region: Some(region),
            cached,
            _lease: lease,
        })
    }

    /// Name of the bound region
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shelf the value lives on
    pub fn shelf(&self) -> &Shelf {
        &self.shelf
    }

    /// Current value
    pub fn read(&self) -> N {
        self.cached
    }

    /// Committed bytes of the bound region (header and payload)
    pub fn persisted_bytes(&self) -> &[u8] {
        self.region.as_ref().map(|r| r.as_slice()).unwrap_or(&[])
    }

    /// Re-read the value reachable under the name
    pub fn refresh(&mut self) -> Result<N> {
        let region = self
            .shelf
            .store()
            .open_named_memory(&self.name)?
            .ok_or_else(|| ShelfError::region_not_found(&self.name))?;
        self.cached = decode_region::<N>(&self.name, region.as_slice())?;
        self.region = Some(region);
        Ok(self.cached)
    }

    /// Replace the stored value in one crash-consistent step
    pub fn atomic_update(&mut self, value: N) -> Result<&mut Self> {
        let image = frame(N::TYPE_TAG, &value.encode_payload());
        let replaced = atomic_replace(self.shelf.store().as_ref(), &self.name, &mut self.region, &image);
        match replaced {
            Ok(()) => {
                self.cached = value;
                Ok(self)
            }
            Err(err) => {
                self.resync();
                Err(err)
            }
        }
    }

    fn resync(&mut self) {
        let Some(region) = self.region.as_ref() else {
            return;
        };
        match decode_region::<N>(&self.name, region.as_slice()) {
            Ok(value) => self.cached = value,
            Err(err) => log::warn!("could not re-read {} after failed update: {}", self.name, err),
        }
    }

    /// `self <op>= rhs`, persisted through the atomic update protocol
    pub fn apply(&mut self, op: CompoundOp, rhs: N) -> Result<&mut Self> {
        let next = self.cached.compound(op, rhs)?;
        log::debug!("{} {} {}: {} -> {}", self.name, op, rhs, self.cached, next);
        self.atomic_update(next)
    }

    pub fn try_add_assign(&mut self, rhs: N) -> Result<&mut Self> {
        self.apply(CompoundOp::Add, rhs)
    }

    pub fn try_sub_assign(&mut self, rhs: N) -> Result<&mut Self> {
        self.apply(CompoundOp::Sub, rhs)
    }

    pub fn try_mul_assign(&mut self, rhs: N) -> Result<&mut Self> {
        self.apply(CompoundOp::Mul, rhs)
    }

    /// Division; floor division for integers
    pub fn try_div_assign(&mut self, rhs: N) -> Result<&mut Self> {
        self.apply(CompoundOp::Div, rhs)
    }

    pub fn try_rem_assign(&mut self, rhs: N) -> Result<&mut Self> {
        self.apply(CompoundOp::Rem, rhs)
    }

    pub fn try_pow_assign(&mut self, rhs: N) -> Result<&mut Self> {
        self.apply(CompoundOp::Pow, rhs)
    }

    pub fn try_shl_assign(&mut self, rhs: N) -> Result<&mut Self> {
        self.apply(CompoundOp::Shl, rhs)
    }

    pub fn try_shr_assign(&mut self, rhs: N) -> Result<&mut Self> {
        self.apply(CompoundOp::Shr, rhs)
    }

    pub fn try_bitand_assign(&mut self, rhs: N) -> Result<&mut Self> {
        self.apply(CompoundOp::BitAnd, rhs)
    }

    pub fn try_bitxor_assign(&mut self, rhs: N) -> Result<&mut Self> {
        self.apply(CompoundOp::BitXor, rhs)
    }

    pub fn try_bitor_assign(&mut self, rhs: N) -> Result<&mut Self> {
        self.apply(CompoundOp::BitOr, rhs)
    }

    pub fn floor_div(&self, rhs: N) -> Result<N> {
        self.cached.floor_div(rhs)
    }

    /// Floor quotient and sign-of-divisor remainder
    pub fn div_mod(&self, rhs: N) -> Result<(N, N)> {
        Ok((self.cached.floor_div(rhs)?, self.cached.modulo(rhs)?))
    }

    /// `self ** rhs` without storing it
    pub fn pow(&self, rhs: N) -> Result<N> {
        self.cached.compound(CompoundOp::Pow, rhs)
    }

    pub fn to_f64(&self) -> f64 {
        self.cached.to_f64()
    }

    pub fn to_i64(&self) -> Result<i64> {
        self.cached.to_i64()
    }

    pub fn to_bool(&self) -> bool {
        self.cached.is_truthy()
    }

    /// Erase the bound region and release the name
    pub fn erase(self) -> Result<()> {
        let Self { shelf, name, region, _lease, .. } = self;
        drop(region);
        drop(_lease);
        shelf.erase(&name)
    }
}

impl<N: ScalarNumber> fmt::Display for ShelvedNumber<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cached)
    }
}

impl<N: ScalarNumber> fmt::Debug for ShelvedNumber<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShelvedNumber")
            .field("name", &self.name)
            .field("value", &self.cached)
            .finish()
    }
}
