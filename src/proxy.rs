//! Arithmetic surface of shelved values
//!
//! Non-mutating operators on a shelved number read the cached value and
//! return `Result<N>`, with the same overflow checks and floor semantics
//! as the compound operators. Compound assignment is only reachable through
//! [`CompoundOp`], and every compound operation on a shelved value ends
//! in the atomic update protocol (scalars, lists) or in a region-local
//! transaction (arrays).

use std::{
    cmp::Ordering,
    fmt,
    ops::{Add, Div, Mul, Neg, Rem, Sub},
};

use crate::{
    error::{Result, ShelfError},
    shadow::number::{ScalarNumber, ShelvedNumber},
};

/// Compound-assignment operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompoundOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Shl,
    Shr,
    BitAnd,
    BitXor,
    BitOr,
}

impl CompoundOp {
    /// Every compound operator
    pub const ALL: [CompoundOp; 11] = [
        CompoundOp::Add,
        CompoundOp::Sub,
        CompoundOp::Mul,
        CompoundOp::Div,
        CompoundOp::Rem,
        CompoundOp::Pow,
        CompoundOp::Shl,
        CompoundOp::Shr,
        CompoundOp::BitAnd,
        CompoundOp::BitXor,
        CompoundOp::BitOr,
    ];

    /// Operator as written in source, e.g. `+=`
    pub fn symbol(&self) -> &'static str {
        match self {
            CompoundOp::Add => "+=",
            CompoundOp::Sub => "-=",
            CompoundOp::Mul => "*=",
            CompoundOp::Div => "/=",
            CompoundOp::Rem => "%=",
            CompoundOp::Pow => "**=",
            CompoundOp::Shl => "<<=",
            CompoundOp::Shr => ">>=",
            CompoundOp::BitAnd => "&=",
            CompoundOp::BitXor => "^=",
            CompoundOp::BitOr => "|=",
        }
    }

    /// Parse `+=` or `+` style operator text
    pub fn parse(text: &str) -> Option<Self> {
        let bare = text.strip_suffix('=').unwrap_or(text);
        Self::ALL
            .into_iter()
            .find(|op| op.symbol().trim_end_matches('=') == bare)
    }

    /// Whether the operator only applies to integers
    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            CompoundOp::Shl | CompoundOp::Shr | CompoundOp::BitAnd | CompoundOp::BitXor | CompoundOp::BitOr
        )
    }
}

impl fmt::Display for CompoundOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Checked arithmetic shared by shelved scalars and array elements.
///
/// Division and remainder floor towards negative infinity and the
/// remainder takes the sign of the divisor.
pub trait Arith: Copy + PartialOrd + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Name used in type errors
    const KIND: &'static str;

    /// New value of `self <op>= rhs`
    fn compound(self, op: CompoundOp, rhs: Self) -> Result<Self>;

    /// Floor division
    fn floor_div(self, rhs: Self) -> Result<Self>;

    /// Remainder with the sign of the divisor
    fn modulo(self, rhs: Self) -> Result<Self>;

    /// Checked negation
    fn negate(self) -> Result<Self>;

    /// Lossy conversion to f64
    fn to_f64(self) -> f64;

    /// Truth value: non-zero
    fn is_truthy(self) -> bool;
}

fn division_by_zero() -> ShelfError {
    ShelfError::arithmetic("division by zero")
}

fn overflow(op: CompoundOp, kind: &str) -> ShelfError {
    ShelfError::arithmetic(format!("{} overflowed {}", op, kind))
}

macro_rules! impl_float_arith {
    ($($t:ty),*) => {$(
        impl Arith for $t {
            const KIND: &'static str = stringify!($t);

            fn compound(self, op: CompoundOp, rhs: Self) -> Result<Self> {
                match op {
                    CompoundOp::Add => Ok(self + rhs),
                    CompoundOp::Sub => Ok(self - rhs),
                    CompoundOp::Mul => Ok(self * rhs),
                    CompoundOp::Div => {
                        if rhs == 0.0 {
                            return Err(division_by_zero());
                        }
                        Ok(self / rhs)
                    }
                    CompoundOp::Rem => self.modulo(rhs),
                    CompoundOp::Pow => Ok(self.powf(rhs)),
                    _ => Err(ShelfError::type_mismatch(
                        format!("integer operand for {}", op),
                        Self::KIND,
                    )),
                }
            }

            fn floor_div(self, rhs: Self) -> Result<Self> {
                if rhs == 0.0 {
                    return Err(division_by_zero());
                }
                Ok((self / rhs).floor())
            }

            fn modulo(self, rhs: Self) -> Result<Self> {
                if rhs == 0.0 {
                    return Err(division_by_zero());
                }
                let mut r = self % rhs;
                if r != 0.0 && (r < 0.0) != (rhs < 0.0) {
                    r += rhs;
                }
                Ok(r)
            }

            fn negate(self) -> Result<Self> {
                Ok(-self)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn is_truthy(self) -> bool {
                self != 0.0
            }
        }
    )*};
}

macro_rules! impl_int_arith {
    ($($t:ty => $neg:expr),*) => {$(
        impl Arith for $t {
            const KIND: &'static str = stringify!($t);

            fn compound(self, op: CompoundOp, rhs: Self) -> Result<Self> {
                let is_neg: fn($t) -> bool = $neg;
                match op {
                    CompoundOp::Add => self.checked_add(rhs).ok_or_else(|| overflow(op, Self::KIND)),
                    CompoundOp::Sub => self.checked_sub(rhs).ok_or_else(|| overflow(op, Self::KIND)),
                    CompoundOp::Mul => self.checked_mul(rhs).ok_or_else(|| overflow(op, Self::KIND)),
                    CompoundOp::Div => self.floor_div(rhs),
                    CompoundOp::Rem => self.modulo(rhs),
                    CompoundOp::Pow => {
                        if is_neg(rhs) {
                            return Err(ShelfError::arithmetic("negative exponent for integer power"));
                        }
                        let exp = u32::try_from(rhs).map_err(|_| overflow(op, Self::KIND))?;
                        self.checked_pow(exp).ok_or_else(|| overflow(op, Self::KIND))
                    }
                    CompoundOp::Shl | CompoundOp::Shr => {
                        let bits = u32::try_from(rhs)
                            .ok()
                            .filter(|&b| !is_neg(rhs) && b < <$t>::BITS)
                            .ok_or_else(|| ShelfError::arithmetic(format!("shift count {} out of range", rhs)))?;
                        if op == CompoundOp::Shr {
                            return Ok(self >> bits);
                        }
                        let shifted = self << bits;
                        if shifted >> bits != self {
                            return Err(overflow(op, Self::KIND));
                        }
                        Ok(shifted)
                    }
                    CompoundOp::BitAnd => Ok(self & rhs),
                    CompoundOp::BitXor => Ok(self ^ rhs),
                    CompoundOp::BitOr => Ok(self | rhs),
                }
            }

            fn floor_div(self, rhs: Self) -> Result<Self> {
                let is_neg: fn($t) -> bool = $neg;
                if rhs == 0 {
                    return Err(division_by_zero());
                }
                let q = self
                    .checked_div(rhs)
                    .ok_or_else(|| overflow(CompoundOp::Div, Self::KIND))?;
                if self % rhs != 0 && is_neg(self) != is_neg(rhs) {
                    Ok(q - 1)
                } else {
                    Ok(q)
                }
            }

            fn modulo(self, rhs: Self) -> Result<Self> {
                let is_neg: fn($t) -> bool = $neg;
                if rhs == 0 {
                    return Err(division_by_zero());
                }
                let r = self.checked_rem(rhs).unwrap_or(0);
                if r != 0 && is_neg(r) != is_neg(rhs) {
                    Ok(r + rhs)
                } else {
                    Ok(r)
                }
            }

            fn negate(self) -> Result<Self> {
                self.checked_neg()
                    .ok_or_else(|| ShelfError::arithmetic(format!("negation overflowed {}", Self::KIND)))
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn is_truthy(self) -> bool {
                self != 0
            }
        }
    )*};
}

impl_float_arith!(f32, f64);
impl_int_arith!(
    i8 => |v| v < 0,
    i16 => |v| v < 0,
    i32 => |v| v < 0,
    i64 => |v| v < 0,
    u8 => |_| false
);

// Read-only operators: compute from the cached value, no store access.
// Results carry the same checks and floor semantics as compound assignment.

macro_rules! impl_read_op {
    ($($trait:ident :: $method:ident => $op:ident),*) => {$(
        impl<N: ScalarNumber> $trait<N> for &ShelvedNumber<N> {
            type Output = Result<N>;

            fn $method(self, rhs: N) -> Result<N> {
                self.read().compound(CompoundOp::$op, rhs)
            }
        }
    )*};
}

impl_read_op!(
    Add::add => Add,
    Sub::sub => Sub,
    Mul::mul => Mul,
    Div::div => Div,
    Rem::rem => Rem
);

impl<N: ScalarNumber> Neg for &ShelvedNumber<N> {
    type Output = Result<N>;

    fn neg(self) -> Result<N> {
        self.read().negate()
    }
}

impl<N: ScalarNumber> PartialEq<N> for ShelvedNumber<N> {
    fn eq(&self, other: &N) -> bool {
        self.read() == *other
    }
}

impl<N: ScalarNumber> PartialOrd<N> for ShelvedNumber<N> {
    fn partial_cmp(&self, other: &N) -> Option<Ordering> {
        self.read().partial_cmp(other)
    }
}

macro_rules! impl_reflected {
    (@op $t:ty, $($trait:ident :: $method:ident => $op:ident),*) => {$(
        impl $trait<&ShelvedNumber<$t>> for $t {
            type Output = Result<$t>;

            fn $method(self, rhs: &ShelvedNumber<$t>) -> Result<$t> {
                self.compound(CompoundOp::$op, rhs.read())
            }
        }
    )*};
    ($($t:ty),*) => {$(
        impl_reflected!(@op $t, Add::add => Add, Sub::sub => Sub, Mul::mul => Mul, Div::div => Div, Rem::rem => Rem);

        impl PartialEq<ShelvedNumber<$t>> for $t {
            fn eq(&self, other: &ShelvedNumber<$t>) -> bool {
                *self == other.read()
            }
        }

        impl PartialOrd<ShelvedNumber<$t>> for $t {
            fn partial_cmp(&self, other: &ShelvedNumber<$t>) -> Option<Ordering> {
                self.partial_cmp(&other.read())
            }
        }
    )*};
}

impl_reflected!(f64, i64);
