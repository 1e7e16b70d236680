//! Generic numeric traits used throughout the crate for floating point and index types.

use num::{Float, FromPrimitive, Num, NumCast, ToPrimitive};
use std::fmt::{Debug, Display};

/// Marker trait for types that can safely be sent and shared across threads
pub trait ThreadSafe: Send + Sync + 'static {}
impl<T> ThreadSafe for T where T: Send + Sync + 'static {}

/// Trait used by this crate for the scalar floating point type (particle/grid coordinates)
pub trait Real:
    Float
    + Num
    + NumCast
    + FromPrimitive
    + ToPrimitive
    + Default
    + Debug
    + Display
    + ThreadSafe
    + nalgebra::RealField
{
    /// Tries to convert a value of this type to another `Real` type, returns `None` if out of range
    fn try_convert<T: Real>(&self) -> Option<T> {
        NumCast::from(*self)
    }

    /// Converts a `usize` into this type, panics if the value cannot be represented
    fn from_usize_unwrap(v: usize) -> Self {
        Self::from_usize(v).expect("usize value could not be represented by Real type")
    }
}

impl Real for f32 {}
impl Real for f64 {}

/// Trait used by this crate for signed integer types used to index the reconstruction grid
pub trait Index:
    Num + NumCast + FromPrimitive + ToPrimitive + Ord + Copy + Default + Debug + Display + ThreadSafe
{
    /// Tries to convert a value of this type to another `Index` type, returns `None` if out of range
    fn try_convert<T: Index>(&self) -> Option<T> {
        NumCast::from(*self)
    }

    /// Converts a `usize` into this type, panics if the value cannot be represented
    fn from_usize_unwrap(v: usize) -> Self {
        Self::from_usize(v).expect("usize value could not be represented by Index type")
    }

    /// Converts this value into a `usize`, panics if the value cannot be represented
    fn to_usize_unwrap(&self) -> usize {
        self.to_usize()
            .expect("Index value could not be represented as usize")
    }
}

impl Index for i32 {}
impl Index for i64 {}
