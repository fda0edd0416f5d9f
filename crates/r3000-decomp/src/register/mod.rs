//! Register definitions for the R3000A and its coprocessors.

use strum::{EnumCount, EnumIter, FromRepr, VariantNames};

pub mod cp0;

// Must be defined before use, macros are textually scoped.
macro_rules! impl_from_and_try_from {
    ($ty:ident, $($num:ident),+) => {
        $(
            impl TryFrom<$num> for $ty {
                type Error = String;

                fn try_from(v: $num) -> Result<Self, Self::Error> {
                    usize::try_from(v)
                        .ok()
                        .and_then(Self::from_repr)
                        .ok_or_else(|| format!("invalid register index: {v}"))
                }
            }

            impl From<$ty> for $num {
                fn from(v: $ty) -> Self {
                    v.to_repr() as _
                }
            }
        )+
    };
}

macro_rules! impl_reg {
    ($ty:ident) => {
        impl $ty {
            /// The index this register has within its register file.
            #[must_use]
            pub const fn to_repr(self) -> usize {
                self as usize
            }

            #[must_use]
            pub const fn name(self) -> &'static str {
                Self::name_from_index(self.to_repr())
            }

            /// Returns the name of the register at the given index, or panics if the index is out of bounds.
            #[must_use]
            pub const fn name_from_index(index: usize) -> &'static str {
                <Self as VariantNames>::VARIANTS[index]
            }

            #[must_use]
            pub const fn count() -> usize {
                <Self as EnumCount>::COUNT
            }

            pub fn iter() -> impl Iterator<Item = Self> {
                <Self as strum::IntoEnumIterator>::iter()
            }
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl_from_and_try_from!($ty, u8, u16, u32, u64, usize, i32);
    };
}

/// A general purpose register, also known as a `gpr`.
#[derive(EnumCount, EnumIter, VariantNames, FromRepr, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[strum(serialize_all = "snake_case")]
#[repr(usize)]
pub enum GeneralPurpose {
    Zero,
    At,
    V0,
    V1,
    A0,
    A1,
    A2,
    A3,
    T0,
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    T8,
    T9,
    K0,
    K1,
    Gp,
    Sp,
    Fp,
    Ra,
}

impl_reg!(GeneralPurpose);

/// The multiply/divide result registers, stored right after the general purpose registers.
#[derive(EnumCount, EnumIter, VariantNames, FromRepr, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[strum(serialize_all = "snake_case")]
#[repr(usize)]
pub enum Special {
    Hi,
    Lo,
}

impl_reg!(Special);

/// A coprocessor 0 register. The PlayStation has no TLB, so most of the MIPS indices are unused.
#[derive(EnumCount, EnumIter, VariantNames, FromRepr, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[strum(serialize_all = "lowercase")]
#[repr(usize)]
pub enum Cp0 {
    #[strum(serialize = "r0")]
    Reserved0,
    #[strum(serialize = "r1")]
    Reserved1,
    #[strum(serialize = "r2")]
    Reserved2,
    /// Breakpoint on execute address.
    Bpc,
    #[strum(serialize = "r4")]
    Reserved4,
    /// Breakpoint on data access address.
    Bda,
    /// Randomly memorized jump address.
    JumpDest,
    /// Breakpoint control.
    Dcic,
    /// Bad virtual address.
    BadVaddr,
    /// Data access breakpoint mask.
    Bdam,
    #[strum(serialize = "r10")]
    Reserved10,
    /// Execute breakpoint mask.
    Bpcm,
    /// Status register, see [`cp0::Status`].
    Sr,
    /// Describes the most recently recognised exception, see [`cp0::Cause`].
    Cause,
    /// Return address from trap.
    Epc,
    /// Processor ID.
    Prid,
}

impl_reg!(Cp0);

/// A geometry transformation engine (COP2) data register.
#[derive(EnumCount, EnumIter, VariantNames, FromRepr, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[strum(serialize_all = "lowercase")]
#[repr(usize)]
pub enum Cp2Data {
    Vxy0,
    Vz0,
    Vxy1,
    Vz1,
    Vxy2,
    Vz2,
    Rgbc,
    Otz,
    Ir0,
    Ir1,
    Ir2,
    Ir3,
    Sxy0,
    Sxy1,
    Sxy2,
    Sxyp,
    Sz0,
    Sz1,
    Sz2,
    Sz3,
    Rgb0,
    Rgb1,
    Rgb2,
    Res1,
    Mac0,
    Mac1,
    Mac2,
    Mac3,
    Irgb,
    Orgb,
    Lzcs,
    Lzcr,
}

impl_reg!(Cp2Data);

/// A geometry transformation engine (COP2) control register.
#[derive(EnumCount, EnumIter, VariantNames, FromRepr, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[strum(serialize_all = "lowercase")]
#[repr(usize)]
pub enum Cp2Control {
    Rt11Rt12,
    Rt13Rt21,
    Rt22Rt23,
    Rt31Rt32,
    Rt33,
    Trx,
    Try,
    Trz,
    L11L12,
    L13L21,
    L22L23,
    L31L32,
    L33,
    Rbk,
    Gbk,
    Bbk,
    Lr1Lr2,
    Lr3Lg1,
    Lg2Lg3,
    Lb1Lb2,
    Lb3,
    Rfc,
    Gfc,
    Bfc,
    Ofx,
    Ofy,
    H,
    Dqa,
    Dqb,
    Zsf3,
    Zsf4,
    Flag,
}

impl_reg!(Cp2Control);
