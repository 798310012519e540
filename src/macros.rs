//! # Internal Macros
//!
//! Boilerplate reducers for the persisted header structs.
//!
//! ## be_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! big-endian wrapper types (U16, U32, U64). Every multi-byte integer the
//! engine persists is big-endian, so header structs are plain `#[repr(C)]`
//! collections of these wrappers and the accessors do the byte-order
//! conversion at the edge.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::big_endian::{U16, U32};
//!
//! #[repr(C)]
//! struct DataHeader {
//!     slots: U16,
//!     next: U32,
//! }
//!
//! impl DataHeader {
//!     be_accessors! {
//!         slots: u16,
//!         next: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn slots(&self) -> u16 { self.slots.get() }
//! // pub fn set_slots(&mut self, val: u16) { self.slots = U16::new(val); }
//! // pub fn next(&self) -> u32 { self.next.get() }
//! // pub fn set_next(&mut self, val: u32) { self.next = U32::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy big-endian fields.
#[macro_export]
macro_rules! be_accessors {
    (@impl $field:ident, u16) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u16 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u16) {
                self.$field = ::zerocopy::big_endian::U16::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::big_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::big_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::be_accessors!(@impl $field, $ty);
        )*
    };
}

/// Generates only getter methods for zerocopy big-endian fields (read-only).
#[macro_export]
macro_rules! be_getters {
    ($($field:ident : $native_ty:ty),* $(,)?) => {
        $(
            #[inline]
            pub fn $field(&self) -> $native_ty {
                self.$field.get()
            }
        )*
    };
}
