//! Property get/set by name, key handle and index.
//!
//! Stores take the value handle by move: on return the container owns the
//! value and the caller has nothing left to release. Key handles are only
//! borrowed; a key is turned into an engine atom for the duration of one
//! operation and the atom is released before the call returns.

use std::ops::{BitOr, BitOrAssign};

use rquickjs::{qjs, Atom, Object, Value};

use crate::core::{BridgeError, BridgeResult};
use crate::scripting::handle::Handle;

/// Property attribute and store-behaviour flags.
///
/// The bit values match the engine's `JS_PROP_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PropertyFlags(u32);

impl PropertyFlags {
    pub const NONE: Self = Self(0);
    pub const CONFIGURABLE: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const ENUMERABLE: Self = Self(1 << 2);
    /// Configurable, writable and enumerable: a plain data property.
    pub const C_W_E: Self = Self(0b111);
    /// Report a rejected store as an exception instead of `Ok(false)`.
    pub const THROW: Self = Self(1 << 14);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & (Self::C_W_E.0 | Self::THROW.0))
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PropertyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PropertyFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// An engine atom for one key, released on drop.
struct RawAtom<'a, 'js> {
    key: &'a Handle<'js>,
    atom: qjs::JSAtom,
}

impl<'a, 'js> RawAtom<'a, 'js> {
    fn new(key: &'a Handle<'js>) -> BridgeResult<Self> {
        let ctx = key.as_value().ctx();
        // SAFETY: the key is borrowed for the call; the returned atom is
        // owned by the guard.
        let atom = unsafe { qjs::JS_ValueToAtom(ctx.as_raw().as_ptr(), key.as_raw()) };
        if atom == qjs::JS_ATOM_NULL {
            return Err(BridgeError::from_engine(ctx, rquickjs::Error::Exception));
        }
        Ok(Self { key, atom })
    }
}

impl Drop for RawAtom<'_, '_> {
    fn drop(&mut self) {
        let ctx = self.key.as_value().ctx();
        // SAFETY: the atom was created by `JS_ValueToAtom` and is freed once.
        unsafe { qjs::JS_FreeAtom(ctx.as_raw().as_ptr(), self.atom) }
    }
}

impl<'js> Handle<'js> {
    fn object(&self) -> BridgeResult<&Object<'js>> {
        self.as_value().as_object().ok_or_else(|| {
            BridgeError::Conversion(format!(
                "expected an object, found {}",
                self.type_name()
            ))
        })
    }

    fn engine<T>(&self, result: rquickjs::Result<T>) -> BridgeResult<T> {
        result.map_err(|err| BridgeError::from_engine(self.as_value().ctx(), err))
    }

    fn key_atom(&self, key: &Handle<'js>) -> BridgeResult<Atom<'js>> {
        let ctx = self.as_value().ctx().clone();
        self.engine(Atom::from_value(ctx, key.as_value()))
    }

    /// `obj[key] = value` with a string key. Failures are exceptions.
    pub fn set_property_by_name(&self, key: &str, value: Handle<'js>) -> BridgeResult<()> {
        let object = self.object()?;
        self.engine(object.set(key, value.into_value()))
    }

    /// `obj[key] = value` with any key value (string, number or symbol).
    ///
    /// Returns `Ok(false)` when the store is rejected (for example a frozen
    /// object) unless `flags` contains [`PropertyFlags::THROW`]. Exceptions
    /// raised during the store, such as a throwing setter, are always errors.
    pub fn set_property(
        &self,
        key: &Handle<'js>,
        value: Handle<'js>,
        flags: PropertyFlags,
    ) -> BridgeResult<bool> {
        let object = self.object()?;
        let ctx = object.ctx();
        let atom = RawAtom::new(key)?;
        // SAFETY: `into_raw` hands the engine its own reference, which the
        // store consumes whether it succeeds or fails.
        let status = unsafe {
            qjs::JS_SetPropertyInternal(
                ctx.as_raw().as_ptr(),
                self.as_raw(),
                atom.atom,
                value.into_raw(),
                flags.bits() as _,
            )
        };
        match status {
            status if status < 0 => Err(BridgeError::from_engine(ctx, rquickjs::Error::Exception)),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    /// Defines `obj[index]` as an own data property with the attributes in
    /// `flags`.
    ///
    /// Returns `Ok(false)` when the definition is rejected and `flags` does
    /// not contain [`PropertyFlags::THROW`].
    pub fn define_indexed_property(
        &self,
        index: u32,
        value: Handle<'js>,
        flags: PropertyFlags,
    ) -> BridgeResult<bool> {
        let object = self.object()?;
        let ctx = object.ctx();
        // SAFETY: `into_raw` hands the engine its own reference, which the
        // define call consumes whether it succeeds or fails.
        let status = unsafe {
            qjs::JS_DefinePropertyValueUint32(
                ctx.as_raw().as_ptr(),
                self.as_raw(),
                index,
                value.into_raw(),
                flags.bits() as _,
            )
        };
        match status {
            status if status < 0 => Err(BridgeError::from_engine(ctx, rquickjs::Error::Exception)),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    /// `obj[key]` with a string key. Missing properties are `undefined`.
    pub fn get_property_by_name(&self, key: &str) -> BridgeResult<Handle<'js>> {
        let object = self.object()?;
        self.engine(object.get::<_, Value<'js>>(key)).map(Handle::new)
    }

    /// `obj[key]` with any key value. Missing properties are `undefined`.
    pub fn get_property(&self, key: &Handle<'js>) -> BridgeResult<Handle<'js>> {
        let object = self.object()?;
        let atom = self.key_atom(key)?;
        self.engine(object.get::<_, Value<'js>>(atom)).map(Handle::new)
    }

    /// `obj[index]`. Missing elements are `undefined`.
    pub fn get_index(&self, index: u32) -> BridgeResult<Handle<'js>> {
        let object = self.object()?;
        self.engine(object.get::<_, Value<'js>>(index)).map(Handle::new)
    }
}
