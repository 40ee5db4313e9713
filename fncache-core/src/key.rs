//! Canonical cache-key derivation.
//!
//! A key is the function's qualified name, the key format version and the
//! canonical JSON rendering of `[positional, keyword]`. Keyword arguments are
//! kept in a sorted map and every non-ASCII character is escaped, so the same
//! call renders to the same printable-ASCII key in every process.

use serde::ser::{self, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use crate::error::SerializationError;
use crate::identity::FunctionId;

/// Version tag embedded in every key. Bump on any change to the rendering.
pub const KEY_FORMAT_VERSION: &str = "v1";

/// One serialized argument, or the reason it could not be serialized.
///
/// Failures are deferred until key derivation so that an excluded receiver
/// never has to be serializable.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Value(Value),
    Failed(String),
}

impl Slot {
    fn of<T: Serialize + ?Sized>(value: &T) -> Self {
        if let Err(e) = value.serialize(FiniteCheck) {
            return Slot::Failed(e.to_string());
        }
        match serde_json::to_value(value) {
            Ok(v) => Slot::Value(v),
            Err(e) => Slot::Failed(e.to_string()),
        }
    }
}

/// Walks a value and rejects NaN and infinities.
///
/// serde_json renders every non-finite float as `null`, so without this check
/// `f(NaN)`, `f(inf)` and `f(-inf)` would derive the same key.
#[derive(Clone, Copy)]
struct FiniteCheck;

#[derive(Debug)]
struct NonFinite(String);

impl fmt::Display for NonFinite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NonFinite {}

impl ser::Error for NonFinite {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        NonFinite(msg.to_string())
    }
}

fn check_float(v: f64) -> Result<(), NonFinite> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(NonFinite(format!("float {v} has no canonical JSON form")))
    }
}

macro_rules! accept_scalars {
    ($($method:ident: $ty:ty),* $(,)?) => {
        $(
            fn $method(self, _: $ty) -> Result<(), NonFinite> {
                Ok(())
            }
        )*
    };
}

impl ser::Serializer for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept_scalars! {
        serialize_bool: bool,
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_i128: i128,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_u128: u128,
        serialize_char: char,
        serialize_str: &str,
        serialize_bytes: &[u8],
    }

    fn serialize_f32(self, v: f32) -> Result<(), NonFinite> {
        check_float(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<(), NonFinite> {
        check_float(v)
    }

    fn serialize_none(self) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
    ) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), NonFinite> {
        key.serialize(*self)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

/// Arguments of one memoized call.
///
/// ```
/// use fncache_core::CallArgs;
///
/// let args = CallArgs::new().arg("https://example.com").kwarg("retries", &3);
/// assert_eq!(args.positional_len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Slot>,
    keyword: BTreeMap<String, Slot>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.positional.push(Slot::of(value));
        self
    }

    /// Set a keyword argument. A repeated name replaces the earlier value.
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        self.keyword.insert(name.into(), Slot::of(value));
        self
    }

    pub fn positional_len(&self) -> usize {
        self.positional.len()
    }

    pub fn keyword_len(&self) -> usize {
        self.keyword.len()
    }
}

/// A derived cache key. Always printable ASCII.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives [`CacheKey`]s from a function identity and call arguments.
pub struct KeyBuilder;

impl KeyBuilder {
    /// Build the key for one call.
    ///
    /// With `exclude_first_arg` the first positional argument (the receiver of
    /// a method) takes no part in the key, so calls on different instances
    /// share cached results.
    pub fn build(
        function: &FunctionId,
        args: &CallArgs,
        exclude_first_arg: bool,
    ) -> Result<CacheKey, SerializationError> {
        let skip = usize::from(exclude_first_arg);

        let mut positional = Vec::with_capacity(args.positional.len().saturating_sub(skip));
        for (position, slot) in args.positional.iter().enumerate().skip(skip) {
            match slot {
                Slot::Value(v) => positional.push(v.clone()),
                Slot::Failed(reason) => {
                    return Err(SerializationError::Argument {
                        position,
                        reason: reason.clone(),
                    })
                }
            }
        }

        let mut keyword = serde_json::Map::new();
        for (name, slot) in &args.keyword {
            match slot {
                Slot::Value(v) => {
                    keyword.insert(name.clone(), v.clone());
                }
                Slot::Failed(reason) => {
                    return Err(SerializationError::Keyword {
                        name: name.clone(),
                        reason: reason.clone(),
                    })
                }
            }
        }

        let rendered = serde_json::to_string(&Value::Array(vec![
            Value::Array(positional),
            Value::Object(keyword),
        ]))
        .map_err(|e| SerializationError::Payload {
            reason: e.to_string(),
        })?;

        Ok(CacheKey(format!(
            "{}|{}|{}",
            escape_non_ascii(&function.qualified_name()),
            KEY_FORMAT_VERSION,
            escape_non_ascii(&rendered)
        )))
    }
}

/// Replace every character outside printable ASCII with `\uXXXX` escapes.
///
/// Applied to serde_json output this still yields valid JSON, since raw
/// non-ASCII can only occur inside string literals.
fn escape_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if (' '..='~').contains(&c) {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{:04x}", unit);
            }
        }
    }
    out
}
