use serde::ser::{
    self, Serialize, SerializeMap, SerializeSeq, SerializeStruct, SerializeStructVariant,
    SerializeTuple, SerializeTupleStruct, SerializeTupleVariant, Serializer,
};
use serde_json::{Map, Number, Value};
use std::borrow::Cow;
use std::fmt;

/// Strings longer than this many characters are truncated.
pub const DEFAULT_MAX_STRING_LEN: usize = 4096;

/// Nesting depth after which values are replaced by [`CIRCULAR_PLACEHOLDER`].
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Placeholder for values nested deeper than the configured depth, which is
/// how self-referencing graphs show up when walked through `Serialize`.
pub const CIRCULAR_PLACEHOLDER: &str = "[Circular]";

/// JSON shaping that never fails.
///
/// Any `Serialize` value is turned into a [`serde_json::Value`]. Sub-values
/// whose `Serialize` impl errors are replaced by an `[Unserializable: ..]`
/// placeholder, values nested past `max_depth` by `[Circular]`, and every
/// string longer than `max_string_len` characters keeps only its head and
/// tail around an elision marker. The output for a given input is
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeSerializer {
    max_string_len: usize,
    max_depth: usize,
}

impl Default for SafeSerializer {
    fn default() -> Self {
        Self {
            max_string_len: DEFAULT_MAX_STRING_LEN,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl SafeSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A serializer that keeps strings intact and only guards against
    /// failing or runaway values.
    pub fn untruncated() -> Self {
        Self {
            max_string_len: usize::MAX,
            ..Self::default()
        }
    }

    pub fn with_max_string_len(mut self, max_string_len: usize) -> Self {
        self.max_string_len = max_string_len;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_string_len(&self) -> usize {
        self.max_string_len
    }

    /// Shape `value` into a JSON tree.
    pub fn to_value<T: Serialize + ?Sized>(&self, value: &T) -> Value {
        shape(self, value, 0)
    }

    /// Shape `value` and drop the named top-level fields if it is an object.
    pub fn to_value_omitting<T: Serialize + ?Sized>(&self, value: &T, omit: &[&str]) -> Value {
        let mut value = self.to_value(value);
        if let Value::Object(map) = &mut value {
            for field in omit {
                map.remove(*field);
            }
        }
        value
    }

    /// Shape `value` and render it as a JSON string.
    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> String {
        // A shaped tree only holds string keys and finite numbers.
        serde_json::to_string(&self.to_value(value))
            .unwrap_or_else(|e| format!("\"{}\"", unserializable(&e)))
    }

    /// Apply the head/tail truncation rule to a single string.
    pub fn truncate<'a>(&self, value: &'a str) -> Cow<'a, str> {
        // Byte length bounds the char count from above.
        if value.len() <= self.max_string_len {
            return Cow::Borrowed(value);
        }

        let chars = value.chars().count();
        if chars <= self.max_string_len {
            return Cow::Borrowed(value);
        }

        let keep = self.max_string_len / 2;
        let elided = chars - self.max_string_len;

        let head_end = value
            .char_indices()
            .nth(keep)
            .map(|(i, _)| i)
            .unwrap_or(value.len());
        let tail_start = value
            .char_indices()
            .nth(chars - keep)
            .map(|(i, _)| i)
            .unwrap_or(value.len());

        Cow::Owned(format!(
            "{}\n... truncated {} characters ...\n{}",
            &value[..head_end],
            elided,
            &value[tail_start..]
        ))
    }
}

fn unserializable(reason: &dyn fmt::Display) -> String {
    format!("[Unserializable: {}]", reason)
}

fn shape<T: Serialize + ?Sized>(config: &SafeSerializer, value: &T, depth: usize) -> Value {
    if depth > config.max_depth {
        return Value::String(CIRCULAR_PLACEHOLDER.to_string());
    }

    match value.serialize(ValueShaper { config, depth }) {
        Ok(value) => value,
        Err(e) => Value::String(unserializable(&e)),
    }
}

fn key_string(key: Value) -> String {
    match key {
        Value::String(key) => key,
        key => key.to_string(),
    }
}

#[derive(Debug)]
struct ShapeError(String);

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl ser::Error for ShapeError {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        ShapeError(msg.to_string())
    }
}

impl std::error::Error for ShapeError {}

#[derive(Clone, Copy)]
struct ValueShaper<'a> {
    config: &'a SafeSerializer,
    depth: usize,
}

struct SeqShaper<'a> {
    config: &'a SafeSerializer,
    depth: usize,
    items: Vec<Value>,
}

struct MapShaper<'a> {
    config: &'a SafeSerializer,
    depth: usize,
    key: Option<String>,
    map: Map<String, Value>,
}

struct VariantShaper<'a> {
    config: &'a SafeSerializer,
    depth: usize,
    variant: &'static str,
    items: Vec<Value>,
    map: Map<String, Value>,
}

impl<'a> SeqShaper<'a> {
    fn push<T: Serialize + ?Sized>(&mut self, value: &T) {
        self.items.push(shape(self.config, value, self.depth + 1));
    }
}

impl<'a> MapShaper<'a> {
    fn insert<T: Serialize + ?Sized>(&mut self, key: String, value: &T) {
        let value = shape(self.config, value, self.depth + 1);
        self.map.insert(key, value);
    }
}

impl<'a> VariantShaper<'a> {
    fn wrap(variant: &'static str, value: Value) -> Value {
        let mut wrapper = Map::new();
        wrapper.insert(variant.to_string(), value);
        Value::Object(wrapper)
    }
}

impl<'a> Serializer for ValueShaper<'a> {
    type Ok = Value;

    type Error = ShapeError;

    type SerializeSeq = SeqShaper<'a>;

    type SerializeTuple = SeqShaper<'a>;

    type SerializeTupleStruct = SeqShaper<'a>;

    type SerializeTupleVariant = VariantShaper<'a>;

    type SerializeMap = MapShaper<'a>;

    type SerializeStruct = MapShaper<'a>;

    type SerializeStructVariant = VariantShaper<'a>;

    fn serialize_bool(self, v: bool) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Self::Ok, Self::Error> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i16(self, v: i16) -> Result<Self::Ok, Self::Error> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i32(self, v: i32) -> Result<Self::Ok, Self::Error> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i64(self, v: i64) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Number(v.into()))
    }

    fn serialize_i128(self, v: i128) -> Result<Self::Ok, Self::Error> {
        if let Ok(v) = i64::try_from(v) {
            self.serialize_i64(v)
        } else if let Ok(v) = u64::try_from(v) {
            self.serialize_u64(v)
        } else {
            self.collect_str(&v)
        }
    }

    fn serialize_u8(self, v: u8) -> Result<Self::Ok, Self::Error> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u16(self, v: u16) -> Result<Self::Ok, Self::Error> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u32(self, v: u32) -> Result<Self::Ok, Self::Error> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u64(self, v: u64) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Number(v.into()))
    }

    fn serialize_u128(self, v: u128) -> Result<Self::Ok, Self::Error> {
        if let Ok(v) = u64::try_from(v) {
            self.serialize_u64(v)
        } else {
            self.collect_str(&v)
        }
    }

    fn serialize_f32(self, v: f32) -> Result<Self::Ok, Self::Error> {
        self.serialize_f64(v as f64)
    }

    fn serialize_f64(self, v: f64) -> Result<Self::Ok, Self::Error> {
        // NaN and infinities have no JSON form.
        Ok(Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null))
    }

    fn serialize_char(self, v: char) -> Result<Self::Ok, Self::Error> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Self::Ok, Self::Error> {
        Ok(Value::String(self.config.truncate(v).into_owned()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Array(
            v.iter().map(|b| Value::Number((*b).into())).collect(),
        ))
    }

    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Null)
    }

    fn serialize_some<T: ?Sized>(self, value: &T) -> Result<Self::Ok, Self::Error>
    where
        T: Serialize,
    {
        // Wrappers count towards depth.
        Ok(shape(self.config, value, self.depth + 1))
    }

    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
    ) -> Result<Self::Ok, Self::Error> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: ?Sized>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error>
    where
        T: Serialize,
    {
        Ok(shape(self.config, value, self.depth + 1))
    }

    fn serialize_newtype_variant<T: ?Sized>(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error>
    where
        T: Serialize,
    {
        let inner = shape(self.config, value, self.depth + 1);
        Ok(VariantShaper::wrap(variant, inner))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Ok(SeqShaper {
            config: self.config,
            depth: self.depth,
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        Ok(VariantShaper {
            config: self.config,
            depth: self.depth,
            variant,
            items: Vec::with_capacity(len),
            map: Map::new(),
        })
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Ok(MapShaper {
            config: self.config,
            depth: self.depth,
            key: None,
            map: Map::new(),
        })
    }

    fn serialize_struct(
        self,
        _: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Ok(VariantShaper {
            config: self.config,
            depth: self.depth,
            variant,
            items: Vec::new(),
            map: Map::new(),
        })
    }
}

impl<'a> SerializeSeq for SeqShaper<'a> {
    type Ok = Value;

    type Error = ShapeError;

    fn serialize_element<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        self.push(value);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Array(self.items))
    }
}

impl<'a> SerializeTuple for SeqShaper<'a> {
    type Ok = Value;

    type Error = ShapeError;

    fn serialize_element<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        self.push(value);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Array(self.items))
    }
}

impl<'a> SerializeTupleStruct for SeqShaper<'a> {
    type Ok = Value;

    type Error = ShapeError;

    fn serialize_field<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        self.push(value);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Array(self.items))
    }
}

impl<'a> SerializeTupleVariant for VariantShaper<'a> {
    type Ok = Value;

    type Error = ShapeError;

    fn serialize_field<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        self.items.push(shape(self.config, value, self.depth + 1));
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(VariantShaper::wrap(self.variant, Value::Array(self.items)))
    }
}

impl<'a> SerializeMap for MapShaper<'a> {
    type Ok = Value;

    type Error = ShapeError;

    fn serialize_key<T: ?Sized>(&mut self, key: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        // Only values are truncated.
        let keys = self.config.with_max_string_len(usize::MAX);
        self.key = Some(key_string(shape(&keys, key, self.depth + 1)));
        Ok(())
    }

    fn serialize_value<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        if let Some(key) = self.key.take() {
            self.insert(key, value);
        }
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Object(self.map))
    }
}

impl<'a> SerializeStruct for MapShaper<'a> {
    type Ok = Value;

    type Error = ShapeError;

    fn serialize_field<T: ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        self.insert(key.to_string(), value);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Object(self.map))
    }
}

impl<'a> SerializeStructVariant for VariantShaper<'a> {
    type Ok = Value;

    type Error = ShapeError;

    fn serialize_field<T: ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        let value = shape(self.config, value, self.depth + 1);
        self.map.insert(key.to_string(), value);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(VariantShaper::wrap(self.variant, Value::Object(self.map)))
    }
}
