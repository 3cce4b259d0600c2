//! Declarative binary record codec.
//!
//! A [`RecordLayout`] is an ordered list of [`FieldDescriptor`]s. One generic
//! walker interprets that list three ways: [`RecordLayout::read`],
//! [`RecordLayout::write`] and [`RecordLayout::size_of`]. Write and size share
//! the same per-field length computation, so `size_of` always equals the
//! number of bytes `write` consumes.
//!
//! # Packing
//!
//! Each layout carries its own pack value (≥ 1). Before a multi-byte field of
//! width `W` the offset (relative to the record start) is moved to the next
//! pack boundary if the field would otherwise cross one. `pack = 1` means no
//! alignment at all, which is what ISHNE uses.
//!
//! # Failure
//!
//! A bounds violation before the walk starts gives
//! [`EcgError::RecordOutOfBounds`]; a field that cannot be decoded or encoded
//! gives [`EcgError::RecordField`]. Either way the whole record is aborted and
//! no partially filled value is returned.
//!
//! ```rust
//! use ecgio::record::{IntKind, RecordLayout, StringPolicy, FieldValue};
//!
//! let layout = RecordLayout::builder("Tag")
//!     .pack(1)
//!     .int("Id", IntKind::U16)
//!     .string("Label", 8, StringPolicy::MaxLengthZeroEnd)
//!     .build();
//!
//! let mut value = layout.empty_value();
//! value.set("Id", FieldValue::Int(7))?;
//! value.set("Label", FieldValue::Str(Some("II".to_string())))?;
//!
//! let size = layout.size_of(&value)?;
//! let mut buffer = vec![0u8; size];
//! assert_eq!(layout.write(&value, &mut buffer, 0, size)?, size);
//!
//! let (decoded, consumed) = layout.read(&buffer, 0, size)?;
//! assert_eq!(consumed, size);
//! assert_eq!(decoded, value);
//! # Ok::<(), ecgio::EcgError>(())
//! ```

use std::sync::Arc;

use crate::bytes::{self, TextEncoding};
use crate::error::{EcgError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl IntKind {
    pub fn width(self) -> usize {
        match self {
            IntKind::I8 | IntKind::U8 => 1,
            IntKind::I16 | IntKind::U16 => 2,
            IntKind::I32 | IntKind::U32 => 4,
            IntKind::I64 | IntKind::U64 => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntKind::I8 | IntKind::I16 | IntKind::I32 | IntKind::I64)
    }

    /// `U64` values above `i64::MAX` are carried as their two's complement bit pattern.
    fn fits(self, value: i64) -> bool {
        match self {
            IntKind::I8 => i8::try_from(value).is_ok(),
            IntKind::U8 => u8::try_from(value).is_ok(),
            IntKind::I16 => i16::try_from(value).is_ok(),
            IntKind::U16 => u16::try_from(value).is_ok(),
            IntKind::I32 => i32::try_from(value).is_ok(),
            IntKind::U32 => u32::try_from(value).is_ok(),
            IntKind::I64 | IntKind::U64 => true,
        }
    }
}

/// How a string field occupies its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPolicy {
    /// Always consumes the declared length; unused bytes are zero.
    FixedLength,
    /// Consumes the string length plus one terminator, capped at the declared maximum.
    MaxLength,
    /// Like `MaxLength`, but the last byte is always a zero terminator.
    MaxLengthZeroEnd,
}

/// Where a string field gets its (maximum) length from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringLength {
    Fixed(usize),
    /// Value of an earlier integer field of the same record.
    Field(&'static str),
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    Int(IntKind),
    IntArray(IntKind, usize),
    Str { length: StringLength, policy: StringPolicy },
    Record(Arc<RecordLayout>),
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    IntArray(Vec<i64>),
    Str(Option<String>),
    Record(RecordValue),
}

/// Decoded values of one record, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValue {
    fields: Vec<(&'static str, FieldValue)>,
}

fn missing(name: &str) -> EcgError {
    EcgError::RecordField { field: name.to_string(), reason: "no such field".to_string() }
}

fn wrong_kind(name: &str) -> EcgError {
    EcgError::RecordField { field: name.to_string(), reason: "value has the wrong kind".to_string() }
}

impl RecordValue {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Replaces a field value; the new value must have the same kind as the old one.
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<()> {
        let slot = self
            .fields
            .iter_mut()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| missing(name))?;

        if std::mem::discriminant(slot) != std::mem::discriminant(&value) {
            return Err(wrong_kind(name));
        }
        *slot = value;
        Ok(())
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(FieldValue::Int(v)) => Ok(*v),
            Some(_) => Err(wrong_kind(name)),
            None => Err(missing(name)),
        }
    }

    pub fn ints(&self, name: &str) -> Result<&[i64]> {
        match self.get(name) {
            Some(FieldValue::IntArray(v)) => Ok(v),
            Some(_) => Err(wrong_kind(name)),
            None => Err(missing(name)),
        }
    }

    pub fn string(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name) {
            Some(FieldValue::Str(v)) => Ok(v.as_deref()),
            Some(_) => Err(wrong_kind(name)),
            None => Err(missing(name)),
        }
    }

    pub fn record(&self, name: &str) -> Result<&RecordValue> {
        match self.get(name) {
            Some(FieldValue::Record(v)) => Ok(v),
            Some(_) => Err(wrong_kind(name)),
            None => Err(missing(name)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }
}

#[derive(Debug, Clone)]
pub struct RecordLayout {
    name: &'static str,
    pack: usize,
    little_endian: bool,
    encoding: TextEncoding,
    fields: Vec<FieldDescriptor>,
}

/// Fluent construction of a [`RecordLayout`].
pub struct RecordLayoutBuilder {
    layout: RecordLayout,
}

impl RecordLayoutBuilder {
    pub fn pack(mut self, pack: usize) -> Self {
        self.layout.pack = pack.max(1);
        self
    }

    pub fn little_endian(mut self, little_endian: bool) -> Self {
        self.layout.little_endian = little_endian;
        self
    }

    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.layout.encoding = encoding;
        self
    }

    pub fn field(mut self, name: &'static str, kind: FieldKind) -> Self {
        self.layout.fields.push(FieldDescriptor { name, kind });
        self
    }

    pub fn int(self, name: &'static str, kind: IntKind) -> Self {
        self.field(name, FieldKind::Int(kind))
    }

    pub fn int_array(self, name: &'static str, kind: IntKind, count: usize) -> Self {
        self.field(name, FieldKind::IntArray(kind, count))
    }

    pub fn string(self, name: &'static str, length: usize, policy: StringPolicy) -> Self {
        self.field(name, FieldKind::Str { length: StringLength::Fixed(length), policy })
    }

    /// String whose length is taken from the earlier integer field `length_field`.
    pub fn string_sized_by(
        self,
        name: &'static str,
        length_field: &'static str,
        policy: StringPolicy,
    ) -> Self {
        self.field(name, FieldKind::Str { length: StringLength::Field(length_field), policy })
    }

    pub fn record(self, name: &'static str, layout: Arc<RecordLayout>) -> Self {
        self.field(name, FieldKind::Record(layout))
    }

    pub fn build(self) -> RecordLayout {
        self.layout
    }
}

impl RecordLayout {
    /// Starts a little-endian, `pack = 1`, ASCII layout.
    pub fn builder(name: &'static str) -> RecordLayoutBuilder {
        RecordLayoutBuilder {
            layout: RecordLayout {
                name,
                pack: 1,
                little_endian: true,
                encoding: TextEncoding::Ascii,
                fields: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pack(&self) -> usize {
        self.pack
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// A value with zeroed integers, `None` strings and empty nested records.
    pub fn empty_value(&self) -> RecordValue {
        let fields = self
            .fields
            .iter()
            .map(|f| {
                let value = match &f.kind {
                    FieldKind::Int(_) => FieldValue::Int(0),
                    FieldKind::IntArray(_, n) => FieldValue::IntArray(vec![0; *n]),
                    FieldKind::Str { .. } => FieldValue::Str(None),
                    FieldKind::Record(layout) => FieldValue::Record(layout.empty_value()),
                };
                (f.name, value)
            })
            .collect();
        RecordValue { fields }
    }

    fn align(&self, pos: usize, width: usize) -> usize {
        if self.pack > 1 && width > 1 {
            let rest = pos % self.pack;
            if rest != 0 && rest + width > self.pack {
                return pos + (self.pack - rest);
            }
        }
        pos
    }

    fn alignment_width(&self, kind: &FieldKind) -> usize {
        match kind {
            FieldKind::Int(k) | FieldKind::IntArray(k, _) => k.width(),
            FieldKind::Str { .. } => 1,
            // 嵌套记录总是从pack边界开始
            FieldKind::Record(_) => self.pack,
        }
    }

    fn resolve_length(
        field: &FieldDescriptor,
        length: &StringLength,
        decoded: &[(&'static str, FieldValue)],
    ) -> Result<usize> {
        match length {
            StringLength::Fixed(n) => Ok(*n),
            StringLength::Field(source) => {
                let value = decoded
                    .iter()
                    .find(|(n, _)| n == source)
                    .map(|(_, v)| v)
                    .ok_or_else(|| EcgError::RecordField {
                        field: field.name.to_string(),
                        reason: format!("length field '{}' precedes nothing", source),
                    })?;
                match value {
                    FieldValue::Int(v) if *v >= 0 => Ok(*v as usize),
                    _ => Err(EcgError::RecordField {
                        field: field.name.to_string(),
                        reason: format!("length field '{}' is not a non-negative integer", source),
                    }),
                }
            }
        }
    }

    fn encoded_string_len(&self, text: Option<&str>, max: usize, policy: StringPolicy) -> usize {
        match policy {
            StringPolicy::FixedLength => max,
            StringPolicy::MaxLength | StringPolicy::MaxLengthZeroEnd => {
                let len = text.map_or(0, |t| self.encoding.encode(t).len());
                (len + 1).min(max)
            }
        }
    }

    /// Encoded length of one field value, shared by `size_of` and `write`.
    fn encoded_len(
        &self,
        field: &FieldDescriptor,
        value: &FieldValue,
        preceding: &[(&'static str, FieldValue)],
    ) -> Result<usize> {
        match (&field.kind, value) {
            (FieldKind::Int(k), FieldValue::Int(_)) => Ok(k.width()),
            (FieldKind::IntArray(k, n), FieldValue::IntArray(_)) => Ok(k.width() * n),
            (FieldKind::Str { length, policy }, FieldValue::Str(text)) => {
                let max = Self::resolve_length(field, length, preceding)?;
                Ok(self.encoded_string_len(text.as_deref(), max, *policy))
            }
            (FieldKind::Record(layout), FieldValue::Record(inner)) => layout.size_of(inner),
            _ => Err(wrong_kind(field.name)),
        }
    }

    fn check_shape(&self, value: &RecordValue) -> Result<()> {
        if value.fields.len() != self.fields.len()
            || self.fields.iter().zip(&value.fields).any(|(f, (n, _))| f.name != *n)
        {
            return Err(EcgError::RecordField {
                field: self.name.to_string(),
                reason: "value does not match the record layout".to_string(),
            });
        }
        Ok(())
    }

    /// Number of bytes [`write`](Self::write) would emit for `value`.
    pub fn size_of(&self, value: &RecordValue) -> Result<usize> {
        self.check_shape(value)?;
        let mut pos = 0;
        for (i, field) in self.fields.iter().enumerate() {
            let (_, v) = &value.fields[i];
            pos = self.align(pos, self.alignment_width(&field.kind));
            pos += self.encoded_len(field, v, &value.fields[..i])?;
        }
        Ok(pos)
    }

    /// Decodes a record from `buffer[offset..offset + length]`.
    ///
    /// Returns the value and the number of bytes consumed.
    pub fn read(&self, buffer: &[u8], offset: usize, length: usize) -> Result<(RecordValue, usize)> {
        let window = checked_window(buffer.len(), offset, length)?;
        self.read_window(&buffer[window])
    }

    fn read_window(&self, window: &[u8]) -> Result<(RecordValue, usize)> {
        let mut decoded: Vec<(&'static str, FieldValue)> = Vec::with_capacity(self.fields.len());
        let mut pos = 0;

        for field in &self.fields {
            pos = self.align(pos, self.alignment_width(&field.kind));
            let (value, consumed) = self.read_field(field, window, pos, &decoded)?;
            decoded.push((field.name, value));
            pos += consumed;
        }

        Ok((RecordValue { fields: decoded }, pos))
    }

    fn read_field(
        &self,
        field: &FieldDescriptor,
        window: &[u8],
        pos: usize,
        decoded: &[(&'static str, FieldValue)],
    ) -> Result<(FieldValue, usize)> {
        let truncated = |needed: usize| EcgError::RecordField {
            field: field.name.to_string(),
            reason: format!(
                "needs {} bytes at offset {}, record has {}",
                needed,
                pos,
                window.len()
            ),
        };

        match &field.kind {
            FieldKind::Int(k) => {
                if pos + k.width() > window.len() {
                    return Err(truncated(k.width()));
                }
                Ok((FieldValue::Int(self.read_int(window, pos, *k)), k.width()))
            }
            FieldKind::IntArray(k, n) => {
                let total = k.width() * n;
                if pos + total > window.len() {
                    return Err(truncated(total));
                }
                let values = (0..*n)
                    .map(|i| self.read_int(window, pos + i * k.width(), *k))
                    .collect();
                Ok((FieldValue::IntArray(values), total))
            }
            FieldKind::Str { length, policy } => {
                let max = Self::resolve_length(field, length, decoded)?;
                match policy {
                    StringPolicy::FixedLength => {
                        if pos + max > window.len() {
                            return Err(truncated(max));
                        }
                        let text =
                            bytes::read_string_with(window, pos, max, Some(0), self.encoding);
                        Ok((FieldValue::Str(text), max))
                    }
                    StringPolicy::MaxLength | StringPolicy::MaxLengthZeroEnd => {
                        let available = window.len().saturating_sub(pos).min(max);
                        let slot = &window[pos.min(window.len())..pos.min(window.len()) + available];
                        match slot.iter().position(|&b| b == 0) {
                            Some(k) => {
                                let text = (k > 0).then(|| self.encoding.decode(&slot[..k]));
                                Ok((FieldValue::Str(text), k + 1))
                            }
                            None if available == max => {
                                let text = (max > 0).then(|| self.encoding.decode(slot));
                                Ok((FieldValue::Str(text), max))
                            }
                            None => Err(truncated(max)),
                        }
                    }
                }
            }
            FieldKind::Record(layout) => {
                if pos > window.len() {
                    return Err(truncated(0));
                }
                let (inner, consumed) = layout.read_window(&window[pos..]).map_err(|e| {
                    EcgError::RecordField { field: field.name.to_string(), reason: e.to_string() }
                })?;
                Ok((FieldValue::Record(inner), consumed))
            }
        }
    }

    fn read_int(&self, window: &[u8], pos: usize, kind: IntKind) -> i64 {
        if kind.is_signed() {
            bytes::read_signed(window, pos, kind.width(), self.little_endian)
        } else {
            bytes::read_int(window, pos, kind.width(), self.little_endian)
        }
    }

    /// Encodes `value` into `buffer[offset..offset + length]`.
    ///
    /// Returns the number of bytes written, which always equals
    /// [`size_of`](Self::size_of). Bytes skipped by alignment are left as they were.
    pub fn write(
        &self,
        value: &RecordValue,
        buffer: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<usize> {
        let window = checked_window(buffer.len(), offset, length)?;
        self.check_shape(value)?;
        self.write_window(value, &mut buffer[window])
    }

    fn write_window(&self, value: &RecordValue, window: &mut [u8]) -> Result<usize> {
        let mut pos = 0;

        for (i, field) in self.fields.iter().enumerate() {
            let (_, v) = &value.fields[i];
            pos = self.align(pos, self.alignment_width(&field.kind));
            let len = self.encoded_len(field, v, &value.fields[..i])?;
            if pos + len > window.len() {
                return Err(EcgError::RecordField {
                    field: field.name.to_string(),
                    reason: format!(
                        "needs {} bytes at offset {}, record has {}",
                        len,
                        pos,
                        window.len()
                    ),
                });
            }
            self.write_field(field, v, &mut window[pos..pos + len])?;
            pos += len;
        }

        Ok(pos)
    }

    fn write_field(&self, field: &FieldDescriptor, value: &FieldValue, slot: &mut [u8]) -> Result<()> {
        let out_of_range = |v: i64| EcgError::RecordField {
            field: field.name.to_string(),
            reason: format!("value {} does not fit", v),
        };

        match (&field.kind, value) {
            (FieldKind::Int(k), FieldValue::Int(v)) => {
                if !k.fits(*v) || !bytes::write_int(*v, slot, 0, k.width(), self.little_endian) {
                    return Err(out_of_range(*v));
                }
            }
            (FieldKind::IntArray(k, n), FieldValue::IntArray(values)) => {
                if values.len() != *n {
                    return Err(EcgError::RecordField {
                        field: field.name.to_string(),
                        reason: format!("expected {} elements, got {}", n, values.len()),
                    });
                }
                for (i, v) in values.iter().enumerate() {
                    if !k.fits(*v)
                        || !bytes::write_int(*v, slot, i * k.width(), k.width(), self.little_endian)
                    {
                        return Err(out_of_range(*v));
                    }
                }
            }
            (FieldKind::Str { policy, .. }, FieldValue::Str(text)) => {
                let encoded = text.as_deref().map(|t| self.encoding.encode(t)).unwrap_or_default();
                let (body, terminated) = match policy {
                    StringPolicy::FixedLength => (slot.len(), true),
                    StringPolicy::MaxLength => (encoded.len().min(slot.len()), encoded.len() < slot.len()),
                    StringPolicy::MaxLengthZeroEnd => (slot.len().saturating_sub(1), true),
                };
                let written = bytes::copy(slot, 0, &encoded, 0, body);
                if terminated {
                    bytes::fill(slot, written, slot.len() - written, 0);
                }
            }
            (FieldKind::Record(layout), FieldValue::Record(inner)) => {
                layout.check_shape(inner)?;
                layout.write_window(inner, slot).map_err(|e| EcgError::RecordField {
                    field: field.name.to_string(),
                    reason: e.to_string(),
                })?;
            }
            _ => return Err(wrong_kind(field.name)),
        }
        Ok(())
    }
}

fn checked_window(buffer_len: usize, offset: usize, length: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(length) {
        Some(end) if end <= buffer_len => Ok(offset..end),
        _ => Err(EcgError::RecordOutOfBounds { offset, length, available: buffer_len }),
    }
}

/// A typed struct that maps onto a [`RecordLayout`].
pub trait BinaryRecord: Sized {
    fn layout() -> &'static RecordLayout;

    fn to_record(&self) -> Result<RecordValue>;

    fn from_record(value: &RecordValue) -> Result<Self>;

    fn read_from(buffer: &[u8], offset: usize, length: usize) -> Result<Self> {
        let (value, _) = Self::layout().read(buffer, offset, length)?;
        Self::from_record(&value)
    }

    fn write_to(&self, buffer: &mut [u8], offset: usize, length: usize) -> Result<usize> {
        Self::layout().write(&self.to_record()?, buffer, offset, length)
    }

    fn encoded_size(&self) -> Result<usize> {
        Self::layout().size_of(&self.to_record()?)
    }
}
