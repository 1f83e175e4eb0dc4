//! Byte format for virtualized page content.
//!
//! The format is private to the engine. Lengths and integers are zig-zag
//! varints, strings are length prefixed UTF-8 and every value carries a type
//! tag, so a reader can always tell what comes next.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use pagefill_core::{Value, VirtualizationError};

use crate::expr::Evaluation;
use crate::print::{PrintElementId, RecordedValues, Shape};

pub(crate) const VALUE_NULL: u8 = 0;
pub(crate) const VALUE_BOOL: u8 = 1;
pub(crate) const VALUE_INT: u8 = 2;
pub(crate) const VALUE_FLOAT: u8 = 3;
pub(crate) const VALUE_TEXT: u8 = 4;

pub(crate) const KIND_TEXT: u8 = 0;
pub(crate) const KIND_GRAPHIC: u8 = 1;
pub(crate) const KIND_FRAME: u8 = 2;
pub(crate) const KIND_GENERIC: u8 = 3;

/// Length written in place of an inline child list that the store owns.
pub(crate) const MANAGED_LIST_SENTINEL: i64 = -1;

type Result<T> = std::result::Result<T, VirtualizationError>;

/// Append-only sink for virtualized data.
#[derive(Debug, Default)]
pub struct VirtualizationOutput {
    buf: BytesMut,
}

impl VirtualizationOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish writing and return the bytes.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Unsigned LEB128.
    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    /// Signed integer, zig-zag encoded.
    pub fn write_int(&mut self, value: i64) {
        self.write_varint(((value << 1) ^ (value >> 63)) as u64);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_varint(value.into());
    }

    pub fn write_len(&mut self, len: usize) {
        self.write_int(len as i64);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_len(value.len());
        self.buf.put_slice(value.as_bytes());
    }

    pub fn write_opt_str(&mut self, value: Option<&str>) {
        match value {
            Some(value) => {
                self.write_bool(true);
                self.write_str(value);
            }
            None => self.write_bool(false),
        }
    }

    pub fn write_value(&mut self, value: &Value) {
        match value {
            Value::Null => self.write_u8(VALUE_NULL),
            Value::Bool(v) => {
                self.write_u8(VALUE_BOOL);
                self.write_bool(*v);
            }
            Value::Int(v) => {
                self.write_u8(VALUE_INT);
                self.write_int(*v);
            }
            Value::Float(v) => {
                self.write_u8(VALUE_FLOAT);
                self.buf.put_u64_le(v.to_bits());
            }
            Value::Text(v) => {
                self.write_u8(VALUE_TEXT);
                self.write_str(v);
            }
        }
    }

    pub fn write_id(&mut self, id: PrintElementId) {
        self.write_u32(id.origin);
        self.write_u32(id.print_index);
    }

    pub fn write_shape(&mut self, shape: Shape) {
        self.write_u8(match shape {
            Shape::Rectangle => 0,
            Shape::Line => 1,
            Shape::Ellipse => 2,
        });
    }

    /// Recorded values, distinguishing "never recorded" from "recorded
    /// nothing".
    pub fn write_recorded(&mut self, recorded: Option<&RecordedValues>) {
        let Some(recorded) = recorded else {
            self.write_bool(false);
            return;
        };
        self.write_bool(true);
        self.write_len(recorded.len());
        for (evaluation, value) in recorded.iter() {
            self.write_u8(evaluation.tag());
            self.write_value(value);
        }
    }
}

/// Sequential source of virtualized data.
#[derive(Debug, Clone)]
pub struct VirtualizationInput {
    buf: Bytes,
}

impl VirtualizationInput {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn read_u8(&mut self, context: &'static str) -> Result<u8> {
        if !self.buf.has_remaining() {
            return Err(VirtualizationError::Truncated { context });
        }
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self, context: &'static str) -> Result<bool> {
        Ok(self.read_u8(context)? != 0)
    }

    pub fn read_varint(&mut self, context: &'static str) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.read_u8(context)?;
            if shift >= 64 {
                return Err(VirtualizationError::UnknownTag { kind: "varint", tag: byte });
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_int(&mut self, context: &'static str) -> Result<i64> {
        let raw = self.read_varint(context)?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    pub fn read_u32(&mut self, context: &'static str) -> Result<u32> {
        let raw = self.read_varint(context)?;
        u32::try_from(raw).map_err(|_| VirtualizationError::Truncated { context })
    }

    /// A length. Negative lengths are reported as `None`.
    pub fn read_len(&mut self, context: &'static str) -> Result<Option<usize>> {
        let len = self.read_int(context)?;
        Ok(usize::try_from(len).ok())
    }

    pub fn read_str(&mut self, context: &'static str) -> Result<String> {
        let len = self
            .read_len(context)?
            .ok_or(VirtualizationError::Truncated { context })?;
        if self.buf.remaining() < len {
            return Err(VirtualizationError::Truncated { context });
        }
        let bytes = self.buf.copy_to_bytes(len);
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub fn read_opt_str(&mut self, context: &'static str) -> Result<Option<String>> {
        if self.read_bool(context)? {
            Ok(Some(self.read_str(context)?))
        } else {
            Ok(None)
        }
    }

    pub fn read_value(&mut self) -> Result<Value> {
        match self.read_u8("value tag")? {
            VALUE_NULL => Ok(Value::Null),
            VALUE_BOOL => Ok(Value::Bool(self.read_bool("bool value")?)),
            VALUE_INT => Ok(Value::Int(self.read_int("int value")?)),
            VALUE_FLOAT => {
                if self.buf.remaining() < 8 {
                    return Err(VirtualizationError::Truncated { context: "float value" });
                }
                Ok(Value::Float(f64::from_bits(self.buf.get_u64_le())))
            }
            VALUE_TEXT => Ok(Value::Text(self.read_str("text value")?)),
            tag => Err(VirtualizationError::UnknownTag { kind: "value", tag }),
        }
    }

    pub fn read_id(&mut self) -> Result<PrintElementId> {
        Ok(PrintElementId::new(
            self.read_u32("element origin")?,
            self.read_u32("element print index")?,
        ))
    }

    pub fn read_shape(&mut self) -> Result<Shape> {
        match self.read_u8("shape")? {
            0 => Ok(Shape::Rectangle),
            1 => Ok(Shape::Line),
            2 => Ok(Shape::Ellipse),
            tag => Err(VirtualizationError::UnknownTag { kind: "shape", tag }),
        }
    }

    pub fn read_recorded(&mut self) -> Result<Option<RecordedValues>> {
        if !self.read_bool("recorded values flag")? {
            return Ok(None);
        }
        let len = self
            .read_len("recorded values")?
            .ok_or(VirtualizationError::Truncated { context: "recorded values" })?;
        let mut recorded = RecordedValues::new();
        for _ in 0..len {
            let tag = self.read_u8("evaluation tag")?;
            let evaluation = Evaluation::from_tag(tag)
                .ok_or(VirtualizationError::UnknownTag { kind: "evaluation", tag })?;
            recorded.record(evaluation, self.read_value()?);
        }
        Ok(Some(recorded))
    }
}
