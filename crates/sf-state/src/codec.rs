//! Tag-prefixed binary value stream: writer and checked reader.

use std::sync::OnceLock;

use sf_core::{SfError, SfResult};

/// Value tags. One byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Null = 0,
    Int32 = 1,
    Float = 2,
    Double = 3,
    Bool = 4,
    String = 5,
    FloatArray = 6,
    ObjectStart = 7,
    ObjectEnd = 8,
    ArrayStart = 9,
    ArrayEnd = 10,
}

impl Tag {
    fn from_byte(b: u8) -> Option<Tag> {
        match b {
            0 => Some(Tag::Null),
            1 => Some(Tag::Int32),
            2 => Some(Tag::Float),
            3 => Some(Tag::Double),
            4 => Some(Tag::Bool),
            5 => Some(Tag::String),
            6 => Some(Tag::FloatArray),
            7 => Some(Tag::ObjectStart),
            8 => Some(Tag::ObjectEnd),
            9 => Some(Tag::ArrayStart),
            10 => Some(Tag::ArrayEnd),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Tag::Null => "NULL",
            Tag::Int32 => "INT32",
            Tag::Float => "FLOAT",
            Tag::Double => "DOUBLE",
            Tag::Bool => "BOOL",
            Tag::String => "STRING",
            Tag::FloatArray => "FLOAT_ARRAY",
            Tag::ObjectStart => "OBJECT_START",
            Tag::ObjectEnd => "OBJECT_END",
            Tag::ArrayStart => "ARRAY_START",
            Tag::ArrayEnd => "ARRAY_END",
        }
    }
}

fn trace_enabled() -> bool {
    static FLAG: OnceLock<bool> = OnceLock::new();
    *FLAG.get_or_init(|| std::env::var_os("DSPX_DEBUG_TOON").is_some())
}

macro_rules! codec_trace {
    ($($arg:tt)*) => {
        if trace_enabled() {
            log::trace!($($arg)*);
        }
    };
}

// ═══════════════════════════════════════════════════════════════════════════
// WRITER
// ═══════════════════════════════════════════════════════════════════════════

/// Appends tagged values to a growable byte buffer.
#[derive(Debug, Default)]
pub struct SnapshotWriter {
    buf: Vec<u8>,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    fn tag(&mut self, t: Tag) {
        codec_trace!("write {}", t.name());
        self.buf.push(t as u8);
    }

    pub fn write_null(&mut self) {
        self.tag(Tag::Null);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.tag(Tag::Int32);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.tag(Tag::Float);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.tag(Tag::Double);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.tag(Tag::Bool);
        self.buf.push(v as u8);
    }

    pub fn write_string(&mut self, s: &str) {
        self.tag(Tag::String);
        self.buf.extend_from_slice(&(s.len() as i32).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_f32_array(&mut self, v: &[f32]) {
        self.tag(Tag::FloatArray);
        self.buf.extend_from_slice(&(v.len() as i32).to_le_bytes());
        for &x in v {
            self.buf.extend_from_slice(&x.to_le_bytes());
        }
    }

    pub fn begin_object(&mut self) {
        self.tag(Tag::ObjectStart);
    }

    pub fn end_object(&mut self) {
        self.tag(Tag::ObjectEnd);
    }

    pub fn begin_array(&mut self) {
        self.tag(Tag::ArrayStart);
    }

    pub fn end_array(&mut self) {
        self.tag(Tag::ArrayEnd);
    }

    /// Field key inside an object: written as a STRING value.
    pub fn field(&mut self, name: &str) {
        self.write_string(name);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// READER
// ═══════════════════════════════════════════════════════════════════════════

/// Checked reader over a tagged byte stream.
///
/// Every `expect_*` method fails with `CorruptSnapshot` (with byte offset and
/// the mismatching tag) instead of panicking, so a truncated or foreign byte
/// stream is always a clean error.
#[derive(Debug)]
pub struct SnapshotReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SnapshotReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Rewind to the start of the stream (used for the two-pass load).
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn corrupt(&self, what: impl Into<String>) -> SfError {
        SfError::CorruptSnapshot(format!("{} at byte {}", what.into(), self.pos))
    }

    fn take(&mut self, n: usize) -> SfResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(self.corrupt(format!("unexpected end of stream (need {n} bytes)")));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Read the next tag without consuming it.
    pub fn peek_tag(&self) -> SfResult<Tag> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| self.corrupt("unexpected end of stream"))?;
        Tag::from_byte(b).ok_or_else(|| self.corrupt(format!("unknown tag byte {b:#04x}")))
    }

    /// Read and consume the next tag.
    pub fn read_tag(&mut self) -> SfResult<Tag> {
        let t = self.peek_tag()?;
        self.pos += 1;
        codec_trace!("read {}", t.name());
        Ok(t)
    }

    fn expect_tag(&mut self, want: Tag) -> SfResult<()> {
        let got = self.read_tag()?;
        if got != want {
            self.pos -= 1;
            return Err(self.corrupt(format!("expected {}, found {}", want.name(), got.name())));
        }
        Ok(())
    }

    pub fn read_i32(&mut self) -> SfResult<i32> {
        self.expect_tag(Tag::Int32)?;
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f32(&mut self) -> SfResult<f32> {
        self.expect_tag(Tag::Float)?;
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f64(&mut self) -> SfResult<f64> {
        self.expect_tag(Tag::Double)?;
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_bool(&mut self) -> SfResult<bool> {
        self.expect_tag(Tag::Bool)?;
        let b = self.take(1)?;
        Ok(b[0] != 0)
    }

    pub fn read_string(&mut self) -> SfResult<String> {
        self.expect_tag(Tag::String)?;
        let len = {
            let b = self.take(4)?;
            i32::from_le_bytes([b[0], b[1], b[2], b[3]])
        };
        if len < 0 {
            return Err(self.corrupt(format!("negative string length {len}")));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.corrupt("invalid UTF-8 in string"))
    }

    pub fn read_f32_array(&mut self) -> SfResult<Vec<f32>> {
        self.expect_tag(Tag::FloatArray)?;
        let len = {
            let b = self.take(4)?;
            i32::from_le_bytes([b[0], b[1], b[2], b[3]])
        };
        if len < 0 {
            return Err(self.corrupt(format!("negative array length {len}")));
        }
        let bytes = self.take(len as usize * 4)?;
        let mut out = Vec::with_capacity(len as usize);
        for chunk in bytes.chunks_exact(4) {
            out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok(out)
    }

    /// Read a NULL, or an f32 array. Used for optional timestamp tracks.
    pub fn read_f32_array_or_null(&mut self) -> SfResult<Option<Vec<f32>>> {
        if self.peek_tag()? == Tag::Null {
            self.pos += 1;
            return Ok(None);
        }
        self.read_f32_array().map(Some)
    }

    pub fn expect_object_start(&mut self) -> SfResult<()> {
        self.expect_tag(Tag::ObjectStart)
    }

    pub fn expect_object_end(&mut self) -> SfResult<()> {
        self.expect_tag(Tag::ObjectEnd)
    }

    pub fn expect_array_start(&mut self) -> SfResult<()> {
        self.expect_tag(Tag::ArrayStart)
    }

    pub fn expect_array_end(&mut self) -> SfResult<()> {
        self.expect_tag(Tag::ArrayEnd)
    }

    /// Read a STRING and check it equals the expected field key.
    pub fn expect_field(&mut self, name: &str) -> SfResult<()> {
        let start = self.pos;
        let s = self.read_string()?;
        if s != name {
            self.pos = start;
            return Err(self.corrupt(format!("expected field '{name}', found '{s}'")));
        }
        Ok(())
    }

    /// Skip one complete tagged value (recursing into objects/arrays).
    ///
    /// Lets the loader validate the stage layout of a snapshot without
    /// deserializing any state.
    pub fn skip_value(&mut self) -> SfResult<()> {
        let tag = self.read_tag()?;
        match tag {
            Tag::Null => Ok(()),
            Tag::Int32 | Tag::Float => self.take(4).map(|_| ()),
            Tag::Double => self.take(8).map(|_| ()),
            Tag::Bool => self.take(1).map(|_| ()),
            Tag::String => {
                let b = self.take(4)?;
                let len = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                if len < 0 {
                    return Err(self.corrupt(format!("negative string length {len}")));
                }
                self.take(len as usize).map(|_| ())
            }
            Tag::FloatArray => {
                let b = self.take(4)?;
                let len = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                if len < 0 {
                    return Err(self.corrupt(format!("negative array length {len}")));
                }
                self.take(len as usize * 4).map(|_| ())
            }
            Tag::ObjectStart => {
                while self.peek_tag()? != Tag::ObjectEnd {
                    self.skip_value()?;
                }
                self.pos += 1;
                Ok(())
            }
            Tag::ArrayStart => {
                while self.peek_tag()? != Tag::ArrayEnd {
                    self.skip_value()?;
                }
                self.pos += 1;
                Ok(())
            }
            Tag::ObjectEnd | Tag::ArrayEnd => {
                Err(self.corrupt(format!("unbalanced {}", tag.name())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let mut w = SnapshotWriter::new();
        w.write_i32(-42);
        w.write_f32(1.5);
        w.write_f64(std::f64::consts::PI);
        w.write_bool(true);
        w.write_string("stage");
        w.write_f32_array(&[1.0, 2.0, 3.0]);
        w.write_null();

        let bytes = w.into_bytes();
        let mut r = SnapshotReader::new(&bytes);
        assert_eq!(r.read_i32().unwrap(), -42);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_f64().unwrap(), std::f64::consts::PI);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_string().unwrap(), "stage");
        assert_eq!(r.read_f32_array().unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(r.read_f32_array_or_null().unwrap(), None);
        assert!(r.is_at_end());
    }

    #[test]
    fn nested_skip() {
        let mut w = SnapshotWriter::new();
        w.begin_object();
        w.field("inner");
        w.begin_array();
        w.write_i32(1);
        w.begin_object();
        w.field("deep");
        w.write_f32_array(&[0.0; 16]);
        w.end_object();
        w.end_array();
        w.end_object();
        w.write_i32(99);

        let bytes = w.into_bytes();
        let mut r = SnapshotReader::new(&bytes);
        r.skip_value().unwrap();
        assert_eq!(r.read_i32().unwrap(), 99);
    }

    #[test]
    fn tag_mismatch_is_corrupt() {
        let mut w = SnapshotWriter::new();
        w.write_f32(1.0);
        let bytes = w.into_bytes();
        let mut r = SnapshotReader::new(&bytes);
        let err = r.read_i32().unwrap_err();
        assert!(matches!(err, SfError::CorruptSnapshot(_)));
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let mut w = SnapshotWriter::new();
        w.write_f64(1.0);
        let mut bytes = w.into_bytes();
        bytes.truncate(4);
        let mut r = SnapshotReader::new(&bytes);
        assert!(matches!(r.read_f64(), Err(SfError::CorruptSnapshot(_))));
    }

    #[test]
    fn expect_field_names_mismatch() {
        let mut w = SnapshotWriter::new();
        w.field("alpha");
        let bytes = w.into_bytes();
        let mut r = SnapshotReader::new(&bytes);
        let err = r.expect_field("beta").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("beta") && msg.contains("alpha"));
    }
}
