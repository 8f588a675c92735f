//! The session wire protocol
//!
//! A session is an ordered stream of binary frames. Each frame is a
//! one-byte tag, a little-endian `u32` payload length, and the payload.
//! The payload is built up with [`WriteBuffer`] and flushed when the tag
//! is sent; multi-value payloads are concatenated in write order.
//!
//! The mutation frames (`ChangeSuperClass`, `ChangeMethodTable`,
//! `ChangeMethodLiteral`, `ChangeStatics`) are queued by the VM and only
//! applied by `CommitChanges(n)`, which makes program reconstruction
//! atomic.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::{self, Write};

/// Identity map indices used by `PushFromMap`/`PopToMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MapId {
    Method = 0,
    Class = 1,
    Constant = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Frame {
    ConnectionError = 0,
    CompilerError,
    SessionEnd,
    ForceTermination,

    SpawnProcessForMain,
    RunProcess,
    WriteSnapshot,
    CollectGarbage,

    NewMap,
    DeleteMap,
    PushFromMap,
    PopToMap,

    Dup,
    Drop,
    PushNull,
    PushBoolean,
    PushNewInteger,
    PushNewDouble,
    PushNewString,
    PushNewInstance,
    PushNewArray,
    PushNewFunction,
    PushNewInitializer,
    PushNewClass,
    PushBuiltinClass,
    PushConstantList,
    PushConstantMap,

    PushNewName,

    ChangeSuperClass,
    ChangeMethodTable,
    ChangeMethodLiteral,
    ChangeStatics,
    CommitChanges,
    DiscardChanges,

    UncaughtException,
}

/// Accumulates one frame's payload.
#[derive(Default)]
pub struct WriteBuffer {
    bytes: Vec<u8>,
}

impl WriteBuffer {
    pub fn new() -> WriteBuffer {
        WriteBuffer::default()
    }

    pub fn write_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.bytes.push(value as u8);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_i32(bytes.len() as i32);
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

/// Decodes payloads on the receiving side; used by tests and VM tooling.
pub struct ReadBuffer<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> ReadBuffer<'a> {
    pub fn new(bytes: &'a [u8]) -> ReadBuffer<'a> {
        ReadBuffer { bytes, at: 0 }
    }

    pub fn read_i32(&mut self) -> i32 {
        let value = i32::from_le_bytes(self.bytes[self.at..self.at + 4].try_into().unwrap());
        self.at += 4;
        value
    }

    pub fn read_i64(&mut self) -> i64 {
        let value = i64::from_le_bytes(self.bytes[self.at..self.at + 8].try_into().unwrap());
        self.at += 8;
        value
    }

    pub fn read_f64(&mut self) -> f64 {
        let value = f64::from_le_bytes(self.bytes[self.at..self.at + 8].try_into().unwrap());
        self.at += 8;
        value
    }

    pub fn read_bool(&mut self) -> bool {
        let value = self.bytes[self.at] != 0;
        self.at += 1;
        value
    }

    pub fn read_bytes(&mut self) -> &'a [u8] {
        let length = self.read_i32() as usize;
        let value = &self.bytes[self.at..self.at + length];
        self.at += length;
        value
    }

    pub fn is_done(&self) -> bool {
        self.at == self.bytes.len()
    }
}

/// Frames payloads onto an ordered byte sink.
///
/// The compiler never observes VM responses during a compile, so the
/// connection is write-only from this side.
pub struct Connection<W: Write> {
    sink: W,
    outgoing: WriteBuffer,
}

impl<W: Write> Connection<W> {
    pub fn new(sink: W) -> Connection<W> {
        Connection {
            sink,
            outgoing: WriteBuffer::new(),
        }
    }

    pub fn outgoing(&mut self) -> &mut WriteBuffer {
        &mut self.outgoing
    }

    pub fn write_i32(&mut self, value: i32) {
        self.outgoing.write_i32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.outgoing.write_i64(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.outgoing.write_f64(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.outgoing.write_bool(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.outgoing.write_bytes(bytes);
    }

    pub fn write_str(&mut self, value: &str) {
        self.outgoing.write_str(value);
    }

    /// Flush the accumulated payload as one frame tagged `frame`.
    pub fn send(&mut self, frame: Frame) -> io::Result<()> {
        let payload = self.outgoing.take();
        self.sink.write_all(&[frame.into()])?;
        self.sink.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.sink.write_all(&payload)?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// A decoded frame, for tests and session inspection tools.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub frame: Frame,
    pub payload: Vec<u8>,
}

/// Split a byte stream back into frames.
pub fn decode_stream(bytes: &[u8]) -> Result<Vec<RawFrame>, String> {
    let mut frames = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        if at + 5 > bytes.len() {
            return Err(format!("truncated frame header at {at}"));
        }
        let frame = Frame::try_from(bytes[at]).map_err(|_| format!("bad tag {:#04x}", bytes[at]))?;
        let length =
            u32::from_le_bytes(bytes[at + 1..at + 5].try_into().unwrap()) as usize;
        at += 5;
        if at + length > bytes.len() {
            return Err(format!("truncated payload for {frame:?}"));
        }
        frames.push(RawFrame {
            frame,
            payload: bytes[at..at + length].to_vec(),
        });
        at += length;
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_roundtrip() {
        let mut connection = Connection::new(Vec::new());
        connection.write_i32(1);
        connection.send(Frame::NewMap).unwrap();
        connection.write_i32(0);
        connection.write_i64(17);
        connection.send(Frame::PushFromMap).unwrap();
        connection.send(Frame::Dup).unwrap();

        let frames = decode_stream(&connection.into_inner()).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].frame, Frame::NewMap);
        let mut reader = ReadBuffer::new(&frames[1].payload);
        assert_eq!(reader.read_i32(), 0);
        assert_eq!(reader.read_i64(), 17);
        assert!(reader.is_done());
        assert_eq!(frames[2].frame, Frame::Dup);
        assert!(frames[2].payload.is_empty());
    }

    #[test]
    fn buffer_encodes_little_endian() {
        let mut buffer = WriteBuffer::new();
        buffer.write_i32(0x0102_0304);
        buffer.write_str("hi");
        let mut connection = Connection::new(Vec::new());
        std::mem::swap(connection.outgoing(), &mut buffer);
        connection.send(Frame::PushNewString).unwrap();
        let bytes = connection.into_inner();
        assert_eq!(bytes[0], u8::from(Frame::PushNewString));
        assert_eq!(&bytes[5..9], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn decode_rejects_truncation() {
        let mut connection = Connection::new(Vec::new());
        connection.write_i64(7);
        connection.send(Frame::PushNewInteger).unwrap();
        let mut bytes = connection.into_inner();
        bytes.truncate(bytes.len() - 1);
        assert!(decode_stream(&bytes).is_err());
    }
}
