use crate::{Container, Entry, Error, Header, Result, Value, ValueKind};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::sync::Arc;

/// Leading magic of the container layer: "CO".
pub const MAGIC: [u8; 2] = *b"CO";
/// Current wire-format version. Decoders refuse anything else.
pub const VERSION: u8 = 1;

// Flags bit 0: a CRC32 trailer follows the values.
const FLAG_CRC: u8 = 0b0000_0001;
// The smallest possible value record: a 4-byte empty name plus type code.
const MIN_RECORD_LEN: u64 = 5;

/// Encode one standalone named value as a per-value wire record.
pub fn encode_value(entry: &Entry) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_records(&mut out, std::slice::from_ref(entry), &mut Vec::new())?;
    Ok(out)
}

/// Decode one standalone per-value wire record, requiring that it
/// consume the entire input.
pub fn decode_value(buf: &[u8]) -> Result<Entry> {
    let mut reader = Reader::new(buf);
    // A standalone record is decoded as the sole element of an
    // anonymous array frame.
    let root = Frame {
        name: String::new(),
        kind: FrameKind::Array,
        remaining: 1,
        entries: Vec::with_capacity(1),
    };
    let mut done = run_decode(&mut reader, buf, root)?;

    if reader.remaining() != 0 {
        return Err(Error::CorruptedData(format!(
            "{} trailing bytes after value record",
            reader.remaining()
        )));
    }
    Ok(done.entries.pop().expect("frame holds exactly one record"))
}

/// Encode a full container layer. `root` is the identity of the
/// container whose parts these are, used to reject reference cycles.
pub(crate) fn encode(
    header: &Header,
    entries: &[Entry],
    with_crc: bool,
    root: Option<*const Container>,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut path: Vec<*const Container> = root.into_iter().collect();

    write_prefix(&mut out, header, entries.len(), with_crc)?;
    encode_records(&mut out, entries, &mut path)?;

    if with_crc {
        let crc = crc32fast::hash(&out);
        out.write_u32::<LittleEndian>(crc)?;
    }
    Ok(out)
}

/// Decode a full container layer, returning its header and entries.
pub(crate) fn decode(buf: &[u8]) -> Result<(Header, Vec<Entry>)> {
    let mut reader = Reader::new(buf);
    let prefix = read_prefix(&mut reader)?;

    let root = Frame {
        name: String::new(),
        kind: FrameKind::Container {
            header: prefix.header,
            start: 0,
            crc: prefix.crc,
        },
        remaining: prefix.count,
        entries: entries_with_capacity(prefix.count)?,
    };
    let done = run_decode(&mut reader, buf, root)?;

    if reader.remaining() != 0 {
        return Err(Error::CorruptedData(format!(
            "{} trailing bytes after container",
            reader.remaining()
        )));
    }
    let FrameKind::Container { header, .. } = done.kind else {
        unreachable!("root frame is a container");
    };
    Ok((header, done.entries))
}

struct Frame {
    name: String,
    kind: FrameKind,
    remaining: u32,
    entries: Vec<Entry>,
}

enum FrameKind {
    Container {
        header: Header,
        start: usize,
        crc: bool,
    },
    Array,
}

// The iterative decode loop. Nested containers and arrays push frames
// instead of recursing, so decode depth is bounded by input size rather
// than stack size. Returns the completed root frame.
fn run_decode(reader: &mut Reader<'_>, buf: &[u8], root: Frame) -> Result<Frame> {
    let mut stack = vec![root];

    loop {
        if stack.last().expect("stack is never empty").remaining == 0 {
            // The top frame is complete: verify its trailer, then attach
            // it to its parent, or return it if it is the root.
            let frame = stack.pop().expect("just observed");
            if let FrameKind::Container {
                start, crc: true, ..
            } = frame.kind
            {
                verify_crc(reader, buf, start)?;
            }

            let Some(parent) = stack.last_mut() else {
                return Ok(frame);
            };
            let value = match frame.kind {
                FrameKind::Container { header, .. } => {
                    Value::Container(Arc::new(Container::from_parts(header, frame.entries)))
                }
                FrameKind::Array => Value::Array(frame.entries),
            };
            parent.entries.push(Entry {
                name: frame.name,
                value,
            });
            continue;
        }

        stack.last_mut().expect("stack is never empty").remaining -= 1;

        let name = read_string(reader)?;
        let code = reader.u8()?;
        let kind = ValueKind::from_code(code)
            .ok_or_else(|| Error::CorruptedData(format!("unknown type code {code}")))?;

        let value = match kind {
            ValueKind::Null => Value::Null,
            ValueKind::Bool => match reader.u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                b => return Err(Error::CorruptedData(format!("invalid bool byte {b}"))),
            },
            ValueKind::Int16 => Value::Int16(LittleEndian::read_i16(reader.take(2)?)),
            ValueKind::UInt16 => Value::UInt16(LittleEndian::read_u16(reader.take(2)?)),
            ValueKind::Int32 => Value::Int32(LittleEndian::read_i32(reader.take(4)?)),
            ValueKind::UInt32 => Value::UInt32(LittleEndian::read_u32(reader.take(4)?)),
            // Exactly four bytes on the wire, so the 32-bit range check
            // holds by construction.
            ValueKind::Long32 => Value::Long32(LittleEndian::read_i32(reader.take(4)?)),
            ValueKind::ULong32 => Value::ULong32(LittleEndian::read_u32(reader.take(4)?)),
            ValueKind::Int64 => Value::Int64(LittleEndian::read_i64(reader.take(8)?)),
            ValueKind::UInt64 => Value::UInt64(LittleEndian::read_u64(reader.take(8)?)),
            ValueKind::Float32 => {
                Value::Float32(f32::from_bits(LittleEndian::read_u32(reader.take(4)?)))
            }
            ValueKind::Float64 => {
                Value::Float64(f64::from_bits(LittleEndian::read_u64(reader.take(8)?)))
            }
            ValueKind::Bytes => {
                let len = reader.u32()? as usize;
                Value::Bytes(reader.take(len)?.to_vec())
            }
            ValueKind::String => {
                let len = reader.u32()? as usize;
                Value::String(utf8(reader.take(len)?)?)
            }
            ValueKind::Container => {
                let start = reader.pos;
                let prefix = read_prefix(reader)?;
                stack.push(Frame {
                    name,
                    kind: FrameKind::Container {
                        header: prefix.header,
                        start,
                        crc: prefix.crc,
                    },
                    remaining: prefix.count,
                    entries: entries_with_capacity(prefix.count)?,
                });
                continue;
            }
            ValueKind::Array => {
                let count = reader.u32()?;
                check_count(count, reader)?;
                stack.push(Frame {
                    name,
                    kind: FrameKind::Array,
                    remaining: count,
                    entries: entries_with_capacity(count)?,
                });
                continue;
            }
        };
        stack
            .last_mut()
            .expect("stack is never empty")
            .entries
            .push(Entry { name, value });
    }
}

// Encode per-value records onto |out|, iteratively. |path| holds the
// identities of every open container, for cycle rejection.
fn encode_records(
    out: &mut Vec<u8>,
    entries: &[Entry],
    path: &mut Vec<*const Container>,
) -> Result<()> {
    enum Job {
        Record(Entry),
        ExitContainer,
    }

    let mut stack: Vec<Job> = entries.iter().rev().cloned().map(Job::Record).collect();

    while let Some(job) = stack.pop() {
        let entry = match job {
            Job::Record(entry) => entry,
            Job::ExitContainer => {
                path.pop();
                continue;
            }
        };

        write_string(out, &entry.name)?;
        out.push(entry.value.kind().code());

        match entry.value {
            Value::Null => (),
            Value::Bool(v) => out.push(v as u8),
            Value::Int16(v) => out.write_i16::<LittleEndian>(v)?,
            Value::UInt16(v) => out.write_u16::<LittleEndian>(v)?,
            Value::Int32(v) | Value::Long32(v) => out.write_i32::<LittleEndian>(v)?,
            Value::UInt32(v) | Value::ULong32(v) => out.write_u32::<LittleEndian>(v)?,
            Value::Int64(v) => out.write_i64::<LittleEndian>(v)?,
            Value::UInt64(v) => out.write_u64::<LittleEndian>(v)?,
            Value::Float32(v) => out.write_u32::<LittleEndian>(v.to_bits())?,
            Value::Float64(v) => out.write_u64::<LittleEndian>(v.to_bits())?,
            Value::Bytes(v) => {
                write_len(out, v.len())?;
                out.extend_from_slice(&v);
            }
            Value::String(v) => {
                write_len(out, v.len())?;
                out.extend_from_slice(v.as_bytes());
            }
            Value::Container(child) => {
                let identity = Arc::as_ptr(&child);
                if path.contains(&identity) {
                    return Err(Error::SerializeFailed(
                        "container references itself; the wire format has no \
                         back-reference primitive"
                            .to_string(),
                    ));
                }
                path.push(identity);

                // Nested containers carry the full container layer, and
                // never a CRC trailer of their own.
                let (header, child_entries) = child.snapshot_parts();
                write_prefix(out, &header, child_entries.len(), false)?;

                stack.push(Job::ExitContainer);
                stack.extend(child_entries.into_iter().rev().map(Job::Record));
            }
            Value::Array(elements) => {
                write_len(out, elements.len())?;
                stack.extend(elements.into_iter().rev().map(Job::Record));
            }
        }
    }
    Ok(())
}

struct Prefix {
    header: Header,
    count: u32,
    crc: bool,
}

fn write_prefix(out: &mut Vec<u8>, header: &Header, count: usize, with_crc: bool) -> Result<()> {
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.push(if with_crc { FLAG_CRC } else { 0 });

    for field in [
        &header.source_id,
        &header.source_sub_id,
        &header.target_id,
        &header.target_sub_id,
        &header.message_type,
    ] {
        write_string(out, field)?;
    }
    write_len(out, count)
}

fn read_prefix(reader: &mut Reader<'_>) -> Result<Prefix> {
    let magic = reader.take(2)?;
    if magic != MAGIC {
        return Err(Error::InvalidFormat(format!(
            "bad magic {magic:02x?}, expected {MAGIC:02x?}"
        )));
    }
    let version = reader.u8()?;
    if version != VERSION {
        tracing::warn!(version, "refusing unknown wire version");
        return Err(Error::VersionMismatch {
            expected: VERSION,
            actual: version,
        });
    }
    let flags = reader.u8()?;
    if flags & !FLAG_CRC != 0 {
        return Err(Error::InvalidFormat(format!(
            "reserved flag bits set: {flags:#04x}"
        )));
    }

    let mut header = Header::default();
    for field in [
        &mut header.source_id,
        &mut header.source_sub_id,
        &mut header.target_id,
        &mut header.target_sub_id,
        &mut header.message_type,
    ] {
        *field = read_string(reader)?;
    }

    let count = reader.u32()?;
    check_count(count, reader)?;

    Ok(Prefix {
        header,
        count,
        crc: flags & FLAG_CRC != 0,
    })
}

fn verify_crc(reader: &mut Reader<'_>, buf: &[u8], start: usize) -> Result<()> {
    let actual = crc32fast::hash(&buf[start..reader.pos]);
    let expected = reader.u32()?;
    if actual != expected {
        tracing::warn!(expected, actual, "crc trailer mismatch");
        return Err(Error::CorruptedData(format!(
            "crc mismatch: trailer {expected:#010x}, computed {actual:#010x}"
        )));
    }
    Ok(())
}

// Every record is at least MIN_RECORD_LEN bytes, so a count which can't
// fit the remaining input is corrupt. This also bounds how much memory
// an attacker-controlled count can make us preallocate.
fn check_count(count: u32, reader: &Reader<'_>) -> Result<()> {
    if count as u64 * MIN_RECORD_LEN > reader.remaining() as u64 {
        return Err(Error::CorruptedData(format!(
            "value count {count} exceeds remaining input"
        )));
    }
    Ok(())
}

fn entries_with_capacity(count: u32) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    entries
        .try_reserve(count as usize)
        .map_err(|_| Error::AllocationFailed(count as usize * std::mem::size_of::<Entry>()))?;
    Ok(entries)
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| Error::SerializeFailed(format!("length {len} exceeds u32")))?;
    out.write_u32::<LittleEndian>(len)?;
    Ok(())
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<()> {
    write_len(out, s.len())?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn read_string(reader: &mut Reader<'_>) -> Result<String> {
    let len = reader.u32()? as usize;
    utf8(reader.take(len)?)
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|err| Error::EncodingError(err.to_string()))
}

struct Reader<'b> {
    buf: &'b [u8],
    pos: usize,
}

impl<'b> Reader<'b> {
    fn new(buf: &'b [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'b [u8]> {
        if len > self.remaining() {
            return Err(Error::CorruptedData(format!(
                "input underrun: need {len} bytes, {} remain",
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }
}

/// ChunkIter lazily yields fixed-size chunks of an encoded container.
/// Chunks are cheap slices of one shared buffer.
pub struct ChunkIter {
    buf: bytes::Bytes,
    chunk_size: usize,
    pos: usize,
}

impl ChunkIter {
    pub(crate) fn new(buf: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            buf: bytes::Bytes::from(buf),
            chunk_size: chunk_size.max(1),
            pos: 0,
        }
    }

    /// Total encoded length, in bytes.
    pub fn total_len(&self) -> usize {
        self.buf.len()
    }
}

impl Iterator for ChunkIter {
    type Item = bytes::Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let end = (self.pos + self.chunk_size).min(self.buf.len());
        let chunk = self.buf.slice(self.pos..end);
        self.pos = end;
        Some(chunk)
    }
}
