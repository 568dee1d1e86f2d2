//! Forward-only ZIP writer for sinks that cannot seek (HTTP bodies).
//!
//! Sizes and CRCs are not known when a member starts, so every local header sets the
//! data-descriptor flag and the real values follow the compressed data. The central directory is
//! written by [`ZipStreamWriter::finish`], or on drop if the writer was abandoned halfway.

use std::io::{self, Write};
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, Timelike};
use flate2::write::DeflateEncoder;
use flate2::Compression;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const ZIP64_EOCD_SIG: u32 = 0x0606_4b50;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;

const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const FLAG_UTF8: u16 = 1 << 11;
const METHOD_DEFLATE: u16 = 8;
const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;
const CREATOR_UNIX: u16 = 3 << 8;

const ZIP64_EXTRA_ID: u16 = 0x0001;
const TIMESTAMP_EXTRA_ID: u16 = 0x5455;

const U32_SENTINEL: u64 = 0xFFFF_FFFF;
const U16_SENTINEL: u64 = 0xFFFF;

/// Members at least this large are written with ZIP64 sizes. Kept well below 4 GiB so that
/// deflate expansion of incompressible data cannot overflow a 32-bit compressed size.
pub const ZIP64_THRESHOLD: u64 = 0x7FFF_FFFF;

/// Metadata of one archive member.
#[derive(Debug, Clone)]
pub struct MemberHeader {
    /// Archive-relative name with `/` separators.
    pub name: String,
    /// Expected uncompressed size; decides whether ZIP64 sizes are used.
    pub size: u64,
    /// Unix mode bits (file type and permissions).
    pub mode: u32,
    pub modified: SystemTime,
}

struct CentralRecord {
    name: Vec<u8>,
    crc32: u32,
    compressed: u64,
    uncompressed: u64,
    offset: u64,
    dos_time: u16,
    dos_date: u16,
    unix_mtime: u32,
    external_attrs: u32,
    zip64: bool,
}

struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub struct ZipStreamWriter<W: Write> {
    out: CountingWriter<W>,
    records: Vec<CentralRecord>,
    finished: bool,
}

impl<W: Write> ZipStreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { out: CountingWriter { inner, written: 0 }, records: Vec::new(), finished: false }
    }

    /// Writes the local header of a new member and returns a writer for its contents.
    /// The member is complete once [`MemberWriter::finish`] returns.
    pub fn start_member(&mut self, header: &MemberHeader) -> io::Result<MemberWriter<'_, W>> {
        let name = header.name.as_bytes().to_vec();
        if name.len() > u16::MAX as usize {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "member name too long"));
        }
        let zip64 = header.size >= ZIP64_THRESHOLD;
        let (dos_time, dos_date) = dos_datetime(header.modified);
        let unix_mtime = unix_seconds(header.modified);
        let offset = self.out.written;

        let mut extra = Vec::with_capacity(29);
        if zip64 {
            put_u16(&mut extra, ZIP64_EXTRA_ID);
            put_u16(&mut extra, 16);
            put_u64(&mut extra, 0);
            put_u64(&mut extra, 0);
        }
        put_timestamp_extra(&mut extra, unix_mtime);

        let mut buf = Vec::with_capacity(30 + name.len() + extra.len());
        put_u32(&mut buf, LOCAL_HEADER_SIG);
        put_u16(&mut buf, if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT });
        put_u16(&mut buf, FLAG_DATA_DESCRIPTOR | FLAG_UTF8);
        put_u16(&mut buf, METHOD_DEFLATE);
        put_u16(&mut buf, dos_time);
        put_u16(&mut buf, dos_date);
        put_u32(&mut buf, 0); // crc, in data descriptor
        let size_field = if zip64 { U32_SENTINEL as u32 } else { 0 };
        put_u32(&mut buf, size_field);
        put_u32(&mut buf, size_field);
        put_u16(&mut buf, name.len() as u16);
        put_u16(&mut buf, extra.len() as u16);
        buf.extend_from_slice(&name);
        buf.extend_from_slice(&extra);
        self.out.write_all(&buf)?;

        let record = CentralRecord {
            name,
            crc32: 0,
            compressed: 0,
            uncompressed: 0,
            offset,
            dos_time,
            dos_date,
            unix_mtime,
            external_attrs: header.mode << 16,
            zip64,
        };
        Ok(MemberWriter {
            zip: self,
            record,
            encoder: DeflateEncoder::new(Vec::new(), Compression::default()),
            hasher: crc32fast::Hasher::new(),
            uncompressed: 0,
            compressed: 0,
        })
    }

    /// Writes the central directory and end records and flushes the sink.
    pub fn finish(mut self) -> io::Result<u64> {
        self.write_central_directory()?;
        Ok(self.out.written)
    }

    fn write_central_directory(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let cd_start = self.out.written;
        for record in &self.records {
            let buf = central_header(record);
            self.out.write_all(&buf)?;
        }
        let cd_end = self.out.written;
        let cd_size = cd_end - cd_start;
        let count = self.records.len() as u64;

        let mut buf = Vec::with_capacity(98);
        let needs_zip64 = count >= U16_SENTINEL || cd_start >= U32_SENTINEL || cd_size >= U32_SENTINEL;
        if needs_zip64 {
            put_u32(&mut buf, ZIP64_EOCD_SIG);
            put_u64(&mut buf, 44);
            put_u16(&mut buf, CREATOR_UNIX | VERSION_ZIP64);
            put_u16(&mut buf, VERSION_ZIP64);
            put_u32(&mut buf, 0);
            put_u32(&mut buf, 0);
            put_u64(&mut buf, count);
            put_u64(&mut buf, count);
            put_u64(&mut buf, cd_size);
            put_u64(&mut buf, cd_start);

            put_u32(&mut buf, ZIP64_LOCATOR_SIG);
            put_u32(&mut buf, 0);
            put_u64(&mut buf, cd_end);
            put_u32(&mut buf, 1);
        }
        put_u32(&mut buf, EOCD_SIG);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, count.min(U16_SENTINEL) as u16);
        put_u16(&mut buf, count.min(U16_SENTINEL) as u16);
        put_u32(&mut buf, cd_size.min(U32_SENTINEL) as u32);
        put_u32(&mut buf, cd_start.min(U32_SENTINEL) as u32);
        put_u16(&mut buf, 0);
        self.out.write_all(&buf)?;
        self.out.flush()
    }
}

impl<W: Write> Drop for ZipStreamWriter<W> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.write_central_directory() {
                tracing::debug!("archive finalization on drop failed: {}", e);
            }
        }
    }
}

/// Contents of the member started by [`ZipStreamWriter::start_member`].
pub struct MemberWriter<'a, W: Write> {
    zip: &'a mut ZipStreamWriter<W>,
    record: CentralRecord,
    encoder: DeflateEncoder<Vec<u8>>,
    hasher: crc32fast::Hasher,
    uncompressed: u64,
    compressed: u64,
}

impl<W: Write> MemberWriter<'_, W> {
    /// Uncompressed bytes accepted so far.
    pub fn uncompressed_len(&self) -> u64 {
        self.uncompressed
    }

    /// Whether the member was started with ZIP64 sizes.
    pub fn is_zip64(&self) -> bool {
        self.record.zip64
    }

    fn drain(&mut self) -> io::Result<()> {
        let pending = self.encoder.get_mut();
        if !pending.is_empty() {
            self.zip.out.write_all(pending)?;
            self.compressed += pending.len() as u64;
            pending.clear();
        }
        Ok(())
    }

    /// Completes the compressed stream, writes the data descriptor and records the member for
    /// the central directory. Returns the uncompressed length.
    pub fn finish(mut self) -> io::Result<u64> {
        self.encoder.try_finish()?;
        self.drain()?;

        let crc32 = self.hasher.clone().finalize();
        let mut buf = Vec::with_capacity(24);
        put_u32(&mut buf, DATA_DESCRIPTOR_SIG);
        put_u32(&mut buf, crc32);
        if self.record.zip64 {
            put_u64(&mut buf, self.compressed);
            put_u64(&mut buf, self.uncompressed);
        } else {
            put_u32(&mut buf, self.compressed as u32);
            put_u32(&mut buf, self.uncompressed as u32);
        }
        self.zip.out.write_all(&buf)?;

        let MemberWriter { zip, mut record, compressed, uncompressed, .. } = self;
        record.crc32 = crc32;
        record.compressed = compressed;
        record.uncompressed = uncompressed;
        zip.records.push(record);
        Ok(uncompressed)
    }
}

impl<W: Write> Write for MemberWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.record.zip64 && self.uncompressed + buf.len() as u64 >= ZIP64_THRESHOLD {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "member grew past its declared size"));
        }
        let n = self.encoder.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.uncompressed += n as u64;
        self.drain()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain()?;
        self.zip.out.flush()
    }
}

fn central_header(record: &CentralRecord) -> Vec<u8> {
    let mut zip64_extra = Vec::with_capacity(28);
    let uncompressed = if record.uncompressed >= U32_SENTINEL {
        put_u64(&mut zip64_extra, record.uncompressed);
        U32_SENTINEL as u32
    } else {
        record.uncompressed as u32
    };
    let compressed = if record.compressed >= U32_SENTINEL {
        put_u64(&mut zip64_extra, record.compressed);
        U32_SENTINEL as u32
    } else {
        record.compressed as u32
    };
    let offset = if record.offset >= U32_SENTINEL {
        put_u64(&mut zip64_extra, record.offset);
        U32_SENTINEL as u32
    } else {
        record.offset as u32
    };

    let mut extra = Vec::with_capacity(4 + zip64_extra.len() + 9);
    if !zip64_extra.is_empty() {
        put_u16(&mut extra, ZIP64_EXTRA_ID);
        put_u16(&mut extra, zip64_extra.len() as u16);
        extra.extend_from_slice(&zip64_extra);
    }
    put_timestamp_extra(&mut extra, record.unix_mtime);

    let version = if record.zip64 || !zip64_extra.is_empty() { VERSION_ZIP64 } else { VERSION_DEFAULT };
    let mut buf = Vec::with_capacity(46 + record.name.len() + extra.len());
    put_u32(&mut buf, CENTRAL_HEADER_SIG);
    put_u16(&mut buf, CREATOR_UNIX | version);
    put_u16(&mut buf, version);
    put_u16(&mut buf, FLAG_DATA_DESCRIPTOR | FLAG_UTF8);
    put_u16(&mut buf, METHOD_DEFLATE);
    put_u16(&mut buf, record.dos_time);
    put_u16(&mut buf, record.dos_date);
    put_u32(&mut buf, record.crc32);
    put_u32(&mut buf, compressed);
    put_u32(&mut buf, uncompressed);
    put_u16(&mut buf, record.name.len() as u16);
    put_u16(&mut buf, extra.len() as u16);
    put_u16(&mut buf, 0); // comment
    put_u16(&mut buf, 0); // disk number
    put_u16(&mut buf, 0); // internal attributes
    put_u32(&mut buf, record.external_attrs);
    put_u32(&mut buf, offset);
    buf.extend_from_slice(&record.name);
    buf.extend_from_slice(&extra);
    buf
}

fn put_timestamp_extra(buf: &mut Vec<u8>, mtime: u32) {
    put_u16(buf, TIMESTAMP_EXTRA_ID);
    put_u16(buf, 5);
    buf.push(1); // mtime present
    put_u32(buf, mtime);
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn unix_seconds(t: SystemTime) -> u32 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

/// MS-DOS time and date fields in local time. Dates before 1980 clamp to 1980-01-01.
pub(crate) fn dos_datetime(t: SystemTime) -> (u16, u16) {
    let local: DateTime<Local> = t.into();
    if local.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let year = local.year().min(2107) as u16;
    let time = ((local.hour() as u16) << 11) | ((local.minute() as u16) << 5) | (local.second() as u16 / 2);
    let date = ((year - 1980) << 9) | ((local.month() as u16) << 5) | local.day() as u16;
    (time, date)
}
