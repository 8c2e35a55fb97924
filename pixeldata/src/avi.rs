//! A minimal Motion JPEG AVI writer.
//!
//! The file holds a single video stream of JPEG encoded frames
//! (`MJPG`), one `00dc` chunk per frame, followed by an `idx1` index.
//! Sizes and frame counts are patched into the headers on [`finish`].
//!
//! [`finish`]: MjpegWriter::finish
use std::io::{self, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};

/// AVIF_HASINDEX
const HAS_INDEX: u32 = 0x10;
/// AVIIF_KEYFRAME
const KEYFRAME: u32 = 0x10;

#[derive(Debug)]
pub struct MjpegWriter<W> {
    inner: W,
    riff_size_at: u64,
    total_frames_at: u64,
    header_buffer_size_at: u64,
    stream_length_at: u64,
    stream_buffer_size_at: u64,
    movi_size_at: u64,
    index: Vec<(u32, u32)>,
    largest_frame: u32,
}

impl<W> MjpegWriter<W>
where
    W: Write + Seek,
{
    /// Write the headers of a video with the given frame size and rate.
    pub fn new(mut inner: W, width: u32, height: u32, frame_rate: u32) -> io::Result<Self> {
        let frame_rate = frame_rate.max(1);

        inner.write_all(b"RIFF")?;
        let riff_size_at = inner.stream_position()?;
        inner.write_u32::<LittleEndian>(0)?;
        inner.write_all(b"AVI ")?;

        let hdrl_size_at = begin_list(&mut inner, b"hdrl")?;

        inner.write_all(b"avih")?;
        inner.write_u32::<LittleEndian>(56)?;
        inner.write_u32::<LittleEndian>(1_000_000 / frame_rate)?;
        // max bytes per second, padding granularity
        inner.write_u32::<LittleEndian>(0)?;
        inner.write_u32::<LittleEndian>(0)?;
        inner.write_u32::<LittleEndian>(HAS_INDEX)?;
        let total_frames_at = inner.stream_position()?;
        inner.write_u32::<LittleEndian>(0)?;
        // initial frames
        inner.write_u32::<LittleEndian>(0)?;
        // streams
        inner.write_u32::<LittleEndian>(1)?;
        let header_buffer_size_at = inner.stream_position()?;
        inner.write_u32::<LittleEndian>(0)?;
        inner.write_u32::<LittleEndian>(width)?;
        inner.write_u32::<LittleEndian>(height)?;
        inner.write_all(&[0; 16])?;

        let strl_size_at = begin_list(&mut inner, b"strl")?;

        inner.write_all(b"strh")?;
        inner.write_u32::<LittleEndian>(56)?;
        inner.write_all(b"vids")?;
        inner.write_all(b"MJPG")?;
        // flags
        inner.write_u32::<LittleEndian>(0)?;
        // priority, language
        inner.write_u16::<LittleEndian>(0)?;
        inner.write_u16::<LittleEndian>(0)?;
        // initial frames
        inner.write_u32::<LittleEndian>(0)?;
        // scale and rate
        inner.write_u32::<LittleEndian>(1)?;
        inner.write_u32::<LittleEndian>(frame_rate)?;
        // start
        inner.write_u32::<LittleEndian>(0)?;
        let stream_length_at = inner.stream_position()?;
        inner.write_u32::<LittleEndian>(0)?;
        let stream_buffer_size_at = inner.stream_position()?;
        inner.write_u32::<LittleEndian>(0)?;
        // quality: default
        inner.write_u32::<LittleEndian>(u32::MAX)?;
        // sample size: varies per frame
        inner.write_u32::<LittleEndian>(0)?;
        // frame rectangle
        inner.write_u16::<LittleEndian>(0)?;
        inner.write_u16::<LittleEndian>(0)?;
        inner.write_u16::<LittleEndian>(clamp_u16(width))?;
        inner.write_u16::<LittleEndian>(clamp_u16(height))?;

        inner.write_all(b"strf")?;
        inner.write_u32::<LittleEndian>(40)?;
        inner.write_u32::<LittleEndian>(40)?;
        inner.write_u32::<LittleEndian>(width)?;
        inner.write_u32::<LittleEndian>(height)?;
        // planes and bit count
        inner.write_u16::<LittleEndian>(1)?;
        inner.write_u16::<LittleEndian>(24)?;
        inner.write_all(b"MJPG")?;
        inner.write_u32::<LittleEndian>(width.saturating_mul(height).saturating_mul(3))?;
        inner.write_all(&[0; 16])?;

        end_list(&mut inner, strl_size_at)?;
        end_list(&mut inner, hdrl_size_at)?;

        let movi_size_at = begin_list(&mut inner, b"movi")?;

        Ok(MjpegWriter {
            inner,
            riff_size_at,
            total_frames_at,
            header_buffer_size_at,
            stream_length_at,
            stream_buffer_size_at,
            movi_size_at,
            index: Vec::new(),
            largest_frame: 0,
        })
    }

    /// Append one JPEG encoded frame.
    pub fn write_frame(&mut self, jpeg: &[u8]) -> io::Result<()> {
        let size = to_u32(jpeg.len() as u64)?;
        // offsets are relative to the `movi` list type
        let offset = to_u32(self.inner.stream_position()? - (self.movi_size_at + 4))?;

        self.inner.write_all(b"00dc")?;
        self.inner.write_u32::<LittleEndian>(size)?;
        self.inner.write_all(jpeg)?;
        if size % 2 == 1 {
            self.inner.write_u8(0)?;
        }

        self.index.push((offset, size));
        self.largest_frame = self.largest_frame.max(size);
        Ok(())
    }

    /// The number of frames written so far.
    pub fn frames(&self) -> usize {
        self.index.len()
    }

    /// Write the index, complete the headers,
    /// and return the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        end_list(&mut self.inner, self.movi_size_at)?;

        self.inner.write_all(b"idx1")?;
        self.inner
            .write_u32::<LittleEndian>(to_u32(self.index.len() as u64 * 16)?)?;
        for (offset, size) in &self.index {
            self.inner.write_all(b"00dc")?;
            self.inner.write_u32::<LittleEndian>(KEYFRAME)?;
            self.inner.write_u32::<LittleEndian>(*offset)?;
            self.inner.write_u32::<LittleEndian>(*size)?;
        }

        let frames = to_u32(self.index.len() as u64)?;
        let end = self.inner.stream_position()?;
        patch(&mut self.inner, self.riff_size_at, to_u32(end - self.riff_size_at - 4)?)?;
        patch(&mut self.inner, self.total_frames_at, frames)?;
        patch(&mut self.inner, self.header_buffer_size_at, self.largest_frame)?;
        patch(&mut self.inner, self.stream_length_at, frames)?;
        patch(&mut self.inner, self.stream_buffer_size_at, self.largest_frame)?;
        self.inner.seek(SeekFrom::Start(end))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Start a `LIST` chunk, returning the position of its size field.
fn begin_list<W: Write + Seek>(w: &mut W, list_type: &[u8; 4]) -> io::Result<u64> {
    w.write_all(b"LIST")?;
    let size_at = w.stream_position()?;
    w.write_u32::<LittleEndian>(0)?;
    w.write_all(list_type)?;
    Ok(size_at)
}

fn end_list<W: Write + Seek>(w: &mut W, size_at: u64) -> io::Result<()> {
    let end = w.stream_position()?;
    patch(w, size_at, to_u32(end - size_at - 4)?)?;
    w.seek(SeekFrom::Start(end))?;
    Ok(())
}

fn patch<W: Write + Seek>(w: &mut W, at: u64, value: u32) -> io::Result<()> {
    w.seek(SeekFrom::Start(at))?;
    w.write_u32::<LittleEndian>(value)
}

fn to_u32(value: u64) -> io::Result<u32> {
    u32::try_from(value)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "AVI file exceeds 4 GiB"))
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
