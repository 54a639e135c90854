//! YUV4MPEG2 file source.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use super::FrameSource;
use crate::frame::Frame;
use crate::y4m::{planes_to_rgb, Y4mHeader, FRAME_MAGIC};

/// Longest header or frame line accepted before the stream is declared corrupt.
const MAX_LINE_BYTES: u64 = 1024;

pub struct Y4mSource {
    reader: Option<Box<dyn BufRead + Send>>,
    header: Y4mHeader,
    frame_count: u64,
    payload_len: usize,
    payload: Vec<u8>,
}

impl Y4mSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open y4m file {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(mut reader: R) -> Result<Self> {
        let line = read_line(&mut reader)?.ok_or_else(|| anyhow!("empty y4m stream"))?;
        let header = Y4mHeader::parse(&line)?;
        let payload_len = header.frame_len()?;
        log::info!(
            "Y4mSource: {}x{} C{} at {:.3} fps",
            header.width,
            header.height,
            header.colorspace.tag(),
            header.frame_rate()
        );
        Ok(Self {
            reader: Some(Box::new(reader)),
            header,
            frame_count: 0,
            payload_len,
            payload: Vec::new(),
        })
    }

    pub fn header(&self) -> &Y4mHeader {
        &self.header
    }
}

impl FrameSource for Y4mSource {
    fn frame_rate(&self) -> f64 {
        self.header.frame_rate()
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.header.width, self.header.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let Some(line) = read_line(reader)? else {
            return Ok(None);
        };
        if !line.starts_with(FRAME_MAGIC) {
            return Err(anyhow!(
                "expected FRAME marker before frame {}, found '{}'",
                self.frame_count,
                line
            ));
        }
        // Grows with the bytes actually present, so a header that promises more
        // than the file holds cannot force the allocation up front.
        self.payload.clear();
        let read = reader
            .take(self.payload_len as u64)
            .read_to_end(&mut self.payload)
            .with_context(|| format!("failed to read y4m frame {}", self.frame_count))?;
        if read != self.payload_len {
            return Err(anyhow!(
                "truncated y4m frame {}: {} of {} bytes",
                self.frame_count,
                read,
                self.payload_len
            ));
        }

        let (w, h) = (self.header.width as usize, self.header.height as usize);
        let rgb = planes_to_rgb(&self.payload, w, h, self.header.colorspace);
        let frame = Frame::new(self.frame_count, self.header.width, self.header.height, rgb)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            log::debug!("Y4mSource: closed after {} frames", self.frame_count);
        }
    }
}

/// Read one `\n`-terminated line, `None` at a clean end of stream.
fn read_line<R: BufRead + ?Sized>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let read = reader
        .take(MAX_LINE_BYTES)
        .read_until(b'\n', &mut buf)
        .or_else(|err| match err.kind() {
            ErrorKind::UnexpectedEof => Ok(0),
            _ => Err(err),
        })?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        return Err(anyhow!("unterminated y4m line"));
    }
    buf.pop();
    let line = String::from_utf8(buf).context("y4m line is not valid text")?;
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stream(header: &str, frames: &[Vec<u8>]) -> Cursor<Vec<u8>> {
        let mut bytes = header.as_bytes().to_vec();
        for payload in frames {
            bytes.extend_from_slice(b"FRAME\n");
            bytes.extend_from_slice(payload);
        }
        Cursor::new(bytes)
    }

    #[test]
    fn reads_mono_frames_in_order() {
        let cursor = stream("YUV4MPEG2 W2 H2 F10:1 Cmono\n", &[vec![16; 4], vec![235; 4]]);
        let mut source = Y4mSource::from_reader(cursor).unwrap();
        assert_eq!(source.frame_rate(), 10.0);
        assert_eq!(source.dimensions(), (2, 2));

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(first.pixel(0, 0), [0, 0, 0]);
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.index(), 1);
        assert_eq!(second.pixel(1, 1), [255, 255, 255]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn reads_subsampled_chroma() {
        // 2x2 luma, one chroma sample per plane.
        let cursor = stream("YUV4MPEG2 W2 H2 F25:1 C420jpeg\n", &[vec![128, 128, 128, 128, 128, 128]]);
        let mut source = Y4mSource::from_reader(cursor).unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.pixel(1, 1), frame.pixel(0, 0));
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let cursor = stream("YUV4MPEG2 W2 H2 F10:1 Cmono\n", &[vec![16; 3]]);
        let mut source = Y4mSource::from_reader(cursor).unwrap();
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn header_only_stream_has_no_frames() {
        let cursor = stream("YUV4MPEG2 W2 H2 F10:1 Cmono\n", &[]);
        let mut source = Y4mSource::from_reader(cursor).unwrap();
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn closed_source_yields_nothing() {
        let cursor = stream("YUV4MPEG2 W2 H2 F10:1 Cmono\n", &[vec![16; 4]]);
        let mut source = Y4mSource::from_reader(cursor).unwrap();
        source.close();
        source.close();
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn oversized_header_is_rejected_before_reading_frames() {
        let crafted = b"YUV4MPEG2 W4294967295 H4294967295 C444\n".to_vec();
        assert!(Y4mSource::from_reader(Cursor::new(crafted)).is_err());

        let huge = stream("YUV4MPEG2 W16384 H16384 F25:1 C444\n", &[vec![0; 16]]);
        assert!(Y4mSource::from_reader(huge).is_err());
    }

    #[test]
    fn short_payload_does_not_allocate_the_promised_frame() {
        let cursor = stream("YUV4MPEG2 W8192 H8192 F25:1 Cmono\n", &[vec![16; 32]]);
        let mut source = Y4mSource::from_reader(cursor).unwrap();
        let err = source.next_frame().unwrap_err();
        assert!(format!("{err:#}").contains("truncated"));
        assert!(source.payload.capacity() < 1 << 20);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Y4mSource::from_reader(Cursor::new(b"not a video\n".to_vec())).is_err());
        assert!(Y4mSource::from_reader(Cursor::new(Vec::new())).is_err());
    }
}
