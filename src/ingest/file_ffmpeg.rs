//! Local file frame source using FFmpeg.
//!
//! Decodes the best video stream of any container FFmpeg understands and
//! converts every frame to packed RGB24.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::FrameSource;
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    /// Demuxer, decoder and scaler; `None` once the source is closed.
    decoding: Option<Decoding>,
    width: u32,
    height: u32,
    frame_rate: f64,
    frame_count: u64,
}

struct Decoding {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let frame_rate = if rate.denominator() == 0 {
            0.0
        } else {
            f64::from(rate)
        };
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        let (width, height) = (decoder.width(), decoder.height());

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg::util::format::pixel::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FileSource: opened {} (ffmpeg, {}x{}, {:.3} fps)",
            path,
            width,
            height,
            frame_rate
        );

        Ok(Self {
            path: path.to_string(),
            decoding: Some(Decoding {
                input,
                stream_index,
                decoder,
                scaler,
                eof_sent: false,
            }),
            width,
            height,
            frame_rate,
            frame_count: 0,
        })
    }
}

impl Decoding {
    /// Next decoded picture in RGB24, `None` once the decoder is drained.
    fn next_rgb(&mut self) -> Result<Option<(Vec<u8>, u32, u32)>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                return frame_to_pixels(&rgb_frame).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }

            let stream_index = self.stream_index;
            let packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index)
                .map(|(_, packet)| packet);
            match packet {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

impl FrameSource for FfmpegFileSource {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(decoding) = self.decoding.as_mut() else {
            return Ok(None);
        };
        let Some((pixels, width, height)) = decoding.next_rgb()? else {
            return Ok(None);
        };
        let frame = Frame::new(self.frame_count, width, height, pixels)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if self.decoding.take().is_some() {
            log::debug!(
                "FileSource: closed {} after {} frames",
                self.path,
                self.frame_count
            );
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its geometry")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
