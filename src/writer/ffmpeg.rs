//! MPEG-4 Part 2 summary writer using FFmpeg.
//!
//! Produces an `.mp4` with the `mp4v` codec, the same container most players
//! and browsers accept without extra codecs.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::format::pixel::Pixel;
use ffmpeg::Rational;

use super::{StreamSpec, VideoSink};
use crate::frame::{Frame, RGB_CHANNELS};
use crate::y4m::rate_to_ratio;

struct Encoding {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    spec: StreamSpec,
    next_pts: i64,
}

#[derive(Default)]
pub struct FfmpegSink {
    encoding: Option<Encoding>,
}

impl FfmpegSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoding {
    fn drain(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("failed to write encoded packet")?;
        }
        Ok(())
    }
}

impl VideoSink for FfmpegSink {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn open(&mut self, path: &Path, spec: StreamSpec) -> Result<()> {
        if self.encoding.is_some() {
            return Err(anyhow!("ffmpeg sink is already open"));
        }
        ffmpeg::init().context("initialize ffmpeg")?;

        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("ffmpeg build has no mpeg4 encoder"))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let (num, den) = rate_to_ratio(spec.frame_rate);
        let encoder_time_base = Rational::new(den as i32, num as i32);

        let mut stream = output.add_stream(codec).context("add output stream")?;
        let mut video = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create video encoder")?;
        video.set_width(spec.width);
        video.set_height(spec.height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(encoder_time_base);
        video.set_frame_rate(Some(Rational::new(num as i32, den as i32)));
        if global_header {
            video.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = video.open_as(codec).context("open mpeg4 encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);

        output.write_header().context("write container header")?;
        let stream_time_base = output
            .stream(0)
            .map(|s| s.time_base())
            .ok_or_else(|| anyhow!("output stream disappeared after header"))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            Pixel::RGB24,
            spec.width,
            spec.height,
            Pixel::YUV420P,
            spec.width,
            spec.height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        self.encoding = Some(Encoding {
            output,
            encoder,
            scaler,
            encoder_time_base,
            stream_time_base,
            spec,
            next_pts: 0,
        });
        Ok(())
    }

    fn append(&mut self, frame: &Frame) -> Result<()> {
        let enc = self
            .encoding
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg sink is not open"))?;
        if frame.dimensions() != (enc.spec.width, enc.spec.height) {
            return Err(anyhow!(
                "frame {} does not match the {}x{} stream",
                frame.index(),
                enc.spec.width,
                enc.spec.height
            ));
        }

        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, enc.spec.width, enc.spec.height);
        let row_bytes = enc.spec.width as usize * RGB_CHANNELS;
        let stride = rgb.stride(0);
        let plane = rgb.data_mut(0);
        for (row, src) in frame.pixels().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            plane
                .get_mut(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(src);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        enc.scaler.run(&rgb, &mut yuv).context("scale frame to YUV")?;
        yuv.set_pts(Some(enc.next_pts));
        enc.next_pts += 1;

        enc.encoder
            .send_frame(&yuv)
            .with_context(|| format!("failed to encode frame {}", frame.index()))?;
        enc.drain()
    }

    fn finalize(&mut self) -> Result<()> {
        let mut enc = self
            .encoding
            .take()
            .ok_or_else(|| anyhow!("ffmpeg sink is not open"))?;
        enc.encoder.send_eof().context("flush mpeg4 encoder")?;
        enc.drain()?;
        enc.output.write_trailer().context("write container trailer")?;
        log::debug!("FfmpegSink: finalized {} frames", enc.next_pts);
        Ok(())
    }

    fn abort(&mut self) {
        self.encoding.take();
    }
}
