use std::path::{Path, PathBuf};

use ffmpeg::util::frame::video::Video;
use ffmpeg_next::{self as ffmpeg, codec, decoder, format, media, software, Error, Packet};
use image::RgbaImage;
use log::debug;

use crate::background::FrameSource;

const DEFAULT_FRAME_INTERVAL: f64 = 1.0 / 30.0;

/// Size that covers `width`x`height` while keeping the source aspect ratio. Even
/// dimensions keep swscale on its fast paths.
fn cover_dims(src_w: u32, src_h: u32, width: u32, height: u32) -> (u32, u32) {
    let scale = (f64::from(width) / f64::from(src_w)).max(f64::from(height) / f64::from(src_h));
    let even = |v: f64, min: u32| (((v - 1e-6).ceil() as u32 + 1) & !1).max(min);
    (even(f64::from(src_w) * scale, width), even(f64::from(src_h) * scale, height))
}

struct Stream {
    input: format::context::Input,
    index: usize,
    decoder: decoder::Video,
    time_base: f64,
    interval: f64,
    draining: bool,
}

fn open_stream(path: &Path) -> anyhow::Result<Stream> {
    let input = format::input(&path)?;
    let stream = input
        .streams()
        .best(media::Type::Video)
        .ok_or(anyhow::anyhow!(Error::StreamNotFound))?;
    let index = stream.index();
    let time_base = f64::from(stream.time_base());
    let rate = f64::from(stream.avg_frame_rate());
    let interval = if rate.is_finite() && rate > 0.0 {
        1.0 / rate
    } else {
        DEFAULT_FRAME_INTERVAL
    };
    let decoder = codec::context::Context::from_parameters(stream.parameters())?
        .decoder()
        .video()?;
    Ok(Stream {
        input,
        index,
        decoder,
        time_base,
        interval,
        draining: false,
    })
}

impl Stream {
    fn decode_next(&mut self) -> anyhow::Result<Option<Video>> {
        loop {
            let mut decoded = Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(decoded));
            }
            if self.draining {
                return Ok(None);
            }
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == self.index => self.decoder.send_packet(&packet)?,
                Ok(()) => {}
                Err(Error::Eof) => {
                    self.decoder.send_eof()?;
                    self.draining = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Decodes a video clip on demand, cover-scaled and center-cropped to the output
/// size. Clips shorter than the output loop from the start.
pub(crate) struct ClipFrames {
    path: PathBuf,
    stream: Stream,
    scaler: software::scaling::context::Context,
    scaled: (u32, u32),
    size: (u32, u32),
    first_pts: Option<f64>,
    last_t: f64,
    loop_offset: f64,
    current: RgbaImage,
    pending: Option<(f64, RgbaImage)>,
}

impl ClipFrames {
    pub fn open(path: &Path, width: u32, height: u32) -> anyhow::Result<Self> {
        let stream = open_stream(path)?;
        let scaled = cover_dims(stream.decoder.width(), stream.decoder.height(), width, height);
        let scaler = software::scaling::context::Context::get(
            stream.decoder.format(),
            stream.decoder.width(),
            stream.decoder.height(),
            format::Pixel::RGBA,
            scaled.0,
            scaled.1,
            software::scaling::Flags::BILINEAR,
        )?;
        debug!(
            "Background clip {} is {}x{}, scaling to {}x{}",
            path.display(),
            stream.decoder.width(),
            stream.decoder.height(),
            scaled.0,
            scaled.1
        );

        let mut clip = Self {
            path: path.to_owned(),
            stream,
            scaler,
            scaled,
            size: (width, height),
            first_pts: None,
            last_t: 0.0,
            loop_offset: 0.0,
            current: RgbaImage::new(width, height),
            pending: None,
        };
        let (_, first) = clip.next_frame()?;
        clip.current = first;
        Ok(clip)
    }

    fn next_frame(&mut self) -> anyhow::Result<(f64, RgbaImage)> {
        let decoded = match self.stream.decode_next()? {
            Some(decoded) => decoded,
            None => {
                self.restart()?;
                self.stream
                    .decode_next()?
                    .ok_or(anyhow::anyhow!("{} has no video frames", self.path.display()))?
            }
        };

        let pts = decoded
            .timestamp()
            .map(|ts| ts as f64 * self.stream.time_base)
            .unwrap_or(self.last_t + self.stream.interval);
        let first = *self.first_pts.get_or_insert(pts);
        self.last_t = (pts - first).max(0.0);
        let image = self.to_image(&decoded)?;
        Ok((self.loop_offset + self.last_t, image))
    }

    fn restart(&mut self) -> anyhow::Result<()> {
        self.loop_offset += self.last_t + self.stream.interval;
        debug!("Looping background clip at {:.2}s", self.loop_offset);
        self.stream = open_stream(&self.path)?;
        self.first_pts = None;
        self.last_t = 0.0;
        Ok(())
    }

    fn to_image(&mut self, decoded: &Video) -> anyhow::Result<RgbaImage> {
        let mut rgba = Video::empty();
        self.scaler.run(decoded, &mut rgba)?;

        let (width, height) = self.size;
        let x0 = ((self.scaled.0 - width) / 2) as usize;
        let y0 = ((self.scaled.1 - height) / 2) as usize;
        let stride = rgba.stride(0);
        let data = rgba.data(0);
        let row_len = width as usize * 4;

        let mut image = RgbaImage::new(width, height);
        for (y, row) in image.chunks_exact_mut(row_len).enumerate() {
            let start = (y0 + y) * stride + x0 * 4;
            let source = data
                .get(start..start + row_len)
                .ok_or(anyhow::anyhow!("Scaled frame is smaller than expected"))?;
            row.copy_from_slice(source);
        }
        Ok(image)
    }
}

impl FrameSource for ClipFrames {
    fn frame_at(&mut self, t: f64) -> anyhow::Result<&RgbaImage> {
        loop {
            let (at, image) = match self.pending.take() {
                Some(pending) => pending,
                None => self.next_frame()?,
            };
            if at > t {
                self.pending = Some((at, image));
                break;
            }
            self.current = image;
        }
        Ok(&self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_sources_are_scaled_by_height() {
        let (w, h) = cover_dims(1920, 1080, 1080, 1920);
        assert_eq!(h, 1920);
        assert!(w >= 3413 && w % 2 == 0);
    }

    #[test]
    fn portrait_sources_never_undershoot() {
        assert_eq!(cover_dims(1080, 1920, 1080, 1920), (1080, 1920));
        let (w, h) = cover_dims(720, 1280, 1080, 1920);
        assert!(w >= 1080 && h >= 1920);
        assert_eq!((w % 2, h % 2), (0, 0));
    }
}
