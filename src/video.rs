use std::path::Path;
use std::sync::OnceLock;

use ffmpeg::encoder;
use ffmpeg::util::frame::{audio::Audio, video::Video};
use ffmpeg_next::{
    self as ffmpeg, channel_layout, codec, decoder, filter, format, media, picture, software,
    Dictionary, Error, Packet, Rational,
};
use image::RgbaImage;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, log_enabled, Level};

use crate::audio::{AudioTrack, SAMPLE_RATE};
use crate::background::FrameSource;
use crate::config::QualitySettings;
use crate::overlay::{ImageSource, OverlayElement, Position, ProgressBarStyle};
use crate::render::{blend_over, fill_rect};
use crate::timing::progress_fraction;

static INIT: OnceLock<Result<(), Error>> = OnceLock::new();

pub(crate) fn init() -> anyhow::Result<()> {
    match INIT.get_or_init(|| {
        ffmpeg::init()?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        Ok(())
    }) {
        Ok(()) => Ok(()),
        Err(err) => Err(anyhow::anyhow!("Failed to initialise FFmpeg: {}", err)),
    }
}

/// Draws one output frame: background, dim layer, then every visible element in order.
pub(crate) fn compose_frame(
    canvas: &mut RgbaImage,
    background: &RgbaImage,
    dim: f32,
    elements: &[OverlayElement],
    t: f64,
    total: f64,
) {
    canvas.copy_from_slice(background);
    let (width, height) = canvas.dimensions();
    if dim > 0.0 {
        fill_rect(canvas, 0, 0, width, height, [0, 0, 0, 255], dim);
    }

    for element in elements {
        let opacity = element.opacity_at(t);
        if opacity <= 0.0 {
            continue;
        }
        match &element.source {
            ImageSource::Bitmap(image) => {
                let (x, y) = element.position.resolve(image.width(), image.height(), width, height);
                blend_over(canvas, image, x, y, opacity);
            }
            ImageSource::ProgressBar(style) => {
                draw_progress_bar(canvas, style, element.position, progress_fraction(t, total), opacity)
            }
        }
    }
}

fn draw_progress_bar(canvas: &mut RgbaImage, style: &ProgressBarStyle, position: Position, fraction: f64, opacity: f32) {
    let (x, y) = position.resolve(style.width, style.height, canvas.width(), canvas.height());
    let [r, g, b] = style.track;
    fill_rect(canvas, x, y, style.width, style.height, [r, g, b, 255], style.track_opacity * opacity);
    let filled = (f64::from(style.width) * fraction.clamp(0.0, 1.0)).round() as u32;
    if filled > 0 {
        let [r, g, b] = style.fill;
        fill_rect(canvas, x, y, filled, style.height, [r, g, b, 255], opacity);
    }
}

enum FrameWrapper<'a> {
    Video(&'a Video),
    Audio(&'a Audio),
}

impl FrameWrapper<'_> {
    fn as_video(&self) -> anyhow::Result<&Video> {
        match self {
            &FrameWrapper::Video(frame) => Ok(frame),
            _ => Err(anyhow::anyhow!("Frame is not a video frame")),
        }
    }

    fn as_audio(&self) -> anyhow::Result<&Audio> {
        match self {
            &FrameWrapper::Audio(frame) => Ok(frame),
            _ => Err(anyhow::anyhow!("Frame is not an audio frame")),
        }
    }
}

trait Transcoder {
    fn flush_filter_graph(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn receive_and_process_filtered_frames(
        &mut self,
        _output: &mut format::context::Output,
        _output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn send_frame_to_encoder(&mut self, frame_wrapper: FrameWrapper) -> anyhow::Result<()>;

    fn send_eof_to_encoder(&mut self) -> anyhow::Result<()>;

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()>;

    fn finish(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        self.send_eof_to_encoder()?;
        self.receive_and_process_encoded_packets(output, output_stream_time_base)
    }
}

/// H.264 encoder fed with RGBA canvases.
struct VideoEncoder {
    output_stream_index: usize,
    encoder: encoder::Video,
    scaler: software::scaling::context::Context,
    time_base: Rational,
    width: u32,
    height: u32,
    next_pts: i64,
}

impl VideoEncoder {
    fn new(
        output: &mut format::context::Output,
        output_stream_index: usize,
        width: u32,
        height: u32,
        quality: &QualitySettings,
    ) -> anyhow::Result<Self> {
        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);
        let fps = i32::try_from(quality.fps)?;
        let time_base = Rational(1, fps);

        let codec = encoder::find(codec::Id::H264);
        let mut output_stream = output.add_stream(codec)?;
        let mut encoder = codec::context::Context::new_with_codec(
            codec.ok_or(anyhow::anyhow!(Error::EncoderNotFound))?,
        )
        .encoder()
        .video()?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(format::Pixel::YUV420P);
        encoder.set_frame_rate(Some(Rational(fps, 1)));
        encoder.set_time_base(time_base);
        output_stream.set_time_base(time_base);

        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        opts.set("preset", &quality.preset);
        opts.set("crf", &quality.crf.to_string());
        opts.set("maxrate", &format!("{}k", quality.video_bitrate_kbps));
        opts.set("bufsize", &format!("{}k", quality.video_bitrate_kbps * 2));

        let opened_encoder = encoder.open_with(opts)?;
        output_stream.set_parameters(&opened_encoder);

        let scaler = software::scaling::context::Context::get(
            format::Pixel::RGBA,
            width,
            height,
            format::Pixel::YUV420P,
            width,
            height,
            software::scaling::Flags::BILINEAR,
        )?;

        Ok(Self {
            output_stream_index,
            encoder: opened_encoder,
            scaler,
            time_base,
            width,
            height,
            next_pts: 0,
        })
    }

    fn encode_image(
        &mut self,
        image: &RgbaImage,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            image.dimensions() == (self.width, self.height),
            "Frame is {:?}, encoder expects {}x{}",
            image.dimensions(),
            self.width,
            self.height
        );
        let mut rgba = Video::new(format::Pixel::RGBA, self.width, self.height);
        let stride = rgba.stride(0);
        let row_len = self.width as usize * 4;
        let plane = rgba.data_mut(0);
        for (y, row) in image.chunks_exact(row_len).enumerate() {
            plane[y * stride..y * stride + row_len].copy_from_slice(row);
        }

        let mut yuv = Video::empty();
        self.scaler.run(&rgba, &mut yuv)?;
        yuv.set_pts(Some(self.next_pts));
        yuv.set_kind(picture::Type::None);
        self.next_pts += 1;

        self.send_frame_to_encoder(FrameWrapper::Video(&yuv))?;
        self.receive_and_process_encoded_packets(output, output_stream_time_base)
    }
}

impl Transcoder for VideoEncoder {
    fn send_frame_to_encoder(&mut self, frame_wrapper: FrameWrapper) -> anyhow::Result<()> {
        self.encoder
            .send_frame(frame_wrapper.as_video()?)
            .map_err(anyhow::Error::from)
    }

    fn send_eof_to_encoder(&mut self) -> anyhow::Result<()> {
        self.encoder.send_eof().map_err(anyhow::Error::from)
    }

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_stream_index);
            packet.rescale_ts(self.time_base, output_stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    }
}

/// Decodes the lead audio segment, runs it through the track's filter graph and
/// encodes AAC. Driven incrementally so audio packets interleave with video.
struct AudioTranscoder {
    output_stream_index: usize,
    input: format::context::Input,
    input_stream_index: usize,
    decoder: decoder::Audio,
    encoder: encoder::Audio,
    filter_graph: filter::Graph,
    time_base: Rational,
    samples_sent: i64,
    input_done: bool,
}

impl AudioTranscoder {
    fn new(
        track: &AudioTrack,
        output: &mut format::context::Output,
        output_stream_index: usize,
        quality: &QualitySettings,
    ) -> anyhow::Result<Self> {
        let lead = track.lead().ok_or(anyhow::anyhow!("Audio track has no segments"))?;
        let input = format::input(&lead)?;
        let input_stream = input
            .streams()
            .best(media::Type::Audio)
            .ok_or(anyhow::anyhow!(Error::StreamNotFound))?;
        let input_stream_index = input_stream.index();
        let input_time_base = input_stream.time_base();

        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);
        let decoder = codec::context::Context::from_parameters(input_stream.parameters())?
            .decoder()
            .audio()?;

        let codec = encoder::find(codec::Id::AAC)
            .ok_or(anyhow::anyhow!(Error::EncoderNotFound))?
            .audio()?;
        let mut output_stream = output.add_stream(codec)?;
        let context = codec::context::Context::from_parameters(output_stream.parameters())?;
        let mut encoder = context.encoder().audio()?;

        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let channel_layout = codec
            .channel_layouts()
            .map(|layouts| layouts.best(2))
            .unwrap_or(channel_layout::ChannelLayout::STEREO);
        let rate = i32::try_from(SAMPLE_RATE)?;
        let time_base = Rational(1, rate);

        encoder.set_channel_layout(channel_layout);
        encoder.set_rate(rate);
        encoder.set_format(
            codec
                .formats()
                .ok_or(anyhow::anyhow!("Unknown supported formats"))?
                .next()
                .ok_or(anyhow::anyhow!("Failed to get sample format"))?,
        );
        encoder.set_bit_rate(quality.audio_bitrate_kbps * 1000);
        encoder.set_time_base(time_base);
        output_stream.set_time_base(time_base);

        let opened_encoder = encoder.open_as(codec)?;
        output_stream.set_parameters(&opened_encoder);

        let filter_graph =
            Self::filter_graph(&track.filter_spec(), &decoder, input_time_base, &opened_encoder)?;

        Ok(Self {
            output_stream_index,
            input,
            input_stream_index,
            decoder,
            encoder: opened_encoder,
            filter_graph,
            time_base,
            samples_sent: 0,
            input_done: false,
        })
    }

    fn filter_graph(
        spec: &str,
        decoder: &codec::decoder::Audio,
        input_time_base: Rational,
        encoder: &codec::encoder::Audio,
    ) -> anyhow::Result<filter::Graph> {
        let mut filter_graph = filter::Graph::new();

        let layout = if decoder.channel_layout().is_empty() {
            channel_layout::ChannelLayout::default(i32::from(decoder.channels()))
        } else {
            decoder.channel_layout()
        };
        let args = format!(
            "time_base={}:sample_rate={}:sample_fmt={}:channel_layout=0x{:x}",
            input_time_base,
            decoder.rate(),
            decoder.format().name(),
            layout.bits()
        );

        filter_graph.add(
            &filter::find("abuffer").ok_or(anyhow::anyhow!("Failed to find filter"))?,
            "in",
            &args,
        )?;
        filter_graph.add(
            &filter::find("abuffersink").ok_or(anyhow::anyhow!("Failed to find filter"))?,
            "out",
            "",
        )?;

        {
            let mut out = filter_graph
                .get("out")
                .ok_or(anyhow::anyhow!("Failed to get filter"))?;
            out.set_sample_format(encoder.format());
            out.set_channel_layout(encoder.channel_layout());
            out.set_sample_rate(encoder.rate());
        }

        filter_graph.output("in", 0)?.input("out", 0)?.parse(spec)?;
        filter_graph.validate()?;

        debug!("Audio filter graph: {}", filter_graph.dump());

        if let Some(codec) = encoder.codec() {
            if !codec
                .capabilities()
                .contains(ffmpeg::codec::capabilities::Capabilities::VARIABLE_FRAME_SIZE)
            {
                filter_graph
                    .get("out")
                    .ok_or(anyhow::anyhow!("Failed to get filter"))?
                    .sink()
                    .set_frame_size(encoder.frame_size());
            }
        }

        Ok(filter_graph)
    }

    fn encoded_seconds(&self) -> f64 {
        self.samples_sent as f64 / f64::from(SAMPLE_RATE)
    }

    /// Encodes audio until at least `t` seconds have been written or the input ends.
    fn pump_until(
        &mut self,
        t: f64,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        while !self.input_done && self.encoded_seconds() < t {
            self.step(output, output_stream_time_base)?;
        }
        Ok(())
    }

    fn step(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut packet = Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {
                if packet.stream() == self.input_stream_index {
                    self.decoder.send_packet(&packet)?;
                    self.receive_and_process_decoded_frames(output, output_stream_time_base)?;
                }
            }
            Err(Error::Eof) => {
                self.decoder.send_eof()?;
                self.receive_and_process_decoded_frames(output, output_stream_time_base)?;
                self.flush_filter_graph()?;
                self.receive_and_process_filtered_frames(output, output_stream_time_base)?;
                self.input_done = true;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn receive_and_process_decoded_frames(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut frame = Audio::empty();
        while self.decoder.receive_frame(&mut frame).is_ok() {
            let timestamp = frame.timestamp();
            frame.set_pts(timestamp);
            self.filter_graph
                .get("in")
                .ok_or(anyhow::anyhow!("Failed to get filter"))?
                .source()
                .add(&frame)?;
            self.receive_and_process_filtered_frames(output, output_stream_time_base)?;
        }
        Ok(())
    }
}

impl Transcoder for AudioTranscoder {
    fn flush_filter_graph(&mut self) -> anyhow::Result<()> {
        self.filter_graph
            .get("in")
            .ok_or(anyhow::anyhow!("Failed to get filter"))?
            .source()
            .flush()
            .map_err(|e| anyhow::anyhow!(e))
    }

    fn receive_and_process_filtered_frames(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut frame = Audio::empty();
        while self
            .filter_graph
            .get("out")
            .ok_or(anyhow::anyhow!("Failed to get filter"))?
            .sink()
            .frame(&mut frame)
            .is_ok()
        {
            frame.set_pts(Some(self.samples_sent));
            self.samples_sent += frame.samples() as i64;
            self.send_frame_to_encoder(FrameWrapper::Audio(&frame))?;
            self.receive_and_process_encoded_packets(output, output_stream_time_base)?;
        }
        Ok(())
    }

    fn send_frame_to_encoder(&mut self, frame_wrapper: FrameWrapper) -> anyhow::Result<()> {
        self.encoder
            .send_frame(frame_wrapper.as_audio()?)
            .map_err(anyhow::Error::from)
    }

    fn send_eof_to_encoder(&mut self) -> anyhow::Result<()> {
        self.encoder.send_eof().map_err(anyhow::Error::from)
    }

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_stream_index);
            packet.rescale_ts(self.time_base, output_stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    }

    fn finish(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        while !self.input_done {
            self.step(output, output_stream_time_base)?;
        }
        self.send_eof_to_encoder()?;
        self.receive_and_process_encoded_packets(output, output_stream_time_base)
    }
}

pub(crate) struct Composition<'a> {
    pub background: &'a mut dyn FrameSource,
    pub audio: &'a AudioTrack,
    pub elements: &'a [OverlayElement],
    pub duration: f64,
    pub dim: f32,
    pub width: u32,
    pub height: u32,
}

fn frame_bar(frames: u64) -> ProgressBar {
    let bar = ProgressBar::new(frames);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>8}/{len:8} ({eta}) {msg}")
    {
        bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
    }
    bar.set_message("rendering");
    bar
}

/// Renders every frame of `job` and muxes it with the audio track into an MP4 at `output_path`.
pub(crate) fn compose(mut job: Composition<'_>, quality: &QualitySettings, output_path: &Path) -> anyhow::Result<()> {
    init()?;
    let mut output = format::output(&output_path)?;
    let mut video = VideoEncoder::new(&mut output, 0, job.width, job.height, quality)?;
    let mut audio = AudioTranscoder::new(job.audio, &mut output, 1, quality)?;

    if log_enabled!(Level::Debug) {
        format::context::output::dump(&output, 0, output_path.to_str());
    }
    let mut opts = Dictionary::new();
    opts.set("movflags", "+faststart");
    output.write_header_with(opts)?;

    let stream_time_base = |index: usize| {
        output
            .stream(index)
            .map(|stream| stream.time_base())
            .ok_or(anyhow::anyhow!(Error::StreamNotFound))
    };
    let video_time_base = stream_time_base(0)?;
    let audio_time_base = stream_time_base(1)?;

    let fps = f64::from(quality.fps);
    let frames = (job.duration * fps).ceil() as u64;
    info!(
        "Rendering {} frames ({:.1}s at {} fps) with {} overlay elements",
        frames,
        job.duration,
        quality.fps,
        job.elements.len()
    );

    let progress = frame_bar(frames);
    let mut canvas = RgbaImage::new(job.width, job.height);
    for index in 0..frames {
        let t = index as f64 / fps;
        let background = job.background.frame_at(t)?;
        compose_frame(&mut canvas, background, job.dim, job.elements, t, job.duration);
        video.encode_image(&canvas, &mut output, video_time_base)?;
        audio.pump_until(t + 1.0 / fps, &mut output, audio_time_base)?;
        progress.inc(1);
    }

    video.finish(&mut output, video_time_base)?;
    audio.finish(&mut output, audio_time_base)?;
    output.write_trailer()?;
    progress.finish_and_clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{Fade, OverlayKind};
    use image::Rgba;
    use std::sync::Arc;

    fn bitmap(kind: OverlayKind, start: f64, duration: f64, color: [u8; 4]) -> OverlayElement {
        OverlayElement {
            kind,
            source: ImageSource::Bitmap(Arc::new(RgbaImage::from_pixel(4, 2, Rgba(color)))),
            position: Position::at(1, 1),
            start,
            duration,
            fade: Fade::NONE,
            opacity: 1.0,
        }
    }

    #[test]
    fn dim_layer_darkens_background() {
        let background = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]));
        let mut canvas = RgbaImage::new(8, 8);
        compose_frame(&mut canvas, &background, 0.5, &[], 0.0, 10.0);
        assert_eq!(canvas.get_pixel(3, 3).0, [128, 128, 128, 255]);
    }

    #[test]
    fn only_active_elements_are_drawn_in_order() {
        let background = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));
        let elements = [
            bitmap(OverlayKind::ArabicPageText, 0.0, 2.0, [255, 0, 0, 255]),
            bitmap(OverlayKind::TranslationPageText, 1.0, 2.0, [0, 0, 255, 255]),
        ];
        let mut canvas = RgbaImage::new(8, 8);

        compose_frame(&mut canvas, &background, 0.0, &elements, 0.5, 10.0);
        assert_eq!(canvas.get_pixel(1, 1).0, [255, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(0, 0).0, [0, 0, 0, 255]);

        compose_frame(&mut canvas, &background, 0.0, &elements, 1.5, 10.0);
        assert_eq!(canvas.get_pixel(2, 2).0, [0, 0, 255, 255]);

        compose_frame(&mut canvas, &background, 0.0, &elements, 2.5, 10.0);
        assert_eq!(canvas.get_pixel(1, 1).0, [0, 0, 255, 255]);

        compose_frame(&mut canvas, &background, 0.0, &elements, 3.5, 10.0);
        assert_eq!(canvas.get_pixel(1, 1).0, [0, 0, 0, 255]);
    }

    #[test]
    fn progress_bar_fill_follows_easing() {
        let background = RgbaImage::from_pixel(100, 20, Rgba([0, 0, 0, 255]));
        let bar = OverlayElement {
            kind: OverlayKind::ProgressBar,
            source: ImageSource::ProgressBar(ProgressBarStyle {
                width: 100,
                height: 4,
                fill: [255, 215, 0],
                track: [128, 128, 128],
                track_opacity: 0.6,
            }),
            position: Position::at(0, 10),
            start: 0.0,
            duration: 10.0,
            fade: Fade::NONE,
            opacity: 1.0,
        };
        let mut canvas = RgbaImage::new(100, 20);
        compose_frame(&mut canvas, &background, 0.0, std::slice::from_ref(&bar), 5.0, 10.0);

        assert_eq!(canvas.get_pixel(74, 11).0, [255, 215, 0, 255]);
        assert_eq!(canvas.get_pixel(76, 11).0, [77, 77, 77, 255]);
        assert_eq!(canvas.get_pixel(50, 5).0, [0, 0, 0, 255]);
    }
}
