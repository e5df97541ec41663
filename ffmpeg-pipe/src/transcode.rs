//! FFmpeg-backed assembly of a full run: source transport in, destination
//! transport out.

use tokio_util::sync::CancellationToken;

use crate::{
    decoder::{AudioDecoder, VideoDecoder},
    encoder::{AudioEncoder, Encoder, VideoEncoder},
    error::{PipeError, Result},
    frame::{RawAudioFrame, RawVideoFrame},
    input::AvInput,
    io::{ReadStream, WriteStream},
    output::{AvOutput, ContainerOptions},
    packet::RawPacket,
    pipeline::{Demuxer, Muxer, Pipeline, PipelineReport, Stages},
    stream::StreamDescriptor,
    transform::{FrameTransform, Grayscale},
};

/// Stream `source` through the grayscale transform into `destination`.
pub fn transcode(
    source: Box<dyn ReadStream>,
    destination: Box<dyn WriteStream>,
    options: &ContainerOptions,
    cancel: &CancellationToken,
) -> Result<PipelineReport> {
    transcode_with(source, destination, options, Box::new(Grayscale), cancel)
}

/// Like [`transcode`] with a caller-supplied video frame transform.
pub fn transcode_with(
    source: Box<dyn ReadStream>,
    mut destination: Box<dyn WriteStream>,
    options: &ContainerOptions,
    transform: Box<dyn FrameTransform<RawVideoFrame>>,
    cancel: &CancellationToken,
) -> Result<PipelineReport> {
    log::info!("pipeline INIT");

    let mut input = match AvInput::open(source) {
        Ok(input) => input,
        Err(e) => {
            destination.abort();
            log::error!("pipeline failed ({}): {}", e.kind(), e);
            return Err(e);
        }
    };
    log::info!("source: {}", input.media_info());

    let mut output = match AvOutput::open(destination, options) {
        Ok(output) => output,
        Err(e) => {
            close_quietly(&mut input);
            log::error!("pipeline failed ({}): {}", e.kind(), e);
            return Err(e);
        }
    };

    let stages = match build_stages(&input, &mut output, transform) {
        Ok(stages) => stages,
        Err(e) => {
            output.abort();
            close_quietly(&mut input);
            log::error!("pipeline failed ({}): {}", e.kind(), e);
            return Err(e);
        }
    };

    Pipeline::new(Box::new(input), Box::new(output), stages).run(cancel)
}

fn close_quietly(input: &mut AvInput) {
    if let Err(e) = input.close() {
        log::warn!("source close failed: {}", e);
    }
}

fn check_output(source: &StreamDescriptor, encoder: &Encoder) -> Result<()> {
    let template = source.output_template();
    if !template.is_compatible_output(encoder.descriptor()) {
        return Err(PipeError::encode(
            source.kind,
            format!(
                "encoder output {} does not match source {}",
                encoder.descriptor(),
                source
            ),
        ));
    }
    Ok(())
}

fn build_stages(
    input: &AvInput,
    output: &mut AvOutput,
    video_transform: Box<dyn FrameTransform<RawVideoFrame>>,
) -> Result<Stages<RawPacket, RawVideoFrame, RawAudioFrame>> {
    let streams = input.streams().clone();
    log::info!("video input: {}", streams.video);
    log::info!("audio input: {}", streams.audio);

    let global_header = output.needs_global_header();
    let video_decoder = VideoDecoder::new(input.video_stream())?;
    let audio_decoder = AudioDecoder::new(input.audio_stream())?;
    let video_encoder = VideoEncoder::new(input.video_stream(), global_header)?;
    let audio_encoder = AudioEncoder::new(input.audio_stream(), global_header)?;

    check_output(&streams.video, video_encoder.encoder())?;
    check_output(&streams.audio, audio_encoder.encoder())?;

    for encoder in [video_encoder.encoder(), audio_encoder.encoder()] {
        let index = output.add_stream(encoder.kind(), encoder.parameters()?, encoder.time_base())?;
        log::info!("{} output stream #{}", encoder.kind(), index);
    }

    Ok(Stages {
        video_decoder: Box::new(video_decoder),
        video_transform,
        video_encoder: Box::new(video_encoder),
        audio_decoder: Box::new(audio_decoder),
        audio_encoder: Box::new(audio_encoder),
    })
}

#[cfg(test)]
#[path = "transcode_test.rs"]
mod transcode_test;
