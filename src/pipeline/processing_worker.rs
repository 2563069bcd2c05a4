// SPDX-License-Identifier: GPL-3.0-only

//! ProcessingWorker: dequeues returned buffers, joins them with metadata by
//! sequence, performs format-specific repacking, and routes to publishers,
//! the stereo rendezvous, the encoder feeder, the depth bridge, or the
//! snapshot writer.

use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use tracing::warn;

use crate::encoder::EncodeInput;
use crate::exposure::AeUpdate;
use crate::format_converters::{split_nv12, Raw10Detector};
use crate::frame::{Frame, FrameData, FormatCode, FrameMetadata, StreamKind};
use crate::stereo::{PairOutcome, SlaveDeposit};

use super::result_router::QueuedBuffer;
use super::PipelineShared;

const JPEG_START_MARKER: [u8; 2] = [0xFF, 0xD8];
const JPEG_END_MARKER: [u8; 2] = [0xFF, 0xD9];

pub fn run(shared: Arc<PipelineShared>, buffer_rx: Receiver<QueuedBuffer>) {
    // Preview is the only stream that RAW10-converts (§4.3); SmallVideo and
    // LargeVideo always publish raw, so they need no detector at all. This
    // instance's first-frame decision must stay scoped to Preview alone —
    // sharing it with another stream lets whichever frame arrives first fix
    // the decision for both.
    let mut preview_raw10 = Raw10Detector::new();

    loop {
        let queued = match buffer_rx.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(q) => q,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if terminal_reached(&shared) {
                    break;
                }
                continue;
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let metadata = match shared.metadata_ring.take(queued.sequence) {
            Some(m) => m,
            None => {
                warn!(
                    camera = %shared.config.name,
                    sequence = queued.sequence,
                    "dropping buffer: no metadata for sequence"
                );
                shared.release_outstanding(queued.sequence, queued.buffer.stream);
                if terminal_reached(&shared) {
                    break;
                }
                continue;
            }
        };

        match queued.buffer.stream {
            StreamKind::Preview => {
                let (width, height) = stream_dims(&shared, StreamKind::Preview);
                handle_preview(&shared, &metadata, queued.buffer.data, &mut preview_raw10, width, height);
            }
            StreamKind::SmallVideo => {
                let (width, height) = stream_dims(&shared, StreamKind::SmallVideo);
                handle_video(
                    &shared,
                    &metadata,
                    queued.buffer.data,
                    StreamKind::SmallVideo,
                    "small_grey",
                    "small_color",
                    width,
                    height,
                );
            }
            StreamKind::LargeVideo => {
                let (width, height) = stream_dims(&shared, StreamKind::LargeVideo);
                handle_video(
                    &shared,
                    &metadata,
                    queued.buffer.data,
                    StreamKind::LargeVideo,
                    "large_grey",
                    "large_color",
                    width,
                    height,
                );
            }
            StreamKind::Snapshot => handle_snapshot(&shared, &metadata, queued.buffer.data),
        }

        shared.release_outstanding(queued.sequence, queued.buffer.stream);

        if terminal_reached(&shared) {
            break;
        }
    }
}

fn terminal_reached(shared: &PipelineShared) -> bool {
    if shared.emergency_stop.load(Ordering::SeqCst) {
        return true;
    }
    if !shared.stop.load(Ordering::SeqCst) {
        return false;
    }
    let terminal = shared.terminal_sequence.load(Ordering::SeqCst);
    shared.metadata_ring.is_empty() && terminal != u64::MAX
}

/// Configured width/height for one stream kind. The HAL never reports these
/// back per-frame, so every publisher has to stamp them in from
/// configuration rather than from the returned buffer.
fn stream_dims(shared: &PipelineShared, kind: StreamKind) -> (u32, u32) {
    match kind {
        StreamKind::Preview => (shared.config.preview.width, shared.config.preview.height),
        StreamKind::SmallVideo => (shared.config.small_video.width, shared.config.small_video.height),
        StreamKind::LargeVideo => (shared.config.large_video.width, shared.config.large_video.height),
        StreamKind::Snapshot => (shared.config.snapshot.width, shared.config.snapshot.height),
    }
}

fn luminance_histogram(y_plane: &[u8]) -> [u32; 256] {
    let mut histogram = [0u32; 256];
    for &byte in y_plane {
        histogram[byte as usize] += 1;
    }
    histogram
}

/// Evaluate the software AE algorithm against one histogram, applying an
/// update to `shared.exposure` if it has one. Returns the update, if any, so
/// stereo masters can mirror it onward.
fn evaluate_ae(shared: &PipelineShared, histogram: &[u32; 256]) -> Option<(u64, f32)> {
    if !shared.ae_active() {
        return None;
    }
    let ae = shared.ae.as_ref()?;
    match ae.evaluate(histogram, shared.exposure.exposure_ns(), shared.exposure.gain()) {
        AeUpdate::Update { exposure_ns, gain } => {
            shared.exposure.set(exposure_ns, gain);
            Some((exposure_ns, gain))
        }
        AeUpdate::NoChange => None,
    }
}

fn handle_preview(
    shared: &PipelineShared,
    metadata: &FrameMetadata,
    data: Vec<u8>,
    raw10: &mut Raw10Detector,
    width: u32,
    height: u32,
) {
    if let Some(depth) = &shared.depth {
        let should_process = depth.adapter.lock().unwrap().should_process();
        if should_process {
            depth.bridge.lock().unwrap().submit(data, metadata.timestamp_ns, metadata.frame_id);
        }
        return;
    }

    raw10.observe_first_frame(tail_row(&data));
    let y_plane = raw10.process(&data);
    let histogram = luminance_histogram(&y_plane);
    let is_color = shared.config.sensor_kind.is_color();
    let uv_plane = if is_color { split_uv(width, height, &y_plane) } else { None };
    let y_only = match &uv_plane {
        Some(_) => y_plane[..(width * height) as usize].to_vec(),
        None => y_plane.clone(),
    };

    if let Some(stereo) = &shared.stereo {
        if shared.is_stereo_slave {
            // §4.6 slave view, step 1: "Publish nothing locally" — the
            // slave's Y/UV only ever reach a subscriber through the master's
            // combined stereo payload.
            stereo.slave_deposit_and_wait(SlaveDeposit {
                timestamp_ns: metadata.timestamp_ns,
                y: FrameData::from(y_only),
                uv: uv_plane.map(FrameData::from),
            });
            // the master mirrors its own AE decisions into this side when
            // independent_exposure is false; only evaluate locally here if
            // this slave is allowed its own exposure.
            if shared.config.independent_exposure {
                evaluate_ae(shared, &histogram);
            }
            return;
        }

        publish(shared, "grey", metadata, FormatCode::Raw8, width, height, vec![FrameData::from(y_plane.clone())]);
        if let Some(uv) = &uv_plane {
            publish(shared, "color", metadata, FormatCode::Nv12, width, height, vec![FrameData::from(y_only.clone()), FrameData::from(uv.clone())]);
        }
        let pair_outcome = stereo.master_pair(metadata.timestamp_ns);

        if let Some((exposure_ns, gain)) = evaluate_ae(shared, &histogram) {
            if !shared.config.independent_exposure {
                stereo.mirror_to_slave(exposure_ns, gain);
            }
        }

        if let PairOutcome::Paired { slave, .. } = pair_outcome {
            let canonical_ts = canonical_timestamp(metadata.timestamp_ns, slave.timestamp_ns);
            let canonical_metadata = FrameMetadata { timestamp_ns: canonical_ts, ..*metadata };
            let (channel, format, segments) = combine_stereo_payload(y_only, uv_plane, &slave);
            publish(shared, channel, &canonical_metadata, format, width, height, segments);
        }
        return;
    }

    evaluate_ae(shared, &histogram);
    if let Some(uv) = uv_plane {
        publish(shared, "color", metadata, FormatCode::Nv12, width, height, vec![FrameData::from(y_only), FrameData::from(uv)]);
    }
    publish(shared, "grey", metadata, FormatCode::Raw8, width, height, vec![FrameData::from(y_plane)]);
}

/// §4.6 step 4: "Choose the earlier timestamp as canonical" for a stereo
/// pair — whichever side actually captured first, not unconditionally the
/// master's own.
fn canonical_timestamp(master_ts: u64, slave_ts: u64) -> u64 {
    master_ts.min(slave_ts)
}

/// Split a packed NV12 buffer's UV tail out from its Y plane, given the
/// stream's configured dimensions. Returns `None` if the buffer is too
/// short to carry a UV plane at all (the mock HAL's synthetic buffers are
/// exactly `width * height` bytes, with no chroma tail).
fn split_uv(width: u32, height: u32, data: &[u8]) -> Option<Vec<u8>> {
    let y_size = (width * height) as usize;
    split_nv12(data, y_size).map(|(_, uv)| uv.to_vec())
}

/// Build the stereo-combined scatter-write payload: a four-segment
/// `(master_Y, master_UV, slave_Y, slave_UV)` `StereoNv12` frame when both
/// sides carried a UV plane, otherwise the two-segment mono `(master_Y,
/// slave_Y)` `StereoRaw8` combine.
fn combine_stereo_payload(
    master_y: Vec<u8>,
    master_uv: Option<Vec<u8>>,
    slave: &SlaveDeposit,
) -> (&'static str, FormatCode, Vec<FrameData>) {
    match (master_uv, &slave.uv) {
        (Some(master_uv), Some(slave_uv)) => (
            "color",
            FormatCode::StereoNv12,
            vec![FrameData::from(master_y), FrameData::from(master_uv), slave.y.clone(), slave_uv.clone()],
        ),
        _ => {
            let mut combined = master_y;
            combined.extend_from_slice(slave.y.as_ref());
            ("grey", FormatCode::StereoRaw8, vec![FrameData::from(combined)])
        }
    }
}

/// Publish one segment list on `channel`, stamping width/height/stride and
/// the segment-derived size, or do nothing if nobody is subscribed.
fn publish(
    shared: &PipelineShared,
    channel: &str,
    metadata: &FrameMetadata,
    format: FormatCode,
    width: u32,
    height: u32,
    segments: Vec<FrameData>,
) {
    if let Some(publisher) = shared.publishers.channels.get(channel) {
        if publisher.num_clients() == 0 {
            return;
        }
        let size_bytes: u32 = segments.iter().map(|s| s.len() as u32).sum();
        let meta = FrameMetadata {
            format_code: format as u32,
            width,
            height,
            stride: width,
            size_bytes,
            ..*metadata
        };
        publisher.publish(Frame::new(meta, segments));
    }
}

/// Split a packed buffer into NV12 Y/UV planes and publish them on `channel`.
/// The mock HAL's synthetic buffers carry no real chroma bytes, so `uv` may
/// come back empty; real sensor data always carries the full plane.
fn publish_color(shared: &PipelineShared, channel: &str, metadata: &FrameMetadata, width: u32, height: u32, data: &[u8]) {
    let y_size = (width * height) as usize;
    if let Some((y, uv)) = split_nv12(data, y_size) {
        publish(
            shared,
            channel,
            metadata,
            FormatCode::Nv12,
            width,
            height,
            vec![FrameData::from(y.to_vec()), FrameData::from(uv.to_vec())],
        );
    }
}

/// SmallVideo/LargeVideo always publish raw (§4.3) — unlike Preview, these
/// streams never go through RAW10 detection/conversion.
#[allow(clippy::too_many_arguments)]
fn handle_video(
    shared: &PipelineShared,
    metadata: &FrameMetadata,
    data: Vec<u8>,
    kind: StreamKind,
    grey_channel: &str,
    color_channel: &str,
    width: u32,
    height: u32,
) {
    publish(
        shared,
        grey_channel,
        metadata,
        FormatCode::Raw8,
        width,
        height,
        vec![FrameData::from(data.clone())],
    );

    let is_color = shared.config.sensor_kind.is_color();
    let mut uv_for_encoder: Option<FrameData> = None;
    if is_color {
        publish_color(shared, color_channel, metadata, width, height, &data);
        let y_size = (width * height) as usize;
        if let Some((_, uv)) = split_nv12(&data, y_size) {
            uv_for_encoder = Some(FrameData::from(uv.to_vec()));
        }
    }

    if let Some(slot) = shared.encoders.get(&kind) {
        let has_subscribers = shared
            .publishers
            .channels
            .get(slot.encoded_channel)
            .map(|p| p.num_clients() > 0)
            .unwrap_or(false);
        if has_subscribers {
            let input = EncodeInput {
                sequence: metadata.frame_id,
                timestamp_ns: metadata.timestamp_ns,
                width,
                height,
                y: FrameData::from(data),
                uv: uv_for_encoder,
            };
            slot.feeder.lock().unwrap().feed(input);
        }
    }
}

fn handle_snapshot(shared: &PipelineShared, metadata: &FrameMetadata, data: Vec<u8>) {
    let jpeg = extract_jpeg(&data).unwrap_or(&data[..]);
    let (width, height) = stream_dims(shared, StreamKind::Snapshot);

    if let Some(publisher) = shared.publishers.channels.get("snapshot") {
        if publisher.num_clients() > 0 {
            let meta = FrameMetadata {
                format_code: FormatCode::Jpg as u32,
                width,
                height,
                stride: 0,
                size_bytes: jpeg.len() as u32,
                ..*metadata
            };
            publisher.publish(Frame::new(meta, vec![FrameData::from(jpeg.to_vec())]));
        }
    }

    if let Some(path) = shared.snapshots.pop_destination() {
        if let Some(parent) = std::path::Path::new(&path).parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(camera = %shared.config.name, %path, error = %e, "failed to create snapshot directory");
                return;
            }
        }
        if let Err(e) = std::fs::write(&path, jpeg) {
            warn!(camera = %shared.config.name, %path, error = %e, "failed to write snapshot");
        }
    }
}

/// Locate the embedded JPEG within a BLOB snapshot buffer by scanning for
/// start/end markers.
fn extract_jpeg(data: &[u8]) -> Option<&[u8]> {
    let start = find_marker(data, &JPEG_START_MARKER, 0)?;
    let end = find_marker(data, &JPEG_END_MARKER, start)?;
    Some(&data[start..end + JPEG_END_MARKER.len()])
}

fn find_marker(data: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|p| p + from)
}

fn tail_row(data: &[u8]) -> &[u8] {
    let tail_len = (data.len() / 10).max(5).min(data.len());
    &data[data.len() - tail_len..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_jpeg_finds_embedded_markers() {
        let mut blob = vec![0u8; 4];
        blob.extend_from_slice(&JPEG_START_MARKER);
        blob.extend_from_slice(&[1, 2, 3]);
        blob.extend_from_slice(&JPEG_END_MARKER);
        blob.extend_from_slice(&[9, 9]);

        let jpeg = extract_jpeg(&blob).unwrap();
        assert_eq!(jpeg[0..2], JPEG_START_MARKER);
        assert_eq!(jpeg[jpeg.len() - 2..], JPEG_END_MARKER);
    }

    #[test]
    fn extract_jpeg_returns_none_without_markers() {
        let blob = vec![1, 2, 3, 4];
        assert!(extract_jpeg(&blob).is_none());
    }

    #[test]
    fn luminance_histogram_counts_every_byte() {
        let histogram = luminance_histogram(&[0, 0, 255, 128]);
        assert_eq!(histogram[0], 2);
        assert_eq!(histogram[255], 1);
        assert_eq!(histogram[128], 1);
        assert_eq!(histogram.iter().sum::<u32>(), 4);
    }

    #[test]
    fn canonical_timestamp_picks_the_earlier_side_regardless_of_which_is_master() {
        assert_eq!(canonical_timestamp(1_500_000, 1_000_000), 1_000_000);
        assert_eq!(canonical_timestamp(1_000_000, 1_500_000), 1_000_000);
    }

    #[test]
    fn split_uv_separates_planes_at_configured_dimensions() {
        let data = vec![1, 2, 3, 4, 9, 9];
        let uv = split_uv(2, 2, &data).unwrap();
        assert_eq!(uv, vec![9, 9]);
    }

    #[test]
    fn split_uv_returns_none_when_buffer_too_short() {
        assert!(split_uv(4, 4, &[1, 2, 3]).is_none());
    }

    fn slave_deposit(y: &[u8], uv: Option<&[u8]>) -> SlaveDeposit {
        SlaveDeposit {
            timestamp_ns: 0,
            y: FrameData::from(y.to_vec()),
            uv: uv.map(|u| FrameData::from(u.to_vec())),
        }
    }

    #[test]
    fn combine_stereo_payload_four_segments_when_both_sides_have_uv() {
        let slave = slave_deposit(&[5, 6], Some(&[15, 16]));
        let (channel, format, segments) = combine_stereo_payload(vec![1, 2], Some(vec![11, 12]), &slave);

        assert_eq!(channel, "color");
        assert!(matches!(format, FormatCode::StereoNv12));
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0].as_ref(), &[1, 2]);
        assert_eq!(segments[1].as_ref(), &[11, 12]);
        assert_eq!(segments[2].as_ref(), &[5, 6]);
        assert_eq!(segments[3].as_ref(), &[15, 16]);
    }

    #[test]
    fn combine_stereo_payload_falls_back_to_mono_raw8_without_uv() {
        let slave = slave_deposit(&[5, 6], None);
        let (channel, format, segments) = combine_stereo_payload(vec![1, 2], None, &slave);

        assert_eq!(channel, "grey");
        assert!(matches!(format, FormatCode::StereoRaw8));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].as_ref(), &[1, 2, 5, 6]);
    }

    #[test]
    fn combine_stereo_payload_falls_back_when_only_one_side_has_uv() {
        let slave = slave_deposit(&[5, 6], None);
        let (channel, format, _) = combine_stereo_payload(vec![1, 2], Some(vec![11, 12]), &slave);

        assert_eq!(channel, "grey");
        assert!(matches!(format, FormatCode::StereoRaw8));
    }
}
