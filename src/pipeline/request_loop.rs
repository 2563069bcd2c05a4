// SPDX-License-Identifier: GPL-3.0-only

//! RequestLoop: builds and submits capture requests at the sensor frame
//! rate, choosing which streams to request based on subscriber demand, AE
//! needs, and pending snapshots.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::error;

use crate::config::AeMode;
use crate::constants::request_loop::ADMISSION_BACKOFF;
use crate::constants::stereo::frame_period_ns;
use crate::frame::StreamKind;
use crate::hal::{CameraHal, NewRequest, RequestMetadata};

use super::PipelineShared;

/// Decide which streams this iteration should request, per §4.1 step 1.
fn select_streams(shared: &PipelineShared) -> Vec<StreamKind> {
    let mut streams = Vec::new();

    for (kind, raw, h264, color) in [
        (StreamKind::SmallVideo, "small_grey", "small_h264", "small_color"),
        (StreamKind::LargeVideo, "large_grey", "large_h264", "large_color"),
    ] {
        if !shared.pools.contains_key(&kind) {
            continue;
        }
        let wanted = [raw, h264, color]
            .iter()
            .filter_map(|name| shared.publishers.channels.get(*name))
            .any(|p| p.num_clients() > 0);
        if wanted {
            streams.push(kind);
        }
    }

    if shared.pools.contains_key(&StreamKind::Snapshot) && shared.snapshots.pending_count() > 0 {
        streams.push(StreamKind::Snapshot);
        shared.snapshots.decrement_pending();
    }

    // Builtin-ISP AE only needs *some* stream running to produce statistics;
    // it must not pull in preview on top of whatever small/large/snapshot
    // already admitted this iteration (examples/original_source's
    // SendOneCaptureRequest gates this on `!request.num_output_buffers`).
    let preview_wanted = shared.publishers.channels.get("grey").map(|p| p.num_clients() > 0).unwrap_or(false)
        || shared.publishers.channels.get("color").map(|p| p.num_clients() > 0).unwrap_or(false)
        || shared.publishers.channels.get("ir").map(|p| p.num_clients() > 0).unwrap_or(false)
        || shared.publishers.channels.get("depth").map(|p| p.num_clients() > 0).unwrap_or(false)
        || shared.ae_is_software()
        || (shared.config.ae.mode == AeMode::Isp && streams.is_empty());
    if preview_wanted && shared.pools.contains_key(&StreamKind::Preview) {
        streams.insert(0, StreamKind::Preview);
    }

    streams
}

pub fn run(shared: Arc<PipelineShared>, hal: Arc<Mutex<Box<dyn CameraHal>>>) {
    let frame_period = frame_period_ns(shared.config.frame_rate);
    let mut last_sequence: u64 = 0;

    loop {
        if shared.should_stop() {
            break;
        }

        let wanted = select_streams(&shared);
        if wanted.is_empty() {
            thread::sleep(ADMISSION_BACKOFF);
            continue;
        }

        let mut admitted = Vec::with_capacity(wanted.len());
        let mut handles = Vec::with_capacity(wanted.len());
        for kind in &wanted {
            if let Some(pool) = shared.pools.get(kind) {
                match pool.try_acquire() {
                    Some(handle) => {
                        admitted.push(*kind);
                        handles.push((*kind, handle));
                    }
                    None => {
                        tracing::warn!(
                            camera = %shared.config.name,
                            stream = ?kind,
                            "pool exhausted; omitting stream from this request"
                        );
                    }
                }
            }
        }

        if admitted.is_empty() {
            thread::sleep(ADMISSION_BACKOFF);
            continue;
        }

        let metadata = if shared.config.ae.mode == AeMode::Isp {
            RequestMetadata::default()
        } else {
            RequestMetadata {
                exposure_ns: Some(shared.exposure.exposure_ns()),
                gain: Some(shared.exposure.gain()),
            }
        };

        let request = NewRequest::new(admitted, metadata);
        let result = hal.lock().unwrap().submit_request(request);
        match result {
            Ok(sequence) => {
                last_sequence = sequence;
                for (kind, handle) in handles {
                    shared.track_outstanding(sequence, kind, handle);
                }
            }
            Err(e) => {
                error!(camera = %shared.config.name, error = %e, "HAL request submission failed; triggering emergency stop");
                // `handles` drops here, releasing the acquired slots back to
                // their pools; the process is about to emergency-stop anyway.
                shared.signal_emergency_stop();
                break;
            }
        }

        thread::sleep(std::time::Duration::from_nanos(frame_period));
    }

    // record the last sequence actually issued so the processing worker
    // knows when it has drained every in-flight request and can exit.
    shared.terminal_sequence.store(last_sequence, Ordering::SeqCst);
}
