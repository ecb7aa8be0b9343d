// ============================================================================
// TRANSFORM WORKER: rotate/flip off the UI thread via message passing
// ============================================================================
//
// One long-lived thread, stateless between requests. Requests and replies
// carry PNG data URLs so nothing but plain data crosses the channel.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::canvas::draw_image_rect;
use crate::error::{EditorError, EditorResult};
use crate::io::{from_data_url, to_data_url};
use crate::ops::resize::{Interpolation, normalize};
use crate::ops::transform::{FlipAxis, flip, rotate};

pub const ERR_INVALID_INPUT: &str = "Invalid input data.";
pub const ERR_PROCESS: &str = "Failed to process image.";
pub const ERR_UNSUPPORTED: &str = "Unsupported operation.";

/// Angle in degrees for `rotate`, axis token for `flip`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransformArg {
    Angle(f32),
    Axis(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub image_src: String,
    pub operation: String,
    pub degrees: TransformArg,
    /// Output canvas size.
    pub width: u32,
    pub height: u32,
}

impl WorkerRequest {
    pub fn rotate(image_src: String, degrees: f32, width: u32, height: u32) -> Self {
        Self {
            image_src,
            operation: "rotate".into(),
            degrees: TransformArg::Angle(degrees),
            width,
            height,
        }
    }

    pub fn flip(image_src: String, axis: FlipAxis, width: u32, height: u32) -> Self {
        Self {
            image_src,
            operation: "flip".into(),
            degrees: TransformArg::Axis(axis.token().into()),
            width,
            height,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_data_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flipped_data_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    fn failed(msg: &str) -> Self {
        Self {
            error: Some(msg.to_string()),
            ..Self::default()
        }
    }

    /// The result data URL, or the worker's error as a ToolFailure.
    pub fn into_result(self) -> EditorResult<String> {
        if let Some(e) = self.error {
            return Err(EditorError::ToolFailure(e));
        }
        self.rotated_data_url
            .or(self.flipped_data_url)
            .ok_or_else(|| EditorError::ToolFailure(ERR_PROCESS.into()))
    }
}

/// Run one request synchronously. This is what the worker thread executes.
pub fn process(req: &WorkerRequest, max_dim: u32) -> WorkerResponse {
    if req.image_src.is_empty() || req.width == 0 || req.height == 0 {
        return WorkerResponse::failed(ERR_INVALID_INPUT);
    }
    let rotating = match req.operation.as_str() {
        "rotate" => true,
        "flip" => false,
        _ => return WorkerResponse::failed(ERR_UNSUPPORTED),
    };

    let src = match from_data_url(&req.image_src) {
        Ok(img) => img,
        Err(e) => {
            log::warn!("worker could not decode input: {}", e);
            return WorkerResponse::failed(ERR_PROCESS);
        }
    };

    let transformed = match (&req.degrees, rotating) {
        (TransformArg::Angle(deg), true) => rotate(&src, *deg),
        (TransformArg::Axis(token), false) => match FlipAxis::parse(token) {
            Some(axis) => flip(&src, axis),
            None => return WorkerResponse::failed(ERR_INVALID_INPUT),
        },
        _ => return WorkerResponse::failed(ERR_INVALID_INPUT),
    };

    let fitted = fit_canvas(transformed, req.width, req.height);
    let out = normalize(fitted, max_dim, Interpolation::Bilinear);
    match to_data_url(&out) {
        Ok(url) if rotating => WorkerResponse {
            rotated_data_url: Some(url),
            ..WorkerResponse::default()
        },
        Ok(url) => WorkerResponse {
            flipped_data_url: Some(url),
            ..WorkerResponse::default()
        },
        Err(_) => WorkerResponse::failed(ERR_PROCESS),
    }
}

// Draw centred on a `w`×`h` canvas, as an offscreen canvas of that size would.
fn fit_canvas(img: RgbaImage, w: u32, h: u32) -> RgbaImage {
    if img.dimensions() == (w, h) {
        return img;
    }
    let mut canvas = RgbaImage::new(w, h);
    let left = (w as f32 - img.width() as f32) / 2.0;
    let top = (h as f32 - img.height() as f32) / 2.0;
    draw_image_rect(&mut canvas, &img, left, top, img.width() as f32, img.height() as f32, 1.0);
    canvas
}

enum WorkerMessage {
    Job(WorkerRequest),
    Shutdown,
}

pub struct TransformWorker {
    jobs: mpsc::Sender<WorkerMessage>,
    results: mpsc::Receiver<WorkerResponse>,
    handle: Option<JoinHandle<()>>,
    in_flight: bool,
}

impl TransformWorker {
    pub fn spawn(max_dim: u32) -> EditorResult<Self> {
        let (job_tx, job_rx) = mpsc::channel::<WorkerMessage>();
        let (res_tx, res_rx) = mpsc::channel::<WorkerResponse>();
        let handle = std::thread::Builder::new()
            .name("transform-worker".into())
            .spawn(move || {
                while let Ok(WorkerMessage::Job(req)) = job_rx.recv() {
                    let reply = process(&req, max_dim);
                    if res_tx.send(reply).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| EditorError::ConfigFailure(format!("Could not start transform worker: {}", e)))?;
        log::info!("transform worker started");
        Ok(Self {
            jobs: job_tx,
            results: res_rx,
            handle: Some(handle),
            in_flight: false,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight
    }

    /// Queue a request. Only one may be in flight.
    pub fn submit(&mut self, req: WorkerRequest) -> EditorResult<()> {
        if self.in_flight {
            return Err(EditorError::ToolFailure(
                "A rotate or flip is already in progress.".into(),
            ));
        }
        self.jobs
            .send(WorkerMessage::Job(req))
            .map_err(|_| EditorError::ToolFailure("Transform worker is not running.".into()))?;
        self.in_flight = true;
        Ok(())
    }

    pub fn try_recv(&mut self) -> Option<WorkerResponse> {
        match self.results.try_recv() {
            Ok(r) => {
                self.in_flight = false;
                Some(r)
            }
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => self.lost(),
        }
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<WorkerResponse> {
        match self.results.recv_timeout(timeout) {
            Ok(r) => {
                self.in_flight = false;
                Some(r)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => self.lost(),
        }
    }

    fn lost(&mut self) -> Option<WorkerResponse> {
        if !self.in_flight {
            return None;
        }
        self.in_flight = false;
        Some(WorkerResponse::failed(ERR_PROCESS))
    }

    pub fn shutdown(&mut self) {
        let _ = self.jobs.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            log::info!("transform worker stopped");
        }
        self.in_flight = false;
    }
}

impl Drop for TransformWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn sample() -> RgbaImage {
        RgbaImage::from_fn(6, 3, |x, y| Rgba([x as u8 * 40, y as u8 * 80, 0, 255]))
    }

    #[test]
    fn request_json_uses_wire_names() {
        let req = WorkerRequest::rotate("data:image/png;base64,AA==".into(), 90.0, 3, 6);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["imageSrc"], "data:image/png;base64,AA==");
        assert_eq!(json["operation"], "rotate");
        assert_eq!(json["degrees"], 90.0);
        let flip = WorkerRequest::flip(String::new(), FlipAxis::Vertical, 1, 1);
        assert_eq!(serde_json::to_value(&flip).unwrap()["degrees"], "vertical");
        let reply = WorkerResponse::failed(ERR_UNSUPPORTED);
        assert_eq!(serde_json::to_string(&reply).unwrap(), r#"{"error":"Unsupported operation."}"#);
    }

    #[test]
    fn rotate_round_trip_through_worker() {
        let src = sample();
        let req = WorkerRequest::rotate(to_data_url(&src).unwrap(), 90.0, 3, 6);
        let url = process(&req, 400).into_result().unwrap();
        let out = from_data_url(&url).unwrap();
        assert_eq!(out.dimensions(), (3, 6));
        assert_eq!(out, rotate(&src, 90.0));
    }

    #[test]
    fn flip_through_worker_thread() {
        let src = sample();
        let mut worker = TransformWorker::spawn(400).unwrap();
        worker
            .submit(WorkerRequest::flip(to_data_url(&src).unwrap(), FlipAxis::Horizontal, 6, 3))
            .unwrap();
        assert!(worker.is_busy());
        let reply = worker.recv_timeout(Duration::from_secs(10)).expect("reply");
        assert!(reply.flipped_data_url.is_some());
        let out = from_data_url(&reply.into_result().unwrap()).unwrap();
        assert_eq!(out, flip(&src, FlipAxis::Horizontal));
        assert!(!worker.is_busy());
        worker.shutdown();
    }

    #[test]
    fn second_request_while_busy_is_rejected() {
        let src = sample();
        let url = to_data_url(&src).unwrap();
        let mut worker = TransformWorker::spawn(400).unwrap();
        worker.submit(WorkerRequest::rotate(url.clone(), 90.0, 3, 6)).unwrap();
        let err = worker.submit(WorkerRequest::rotate(url, 90.0, 3, 6)).unwrap_err();
        assert!(matches!(err, EditorError::ToolFailure(_)));
        assert!(worker.recv_timeout(Duration::from_secs(10)).is_some());
    }

    #[test]
    fn error_replies() {
        let url = to_data_url(&sample()).unwrap();
        let mut bad_op = WorkerRequest::rotate(url.clone(), 90.0, 3, 6);
        bad_op.operation = "skew".into();
        assert_eq!(process(&bad_op, 400).error.as_deref(), Some(ERR_UNSUPPORTED));

        let empty = WorkerRequest::rotate(String::new(), 90.0, 3, 6);
        assert_eq!(process(&empty, 400).error.as_deref(), Some(ERR_INVALID_INPUT));

        let garbage = WorkerRequest::rotate("data:image/png;base64,AAAA".into(), 90.0, 3, 6);
        assert_eq!(process(&garbage, 400).error.as_deref(), Some(ERR_PROCESS));

        let bad_axis = WorkerRequest {
            degrees: TransformArg::Axis("diagonal".into()),
            ..WorkerRequest::flip(url, FlipAxis::Horizontal, 6, 3)
        };
        assert_eq!(process(&bad_axis, 400).error.as_deref(), Some(ERR_INVALID_INPUT));
    }
}
