//! Actix Web server exposing every stream output, the detection snapshot,
//! the control table and Prometheus metrics.
//!
//! The server runs on its own thread with its own actix system so capture and
//! the vision loop never share a runtime with HTTP clients. The listener is
//! bound by the caller, which makes a busy port a startup error.

use std::{net::TcpListener, thread::JoinHandle};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::{Value, to_string};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use vision::DetectionStore;

use crate::{
    control::{ControlPlane, ControlTable, ControlValue},
    stream::{OutputKind, StreamHub},
    telemetry,
};

const DETECTION_EVENT_INTERVAL_MS: u64 = 250;

/// Shared state backing HTTP handlers.
#[derive(Clone)]
pub struct ServerState {
    pub hub: StreamHub,
    pub detections: DetectionStore,
    pub control: ControlTable,
    pub metrics: Option<&'static PrometheusHandle>,
}

/// Handle for the server thread.
pub struct StreamServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamServer {
    /// Signal the server to stop and block until the thread exits.
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Serve `state` on an already bound listener.
pub fn spawn_stream_server(state: ServerState, listener: TcpListener) -> Result<StreamServer> {
    let addr = listener.local_addr().context("stream listener has no address")?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("stream-server", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(state.clone()))
                    .configure(routes)
            })
            .listen(listener)?
            .run();

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn stream server thread")?;

    info!("Serving streams on http://{addr}/");
    Ok(StreamServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_handler))
        .route("/stream/{name}/stream.mjpg", web::get().to(mjpeg_handler))
        .route("/stream/{name}/frame.jpg", web::get().to(frame_handler))
        .route("/detections", web::get().to(detections_handler))
        .route("/detections/events", web::get().to(detection_events_handler))
        .route("/table", web::get().to(table_handler))
        .route("/table/{key}", web::get().to(table_get_handler))
        .route("/table/{key}", web::put().to(table_put_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

#[derive(Serialize)]
struct StreamEntry {
    name: String,
    kind: OutputKind,
    source: Option<String>,
    mjpeg: String,
    frame: String,
}

#[derive(Serialize)]
struct IndexResponse {
    streams: Vec<StreamEntry>,
    endpoints: [&'static str; 4],
}

/// List every stream with its URLs.
async fn index_handler(state: web::Data<ServerState>) -> HttpResponse {
    let streams = state
        .hub
        .describe()
        .into_iter()
        .map(|info| StreamEntry {
            mjpeg: format!("/stream/{}/stream.mjpg", info.name),
            frame: format!("/stream/{}/frame.jpg", info.name),
            name: info.name,
            kind: info.kind,
            source: info.source,
        })
        .collect();
    HttpResponse::Ok().json(IndexResponse {
        streams,
        endpoints: ["/detections", "/detections/events", "/table", "/metrics"],
    })
}

/// Stream one output as multipart MJPEG, following its current source.
async fn mjpeg_handler(name: web::Path<String>, state: web::Data<ServerState>) -> HttpResponse {
    let Some(output) = state.hub.get(&name) else {
        return HttpResponse::NotFound().body(format!("no stream named '{name}'"));
    };

    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(output.frame_interval());
        let mut last_sent = None;
        loop {
            interval.tick().await;
            let Some((source, sequence, frame)) = output.current_frame() else {
                continue;
            };
            if last_sent == Some((source, sequence)) {
                continue;
            }
            last_sent = Some((source, sequence));
            match output.encode(&frame) {
                Ok(jpeg) => {
                    let mut payload = Vec::with_capacity(jpeg.len() + 64);
                    payload.extend_from_slice(b"--frame\r\n");
                    payload.extend_from_slice(
                        format!("X-Timestamp: {}\r\n", frame.timestamp_ms).as_bytes(),
                    );
                    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
                    payload.extend_from_slice(&jpeg);
                    payload.extend_from_slice(b"\r\n");
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
                }
                Err(err) => warn!("stream '{}': {err}", output.name()),
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

/// Return the current frame of one output as a JPEG.
async fn frame_handler(name: web::Path<String>, state: web::Data<ServerState>) -> HttpResponse {
    let Some(output) = state.hub.get(&name) else {
        return HttpResponse::NotFound().body(format!("no stream named '{name}'"));
    };
    let Some((_, _, frame)) = output.current_frame() else {
        return HttpResponse::NoContent().finish();
    };
    match output.encode(&frame) {
        Ok(jpeg) => HttpResponse::Ok().content_type("image/jpeg").body(jpeg),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

/// Return the last-published detection set as JSON.
async fn detections_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.detections.snapshot() {
        Some(snapshot) => HttpResponse::Ok().json(&*snapshot),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Stream detection snapshots as Server-Sent Events.
async fn detection_events_handler(state: web::Data<ServerState>) -> HttpResponse {
    let detections = state.detections.clone();
    let stream = stream! {
        yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b"retry: 500\n\n"));
        let mut interval = actix_web::rt::time::interval(
            std::time::Duration::from_millis(DETECTION_EVENT_INTERVAL_MS),
        );
        let mut last_sent = None;
        loop {
            interval.tick().await;
            let Some(snapshot) = detections.snapshot() else {
                yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b": keep-alive\n\n"));
                continue;
            };
            if last_sent == Some(snapshot.frame_number) {
                continue;
            }
            last_sent = Some(snapshot.frame_number);
            let chunk = match to_string(&*snapshot) {
                Ok(json) => format!("id: {}\ndata: {json}\n\n", snapshot.frame_number),
                Err(err) => format!("event: error\ndata: {err}\n\n"),
            };
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(chunk));
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "text/event-stream"))
        .append_header(("Connection", "keep-alive"))
        .streaming(stream)
}

async fn table_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(state.control.entries())
}

async fn table_get_handler(key: web::Path<String>, state: web::Data<ServerState>) -> HttpResponse {
    match state.control.get(&key) {
        Some(value) => HttpResponse::Ok().json(value),
        None => HttpResponse::NotFound().finish(),
    }
}

/// Write a key; the body is any JSON value.
async fn table_put_handler(
    key: web::Path<String>,
    body: web::Json<Value>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    state
        .control
        .put(&key, ControlValue::from(body.into_inner()));
    HttpResponse::NoContent().finish()
}

async fn metrics_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().body("metrics recorder not installed"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test};
    use serde_json::json;
    use video_ingest::{Frame, FrameFeed};
    use vision::{Contour, Point, VisionError, VisionLoop, VisionSettings};

    use super::*;
    use crate::config::ControlMode;

    fn state() -> ServerState {
        ServerState {
            hub: StreamHub::new(),
            detections: DetectionStore::new(),
            control: ControlTable::start(ControlMode::Server, 0).unwrap(),
            metrics: None,
        }
    }

    macro_rules! service {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .configure(routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn index_lists_streams() {
        let state = state();
        let output = state.hub.add("front", OutputKind::Camera).unwrap();
        output.bind(FrameFeed::new("front"));
        let app = service!(state);

        let body: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/").to_request())
                .await;
        assert_eq!(body["streams"][0]["name"], "front");
        assert_eq!(body["streams"][0]["kind"], "camera");
        assert_eq!(body["streams"][0]["mjpeg"], "/stream/front/stream.mjpg");
    }

    #[actix_web::test]
    async fn frame_endpoint_serves_jpeg() {
        let state = state();
        let output = state.hub.add("front", OutputKind::Camera).unwrap();
        let feed = FrameFeed::new("front");
        output.bind(feed.clone());
        let app = service!(state);

        let req = test::TestRequest::get()
            .uri("/stream/front/frame.jpg")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        feed.put_frame(Frame::blank(8, 8, 1));
        let req = test::TestRequest::get()
            .uri("/stream/front/frame.jpg")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
    }

    #[actix_web::test]
    async fn unknown_stream_is_not_found() {
        let state = state();
        let app = service!(state);
        for uri in ["/stream/nope/frame.jpg", "/stream/nope/stream.mjpg"] {
            let resp =
                test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }
    }

    #[actix_web::test]
    async fn mjpeg_uses_multipart_content_type() {
        let state = state();
        state.hub.add("driver", OutputKind::Switched).unwrap();
        let app = service!(state);
        let req = test::TestRequest::get()
            .uri("/stream/driver/stream.mjpg")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "multipart/x-mixed-replace; boundary=frame"
        );
    }

    #[actix_web::test]
    async fn detections_reflect_last_published_set() {
        let state = state();
        let app = service!(state);
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/detections").to_request())
                .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let feed = FrameFeed::new("front");
        let mut vision = VisionLoop::new(
            feed.sink(),
            |_: &Frame| -> Result<Vec<Contour>, VisionError> {
                Ok(vec![Contour {
                    points: vec![Point::new(1, 1), Point::new(4, 2)],
                }])
            },
            state.detections.clone(),
            Arc::new(state.control.clone()),
            &VisionSettings::default(),
        );
        feed.put_frame(Frame::blank(8, 8, 5));
        vision.step().unwrap();

        let body: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/detections").to_request(),
        )
        .await;
        assert_eq!(body["frame_number"], 1);
        assert_eq!(body["center_line"], 1000.0);
        assert_eq!(body["targets"][0]["rect"]["width"], 4);
    }

    #[actix_web::test]
    async fn table_round_trips_values() {
        let state = state();
        let app = service!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/table/cam").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::put()
            .uri("/table/cam")
            .set_json(json!("rear"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            state.control.get("cam"),
            Some(ControlValue::Text("rear".into()))
        );

        let body: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/table/cam").to_request(),
        )
        .await;
        assert_eq!(body, json!("rear"));
    }

    #[actix_web::test]
    async fn metrics_without_recorder_is_not_found() {
        let state = state();
        let app = service!(state);
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[::core::prelude::v1::test]
    fn running_server_answers_then_stops() {
        use std::{
            io::{Read, Write},
            net::TcpStream,
            time::Duration,
        };

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = spawn_stream_server(state(), listener).unwrap();

        let mut conn = TcpStream::connect(addr).unwrap();
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        write!(conn, "GET /table HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n").unwrap();
        let mut response = String::new();
        conn.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");

        server.stop();
        assert!(TcpStream::connect(addr).is_err());
    }
}
