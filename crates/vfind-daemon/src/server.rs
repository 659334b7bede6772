//! HTTP surface of the connector.
//!
//! A single route accepts GET (query string) and POST (query string plus a
//! urlencoded or multipart body). Fields are flattened into [`Fields`],
//! bound to a [`Command`], and dispatched on the blocking pool.

use std::io::{self, Read};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use tokio::io::DuplexStream;
use tokio_util::io::{ReaderStream, SyncIoBridge};
use vfind_config::{log_server_debug, log_server_error};
use vfind_protocol::{Command, Fields, ProtocolError, UploadedFile, UPLOAD_FIELD};

use crate::commands::{CommandHandler, Reply};

type QueryPairs = Query<Vec<(String, String)>>;

/// Build the connector router serving `route`
pub fn router(handler: Arc<CommandHandler>, route: &str, max_body_bytes: usize) -> Router {
    Router::new()
        .route(route, get(connector_get).post(connector_post))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(handler)
}

async fn connector_get(
    State(handler): State<Arc<CommandHandler>>,
    Query(query): QueryPairs,
) -> Response {
    dispatch(handler, query.into_iter().collect(), Vec::new()).await
}

async fn connector_post(
    State(handler): State<Arc<CommandHandler>>,
    Query(query): QueryPairs,
    request: Request,
) -> Response {
    let mut fields: Fields = query.into_iter().collect();
    let mut files = Vec::new();

    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        if let Err(resp) = read_multipart(request, &mut fields, &mut files).await {
            return Json(resp).into_response();
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        match Form::<Vec<(String, String)>>::from_request(request, &()).await {
            Ok(Form(pairs)) => fields.extend(pairs),
            Err(e) => {
                return Json(vfind_protocol::Response::error("errCmdParams", e.body_text()))
                    .into_response()
            }
        }
    }

    dispatch(handler, fields, files).await
}

/// Text parts become fields; parts carrying a filename become uploads
async fn read_multipart(
    request: Request,
    fields: &mut Fields,
    files: &mut Vec<UploadedFile>,
) -> Result<(), vfind_protocol::Response> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| vfind_protocol::Response::error("errCmdParams", e.body_text()))?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                let code = if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    "errUploadFileSize"
                } else {
                    "errUploadTransfer"
                };
                return Err(vfind_protocol::Response::error(code, e.body_text()));
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| vfind_protocol::Response::error("errUploadTransfer", e.body_text()))?;

        match filename {
            Some(filename) if name == UPLOAD_FIELD || name == "upload" => {
                files.push(UploadedFile {
                    filename,
                    data: bytes.to_vec(),
                });
            }
            _ => fields.push(name, String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
    Ok(())
}

async fn dispatch(
    handler: Arc<CommandHandler>,
    fields: Fields,
    files: Vec<UploadedFile>,
) -> Response {
    let command = match Command::parse(&fields) {
        Ok(command) => command,
        Err(e) => return rejected(e),
    };

    let cmd = command.name();
    log_server_debug!("Dispatching", cmd = cmd, files = files.len());
    match tokio::task::spawn_blocking(move || handler.handle(command, files)).await {
        Ok(reply) => reply.into_response(),
        Err(e) => {
            log_server_error!(
                "Command task failed",
                cmd = cmd,
                error = tracing::field::display(&e)
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(vfind_protocol::Response::error("errUnknown", e.to_string())),
            )
                .into_response()
        }
    }
}

fn rejected(e: ProtocolError) -> Response {
    log_server_debug!("Rejected request", error = tracing::field::display(&e));
    Json(e.to_response()).into_response()
}

/// `attachment; filename="..."; filename*=UTF-8''...`
fn content_disposition(kind: &str, name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        kind,
        fallback,
        urlencoding::encode(name)
    )
}

/// Buffer size of the pipe between a volume reader and the response body
const STREAM_CHUNK: usize = 64 * 1024;

/// Feed a blocking volume reader through an in-memory pipe so the body is
/// produced a chunk at a time. A read error ends the stream early; the
/// declared `Content-Length` then tells the client the body is short.
fn pipe_reader(mut reader: Box<dyn Read + Send>) -> DuplexStream {
    let (writer, body) = tokio::io::duplex(STREAM_CHUNK);
    tokio::task::spawn_blocking(move || {
        let mut sink = SyncIoBridge::new(writer);
        match io::copy(&mut reader, &mut sink) {
            Ok(bytes) => log_server_debug!("File streamed", bytes = bytes),
            // a client hanging up closes the pipe as well
            Err(e) => log_server_debug!(
                "File stream ended early",
                error = tracing::field::display(&e)
            ),
        }
        let _ = sink.shutdown();
    });
    body
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Json(resp) => Json(resp).into_response(),
            Reply::File {
                name,
                mime,
                reader,
                size,
                attachment,
            } => {
                let kind = if attachment { "attachment" } else { "inline" };
                (
                    [
                        (CONTENT_TYPE, mime),
                        (CONTENT_DISPOSITION, content_disposition(kind, &name)),
                        (CONTENT_LENGTH, size.to_string()),
                    ],
                    Body::from_stream(ReaderStream::new(pipe_reader(reader))),
                )
                    .into_response()
            }
            Reply::Archive {
                name,
                mime,
                file,
                size,
            } => {
                let stream = ReaderStream::new(tokio::fs::File::from_std(file));
                (
                    [
                        (CONTENT_TYPE, mime),
                        (CONTENT_DISPOSITION, content_disposition("attachment", &name)),
                        (CONTENT_LENGTH, size.to_string()),
                    ],
                    Body::from_stream(stream),
                )
                    .into_response()
            }
            Reply::NoContent => StatusCode::NO_CONTENT.into_response(),
        }
    }
}
