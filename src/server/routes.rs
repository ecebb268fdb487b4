//! Request routing and response construction.
//!
//! | Method | Path                          | Operation  |
//! |--------|-------------------------------|------------|
//! | GET    | `/fs/<path>`                  | Read       |
//! | PUT    | `/fs/<path>`                  | Write      |
//! | POST   | `/exec_shell`                 | RunShell   |
//! | POST   | `/exec_command/<name>?<args>` | RunCommand |
//!
//! Everything else is 404. Error responses never carry a body.

use std::io;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode, Uri};
use percent_encoding::percent_decode_str;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::acl::PermissionRecord;
use crate::authorizer::{self, AccessRequest, Authorized, AuthorizerOptions, Operation};
use crate::executor::file::{self, FileDownload};
use crate::executor::process::{self, ProcessSpec};
use crate::executor::{ByteStream, ExecOptions, ExecutorError};

/// Response body type used by every handler.
pub type Body = UnsyncBoxBody<Bytes, io::Error>;

/// Per-request settings shared by all connections.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Shell interpreter for `/exec_shell`.
    pub shell: std::path::PathBuf,
    /// Process execution options.
    pub exec: ExecOptions,
    /// Authorization options.
    pub authorizer: AuthorizerOptions,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            shell: process::DEFAULT_SHELL.into(),
            exec: ExecOptions::default(),
            authorizer: AuthorizerOptions::default(),
        }
    }
}

/// Why a request could not be mapped to an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// No route matches the method and path.
    #[error("no route for {0}")]
    NotFound(String),
    /// The path or argument string does not decode.
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl RouteError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Malformed(_) => StatusCode::FORBIDDEN,
        }
    }
}

/// Map method and URI to an [`AccessRequest`] for `subject`.
///
/// # Errors
///
/// Returns [`RouteError::NotFound`] for unknown routes and
/// [`RouteError::Malformed`] when the path or arguments do not decode.
pub fn parse_request(method: &Method, uri: &Uri, subject: &str) -> Result<AccessRequest, RouteError> {
    let path = uri.path();
    let request = |operation: Operation, raw_path: String, command_args: Vec<String>| AccessRequest {
        operation,
        raw_path,
        command_args,
        subject: subject.to_owned(),
    };

    if let Some(rest) = path.strip_prefix("/fs/") {
        let operation = match *method {
            Method::GET => Operation::Read,
            Method::PUT => Operation::Write,
            _ => return Err(RouteError::NotFound(format!("{method} {path}"))),
        };
        return Ok(request(operation, decode(rest)?, Vec::new()));
    }

    if *method != Method::POST {
        return Err(RouteError::NotFound(format!("{method} {path}")));
    }

    if path == "/exec_shell" {
        return Ok(request(Operation::RunShell, String::new(), Vec::new()));
    }

    if let Some(name) = path.strip_prefix("/exec_command/") {
        let args = parse_args(uri.query().unwrap_or(""))?;
        return Ok(request(Operation::RunCommand, decode(name)?, args));
    }

    Err(RouteError::NotFound(format!("{method} {path}")))
}

/// Decode a percent-encoded, shell-quoted argument string into tokens.
///
/// # Errors
///
/// Returns [`RouteError::Malformed`] on invalid UTF-8 or unbalanced quotes.
pub fn parse_args(query: &str) -> Result<Vec<String>, RouteError> {
    let decoded = decode(query)?;
    shell_words::split(&decoded).map_err(|e| RouteError::Malformed(e.to_string()))
}

fn decode(raw: &str) -> Result<String, RouteError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| RouteError::Malformed(e.to_string()))
}

/// Handle one request from an authenticated peer.
pub async fn handle(
    req: Request<Incoming>,
    record: &PermissionRecord,
    settings: &HandlerSettings,
) -> Response<Body> {
    let access = match parse_request(req.method(), req.uri(), record.subject()) {
        Ok(access) => access,
        Err(e) => {
            info!(subject = record.subject(), error = %e, "request rejected");
            return status_only(e.status());
        }
    };

    let authorized = match authorizer::authorize(record, &access, settings.authorizer) {
        Ok(authorized) => authorized,
        Err(denial) => {
            info!(
                subject = %access.subject,
                operation = %access.operation,
                path = %access.raw_path,
                status = denial.status(),
                reason = %denial,
                "request denied"
            );
            return status_only(StatusCode::from_u16(denial.status()).unwrap_or(StatusCode::FORBIDDEN));
        }
    };

    info!(
        subject = %access.subject,
        operation = %access.operation,
        path = %access.raw_path,
        "request authorized"
    );

    let result = match authorized {
        Authorized::Read(path) => serve_read(&path).await,
        Authorized::Write(path) => serve_write(&path, req).await,
        Authorized::RunShell => {
            serve_process(ProcessSpec::shell(settings.shell.clone()), req, settings).await
        }
        Authorized::RunCommand { program, args } => {
            serve_process(ProcessSpec::command(program, args), req, settings).await
        }
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(subject = %access.subject, operation = %access.operation, error = %e, "operation failed");
            status_only(StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

async fn serve_read(path: &std::path::Path) -> Result<Response<Body>, ExecutorError> {
    let FileDownload { len, body } = file::open_read(path).await?;
    let mut response = Response::new(stream_body(body));
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}

async fn serve_write(
    path: &std::path::Path,
    req: Request<Incoming>,
) -> Result<Response<Body>, ExecutorError> {
    let declared = content_length(&req);
    let written = file::write_from_stream(path, declared, req.into_body().into_data_stream()).await?;
    if written < declared {
        warn!(path = %path.display(), declared, written, "upload ended early");
    }
    Ok(status_only(StatusCode::CREATED))
}

async fn serve_process(
    spec: ProcessSpec,
    req: Request<Incoming>,
    settings: &HandlerSettings,
) -> Result<Response<Body>, ExecutorError> {
    let input = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return Err(ExecutorError::Io {
                target: "request body".to_owned(),
                source: io::Error::new(io::ErrorKind::UnexpectedEof, e),
            })
        }
    };
    let output = process::spawn_streaming(&spec, input, &settings.exec)?;
    let mut response = Response::new(stream_body(output));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    Ok(response)
}

/// Declared request length; absent or unparsable counts as zero.
fn content_length<B>(req: &Request<B>) -> u64 {
    req.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn stream_body(stream: ByteStream) -> Body {
    StreamBody::new(stream.map(|chunk| chunk.map(Frame::data))).boxed_unsync()
}

/// An empty response with `status`.
pub fn status_only(status: StatusCode) -> Response<Body> {
    let body: Body = Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}
