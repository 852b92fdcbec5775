use std::io;
use std::path::Path;
use std::time::SystemTime;

use bytes::BytesMut;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::HttpConfig;
use crate::fsm::{self, IllegalTransition, Machine, Transition};
use crate::http::mime;
use crate::http::parser::{find_headers_end, parse_http_request};
use crate::http::request::{Method, Request};
use crate::http::resource::{self, Resource};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{ResponseWriter, copy_body};

/// Capacity of the request buffer. A request whose header block does not
/// fit is answered with 400.
pub const RAW_SIZE: usize = 8192;

const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Start,
    ReadRequest,
    ParseRequest,
    CheckRequest,
    ResponseHandler,
    ErrorHandler,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    ReadRequest,
    ParseRequest,
    CheckRequest,
    Respond,
    HandleError,
}

pub const TRANSITIONS: &[Transition<ConnectionState, Handler>] = &[
    Transition::new(
        ConnectionState::Start,
        ConnectionState::ReadRequest,
        Handler::ReadRequest,
    ),
    Transition::new(
        ConnectionState::ReadRequest,
        ConnectionState::ParseRequest,
        Handler::ParseRequest,
    ),
    Transition::new(
        ConnectionState::ParseRequest,
        ConnectionState::CheckRequest,
        Handler::CheckRequest,
    ),
    Transition::new(
        ConnectionState::CheckRequest,
        ConnectionState::ResponseHandler,
        Handler::Respond,
    ),
    Transition::new(
        ConnectionState::ReadRequest,
        ConnectionState::ErrorHandler,
        Handler::HandleError,
    ),
    Transition::new(
        ConnectionState::ParseRequest,
        ConnectionState::ErrorHandler,
        Handler::HandleError,
    ),
    Transition::new(
        ConnectionState::CheckRequest,
        ConnectionState::ErrorHandler,
        Handler::HandleError,
    ),
    Transition::new(
        ConnectionState::ResponseHandler,
        ConnectionState::ErrorHandler,
        Handler::HandleError,
    ),
];

/// One client connection, driven through the request pipeline exactly once.
///
/// The request buffer is borrowed so a worker can reuse one allocation for
/// every connection it serves. It is empty again when [`Connection::run`]
/// returns.
pub struct Connection<'a, S> {
    stream: S,
    config: &'a HttpConfig,
    buffer: &'a mut BytesMut,
    request: Option<Request>,
    method: Option<Method>,
    mime_key: String,
    resource: Option<Resource>,
    status: StatusCode,
    head_sent: bool,
    error: Option<io::Error>,
}

impl<'a, S> Connection<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, config: &'a HttpConfig, buffer: &'a mut BytesMut) -> Self {
        buffer.clear();
        Self {
            stream,
            config,
            buffer,
            request: None,
            method: None,
            mime_key: config.default_mime.clone(),
            resource: None,
            status: StatusCode::Ok,
            head_sent: false,
            error: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Runs the pipeline, then shuts the stream down and releases it.
    ///
    /// Returns the status the client was answered with.
    pub async fn run(mut self) -> Result<StatusCode, IllegalTransition<ConnectionState>> {
        let result = fsm::run(&mut self, ConnectionState::ReadRequest).await;
        self.finish().await;
        result.map(|()| self.status)
    }

    async fn finish(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(error = %e, "shutdown failed");
        }
        self.buffer.clear();

        let path = self.request.as_ref().map_or("-", |r| r.target.as_str());
        match &self.error {
            Some(e) => {
                tracing::info!(status = self.status.as_u16(), path, error = %e, "request done")
            }
            None => tracing::info!(status = self.status.as_u16(), path, "request done"),
        }
    }

    fn fail(&mut self, status: StatusCode) -> ConnectionState {
        self.status = status;
        ConnectionState::ErrorHandler
    }

    async fn read_request(&mut self) -> ConnectionState {
        self.status = StatusCode::Ok;

        match timeout(self.config.read_timeout(), self.fill_buffer()).await {
            Ok(Ok(true)) => ConnectionState::ParseRequest,
            Ok(Ok(false)) => self.fail(StatusCode::BadRequest),
            Ok(Err(e)) => {
                self.error = Some(e);
                self.fail(StatusCode::InternalServerError)
            }
            Err(_) => {
                tracing::debug!(read = self.buffer.len(), "read deadline expired");
                self.fail(StatusCode::BadRequest)
            }
        }
    }

    /// Reads until the header terminator shows up. `false` means the peer
    /// closed or the buffer filled up first.
    async fn fill_buffer(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];

        while self.buffer.len() < RAW_SIZE {
            let want = READ_CHUNK.min(RAW_SIZE - self.buffer.len());
            let n = self.stream.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Ok(false);
            }

            self.buffer.extend_from_slice(&chunk[..n]);
            if find_headers_end(&self.buffer[..]).is_some() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn parse_request(&mut self) -> ConnectionState {
        match parse_http_request(&self.buffer[..]) {
            Ok(request) => {
                tracing::debug!(
                    method = %request.method,
                    path = %request.path,
                    version = %request.version,
                    "parsed request line"
                );
                self.mime_key =
                    mime::key_for(Path::new(&request.path), &self.config.default_mime).to_string();
                self.request = Some(request);
                ConnectionState::CheckRequest
            }
            Err(e) => {
                tracing::debug!(error = ?e, "malformed request line");
                self.fail(StatusCode::BadRequest)
            }
        }
    }

    async fn check_request(&mut self) -> ConnectionState {
        let Some(request) = &self.request else {
            return self.fail(StatusCode::InternalServerError);
        };

        let method = match request.validate() {
            Ok(method) => method,
            Err(status) => return self.fail(status),
        };

        let path = resource::fs_path(&self.config.document_root, &request.path);
        match resource::resolve(path, &self.config.index).await {
            Ok(found) => {
                let modified = found.modified.map(httpdate::fmt_http_date);
                tracing::debug!(
                    file = %found.path.display(),
                    len = found.len,
                    modified = modified.as_deref().unwrap_or("-"),
                    "resolved request"
                );
                self.mime_key =
                    mime::key_for(&found.path, &self.config.default_mime).to_string();
                self.method = Some(method);
                self.resource = Some(found);
                self.status = StatusCode::Ok;
                ConnectionState::ResponseHandler
            }
            Err(status) => self.fail(status),
        }
    }

    async fn respond(&mut self) -> ConnectionState {
        let Some(found) = self.resource.take() else {
            return self.fail(StatusCode::InternalServerError);
        };

        let result = match self.method {
            Some(Method::HEAD) => self.write_head(found.len).await,
            Some(Method::GET) => self.send_file(&found).await,
            _ => return self.fail(StatusCode::NotImplemented),
        };

        match result {
            Ok(()) => ConnectionState::End,
            Err(e) => {
                self.error = Some(e);
                self.fail(StatusCode::InternalServerError)
            }
        }
    }

    async fn send_file(&mut self, found: &Resource) -> io::Result<()> {
        let mut file = File::open(&found.path).await?;
        self.write_head(found.len).await?;

        let copied = copy_body(
            &mut file,
            &mut self.stream,
            found.len,
            self.config.write_timeout(),
        )
        .await?;
        if copied < found.len {
            tracing::debug!(expected = found.len, copied, "file shrank while sending");
        }
        Ok(())
    }

    async fn write_head(&mut self, content_length: u64) -> io::Result<()> {
        let head = Response::head(
            self.status,
            &self.config.server_name,
            mime::content_type(&self.mime_key),
            content_length,
            SystemTime::now(),
        );

        self.head_sent = true;
        ResponseWriter::new(&head)
            .write_to_stream(&mut self.stream, self.config.write_timeout())
            .await
    }

    async fn handle_error(&mut self) -> ConnectionState {
        if !self.head_sent {
            if let Err(e) = self.write_head(0).await {
                tracing::debug!(
                    status = self.status.as_u16(),
                    error = %e,
                    "failed to send error response"
                );
            }
        }
        ConnectionState::End
    }
}

impl<S> Machine for Connection<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type State = ConnectionState;
    type Handler = Handler;

    const START: ConnectionState = ConnectionState::Start;
    const END: ConnectionState = ConnectionState::End;

    fn transitions(&self) -> &'static [Transition<ConnectionState, Handler>] {
        TRANSITIONS
    }

    async fn perform(&mut self, handler: Handler) -> ConnectionState {
        match handler {
            Handler::ReadRequest => self.read_request().await,
            Handler::ParseRequest => self.parse_request(),
            Handler::CheckRequest => self.check_request().await,
            Handler::Respond => self.respond().await,
            Handler::HandleError => self.handle_error().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_no_duplicate_pairs() {
        for (i, a) in TRANSITIONS.iter().enumerate() {
            for b in &TRANSITIONS[i + 1..] {
                assert!(!(a.from == b.from && a.to == b.to), "{a:?} shadows {b:?}");
            }
        }
    }

    #[test]
    fn every_step_can_fail_over_to_error_handler() {
        for from in [
            ConnectionState::ReadRequest,
            ConnectionState::ParseRequest,
            ConnectionState::CheckRequest,
            ConnectionState::ResponseHandler,
        ] {
            assert_eq!(
                fsm::lookup(from, ConnectionState::ErrorHandler, TRANSITIONS),
                Some(Handler::HandleError)
            );
        }
    }

    #[test]
    fn happy_path_is_wired() {
        assert_eq!(
            fsm::lookup(ConnectionState::Start, ConnectionState::ReadRequest, TRANSITIONS),
            Some(Handler::ReadRequest)
        );
        assert_eq!(
            fsm::lookup(
                ConnectionState::CheckRequest,
                ConnectionState::ResponseHandler,
                TRANSITIONS
            ),
            Some(Handler::Respond)
        );
        assert_eq!(
            fsm::lookup(ConnectionState::Start, ConnectionState::ResponseHandler, TRANSITIONS),
            None
        );
    }
}
