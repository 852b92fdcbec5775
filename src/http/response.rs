use std::time::SystemTime;

/// HTTP status codes the server can answer with.
///
/// - `Ok` (200): resource found and served
/// - `BadRequest` (400): malformed request line, traversal attempt, read timeout
/// - `Unauthorized` (401): reserved, never produced by the file pipeline
/// - `Forbidden` (403): directory without an index file
/// - `NotFound` (404): no such file
/// - `MethodNotAllowed` (405): recognized method the server does not serve
/// - `InternalServerError` (500): unknown method/version tokens, I/O failures
/// - `NotImplemented` (501): known but unsupported protocol version
/// - `ServiceUnavailable` (503): connection rejected by a full dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 500 Internal Server Error
    InternalServerError,
    /// 501 Not Implemented
    NotImplemented,
    /// 503 Service Unavailable
    ServiceUnavailable,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use prefork::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotImplemented.as_u16(), 501);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    /// Returns the reason phrase written after the code in the status line.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// A response head, plus an optional in-memory body.
///
/// File bodies are not held here; the connection streams them after the
/// head has been written. Headers keep their insertion order.
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// Header name/value pairs in the order they are written
    pub headers: Vec<(String, String)>,
    /// In-memory body, empty for file responses
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```
/// # use prefork::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::NotFound)
///     .header("Content-Type", "text/plain")
///     .header("Content-Length", "0")
///     .build();
/// assert_eq!(response.header("content-length"), Some("0"));
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header, replacing the value of an existing one with the same
    /// (case-insensitive) name without moving it.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();

        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some((_, v)) => *v = value,
            None => self.headers.push((key, value)),
        }
        self
    }

    /// Sets an in-memory body and its `Content-Length`.
    pub fn body(self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        let len = body.len();
        let mut builder = self.header("Content-Length", len.to_string());
        builder.body = body;
        builder
    }

    pub fn build(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// The standard head sent for every pipeline response:
    /// `Server`, `Date`, `Content-Type`, `Content-Length`, in that order.
    pub fn head(
        status: StatusCode,
        server: &str,
        content_type: &str,
        content_length: u64,
        now: SystemTime,
    ) -> Self {
        ResponseBuilder::new(status)
            .header("Server", server)
            .header("Date", httpdate::fmt_http_date(now))
            .header("Content-Type", content_type)
            .header("Content-Length", content_length.to_string())
            .build()
    }

    /// Sent by the dispatcher when every client slot is taken.
    pub fn rejection(server: &str) -> Self {
        ResponseBuilder::new(StatusCode::ServiceUnavailable)
            .header("Server", server)
            .header("Date", httpdate::fmt_http_date(SystemTime::now()))
            .header("Content-Type", "text/plain")
            .body("Too many clients, rejecting connection\n")
            .build()
    }

    /// Looks up a header value by case-insensitive name.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Value of the `Content-Length` header, 0 when absent or unparsable.
    pub fn content_length(&self) -> u64 {
        self.header("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}
