use crate::http::response::StatusCode;

/// HTTP request methods the server recognizes.
///
/// Only `GET` and `HEAD` are served. The others are recognized so that they
/// can be answered with 405 Method Not Allowed instead of a generic error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, typically uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use prefork::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }

    /// Whether the file pipeline answers this method.
    pub fn is_served(&self) -> bool {
        matches!(self, Method::GET | Method::HEAD)
    }
}

/// HTTP protocol versions the server recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
    Http20,
    Http30,
}

impl Version {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            "HTTP/2.0" => Some(Version::Http20),
            "HTTP/3.0" => Some(Version::Http30),
            _ => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Version::Http10 | Version::Http11)
    }
}

/// A parsed request line.
///
/// Tokens are kept as received so that unknown methods and versions can be
/// classified later. Headers are read from the wire but not interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Method token as sent (e.g. "GET")
    pub method: String,
    /// Raw request-target (e.g. "/a%20b.html?x=1")
    pub target: String,
    /// Version token as sent (e.g. "HTTP/1.0")
    pub version: String,
    /// Target with the query dropped and percent escapes decoded (e.g. "/a b.html")
    pub path: String,
}

impl Request {
    pub fn method(&self) -> Option<Method> {
        Method::from_str(&self.method)
    }

    pub fn version(&self) -> Option<Version> {
        Version::from_str(&self.version)
    }

    /// True when the decoded path tries to climb out of the document root.
    ///
    /// The path is judged the way it ends up appended to the root: a path
    /// without a leading `/` gets one, so a leading `..` counts too.
    pub fn is_traversal(&self) -> bool {
        self.path.starts_with("..") || self.path.contains("/..")
    }

    /// Checks method, then version, then the path, and returns the status a
    /// rejected request is answered with.
    ///
    /// # Example
    ///
    /// ```
    /// # use prefork::http::request::{Method, Request};
    /// # use prefork::http::response::StatusCode;
    /// let request = Request {
    ///     method: "PATCH".into(),
    ///     target: "/a.txt".into(),
    ///     version: "HTTP/1.1".into(),
    ///     path: "/a.txt".into(),
    /// };
    /// assert_eq!(request.validate(), Err(StatusCode::MethodNotAllowed));
    /// ```
    pub fn validate(&self) -> Result<Method, StatusCode> {
        let method = match self.method() {
            Some(method) if method.is_served() => method,
            Some(_) => return Err(StatusCode::MethodNotAllowed),
            None => return Err(StatusCode::InternalServerError),
        };

        match self.version() {
            Some(version) if version.is_supported() => {}
            Some(_) => return Err(StatusCode::NotImplemented),
            None => return Err(StatusCode::InternalServerError),
        }

        if self.is_traversal() {
            return Err(StatusCode::BadRequest);
        }

        Ok(method)
    }
}
