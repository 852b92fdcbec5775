//! HTTP/1.x static-file pipeline.
//!
//! Each connection a worker receives is answered by exactly one request/response
//! exchange. There is no keep-alive: the stream is closed once the response
//! is out.
//!
//! # Architecture
//!
//! - **`connection`**: the pipeline, a [`crate::fsm::Machine`] over one client stream
//! - **`parser`**: request-line parsing, query stripping and percent-decoding
//! - **`request`**: method/version classification and request validation
//! - **`resource`**: maps request paths to files under the document root
//! - **`response`**: status codes and response heads
//! - **`writer`**: serializes heads and streams file bodies to the client
//! - **`mime`**: content type lookup by file extension
//!
//! # Pipeline
//!
//! ```text
//!   Start
//!     │
//!     ▼
//!   ReadRequest ──────┐   read until "\r\n\r\n" (deadline, 8 KiB cap)
//!     │               │
//!     ▼               │
//!   ParseRequest ─────┤   method, target, version
//!     │               │
//!     ▼               │
//!   CheckRequest ─────┤   method, version, traversal, stat
//!     │               │
//!     ▼               ▼
//!   ResponseHandler ─▶ ErrorHandler
//!     │               │
//!     ▼               ▼
//!    End ◀────────────┘
//! ```
//!
//! Any step can divert to `ErrorHandler`, which answers with the status the
//! failing step recorded.
//!
//! # Example
//!
//! ```no_run
//! use bytes::BytesMut;
//! use prefork::config::HttpConfig;
//! use prefork::http::connection::{Connection, RAW_SIZE};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HttpConfig::default();
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     let mut buffer = BytesMut::with_capacity(RAW_SIZE);
//!
//!     loop {
//!         let (socket, _addr) = listener.accept().await?;
//!         let status = Connection::new(socket, &config, &mut buffer).run().await?;
//!         println!("answered {}", status.as_u16());
//!     }
//! }
//! ```

pub mod connection;
pub mod mime;
pub mod parser;
pub mod request;
pub mod resource;
pub mod response;
pub mod writer;
