//! Protocol module
//!
//! The HTTP disguise: reading and parsing the client's opening request,
//! resolving its destination, and the fixed responses written back.

mod destination;
mod headers;

pub use destination::{
    discard_one_read, Destination, DestinationResolver, HEADER_PASS, HEADER_REAL_HOST, HEADER_SPLIT,
};
pub use headers::{find_header, parse_request_head, read_request_head, Headers, RequestHead, HEAD_DELIMITER};

/// Written once the destination is connected; everything after it is tunnel payload
pub const RESPONSE_ESTABLISHED: &[u8] = b"HTTP/1.1 200 SSHPLUS\r\n\r\n";

/// Written when `X-Pass` does not match, right before the connection is closed
pub const RESPONSE_WRONG_PASS: &[u8] = b"HTTP/1.1 400 WrongPass!\r\n\r\n";
