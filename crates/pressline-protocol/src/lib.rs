#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Wire protocol exchanged between pressline clients and the server.
//!
//! Layout: `transformation.rs` (closed set of stage kinds), `request.rs`
//! (request model), `codec.rs` (binary framing over the shared channel),
//! `notice.rs` (completion notices and reply-channel addressing).

pub mod codec;
pub mod error;
pub mod notice;
pub mod request;
pub mod transformation;

pub use codec::{MAX_PATH_LEN, MAX_STAGES, decode, decode_from, encode, encode_into};
pub use error::{ProtocolError, ProtocolResult};
pub use notice::{CompletionNotice, reply_channel_path};
pub use request::{Request, RequestKind};
pub use transformation::Transformation;
