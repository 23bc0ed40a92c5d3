//! Pipeline stages for fetching the files a sheet links to.
//!
//! Each submodule owns one step, so each can be tested without the others
//! and without a live Google account.
//!
//! ## Data Flow
//!
//! ```text
//! auth ──▶ google ──▶ url ──▶ google ──▶ naming ──▶ google ──▶ save
//! (OAuth)  (rows)    (file id) (metadata) (filename) (bytes)   (render/encode)
//! ```
//!
//! 1. [`auth`]   — cached token, refresh, or loopback consent flow
//! 2. [`google`] — Sheets values, Drive metadata and media, with retry
//! 3. [`url`]    — pull the Drive file id out of a link cell
//! 4. [`naming`] — build the on-disk filename from the row's name column
//! 5. [`save`]   — classify by extension and write, falling back
//!    PDF → image → raw bytes
//! 6. [`render`] — rasterise PDF pages in `spawn_blocking` (used by `save`)
//! 7. [`engine`] — locate or download the pdfium library `render` binds to

pub mod auth;
pub mod engine;
pub mod google;
pub mod naming;
pub mod render;
pub mod save;
pub mod url;
