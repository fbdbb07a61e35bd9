//! # Retouch
//!
//! Non-destructive filter editing and export for an image library that lives
//! under a strict storage budget (ten images per user, five megabytes each,
//! stored inline as text payloads).
//!
//! # Architecture: Upload → Edit → Export
//!
//! ```text
//! 1. Upload    file bytes  →  UploadNegotiator  →  ImageStore::create
//!                              (recompress until it fits)
//! 2. Edit      ImageRecord →  EditSession / Editor  →  ImageStore::save_filters
//!                              (current vs last saved, debounced auto-save)
//! 3. Export    source + FilterVector  →  imaging::render  →  PNG / JPEG bytes
//! ```
//!
//! The source image is never modified after upload. Edits are a
//! [`filter::FilterVector`] of nine values; every export composites that vector
//! onto the untouched source, so any edit can be undone or changed later.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`filter`] | The nine filter fields, their ranges and identities, clamping and the composite expression |
//! | [`imaging`] | Decode, filter chain, encode and budget recompression on the `image` crate |
//! | [`upload`] | Upload budget negotiation: size rule, compression tiers, record submission |
//! | [`session`] | Edit session state machine: Clean/Dirty, two-phase save, close confirmation, download |
//! | [`editor`] | Async driver pairing a session with a store and debounced auto-save |
//! | [`debounce`] | Cancellable delayed task on tokio |
//! | [`store`] | Storage collaborator trait and in-memory implementation |
//! | [`payload`] | `data:` URL payloads for stored image bytes |
//! | [`config`] | `retouch.toml` loading, merging over stock defaults, validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Fixed Compositing Order
//!
//! Filters are applied in one order only:
//! blur, brightness, contrast, grayscale, hue-rotate, saturate, sepia, invert,
//! opacity. Later operations post-process earlier ones, so the order is part
//! of what a saved vector means. Reordering would silently change every
//! previously saved edit.
//!
//! ## Saved Means What Was Sent
//!
//! A save captures the vector at the moment it starts and, on success, records
//! exactly that vector as saved. Edits made while the store call is in flight
//! leave the session dirty, and the next save picks them up.
//!
//! ## Compression Results Are Re-checked
//!
//! A compression tier is a request, not a promise. Every result goes back
//! through the size rule; a result that is still too large re-offers the
//! tiers instead of being accepted.

pub mod config;
pub mod debounce;
pub mod editor;
pub mod filter;
pub mod imaging;
pub mod output;
pub mod payload;
pub mod session;
pub mod store;
pub mod upload;
