//! Edit session state machine.
//!
//! An [`EditSession`] holds one immutable source image plus two filter
//! vectors: `current` (what the user sees) and `last_saved` (what the store
//! holds). The session is `Dirty` exactly when they differ.
//!
//! Saving is split in two so the persistence call can run without holding
//! the session:
//!
//! ```text
//! begin_save ──► SaveTicket { filters captured now } ──► store ──► complete_save
//! ```
//!
//! `complete_save` sets `last_saved` to the vector captured in the ticket,
//! never to whatever `current` has become in the meantime, so edits made
//! while a save is in flight keep the session `Dirty`. Only one ticket is
//! outstanding at a time.

use crate::filter::{FilterField, FilterVector};
use crate::imaging::{self, CodecError, ImageBackend, OutputFormat};
use crate::payload::{PayloadError, decode_payload};
use crate::store::{ImageId, ImageRecord, ImageStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No unsaved changes")]
    NothingToSave,
    #[error("A save is already in progress")]
    SaveInFlight,
    #[error("Save result does not match the pending save")]
    StaleSave,
    #[error("Failed to save filters: {0}")]
    Persistence(#[from] StoreError),
    #[error("Stored image is unreadable: {0}")]
    Payload(#[from] PayloadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Clean,
    Dirty,
}

/// Notifications delivered to [`EditSession::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// `current` changed.
    Changed {
        current: FilterVector,
        state: SessionState,
    },
    /// A save started; the host persists `filters` for `source`.
    Saving {
        source: Arc<[u8]>,
        filters: FilterVector,
    },
    Saved {
        filters: FilterVector,
    },
    SaveFailed {
        message: String,
    },
    Closed,
}

/// A save claimed by [`EditSession::begin_save`].
#[derive(Debug, Clone, PartialEq)]
pub struct SaveTicket {
    id: u64,
    pub image_id: ImageId,
    pub filters: FilterVector,
}

/// A rendered download.
#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub filename: String,
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
}

pub struct EditSession {
    image_id: ImageId,
    title: String,
    source: Arc<[u8]>,
    current: FilterVector,
    last_saved: FilterVector,
    auto_save: bool,
    in_flight: Option<u64>,
    next_ticket: u64,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl EditSession {
    /// Start a session over `source` with the persisted vector, if any.
    /// An absent vector opens as identity.
    pub fn new(
        image_id: ImageId,
        title: impl Into<String>,
        source: impl Into<Arc<[u8]>>,
        persisted: Option<FilterVector>,
    ) -> Self {
        let saved = FilterVector::from_persisted(persisted);
        Self {
            image_id,
            title: title.into(),
            source: source.into(),
            current: saved,
            last_saved: saved,
            auto_save: true,
            in_flight: None,
            next_ticket: 1,
            subscribers: Vec::new(),
        }
    }

    /// Open a stored record.
    pub fn open(record: &ImageRecord) -> Result<Self, SessionError> {
        let source = decode_payload(&record.image_data)?;
        tracing::debug!(id = %record.id, bytes = source.len(), "opening edit session");
        Ok(Self::new(
            record.id.clone(),
            record.title.clone(),
            source,
            record.filters,
        ))
    }

    pub fn with_auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    pub fn image_id(&self) -> &ImageId {
        &self.image_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn source(&self) -> &Arc<[u8]> {
        &self.source
    }

    pub fn current(&self) -> FilterVector {
        self.current
    }

    pub fn last_saved(&self) -> FilterVector {
        self.last_saved
    }

    pub fn state(&self) -> SessionState {
        if self.current == self.last_saved {
            SessionState::Clean
        } else {
            SessionState::Dirty
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state() == SessionState::Dirty
    }

    pub fn auto_save(&self) -> bool {
        self.auto_save
    }

    pub fn set_auto_save(&mut self, enabled: bool) {
        self.auto_save = enabled;
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Receive every future [`SessionEvent`].
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_current(&mut self, next: FilterVector) -> SessionState {
        self.current = next;
        let state = self.state();
        self.emit(SessionEvent::Changed {
            current: next,
            state,
        });
        state
    }

    /// Set one field, clamped into its range.
    pub fn change_parameter(&mut self, field: FilterField, value: f32) -> SessionState {
        let next = self.current.with(field, value);
        self.set_current(next)
    }

    /// Set `current` to identity. This is an edit, not a revert to the saved vector.
    pub fn reset(&mut self) -> SessionState {
        self.set_current(FilterVector::identity())
    }

    /// Capture `current` for persistence.
    pub fn begin_save(&mut self) -> Result<SaveTicket, SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::SaveInFlight);
        }
        if !self.is_dirty() {
            return Err(SessionError::NothingToSave);
        }
        let id = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight = Some(id);
        let ticket = SaveTicket {
            id,
            image_id: self.image_id.clone(),
            filters: self.current,
        };
        self.emit(SessionEvent::Saving {
            source: Arc::clone(&self.source),
            filters: ticket.filters,
        });
        Ok(ticket)
    }

    /// Record the outcome of persisting `ticket`.
    pub fn complete_save(
        &mut self,
        ticket: &SaveTicket,
        result: Result<(), StoreError>,
    ) -> Result<(), SessionError> {
        if self.in_flight != Some(ticket.id) {
            return Err(SessionError::StaleSave);
        }
        self.in_flight = None;
        match result {
            Ok(()) => {
                self.last_saved = ticket.filters;
                tracing::info!(id = %self.image_id, state = ?self.state(), "filters saved");
                self.emit(SessionEvent::Saved {
                    filters: ticket.filters,
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(id = %self.image_id, error = %e, "saving filters failed");
                self.emit(SessionEvent::SaveFailed {
                    message: e.to_string(),
                });
                Err(SessionError::Persistence(e))
            }
        }
    }

    /// Persist `current` through `store`.
    pub async fn save(&mut self, store: &(dyn ImageStore + '_)) -> Result<(), SessionError> {
        let ticket = self.begin_save()?;
        let result = store.save_filters(&ticket.image_id, &ticket.filters).await;
        self.complete_save(&ticket, result)
    }

    /// Render `current` for download. Works in either state.
    pub fn download(
        &self,
        backend: &(impl ImageBackend + ?Sized),
        format: OutputFormat,
        at: DateTime<Utc>,
    ) -> Result<Export, CodecError> {
        export(backend, &self.source, &self.current, &self.title, format, at)
    }

    /// Ask to close. A dirty session only closes if `confirm` returns true;
    /// otherwise nothing changes.
    pub fn request_close(&mut self, confirm: impl FnOnce() -> bool) -> bool {
        if self.is_dirty() && !confirm() {
            tracing::debug!(id = %self.image_id, "close declined");
            return false;
        }
        self.emit(SessionEvent::Closed);
        true
    }

    /// Consume the session if [`request_close`](Self::request_close) allows it.
    pub fn close(mut self, confirm: impl FnOnce() -> bool) -> Result<(), Self> {
        if self.request_close(confirm) {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Render `filters` onto `source` and name the result.
pub fn export(
    backend: &(impl ImageBackend + ?Sized),
    source: &[u8],
    filters: &FilterVector,
    title: &str,
    format: OutputFormat,
    at: DateTime<Utc>,
) -> Result<Export, CodecError> {
    let bytes = imaging::render(backend, source, filters, format)?;
    Ok(Export {
        filename: imaging::suggested_filename(title, format, at),
        format,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::FilterOp;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::store::{MemoryStore, NewImage};
    use crate::payload::encode_payload;

    fn session() -> EditSession {
        EditSession::new(ImageId::from("img-1"), "Sunset", vec![1u8, 2, 3], None)
    }

    #[test]
    fn absent_filters_open_clean_at_identity() {
        let s = session();
        assert_eq!(s.current(), FilterVector::identity());
        assert_eq!(s.last_saved(), FilterVector::identity());
        assert_eq!(s.state(), SessionState::Clean);
    }

    #[test]
    fn persisted_filters_open_clean() {
        let saved = FilterVector::identity().with(FilterField::Sepia, 30.0);
        let s = EditSession::new(ImageId::from("a"), "t", vec![0u8], Some(saved));
        assert_eq!(s.current(), saved);
        assert_eq!(s.state(), SessionState::Clean);
    }

    #[test]
    fn change_parameter_clamps_and_dirties() {
        let mut s = session();
        assert_eq!(s.change_parameter(FilterField::Brightness, 500.0), SessionState::Dirty);
        assert_eq!(s.current().brightness, 200.0);
    }

    #[test]
    fn changing_back_is_clean_again() {
        let mut s = session();
        s.change_parameter(FilterField::Blur, 2.5);
        assert_eq!(s.change_parameter(FilterField::Blur, 0.0), SessionState::Clean);
    }

    #[test]
    fn reset_is_an_edit_not_a_revert() {
        let saved = FilterVector::identity().with(FilterField::Invert, 100.0);
        let mut s = EditSession::new(ImageId::from("a"), "t", vec![0u8], Some(saved));
        assert_eq!(s.reset(), SessionState::Dirty);
        assert_eq!(s.current(), FilterVector::identity());
        assert_eq!(s.last_saved(), saved);
    }

    #[test]
    fn begin_save_requires_dirty() {
        let mut s = session();
        assert!(matches!(s.begin_save(), Err(SessionError::NothingToSave)));
    }

    #[test]
    fn successful_save_makes_clean() {
        let mut s = session();
        s.change_parameter(FilterField::Contrast, 120.0);
        let ticket = s.begin_save().unwrap();
        s.complete_save(&ticket, Ok(())).unwrap();
        assert_eq!(s.state(), SessionState::Clean);
        assert_eq!(s.last_saved().contrast, 120.0);
    }

    #[test]
    fn failed_save_stays_dirty() {
        let mut s = session();
        s.change_parameter(FilterField::Contrast, 120.0);
        let ticket = s.begin_save().unwrap();
        let err = s
            .complete_save(&ticket, Err(StoreError::Unavailable("offline".into())))
            .unwrap_err();
        assert!(matches!(err, SessionError::Persistence(_)));
        assert_eq!(s.state(), SessionState::Dirty);
        assert_eq!(s.last_saved(), FilterVector::identity());
        // Can try again
        assert!(s.begin_save().is_ok());
    }

    #[test]
    fn second_save_rejected_while_in_flight() {
        let mut s = session();
        s.change_parameter(FilterField::Sepia, 10.0);
        let _ticket = s.begin_save().unwrap();
        s.change_parameter(FilterField::Sepia, 20.0);
        assert!(matches!(s.begin_save(), Err(SessionError::SaveInFlight)));
    }

    #[test]
    fn late_completion_records_captured_vector() {
        let mut s = session();
        s.change_parameter(FilterField::Sepia, 10.0);
        let ticket = s.begin_save().unwrap();
        s.change_parameter(FilterField::Sepia, 20.0);

        s.complete_save(&ticket, Ok(())).unwrap();
        assert_eq!(s.last_saved().sepia, 10.0);
        assert_eq!(s.current().sepia, 20.0);
        assert_eq!(s.state(), SessionState::Dirty);
    }

    #[test]
    fn completing_twice_is_stale() {
        let mut s = session();
        s.change_parameter(FilterField::Sepia, 10.0);
        let ticket = s.begin_save().unwrap();
        s.complete_save(&ticket, Ok(())).unwrap();
        assert!(matches!(
            s.complete_save(&ticket, Ok(())),
            Err(SessionError::StaleSave)
        ));
    }

    #[test]
    fn download_renders_unsaved_current() {
        let backend = MockBackend::new();
        let mut s = session();
        s.change_parameter(FilterField::Brightness, 150.0);
        s.change_parameter(FilterField::Contrast, 120.0);
        let at = DateTime::from_timestamp_millis(1000).unwrap();

        let export = s.download(&backend, OutputFormat::Jpeg, at).unwrap();
        assert_eq!(export.filename, "Sunset-1000.jpg");
        assert_eq!(export.bytes, b"jpeg");
        assert_eq!(s.state(), SessionState::Dirty);

        let ops = backend.get_operations();
        assert!(matches!(&ops[1], RecordedOp::ApplyFilterChain(chain)
            if chain[1] == FilterOp::Brightness(1.5) && chain[2] == FilterOp::Contrast(1.2)));
    }

    #[test]
    fn declined_close_leaves_session_untouched() {
        let mut s = session();
        s.change_parameter(FilterField::Grayscale, 50.0);
        let s = s.close(|| false).unwrap_err();
        assert_eq!(s.state(), SessionState::Dirty);
        assert_eq!(s.current().grayscale, 50.0);
        assert_eq!(s.last_saved(), FilterVector::identity());
    }

    #[test]
    fn clean_close_skips_confirmation() {
        let s = session();
        assert!(s.close(|| panic!("should not ask")).is_ok());
    }

    #[test]
    fn confirmed_close_of_dirty_session() {
        let mut s = session();
        s.change_parameter(FilterField::Grayscale, 50.0);
        assert!(s.close(|| true).is_ok());
    }

    #[test]
    fn subscribers_see_changes_and_saves() {
        let mut s = session();
        let rx = s.subscribe();
        s.change_parameter(FilterField::Opacity, 50.0);
        let ticket = s.begin_save().unwrap();
        s.complete_save(&ticket, Ok(())).unwrap();

        let events: Vec<SessionEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SessionEvent::Changed { state: SessionState::Dirty, .. }));
        assert!(matches!(&events[1], SessionEvent::Saving { source, filters }
            if source[..] == [1u8, 2, 3] && filters.opacity == 50.0));
        assert!(matches!(events[2], SessionEvent::Saved { .. }));
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let mut s = session();
        drop(s.subscribe());
        s.change_parameter(FilterField::Opacity, 50.0);
        assert!(s.subscribers.is_empty());
    }

    #[tokio::test]
    async fn open_stored_record_and_save() {
        let store = MemoryStore::new();
        let record = store
            .create(NewImage {
                user_id: "u1".into(),
                title: "Sunset".into(),
                tags: vec![],
                image_data: encode_payload(&[9u8, 9, 9]),
                original_size: 3,
            })
            .await
            .unwrap();

        let mut s = EditSession::open(&record).unwrap();
        assert_eq!(&s.source()[..], [9u8, 9, 9]);
        assert_eq!(s.state(), SessionState::Clean);

        s.change_parameter(FilterField::HueRotate, 90.0);
        s.save(&store).await.unwrap();
        assert_eq!(s.state(), SessionState::Clean);
        assert_eq!(
            store.get(&record.id).unwrap().filters.unwrap().hue_rotate,
            90.0
        );
    }

    #[tokio::test]
    async fn save_to_missing_record_surfaces_error() {
        let store = MemoryStore::new();
        let mut s = session();
        s.change_parameter(FilterField::HueRotate, 90.0);
        let err = s.save(&store).await.unwrap_err();
        assert!(matches!(err, SessionError::Persistence(StoreError::NotFound(_))));
        assert!(s.is_dirty());
        assert!(!s.is_saving());
    }
}
