//! Async editor driver: one open [`EditSession`] plus debounced auto-save.
//!
//! The session sits behind a mutex shared with the auto-save task. The lock
//! is only ever held for synchronous state transitions, never across the
//! store call, so edits keep flowing while a save is in flight.
//!
//! An auto-save that comes due while another save is running is skipped.
//! When the running save lands and the session is still dirty, the timer is
//! armed again, so the latest edit is persisted one debounce period later.

use crate::config::AutosaveConfig;
use crate::debounce::Debouncer;
use crate::filter::{FilterField, FilterVector};
use crate::imaging::{CodecError, ImageBackend, OutputFormat};
use crate::session::{self, EditSession, Export, SessionError, SessionEvent, SessionState};
use crate::store::{ImageRecord, ImageStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};

pub struct Editor {
    session: Arc<Mutex<EditSession>>,
    store: Arc<dyn ImageStore>,
    debouncer: Arc<Mutex<Debouncer>>,
}

impl Editor {
    pub fn new(session: EditSession, store: Arc<dyn ImageStore>, config: &AutosaveConfig) -> Self {
        let session = session.with_auto_save(config.enabled);
        Self {
            session: Arc::new(Mutex::new(session)),
            store,
            debouncer: Arc::new(Mutex::new(Debouncer::new(config.debounce()))),
        }
    }

    /// Open an editor on a stored record.
    pub fn open(
        record: &ImageRecord,
        store: Arc<dyn ImageStore>,
        config: &AutosaveConfig,
    ) -> Result<Self, SessionError> {
        Ok(Self::new(EditSession::open(record)?, store, config))
    }

    pub fn current(&self) -> FilterVector {
        self.session.lock().current()
    }

    pub fn last_saved(&self) -> FilterVector {
        self.session.lock().last_saved()
    }

    pub fn state(&self) -> SessionState {
        self.session.lock().state()
    }

    pub fn auto_save(&self) -> bool {
        self.session.lock().auto_save()
    }

    pub fn is_save_scheduled(&self) -> bool {
        self.debouncer.lock().is_pending()
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.session.lock().subscribe()
    }

    /// Set one field and (re)arm auto-save when the session is dirty.
    pub fn change_parameter(&mut self, field: FilterField, value: f32) -> SessionState {
        let (state, auto_save) = {
            let mut session = self.session.lock();
            (session.change_parameter(field, value), session.auto_save())
        };
        self.after_change(state, auto_save);
        state
    }

    pub fn reset(&mut self) -> SessionState {
        let (state, auto_save) = {
            let mut session = self.session.lock();
            (session.reset(), session.auto_save())
        };
        self.after_change(state, auto_save);
        state
    }

    fn after_change(&mut self, state: SessionState, auto_save: bool) {
        match (state, auto_save) {
            (SessionState::Dirty, true) => {
                schedule_save(&self.debouncer, &self.session, &self.store)
            }
            // Edited back to the saved vector: nothing left to persist
            (SessionState::Clean, _) => {
                self.debouncer.lock().cancel();
            }
            _ => {}
        }
    }

    /// Toggle auto-save. Turning it off drops any pending timer without saving.
    pub fn set_auto_save(&mut self, enabled: bool) {
        self.session.lock().set_auto_save(enabled);
        if !enabled && self.debouncer.lock().cancel() {
            tracing::debug!("pending auto-save cancelled");
        }
    }

    /// Save now, superseding any pending auto-save.
    pub async fn save(&mut self) -> Result<(), SessionError> {
        self.debouncer.lock().cancel();
        persist(&self.session, &*self.store).await
    }

    /// Render the current (possibly unsaved) vector.
    pub fn download(
        &self,
        backend: &(impl ImageBackend + ?Sized),
        format: OutputFormat,
        at: DateTime<Utc>,
    ) -> Result<Export, CodecError> {
        let (source, filters, title) = {
            let session = self.session.lock();
            (
                Arc::clone(session.source()),
                session.current(),
                session.title().to_string(),
            )
        };
        session::export(backend, &source, &filters, &title, format, at)
    }

    /// Close the editor. A dirty session needs `confirm` to return true;
    /// declining hands the editor back unchanged.
    pub fn close(mut self, confirm: impl FnOnce() -> bool) -> Result<(), Self> {
        let closed = self.session.lock().request_close(confirm);
        if closed {
            self.debouncer.lock().cancel();
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Arm the debounced auto-save.
///
/// The task only holds a weak handle on the timer, so dropping the editor
/// still cancels whatever is pending.
fn schedule_save(
    debouncer: &Arc<Mutex<Debouncer>>,
    session: &Arc<Mutex<EditSession>>,
    store: &Arc<dyn ImageStore>,
) {
    let timer = Arc::downgrade(debouncer);
    let session = Arc::clone(session);
    let store = Arc::clone(store);
    debouncer.lock().schedule(move || async move {
        match persist(&session, &*store).await {
            Ok(()) => {
                tracing::debug!("auto-save complete");
                rearm_if_dirty(&timer, &session, &store);
            }
            Err(SessionError::SaveInFlight) => {
                tracing::debug!("auto-save skipped, previous save still running")
            }
            Err(SessionError::NothingToSave) => {}
            Err(e) => tracing::warn!(error = %e, "auto-save failed"),
        }
    });
}

/// Edits made while a save was in flight still need a save of their own.
fn rearm_if_dirty(
    timer: &Weak<Mutex<Debouncer>>,
    session: &Arc<Mutex<EditSession>>,
    store: &Arc<dyn ImageStore>,
) {
    let Some(debouncer) = timer.upgrade() else {
        return;
    };
    let unsaved = {
        let session = session.lock();
        session.auto_save() && session.state() == SessionState::Dirty
    };
    if !unsaved {
        return;
    }
    let delay = {
        let debouncer = debouncer.lock();
        if debouncer.is_pending() {
            return;
        }
        debouncer.delay()
    };
    tracing::debug!(delay_ms = delay.as_millis() as u64, "auto-save re-armed");
    schedule_save(&debouncer, session, store);
}

/// Run one save without holding the session lock across the store call.
async fn persist(
    session: &Mutex<EditSession>,
    store: &(dyn ImageStore + '_),
) -> Result<(), SessionError> {
    let ticket = session.lock().begin_save()?;
    let result = store.save_filters(&ticket.image_id, &ticket.filters).await;
    session.lock().complete_save(&ticket, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use crate::store::{ImageId, NewImage, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Store that records saved vectors, optionally slow or failing.
    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<FilterVector>>,
        latency: Duration,
        fail: AtomicBool,
    }

    impl RecordingStore {
        fn with_latency(latency: Duration) -> Self {
            Self {
                latency,
                ..Self::default()
            }
        }

        fn saved(&self) -> Vec<FilterVector> {
            self.saved.lock().clone()
        }
    }

    #[async_trait]
    impl ImageStore for RecordingStore {
        async fn create(&self, _image: NewImage) -> Result<ImageRecord, StoreError> {
            Err(StoreError::Unavailable("read-only".into()))
        }

        async fn save_filters(
            &self,
            _id: &ImageId,
            filters: &FilterVector,
        ) -> Result<(), StoreError> {
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("offline".into()));
            }
            self.saved.lock().push(*filters);
            Ok(())
        }
    }

    fn editor(store: Arc<RecordingStore>) -> Editor {
        let session = EditSession::new(ImageId::from("img-1"), "Sunset", vec![0u8; 4], None);
        Editor::new(session, store, &AutosaveConfig::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_changes_coalesce_into_one_save() {
        let store = Arc::new(RecordingStore::default());
        let mut ed = editor(Arc::clone(&store));

        ed.change_parameter(FilterField::Brightness, 110.0);
        sleep(ms(500)).await;
        ed.change_parameter(FilterField::Brightness, 120.0);
        sleep(ms(500)).await;
        ed.change_parameter(FilterField::Brightness, 130.0);

        sleep(ms(1999)).await;
        assert!(store.saved().is_empty());

        sleep(ms(2)).await;
        let saved = store.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].brightness, 130.0);
        assert_eq!(ed.state(), SessionState::Clean);

        sleep(ms(10_000)).await;
        assert_eq!(store.saved().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_auto_save_cancels_pending_timer() {
        let store = Arc::new(RecordingStore::default());
        let mut ed = editor(Arc::clone(&store));

        ed.change_parameter(FilterField::Sepia, 40.0);
        assert!(ed.is_save_scheduled());
        ed.set_auto_save(false);
        assert!(!ed.is_save_scheduled());

        sleep(ms(5000)).await;
        assert!(store.saved().is_empty());
        assert_eq!(ed.state(), SessionState::Dirty);

        // Further edits do not schedule either
        ed.change_parameter(FilterField::Sepia, 50.0);
        assert!(!ed.is_save_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn editing_back_to_saved_cancels_timer() {
        let store = Arc::new(RecordingStore::default());
        let mut ed = editor(Arc::clone(&store));

        ed.change_parameter(FilterField::Invert, 100.0);
        ed.change_parameter(FilterField::Invert, 0.0);
        assert!(!ed.is_save_scheduled());
        sleep(ms(5000)).await;
        assert!(store.saved().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn save_in_flight_is_not_overtaken() {
        let store = Arc::new(RecordingStore::with_latency(ms(5000)));
        let mut ed = editor(Arc::clone(&store));

        ed.change_parameter(FilterField::Contrast, 110.0);
        // Auto-save starts at t=2000 and completes at t=7000
        sleep(ms(2500)).await;
        ed.change_parameter(FilterField::Contrast, 140.0);
        // Second timer fires at t=4500 while the first save is running

        sleep(ms(4501)).await;
        assert_eq!(store.saved().len(), 1);
        assert_eq!(store.saved()[0].contrast, 110.0);
        assert_eq!(ed.last_saved().contrast, 110.0);
        assert_eq!(ed.current().contrast, 140.0);
        assert_eq!(ed.state(), SessionState::Dirty);

        // The first save landing re-arms the timer for the newer edit
        assert!(ed.is_save_scheduled());
        ed.save().await.unwrap();
        assert_eq!(store.saved().len(), 2);
        assert_eq!(ed.state(), SessionState::Clean);
        assert!(!ed.is_save_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_auto_save_follows_the_running_one() {
        let store = Arc::new(RecordingStore::with_latency(ms(5000)));
        let mut ed = editor(Arc::clone(&store));

        ed.change_parameter(FilterField::Contrast, 110.0);
        sleep(ms(2500)).await;
        ed.change_parameter(FilterField::Contrast, 140.0);

        // t=7001: first save landed, no further edits since
        sleep(ms(4501)).await;
        assert_eq!(store.saved().len(), 1);
        assert!(ed.is_save_scheduled());

        // Re-armed timer fires at t=9000; the save lands at t=14000
        sleep(ms(1998)).await;
        assert!(ed.is_save_scheduled());
        sleep(ms(2)).await;
        assert!(!ed.is_save_scheduled());
        sleep(ms(5000)).await;
        let saved = store.saved();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].contrast, 140.0);
        assert_eq!(ed.state(), SessionState::Clean);

        sleep(ms(10_000)).await;
        assert_eq!(store.saved().len(), 2);
        assert!(!ed.is_save_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_editor_cancels_auto_save() {
        let store = Arc::new(RecordingStore::default());
        let mut ed = editor(Arc::clone(&store));
        ed.change_parameter(FilterField::Grayscale, 30.0);
        drop(ed);
        sleep(ms(5000)).await;
        assert!(store.saved().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_auto_save_retries_on_next_cycle() {
        let store = Arc::new(RecordingStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let mut ed = editor(Arc::clone(&store));

        ed.change_parameter(FilterField::Saturate, 150.0);
        sleep(ms(2100)).await;
        assert_eq!(ed.state(), SessionState::Dirty);
        assert!(ed.auto_save());

        store.fail.store(false, Ordering::SeqCst);
        ed.change_parameter(FilterField::Saturate, 160.0);
        sleep(ms(2100)).await;
        assert_eq!(store.saved().len(), 1);
        assert_eq!(ed.state(), SessionState::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_save_supersedes_timer() {
        let store = Arc::new(RecordingStore::default());
        let mut ed = editor(Arc::clone(&store));

        ed.change_parameter(FilterField::Blur, 1.5);
        ed.save().await.unwrap();
        assert!(!ed.is_save_scheduled());
        sleep(ms(5000)).await;
        assert_eq!(store.saved().len(), 1);
    }

    #[tokio::test]
    async fn manual_save_failure_keeps_dirty() {
        let store = Arc::new(RecordingStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let mut ed = editor(Arc::clone(&store));
        ed.set_auto_save(false);

        ed.change_parameter(FilterField::Blur, 1.5);
        let err = ed.save().await.unwrap_err();
        assert!(matches!(err, SessionError::Persistence(_)));
        assert_eq!(ed.state(), SessionState::Dirty);
    }

    #[tokio::test]
    async fn download_and_declined_close() {
        let store = Arc::new(RecordingStore::default());
        let mut ed = editor(store);
        ed.set_auto_save(false);
        ed.change_parameter(FilterField::Brightness, 150.0);

        let at = DateTime::from_timestamp_millis(5).unwrap();
        let export = ed.download(&MockBackend::new(), OutputFormat::Png, at).unwrap();
        assert_eq!(export.filename, "Sunset-5.png");

        let ed = ed.close(|| false).unwrap_err();
        assert_eq!(ed.current().brightness, 150.0);
        assert!(ed.close(|| true).is_ok());
    }
}
