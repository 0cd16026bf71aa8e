use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use skinswap_contracts::events::EventLog;
use skinswap_contracts::history::{
    overflow_ids, recent_first, GeneratedImage, HistoryStore, JsonHistoryStore,
    DEFAULT_HISTORY_LIMIT,
};
use skinswap_contracts::modes::clamp_replicas;
use skinswap_contracts::{
    build_request, classify_aspect_ratio, AspectRatio, BackendError, ImageData, ItemStatus,
    RequestPayload, StudioError, StudioMode,
};
use uuid::Uuid;

use crate::backend::ImageBackend;
use crate::settings::StudioSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Submitting,
    Settling,
}

/// One user-initiated generation batch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub mode: StudioMode,
    pub source: ImageData,
    pub reference: Option<ImageData>,
    pub annotation: String,
    pub intensity: f64,
    pub count: u32,
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub timestamp: i64,
    /// Per-item results in slot order, failures included.
    pub results: Vec<GeneratedImage>,
    /// History view after persistence and pruning, newest first.
    pub history: Vec<GeneratedImage>,
    pub pruned: Vec<String>,
    pub persist_failures: usize,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.count_status(ItemStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count_status(ItemStatus::Failed)
    }

    fn count_status(&self, status: ItemStatus) -> usize {
        self.results
            .iter()
            .filter(|item| item.status == status)
            .count()
    }
}

#[derive(Debug)]
struct Session {
    phase: BatchPhase,
    mode: StudioMode,
    source: Option<ImageData>,
    source_aspect: AspectRatio,
    reference: Option<ImageData>,
    results: Vec<GeneratedImage>,
    history: Vec<GeneratedImage>,
    last_timestamp: i64,
}

/// Coordinates generation batches, the session's inputs and the history archive.
///
/// Only one batch runs at a time; a second `start` while a batch is
/// submitting or settling fails with [`StudioError::BatchInProgress`].
pub struct Studio {
    backend: Arc<dyn ImageBackend>,
    store: Mutex<Option<Box<dyn HistoryStore>>>,
    session: Mutex<Session>,
    events: EventLog,
    history_limit: usize,
    max_in_flight: Option<usize>,
}

impl Studio {
    pub fn new(backend: Arc<dyn ImageBackend>, events: EventLog) -> Self {
        Self {
            backend,
            store: Mutex::new(None),
            session: Mutex::new(Session {
                phase: BatchPhase::Idle,
                mode: StudioMode::default(),
                source: None,
                source_aspect: AspectRatio::default(),
                reference: None,
                results: Vec::new(),
                history: Vec::new(),
                last_timestamp: 0,
            }),
            events,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_in_flight: None,
        }
    }

    /// Build a studio from settings, opening the on-disk history.
    ///
    /// An unavailable history store disables history for the session but
    /// leaves generation working.
    pub fn open(settings: &StudioSettings, backend: Arc<dyn ImageBackend>) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let events = EventLog::new(&settings.events_path, session_id);
        events.record(
            "session_started",
            object(json!({
                "backend": backend.name(),
                "history_path": settings.history_path().to_string_lossy(),
                "history_limit": settings.history_limit,
            })),
        );
        let studio = Self::new(backend, events)
            .with_history_limit(settings.history_limit)
            .with_max_in_flight(settings.max_in_flight);
        match JsonHistoryStore::open(settings.history_path()) {
            Ok(store) => studio.with_history_store(Box::new(store)),
            Err(err) => {
                studio.events.record(
                    "history_unavailable",
                    object(json!({ "error": err.to_string() })),
                );
                studio
            }
        }
    }

    /// Attach a history store and load its contents into the history view.
    pub fn with_history_store(self, store: Box<dyn HistoryStore>) -> Self {
        let initial = match store.list_all() {
            Ok(records) => records,
            Err(err) => {
                self.record_storage_error("load", &err);
                Vec::new()
            }
        };
        *lock(&self.store) = Some(store);
        self.show_history(initial);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn with_max_in_flight(mut self, cap: Option<usize>) -> Self {
        self.max_in_flight = cap.filter(|cap| *cap > 0);
        self
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn history_enabled(&self) -> bool {
        lock(&self.store).is_some()
    }

    pub fn phase(&self) -> BatchPhase {
        lock(&self.session).phase
    }

    pub fn mode(&self) -> StudioMode {
        lock(&self.session).mode
    }

    pub fn source_aspect_ratio(&self) -> AspectRatio {
        lock(&self.session).source_aspect
    }

    pub fn source(&self) -> Option<ImageData> {
        lock(&self.session).source.clone()
    }

    pub fn results(&self) -> Vec<GeneratedImage> {
        lock(&self.session).results.clone()
    }

    pub fn history(&self) -> Vec<GeneratedImage> {
        lock(&self.session).history.clone()
    }

    /// Switching modes discards the current result set.
    pub fn set_mode(&self, mode: StudioMode) -> Result<(), StudioError> {
        let mut session = self.idle_session()?;
        session.mode = mode;
        session.results.clear();
        Ok(())
    }

    /// Load a new source image and classify its aspect ratio.
    pub fn load_source(&self, image: ImageData) -> Result<AspectRatio, StudioError> {
        let (width, height) = image_dimensions(&image)?;
        let aspect = classify_aspect_ratio(width, height)?;
        let mut session = self.idle_session()?;
        session.source = Some(image);
        session.source_aspect = aspect;
        session.results.clear();
        Ok(aspect)
    }

    pub fn set_reference(&self, image: Option<ImageData>) -> Result<(), StudioError> {
        self.idle_session()?.reference = image;
        Ok(())
    }

    /// Snapshot the session inputs into a batch request.
    pub fn batch_request(
        &self,
        annotation: &str,
        intensity: f64,
        count: Option<u32>,
    ) -> Result<BatchRequest, StudioError> {
        let session = lock(&self.session);
        let source = session.source.clone().ok_or(StudioError::MissingSource)?;
        if session.mode.requires_reference() && session.reference.is_none() {
            return Err(StudioError::MissingReference);
        }
        Ok(BatchRequest {
            mode: session.mode,
            source,
            reference: session.reference.clone(),
            annotation: annotation.to_string(),
            intensity,
            count: count.unwrap_or_else(|| session.mode.default_count()),
            aspect_ratio: session.source_aspect,
        })
    }

    /// Run one batch to completion: fan out `count` backend calls, wait for
    /// all of them, then persist the successes and prune history.
    pub fn start(&self, request: BatchRequest) -> Result<BatchOutcome, StudioError> {
        if request.source.bytes.is_empty() {
            return Err(StudioError::MissingSource);
        }
        let payload = build_request(
            request.mode,
            &request.source,
            request.reference.as_ref(),
            &request.annotation,
            request.intensity,
            request.aspect_ratio,
        )?;
        let count = clamp_replicas(request.count) as usize;
        let ids: Vec<String> = (0..count).map(|_| Uuid::new_v4().to_string()).collect();

        {
            let mut session = self.idle_session()?;
            session.phase = BatchPhase::Submitting;
            session.results = ids
                .iter()
                .map(|id| GeneratedImage::pending(id.clone(), request.mode))
                .collect();
        }
        self.events.record(
            "batch_started",
            object(json!({
                "mode": request.mode.as_str(),
                "count": count,
                "aspect_ratio": request.aspect_ratio.as_str(),
                "backend": self.backend.name(),
            })),
        );

        let outcomes = self.dispatch(&payload, count);

        let timestamp = {
            let mut session = lock(&self.session);
            session.phase = BatchPhase::Settling;
            let timestamp = chrono::Utc::now()
                .timestamp_millis()
                .max(session.last_timestamp + 1);
            session.last_timestamp = timestamp;
            timestamp
        };

        let results: Vec<GeneratedImage> = ids
            .into_iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (id, outcome))| {
                self.settle_item(index, id, request.mode, timestamp, outcome)
            })
            .collect();

        let (history, pruned, persist_failures) = self.persist_successes(&results);

        {
            self.show_history(history.clone());
            let mut session = lock(&self.session);
            session.results = results.clone();
            session.phase = BatchPhase::Idle;
        }

        let outcome = BatchOutcome {
            timestamp,
            results,
            history,
            pruned,
            persist_failures,
        };
        self.events.record(
            "batch_settled",
            object(json!({
                "timestamp": timestamp,
                "succeeded": outcome.succeeded(),
                "failed": outcome.failed(),
                "persist_failures": persist_failures,
            })),
        );
        Ok(outcome)
    }

    /// Make a history item the next batch's source image.
    ///
    /// Accepts a record id or a data URL.
    pub fn reuse_history_item(&self, id_or_url: &str) -> Result<AspectRatio, StudioError> {
        let key = id_or_url.trim();
        let (record_id, url) = if key.starts_with("data:") {
            (Value::Null, key.to_string())
        } else {
            (Value::from(key), self.find_history_record(key)?.url)
        };
        let image = ImageData::from_data_url(&url)
            .map_err(|err| StudioError::UnreadableImage(format!("{err:#}")))?;
        let aspect = self.load_source(image)?;
        self.events.record(
            "source_reused",
            object(json!({
                "id": record_id,
                "aspect_ratio": aspect.as_str(),
            })),
        );
        Ok(aspect)
    }

    pub fn find_history_record(&self, id: &str) -> Result<GeneratedImage, StudioError> {
        let in_view = lock(&self.session)
            .history
            .iter()
            .find(|record| record.id == id)
            .cloned();
        if let Some(record) = in_view {
            return Ok(record);
        }
        let stored = match lock(&self.store).as_ref() {
            Some(store) => store.get(id)?,
            None => None,
        };
        stored.ok_or_else(|| StudioError::RecordNotFound(id.to_string()))
    }

    /// Re-read the history view from the store.
    pub fn refresh_history(&self) -> Result<Vec<GeneratedImage>, StudioError> {
        let records = {
            let store = lock(&self.store);
            let Some(store) = store.as_ref() else {
                return Ok(self.history());
            };
            store.list_all()?
        };
        self.show_history(records.clone());
        Ok(records)
    }

    pub fn delete_history_item(&self, id: &str) -> Result<(), StudioError> {
        if let Some(store) = lock(&self.store).as_mut() {
            store.delete_by_id(id)?;
        }
        lock(&self.session).history.retain(|record| record.id != id);
        Ok(())
    }

    /// Clear all history once `confirm` agrees. Returns whether anything was cleared.
    pub fn clear_history(&self, confirm: impl FnOnce() -> bool) -> Result<bool, StudioError> {
        if !confirm() {
            return Ok(false);
        }
        if let Some(store) = lock(&self.store).as_mut() {
            store.clear()?;
        }
        lock(&self.session).history.clear();
        self.events.record("history_cleared", Map::new());
        Ok(true)
    }

    fn idle_session(&self) -> Result<MutexGuard<'_, Session>, StudioError> {
        let session = lock(&self.session);
        if session.phase != BatchPhase::Idle {
            return Err(StudioError::BatchInProgress);
        }
        Ok(session)
    }

    /// Join-all over `count` independent calls; each slot keeps its own result.
    fn dispatch(
        &self,
        payload: &RequestPayload,
        count: usize,
    ) -> Vec<Result<ImageData, BackendError>> {
        let workers = self.max_in_flight.unwrap_or(count).min(count).max(1);
        let slots: Vec<Mutex<Option<Result<ImageData, BackendError>>>> =
            (0..count).map(|_| Mutex::new(None)).collect();
        let next = AtomicUsize::new(0);
        let backend = self.backend.as_ref();

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        if index >= count {
                            break;
                        }
                        let result = backend.submit(payload);
                        *lock(&slots[index]) = Some(result);
                    })
                })
                .collect();
            for handle in handles {
                if handle.join().is_err() {
                    self.events.record(
                        "backend_worker_panicked",
                        object(json!({ "backend": backend.name() })),
                    );
                }
            }
        });

        slots
            .into_iter()
            .map(|slot| {
                slot.into_inner()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .unwrap_or_else(|| Err(BackendError::service("backend call did not complete")))
            })
            .collect()
    }

    fn settle_item(
        &self,
        index: usize,
        id: String,
        mode: StudioMode,
        timestamp: i64,
        outcome: Result<ImageData, BackendError>,
    ) -> GeneratedImage {
        match outcome {
            Ok(image) if !image.bytes.is_empty() => {
                self.events.record(
                    "item_succeeded",
                    object(json!({
                        "index": index,
                        "id": id,
                        "mime_type": image.mime_type,
                        "bytes": image.bytes.len(),
                        "sha256": content_digest(&image),
                    })),
                );
                GeneratedImage {
                    id,
                    url: image.to_data_url(),
                    status: ItemStatus::Succeeded,
                    mode: Some(mode),
                    timestamp,
                }
            }
            outcome => {
                let err = outcome.err().unwrap_or_else(BackendError::no_image);
                self.events.record(
                    "item_failed",
                    object(json!({
                        "index": index,
                        "id": id,
                        "kind": err.kind.as_str(),
                        "message": err.message,
                        "retryable": err.is_retryable(),
                    })),
                );
                GeneratedImage {
                    id,
                    url: String::new(),
                    status: ItemStatus::Failed,
                    mode: Some(mode),
                    timestamp,
                }
            }
        }
    }

    /// Write succeeded items, then prune oldest-first past the history limit.
    ///
    /// The store is held exclusively across put, list, prune so concurrent
    /// writers cannot push the archive past its bound.
    fn persist_successes(
        &self,
        results: &[GeneratedImage],
    ) -> (Vec<GeneratedImage>, Vec<String>, usize) {
        let successes: Vec<&GeneratedImage> = results
            .iter()
            .filter(|item| item.status == ItemStatus::Succeeded)
            .collect();
        let mut guard = lock(&self.store);
        let Some(store) = guard.as_mut() else {
            return (self.merge_in_memory(&successes), Vec::new(), 0);
        };
        if let Err(err) = store.begin_exclusive() {
            self.record_storage_error("lock", &err);
        }
        let persisted = self.persist_into(&mut **store, &successes);
        store.end_exclusive();
        persisted
    }

    fn persist_into(
        &self,
        store: &mut dyn HistoryStore,
        successes: &[&GeneratedImage],
    ) -> (Vec<GeneratedImage>, Vec<String>, usize) {
        let mut unsaved: Vec<&GeneratedImage> = Vec::new();
        for &record in successes {
            if let Err(err) = store.put(record) {
                unsaved.push(record);
                self.events.record(
                    "history_persist_failed",
                    object(json!({ "id": record.id, "error": err.to_string() })),
                );
            }
        }

        let listed = match store.list_all() {
            Ok(records) => records,
            Err(err) => {
                self.record_storage_error("list", &err);
                return (self.merge_in_memory(successes), Vec::new(), unsaved.len());
            }
        };

        let mut pruned = Vec::new();
        for id in overflow_ids(&listed, self.history_limit) {
            match store.delete_by_id(&id) {
                Ok(()) => pruned.push(id),
                Err(err) => self.record_storage_error("prune", &err),
            }
        }
        if !pruned.is_empty() {
            self.events
                .record("history_pruned", object(json!({ "removed": pruned })));
        }

        let mut history = match store.list_all() {
            Ok(records) => records,
            Err(err) => {
                self.record_storage_error("list", &err);
                listed
                    .into_iter()
                    .filter(|record| !pruned.contains(&record.id))
                    .collect()
            }
        };
        // Records the store refused stay visible for the rest of the session.
        for record in &unsaved {
            if !history.iter().any(|existing| existing.id == record.id) {
                history.push((*record).clone());
            }
        }
        history.sort_by(recent_first);
        history.truncate(self.history_limit);
        (history, pruned, unsaved.len())
    }

    fn merge_in_memory(&self, successes: &[&GeneratedImage]) -> Vec<GeneratedImage> {
        let mut history = self.history();
        history.retain(|record| !successes.iter().any(|item| item.id == record.id));
        history.extend(successes.iter().map(|item| (*item).clone()));
        history.sort_by(recent_first);
        history.truncate(self.history_limit);
        history
    }

    /// Replace the history view; batch timestamps never fall behind what it shows.
    fn show_history(&self, records: Vec<GeneratedImage>) {
        let mut session = lock(&self.session);
        if let Some(newest) = records.iter().map(|record| record.timestamp).max() {
            session.last_timestamp = session.last_timestamp.max(newest);
        }
        session.history = records;
    }

    fn record_storage_error(&self, operation: &str, err: &StudioError) {
        self.events.record(
            "history_storage_error",
            object(json!({ "operation": operation, "error": err.to_string() })),
        );
    }
}

/// Decode just enough of an image to learn its pixel size.
pub fn image_dimensions(image: &ImageData) -> Result<(u32, u32), StudioError> {
    let decoded = image::load_from_memory(&image.bytes)
        .map_err(|err| StudioError::UnreadableImage(err.to_string()))?;
    Ok((decoded.width(), decoded.height()))
}

fn content_digest(image: &ImageData) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&image.bytes);
    hex::encode(&hasher.finalize()[..8])
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
