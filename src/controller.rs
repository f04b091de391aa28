use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::api::{ApiInfo, BackendApi};
use crate::catalog::{self, CatalogOutcome};
use crate::error::{ConverterError, Result};
use crate::event_bus::{Event, EventBus, EventEmitter};
use crate::impl_event_emitter;
use crate::models::{ConversionRecord, ConversionRequest, ConversionResult, ModelDescriptor};
use crate::presenter::{Download, ResultPresenter, DOWNLOAD_FILENAME};

/// Quick-start prompts offered next to the input.
pub const EXAMPLE_PROMPTS: [&str; 4] = [
    "Summarize this research paper in 5 bullet points",
    "Generate a creative story about a robot learning to paint",
    "Analyze customer feedback and extract key insights",
    "Create a social media post for a new product launch",
];

const EXAMPLE_LABEL_LEN: usize = 30;

/// Short label for an example prompt.
pub fn example_label(example: &str) -> String {
    if example.chars().count() > EXAMPLE_LABEL_LEN {
        let head: String = example.chars().take(EXAMPLE_LABEL_LEN).collect();
        format!("{}...", head)
    } else {
        example.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Everything the form shows. Owned by `FormController` only.
#[derive(Debug, Clone)]
pub struct FormState {
    pub prompt: String,
    pub selected_model: String,
    pub use_own_key: bool,
    pub api_key: String,
    pub phase: Phase,
    /// Formatted JSON from the last successful conversion
    pub output: Option<String>,
    pub model_used: Option<String>,
    pub last_error: Option<String>,
    pub models: Vec<ModelDescriptor>,
    pub catalog_fallback: bool,
}

impl FormState {
    fn new(default_model: &str) -> Self {
        Self {
            prompt: String::new(),
            selected_model: default_model.to_string(),
            use_own_key: false,
            api_key: String::new(),
            phase: Phase::Idle,
            output: None,
            model_used: None,
            last_error: None,
            models: Vec::new(),
            catalog_fallback: false,
        }
    }
}

/// "Copied" flag that switches itself off after a delay. A new trigger
/// cancels the pending reset; so does dropping the indicator.
pub struct CopiedIndicator {
    flag: Arc<AtomicBool>,
    reset_after: Duration,
    pending: Option<JoinHandle<()>>,
}

impl CopiedIndicator {
    pub fn new(reset_after: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            reset_after,
            pending: None,
        }
    }

    pub fn is_on(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Must be called from within a tokio runtime.
    pub fn trigger(&mut self, bus: Option<Arc<EventBus>>) {
        self.cancel();
        self.flag.store(true, Ordering::SeqCst);

        let flag = self.flag.clone();
        let delay = self.reset_after;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            flag.store(false, Ordering::SeqCst);
            if let Some(bus) = bus {
                let _ = bus.emit(Event::CopiedReset).await;
            }
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for CopiedIndicator {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Owns the form state and sequences catalog, conversion and export calls.
pub struct FormController {
    state: FormState,
    api: Arc<dyn BackendApi>,
    presenter: ResultPresenter,
    copied: CopiedIndicator,
    event_bus: Option<Arc<EventBus>>,
}

impl FormController {
    pub fn new(
        api: Arc<dyn BackendApi>,
        presenter: ResultPresenter,
        default_model: &str,
        copied_reset: Duration,
    ) -> Self {
        Self {
            state: FormState::new(default_model),
            api,
            presenter,
            copied: CopiedIndicator::new(copied_reset),
            event_bus: None,
        }
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    pub fn is_copied(&self) -> bool {
        self.copied.is_on()
    }

    /// Fetch the catalog once. The selector is never left empty; if the
    /// current selection is not in the list, the first entry is selected.
    pub async fn load_catalog(&mut self) -> bool {
        let outcome = catalog::load_catalog(self.api.as_ref()).await;
        let fallback = outcome.is_fallback();

        let event = match &outcome {
            CatalogOutcome::Fetched(models) => Event::CatalogLoaded { count: models.len() },
            CatalogOutcome::Fallback { models, reason } => Event::CatalogFallback {
                reason: reason.clone(),
                count: models.len(),
            },
        };

        self.state.models = outcome.into_models();
        self.state.catalog_fallback = fallback;
        if !self.state.models.iter().any(|m| m.id == self.state.selected_model) {
            if let Some(first) = self.state.models.first() {
                debug!(
                    "Selected model {} not in catalog, switching to {}",
                    self.state.selected_model, first.id
                );
                self.state.selected_model = first.id.clone();
            }
        }

        let _ = self.emit_event(event).await;
        !fallback
    }

    /// Edit the prompt. The phase is left as is.
    pub fn set_prompt(&mut self, text: &str) {
        self.state.prompt = text.to_string();
    }

    /// Overwrite the prompt with an example, whatever the phase.
    pub fn select_example(&mut self, index: usize) -> Result<&'static str> {
        let example = EXAMPLE_PROMPTS.get(index).ok_or_else(|| {
            ConverterError::Validation(format!(
                "No example #{}; pick 1-{}.",
                index + 1,
                EXAMPLE_PROMPTS.len()
            ))
        })?;
        self.state.prompt = example.to_string();
        Ok(*example)
    }

    pub async fn select_model(&mut self, id: &str) -> Result<()> {
        if !self.state.models.is_empty() && !self.state.models.iter().any(|m| m.id == id) {
            let err = ConverterError::Validation(format!("Unknown model: {}", id));
            let _ = self
                .emit_event(Event::ValidationFailed { message: err.to_string() })
                .await;
            return Err(err);
        }
        self.state.selected_model = id.to_string();
        let _ = self.emit_event(Event::ModelSelected { id: id.to_string() }).await;
        Ok(())
    }

    pub fn set_use_own_key(&mut self, enabled: bool) {
        self.state.use_own_key = enabled;
    }

    /// The key is kept when the toggle is off but only sent while it is on.
    pub fn set_api_key(&mut self, key: &str) {
        self.state.api_key = key.to_string();
    }

    /// Mirrors the submit button's enabled state.
    pub fn can_submit(&self) -> bool {
        self.state.phase != Phase::Loading && !self.state.prompt.trim().is_empty()
    }

    /// Validate and move to `Loading`. Returns `None` without touching the
    /// network when a request is already in flight or the input is invalid.
    pub async fn begin_submit(&mut self) -> Option<ConversionRequest> {
        if self.state.phase == Phase::Loading {
            debug!("Submit ignored: conversion already in flight");
            let _ = self.emit_event(Event::SubmitIgnored).await;
            return None;
        }

        let request = match self.build_request() {
            Ok(request) => request,
            Err(e) => {
                warn!("{}", e);
                let _ = self
                    .emit_event(Event::ValidationFailed { message: e.to_string() })
                    .await;
                return None;
            }
        };

        self.state.phase = Phase::Loading;
        let _ = self
            .emit_event(Event::ConversionStarted { model: request.model_id.clone() })
            .await;
        Some(request)
    }

    fn build_request(&self) -> Result<ConversionRequest> {
        let known = self.state.models.is_empty()
            || self.state.models.iter().any(|m| m.id == self.state.selected_model);
        if !known {
            return Err(ConverterError::Validation(format!(
                "Unknown model: {}",
                self.state.selected_model
            )));
        }
        ConversionRequest::new(
            &self.state.prompt,
            &self.state.selected_model,
            self.state.use_own_key,
            Some(&self.state.api_key),
        )
    }

    /// Apply the outcome of a request started with `begin_submit`. The
    /// prompt is never touched; a failure keeps the previous output.
    pub async fn finish_submit(&mut self, result: ConversionResult) {
        match result {
            Ok(output) => {
                info!("Converted with {}", output.model_used);
                self.state.output = Some(self.presenter.format(&output.json_output));
                self.state.model_used = Some(output.model_used.clone());
                self.state.last_error = None;
                self.state.phase = Phase::Ready;
                let _ = self
                    .emit_event(Event::ConversionSucceeded { model: output.model_used })
                    .await;
            }
            Err(e) => {
                let message = e.to_string();
                self.state.last_error = Some(message.clone());
                self.state.phase = Phase::Error;
                let _ = self.emit_event(Event::ConversionFailed { message }).await;
            }
        }
    }

    /// Full submit: validate, issue exactly one request, apply the result.
    /// Returns whether a request was sent.
    pub async fn submit(&mut self) -> bool {
        let Some(request) = self.begin_submit().await else {
            return false;
        };
        let api = self.api.clone();
        let result = api.convert(&request).await;
        self.finish_submit(result).await;
        true
    }

    pub async fn copy(&mut self) -> Result<()> {
        let Some(text) = self.state.output.clone() else {
            return Err(ConverterError::Validation("Nothing to copy yet.".to_string()));
        };

        match self.presenter.copy(&text) {
            Ok(()) => {
                self.copied.trigger(self.event_bus.clone());
                let _ = self.emit_event(Event::Copied).await;
                Ok(())
            }
            Err(e) => {
                let _ = self.emit_event(Event::CopyFailed { error: e.to_string() }).await;
                Err(e)
            }
        }
    }

    /// Save the output as `converted-prompt.json` in the download directory,
    /// or at `path` when given.
    pub async fn download(&mut self, path: Option<&Path>) -> Result<Download> {
        let Some(text) = self.state.output.as_deref() else {
            return Err(ConverterError::Validation("Nothing to download yet.".to_string()));
        };

        let result = match path {
            Some(path) => self.presenter.download_as(text, path),
            None => self.presenter.download(text, DOWNLOAD_FILENAME),
        };

        let event = match &result {
            Ok(download) => {
                debug!("Saved {} bytes as {}", download.bytes, download.mime);
                Event::Downloaded {
                    path: download.path.display().to_string(),
                }
            }
            Err(e) => Event::DownloadFailed { error: e.to_string() },
        };
        let _ = self.emit_event(event).await;
        result
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<ConversionRecord>> {
        self.api.recent_conversions(limit).await
    }

    pub async fn api_info(&self) -> Result<ApiInfo> {
        self.api.api_info().await
    }

    pub fn backend_url(&self) -> &str {
        self.api.base_url()
    }
}

impl_event_emitter!(FormController);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::FakeBackend;
    use crate::models::ConversionOutput;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct MemoryClipboard {
        contents: Arc<Mutex<Option<String>>>,
        fail: bool,
    }

    impl crate::presenter::Clipboard for MemoryClipboard {
        fn write_text(&mut self, text: &str) -> Result<()> {
            if self.fail {
                return Err(ConverterError::Clipboard("permission denied".to_string()));
            }
            *self.contents.lock().unwrap() = Some(text.to_string());
            Ok(())
        }
    }

    fn success(value: serde_json::Value, model: &str) -> ConversionResult {
        Ok(ConversionOutput {
            json_output: value,
            model_used: model.to_string(),
            original_prompt: None,
            processing_time: None,
            timestamp: None,
        })
    }

    fn controller_with(backend: &FakeBackend, clipboard: MemoryClipboard) -> (FormController, Arc<EventBus>) {
        let presenter = ResultPresenter::new(Box::new(clipboard), ".");
        let mut controller = FormController::new(
            Arc::new(backend.clone()),
            presenter,
            "gpt-4o-mini",
            Duration::from_millis(2000),
        );
        let bus = Arc::new(EventBus::new(64));
        controller.set_event_bus(bus.clone());
        (controller, bus)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_example_labels() {
        assert_eq!(example_label("short"), "short");
        assert_eq!(example_label(EXAMPLE_PROMPTS[0]), "Summarize this research paper ...");
        assert_eq!(example_label(EXAMPLE_PROMPTS[0]).chars().count(), 33);
    }

    #[tokio::test]
    async fn test_submit_sends_exactly_one_request_with_selected_model() {
        let backend = FakeBackend::new().with_conversion(success(json!({"action": "summarize"}), "gpt-4"));
        let (mut controller, _bus) = controller_with(&backend, MemoryClipboard::default());
        controller.load_catalog().await;
        controller.select_model("gpt-4").await.unwrap();
        controller.set_prompt("Summarize this research paper in 5 bullet points");

        assert!(controller.submit().await);

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model_id, "gpt-4");
        assert!(!calls[0].use_caller_credential);
    }

    #[tokio::test]
    async fn test_submit_runs_on_a_spawned_task() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FormController>();

        let backend = FakeBackend::new().with_conversion(success(json!({"ok": true}), "gpt-4o-mini"));
        let (mut controller, _bus) = controller_with(&backend, MemoryClipboard::default());
        controller.set_prompt("Analyze customer feedback and extract key insights");

        let controller = tokio::spawn(async move {
            controller.load_catalog().await;
            assert!(controller.submit().await);
            controller
        })
        .await
        .unwrap();

        assert_eq!(controller.state().phase, Phase::Ready);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_blank_prompt_never_reaches_backend() {
        let backend = FakeBackend::new();
        let (mut controller, bus) = controller_with(&backend, MemoryClipboard::default());
        let mut rx = bus.subscribe();

        controller.set_prompt("   \n ");
        assert!(!controller.can_submit());
        assert!(!controller.submit().await);

        assert_eq!(backend.call_count(), 0);
        assert_eq!(controller.state().phase, Phase::Idle);
        assert!(drain(&mut rx).iter().any(|e| matches!(e, Event::ValidationFailed { .. })));
    }

    #[tokio::test]
    async fn test_catalog_failure_uses_fallback() {
        let backend = FakeBackend::new().with_catalog_error("connection refused");
        let (mut controller, bus) = controller_with(&backend, MemoryClipboard::default());
        let mut rx = bus.subscribe();

        assert!(!controller.load_catalog().await);

        let state = controller.state();
        assert!(!state.models.is_empty());
        assert!(state.catalog_fallback);
        assert!(state.models.iter().any(|m| m.id == state.selected_model));
        assert!(matches!(drain(&mut rx).as_slice(), [Event::CatalogFallback { .. }]));
    }

    #[tokio::test]
    async fn test_selection_falls_back_to_first_catalog_entry() {
        let backend = FakeBackend::new().with_models(vec![ModelDescriptor::new("claude-3-haiku", "Claude 3 Haiku", "Anthropic")]);
        let (mut controller, _bus) = controller_with(&backend, MemoryClipboard::default());

        assert!(controller.load_catalog().await);
        assert_eq!(controller.state().selected_model, "claude-3-haiku");
    }

    #[tokio::test]
    async fn test_unknown_model_rejected() {
        let backend = FakeBackend::new();
        let (mut controller, _bus) = controller_with(&backend, MemoryClipboard::default());
        controller.load_catalog().await;

        let err = controller.select_model("gpt-9").await.unwrap_err();
        assert!(matches!(err, ConverterError::Validation(_)));
        assert_eq!(controller.state().selected_model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_success_displays_formatted_output() {
        let backend = FakeBackend::new().with_conversion(success(json!({"action": "summarize"}), "gpt-4o-mini"));
        let (mut controller, bus) = controller_with(&backend, MemoryClipboard::default());
        let mut rx = bus.subscribe();
        controller.set_prompt("Summarize this");

        controller.submit().await;

        let state = controller.state();
        assert_eq!(state.phase, Phase::Ready);
        assert_eq!(state.output.as_deref(), Some("{\n  \"action\": \"summarize\"\n}"));
        let events = drain(&mut rx);
        assert!(events.contains(&Event::ConversionSucceeded { model: "gpt-4o-mini".to_string() }));
    }

    #[tokio::test]
    async fn test_failure_keeps_prompt_and_reports_message() {
        let backend = FakeBackend::new().with_conversion(Err(ConverterError::Conversion("rate limited".to_string())));
        let (mut controller, bus) = controller_with(&backend, MemoryClipboard::default());
        let mut rx = bus.subscribe();
        controller.set_prompt("Analyze customer feedback");

        controller.submit().await;

        let state = controller.state();
        assert_eq!(state.phase, Phase::Error);
        assert_eq!(state.prompt, "Analyze customer feedback");
        assert!(controller.can_submit());
        let failed = drain(&mut rx).into_iter().find_map(|e| match e {
            Event::ConversionFailed { message } => Some(message),
            _ => None,
        });
        assert!(failed.unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_submit_while_loading_is_ignored() {
        let backend = FakeBackend::new().with_conversion(success(json!({}), "gpt-4o-mini"));
        let (mut controller, _bus) = controller_with(&backend, MemoryClipboard::default());
        controller.set_prompt("Summarize this");

        let request = controller.begin_submit().await.unwrap();
        assert_eq!(controller.state().phase, Phase::Loading);
        assert!(!controller.can_submit());

        assert!(controller.begin_submit().await.is_none());
        assert!(!controller.submit().await);

        let result = backend.convert(&request).await;
        controller.finish_submit(result).await;
        assert_eq!(backend.call_count(), 1);
        assert_eq!(controller.state().phase, Phase::Ready);
    }

    #[tokio::test]
    async fn test_editing_does_not_reset_phase() {
        let backend = FakeBackend::new().with_conversion(Err(ConverterError::Conversion("boom".to_string())));
        let (mut controller, _bus) = controller_with(&backend, MemoryClipboard::default());
        controller.set_prompt("first");
        controller.submit().await;

        controller.set_prompt("second");
        assert_eq!(controller.state().phase, Phase::Error);
        assert_eq!(controller.state().prompt, "second");
    }

    #[tokio::test]
    async fn test_example_overwrites_prompt_even_while_loading() {
        let backend = FakeBackend::new();
        let (mut controller, _bus) = controller_with(&backend, MemoryClipboard::default());
        controller.set_prompt("draft");
        controller.begin_submit().await.unwrap();

        controller.select_example(2).unwrap();
        assert_eq!(controller.state().prompt, EXAMPLE_PROMPTS[2]);
        assert_eq!(controller.state().phase, Phase::Loading);
        assert!(controller.select_example(4).is_err());
    }

    #[tokio::test]
    async fn test_own_key_is_sent_only_when_enabled() {
        let backend = FakeBackend::new().with_conversion(success(json!({}), "gpt-4o-mini"));
        let (mut controller, _bus) = controller_with(&backend, MemoryClipboard::default());
        controller.set_prompt("Summarize");
        controller.set_api_key("sk-own");

        controller.submit().await;
        controller.set_use_own_key(true);
        controller.submit().await;

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].credential, None);
        assert_eq!(calls[1].credential.as_deref(), Some("sk-own"));
        assert!(calls[1].use_caller_credential);
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_places_exact_text_and_indicator_reverts() {
        let backend = FakeBackend::new().with_conversion(success(json!({}), "gpt-4o-mini"));
        let clipboard = MemoryClipboard::default();
        let (mut controller, bus) = controller_with(&backend, clipboard.clone());
        let mut rx = bus.subscribe();
        controller.set_prompt("Summarize");
        controller.submit().await;
        assert_eq!(controller.state().output.as_deref(), Some("{}"));

        controller.copy().await.unwrap();
        assert_eq!(clipboard.contents.lock().unwrap().as_deref(), Some("{}"));
        assert!(controller.is_copied());

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(controller.is_copied());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!controller.is_copied());
        assert!(drain(&mut rx).contains(&Event::CopiedReset));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_copy_restarts_indicator_timer() {
        let backend = FakeBackend::new().with_conversion(success(json!({"a": 1}), "gpt-4o-mini"));
        let (mut controller, _bus) = controller_with(&backend, MemoryClipboard::default());
        controller.set_prompt("Summarize");
        controller.submit().await;

        controller.copy().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        controller.copy().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(controller.is_copied());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!controller.is_copied());
    }

    #[tokio::test]
    async fn test_copy_failure_is_reported() {
        let backend = FakeBackend::new().with_conversion(success(json!({}), "gpt-4o-mini"));
        let clipboard = MemoryClipboard { fail: true, ..Default::default() };
        let (mut controller, bus) = controller_with(&backend, clipboard);
        let mut rx = bus.subscribe();
        controller.set_prompt("Summarize");
        controller.submit().await;

        assert!(matches!(controller.copy().await, Err(ConverterError::Clipboard(_))));
        assert!(!controller.is_copied());
        assert_eq!(controller.state().phase, Phase::Ready);
        assert!(drain(&mut rx).iter().any(|e| matches!(e, Event::CopyFailed { .. })));
    }

    #[tokio::test]
    async fn test_copy_and_download_need_output() {
        let backend = FakeBackend::new();
        let (mut controller, _bus) = controller_with(&backend, MemoryClipboard::default());
        assert!(matches!(controller.copy().await, Err(ConverterError::Validation(_))));
        assert!(matches!(controller.download(None).await, Err(ConverterError::Validation(_))));
    }

    #[tokio::test]
    async fn test_download_to_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new().with_conversion(success(json!({"action": "generate"}), "gpt-4o-mini"));
        let (mut controller, _bus) = controller_with(&backend, MemoryClipboard::default());
        controller.set_prompt("Generate a story");
        controller.submit().await;

        let target = dir.path().join("converted-prompt.json");
        let download = controller.download(Some(&target)).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(download.path).unwrap(),
            "{\n  \"action\": \"generate\"\n}"
        );
    }

    #[tokio::test]
    async fn test_history_delegates_to_backend() {
        let record = ConversionRecord {
            original_prompt: Some("Summarize".to_string()),
            json_output: Some(json!({"action": "summarize"})),
            model: Some("gpt-4".to_string()),
            processing_time: Some(0.4),
            timestamp: None,
        };
        let backend = FakeBackend::new().with_history(vec![record.clone(), record.clone(), record]);
        let (controller, _bus) = controller_with(&backend, MemoryClipboard::default());

        assert_eq!(controller.history(2).await.unwrap().len(), 2);
        assert_eq!(controller.api_info().await.unwrap().message, "fake");
    }
}
