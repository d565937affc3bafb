use anyhow::Context;
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use std::fs;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{self, Config};
use crate::error::{ChatError, RequestKind};
use crate::gemini::{verification_prompt, ApiReply, GeminiClient};
use crate::preview::PreviewSurface;
use crate::render::{load_image, Affordance, ImageState};
use crate::reply::{append_outcome, parse_reply, verification_echo};
use crate::transcript::{MessageId, Role, Transcript};
use crate::tui::AppEvent;
use crate::voice::{RecognitionEvent, RecognitionSink, Tts, VoiceInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Input,
    Transcript,
}

/// One outbound call, ready to dispatch.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub id: u64,
    pub kind: RequestKind,
    pub model: String,
    pub api_key: String,
    pub text: String,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub focus: FocusPane,

    // Input field
    pub input: String,
    pub input_cursor: usize,

    // Session credentials and model (memory only)
    pub api_key: String,
    pub models: Vec<String>,
    pub selected_model: String,

    // Chat
    pub transcript: Transcript,
    pub in_flight: usize,
    next_request_id: u64,
    /// Last run-code activation, for cycling through a message's blocks.
    last_run: Option<(MessageId, usize)>,

    // Preview and voice
    pub preview: PreviewSurface,
    pub tts: Tts,
    pub voice_input: VoiceInput,

    // Popups
    pub alert: Option<String>,
    pub show_model_picker: bool,
    pub model_picker_state: ListState,
    pub show_api_key_input: bool,
    pub api_key_input: String,
    pub api_key_input_cursor: usize,

    /// One-line feedback for local actions (preview, voice, images).
    pub status: Option<String>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Transcript panel area for mouse hit-testing (updated during render)
    pub transcript_area: Option<Rect>,

    pub client: GeminiClient,
    events: UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(config: Config, events: UnboundedSender<AppEvent>) -> Self {
        let client = GeminiClient::new(&config.base_url);
        let models = config.models();
        let selected_model = config.initial_model();

        let voice_events = events.clone();
        let sink: RecognitionSink = Arc::new(move |event| {
            let _ = voice_events.send(AppEvent::Voice(event));
        });
        let voice_input = VoiceInput::from_command(config.stt_command.as_deref(), sink);
        let tts = Tts::from_command(config.tts_command.as_deref());
        let preview = PreviewSurface::new(config.preview_dir());

        tracing::info!(
            model = %selected_model,
            tts = tts.is_available(),
            stt = voice_input.is_available(),
            "app ready"
        );

        Self {
            should_quit: false,
            focus: FocusPane::Input,

            input: String::new(),
            input_cursor: 0,

            api_key: String::new(),
            models,
            selected_model,

            transcript: Transcript::new(),
            in_flight: 0,
            next_request_id: 1,
            last_run: None,

            preview,
            tts,
            voice_input,

            alert: None,
            show_model_picker: false,
            model_picker_state: ListState::default(),
            show_api_key_input: false,
            api_key_input: String::new(),
            api_key_input_cursor: 0,

            status: None,
            animation_frame: 0,

            transcript_area: None,

            client,
            events,
        }
    }

    // ── Sending ────────────────────────────────────────────────────────────

    /// Validates the input, appends the user message and builds the request.
    /// Empty input is ignored; a missing key blocks with an alert.
    pub fn prepare_send(&mut self) -> Result<Option<OutboundRequest>, ChatError> {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return Ok(None);
        }
        let api_key = self.require_api_key()?;

        self.transcript.append_text(Role::User, text.clone());
        self.input.clear();
        self.input_cursor = 0;
        self.transcript.clear_selection();

        Ok(Some(self.request(RequestKind::Send, api_key, text)))
    }

    pub fn prepare_verify(&mut self) -> Result<OutboundRequest, ChatError> {
        let api_key = self.require_api_key()?;
        let text = verification_prompt(&self.selected_model);
        Ok(self.request(RequestKind::Verify, api_key, text))
    }

    pub fn submit(&mut self) {
        match self.prepare_send() {
            Ok(Some(request)) => self.dispatch(request),
            Ok(None) => {}
            Err(e) if e.is_blocking() => self.alert = Some(e.to_string()),
            Err(e) => {
                self.transcript
                    .append_text(Role::System, e.system_message(RequestKind::Send));
            }
        }
    }

    pub fn verify(&mut self) {
        match self.prepare_verify() {
            Ok(request) => self.dispatch(request),
            Err(e) => self.alert = Some(e.to_string()),
        }
    }

    fn require_api_key(&self) -> Result<String, ChatError> {
        let key = self.api_key.trim();
        if key.is_empty() {
            return Err(ChatError::UserInputMissing);
        }
        Ok(key.to_string())
    }

    fn request(&mut self, kind: RequestKind, api_key: String, text: String) -> OutboundRequest {
        let id = self.next_request_id;
        self.next_request_id += 1;
        OutboundRequest {
            id,
            kind,
            model: self.selected_model.clone(),
            api_key,
            text,
        }
    }

    /// Fires the request in the background. Several may be outstanding; their
    /// replies are appended in whatever order they complete.
    fn dispatch(&mut self, request: OutboundRequest) {
        self.in_flight += 1;
        tracing::info!(
            request = request.id,
            kind = ?request.kind,
            model = %request.model,
            in_flight = self.in_flight,
            "dispatching request"
        );

        let client = self.client.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match request.kind {
                RequestKind::Send => {
                    client
                        .generate_content(&request.model, &request.api_key, &request.text)
                        .await
                }
                RequestKind::Verify => client.verify(&request.model, &request.api_key).await,
            };
            let _ = events.send(AppEvent::Reply {
                request: request.id,
                kind: request.kind,
                model: request.model,
                result,
            });
        });
    }

    pub fn apply_reply(
        &mut self,
        request: u64,
        kind: RequestKind,
        model: &str,
        result: Result<ApiReply, ChatError>,
    ) {
        self.in_flight = self.in_flight.saturating_sub(1);

        match (kind, result) {
            (RequestKind::Send, Ok(reply)) => {
                let outcome = parse_reply(reply, model);
                if let Some(id) = append_outcome(&mut self.transcript, outcome) {
                    self.decode_images(id);
                }
            }
            (RequestKind::Verify, Ok(reply)) => match verification_echo(reply, model) {
                Ok(echo) => {
                    self.transcript
                        .append_text(Role::System, format!("Verified: {echo}"));
                }
                Err(e) => {
                    self.transcript
                        .append_text(Role::System, e.system_message(kind));
                }
            },
            (_, Err(e)) => {
                tracing::warn!(request, kind = ?kind, "request failed: {e}");
                self.transcript
                    .append_text(Role::System, e.system_message(kind));
            }
        }
    }

    // ── Images ─────────────────────────────────────────────────────────────

    /// Decodes a message's images off the UI task. Each one reports back
    /// through `ImageDecoded`; only then is its height known.
    fn decode_images(&self, id: MessageId) {
        let Some(body) = self.transcript.get(id).and_then(|m| m.rendered()) else {
            return;
        };
        for (block, image) in body.images() {
            let mime_type = image.mime_type.clone();
            let data = image.data.clone();
            let events = self.events.clone();
            tokio::task::spawn_blocking(move || {
                let state = load_image(&mime_type, &data)
                    .unwrap_or_else(|e| ImageState::Broken(e.to_string()));
                let _ = events.send(AppEvent::ImageDecoded {
                    message: id,
                    block,
                    state,
                });
            });
        }
    }

    pub fn apply_image(&mut self, message: MessageId, block: usize, state: ImageState) {
        let loaded = matches!(state, ImageState::Loaded { .. });
        if let ImageState::Broken(reason) = &state {
            tracing::warn!(message, block, "image failed to decode: {reason}");
        }
        if self.transcript.set_image_state(message, block, state) && loaded {
            self.transcript.scroll_to_bottom();
        }
    }

    /// Saves the target message's first image to the cache dir and opens it.
    pub fn open_image(&mut self) {
        let Some(message) = self.transcript.target() else {
            return;
        };
        let Some((block, image)) = message.rendered().and_then(|b| b.images().next()) else {
            self.status = Some("No image in this message".to_string());
            return;
        };

        let id = message.id;
        let result = (|| -> anyhow::Result<std::path::PathBuf> {
            let (bytes, extension) = image.viewer_file()?;
            let dir = config::cache_dir()?.join("images");
            fs::create_dir_all(&dir)?;
            let path = dir.join(format!("message-{id}-{block}.{extension}"));
            fs::write(&path, bytes)?;
            open::that(&path).with_context(|| format!("opening {}", path.display()))?;
            Ok(path)
        })();

        self.status = Some(match result {
            Ok(path) => format!("Opened {}", path.display()),
            Err(e) => format!("Could not open image: {e:#}"),
        });
    }

    // ── Affordances ────────────────────────────────────────────────────────

    pub fn activate(&mut self, affordance: &Affordance) {
        match affordance {
            Affordance::RunCode { code } => {
                if let Err(e) = self.preview.load(code) {
                    tracing::warn!("preview write failed: {e:#}");
                    self.status = Some(format!("Preview not written: {e:#}"));
                }
            }
            Affordance::ReadAloud { text } => {
                if let Err(e) = self.tts.speak(text) {
                    tracing::warn!("speech failed: {e:#}");
                    self.status = Some(format!("Speech failed: {e:#}"));
                }
            }
        }
    }

    /// Runs the target message's code blocks, one per call, cycling.
    pub fn run_code(&mut self) {
        let Some(message) = self.transcript.target() else {
            return;
        };
        let id = message.id;
        let codes: Vec<String> = message
            .rendered()
            .map(|body| body.run_code_affordances().map(str::to_string).collect())
            .unwrap_or_default();
        if codes.is_empty() {
            self.status = Some("No code block in this message".to_string());
            return;
        }

        let index = match self.last_run {
            Some((last, i)) if last == id => (i + 1) % codes.len(),
            _ => 0,
        };
        self.last_run = Some((id, index));
        self.status = Some(format!("Running code block {}/{}", index + 1, codes.len()));
        self.activate(&Affordance::RunCode {
            code: codes[index].clone(),
        });
    }

    pub fn read_aloud(&mut self) {
        let text = self
            .transcript
            .target()
            .and_then(|m| m.rendered())
            .and_then(|body| body.read_aloud_text())
            .map(str::to_string);
        match text {
            Some(text) => self.activate(&Affordance::ReadAloud { text }),
            None => self.status = Some("Nothing to read aloud".to_string()),
        }
    }

    // ── Preview ────────────────────────────────────────────────────────────

    pub fn clear_preview(&mut self) {
        if let Err(e) = self.preview.clear() {
            self.status = Some(format!("Preview not cleared: {e:#}"));
        }
    }

    pub fn open_preview(&mut self) {
        if let Err(e) = self.preview.open_in_browser() {
            self.status = Some(format!("Could not open preview: {e:#}"));
        }
    }

    // ── Voice input ────────────────────────────────────────────────────────

    pub fn start_listening(&mut self) {
        if let Err(e) = self.voice_input.start() {
            tracing::warn!("speech recognition failed to start: {e:#}");
            self.status = Some(format!("Voice input failed: {e:#}"));
        }
    }

    pub fn apply_recognition(&mut self, event: RecognitionEvent) {
        if let Some(transcript) = self.voice_input.handle(event) {
            self.input = transcript;
            self.input_cursor = self.input.chars().count();
            self.focus = FocusPane::Input;
            self.transcript.clear_selection();
        }
    }

    // ── Popups ─────────────────────────────────────────────────────────────

    pub fn open_model_picker(&mut self) {
        let current = self
            .models
            .iter()
            .position(|m| m == &self.selected_model)
            .unwrap_or(0);
        self.model_picker_state.select(Some(current));
        self.show_model_picker = true;
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = self.models.len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    /// Runtime choice only; the config file is never rewritten.
    pub fn select_model(&mut self) {
        if let Some(model) = self
            .model_picker_state
            .selected()
            .and_then(|i| self.models.get(i))
        {
            self.selected_model = model.clone();
            tracing::info!(model = %self.selected_model, "model selected");
        }
        self.show_model_picker = false;
    }

    pub fn open_api_key_input(&mut self) {
        self.api_key_input = self.api_key.clone();
        self.api_key_input_cursor = self.api_key_input.chars().count();
        self.show_api_key_input = true;
    }

    pub fn save_api_key(&mut self) {
        self.api_key = self.api_key_input.trim().to_string();
        self.api_key_input.clear();
        self.api_key_input_cursor = 0;
        self.show_api_key_input = false;
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.in_flight > 0 {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}
