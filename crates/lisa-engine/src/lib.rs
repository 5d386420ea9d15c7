use std::time::Duration;

use lisa_contracts::catalog::{slug, ResolveImage};
use lisa_contracts::chat::{
    ConversationLog, ImageAttachment, Interceptor, Message, TurnState,
};
use anyhow::Context;
use lisa_contracts::events::{EventWriter, TurnEvent};
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Bound on a single remote attempt. There is no retry and no queue; a
/// timed-out request surfaces as one error turn like any other failure.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif"];

#[derive(Debug, Error)]
pub enum TurnError {
    /// Transport-level failure before any HTTP status was observed.
    #[error("{0}")]
    Network(String),
    /// Non-2xx response. `message` is the decoded `{error}` body when one
    /// was present, otherwise `HTTP error <status>`.
    #[error("{message}")]
    Http { status: u16, message: String },
    /// 2xx response whose body was not the expected JSON shape.
    #[error("{0}")]
    Decode(String),
}

impl TurnError {
    pub fn kind(&self) -> &'static str {
        match self {
            TurnError::Network(_) => "network",
            TurnError::Http { .. } => "http",
            TurnError::Decode(_) => "decode",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    message: &'a str,
    thread_id: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainPartPayload {
    pub name: String,
    pub display_name: String,
    pub image_url: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub view: Option<String>,
}

impl TrainPartPayload {
    fn into_attachment(self) -> ImageAttachment {
        ImageAttachment {
            url: self.image_url,
            alt_text: self.display_name.clone(),
            display_name: self.display_name,
            source_name: Some(self.name),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    pub thread_id: String,
    #[serde(default)]
    pub is_train_part: bool,
    #[serde(default)]
    pub train_part: Option<TrainPartPayload>,
}

/// One completed remote exchange, already normalized for the controller.
#[derive(Debug, Clone)]
pub struct RemoteTurn {
    pub assistant_text: String,
    pub thread_id: String,
    pub attachment: Option<ImageAttachment>,
}

impl From<ChatResponse> for RemoteTurn {
    fn from(response: ChatResponse) -> Self {
        let attachment = response.train_part.map(TrainPartPayload::into_attachment);
        Self {
            assistant_text: response.message,
            thread_id: response.thread_id,
            attachment,
        }
    }
}

/// Seam between the turn controller and the remote assistant; tests inject
/// a recording fake here.
pub trait TurnTransport {
    fn send(&self, message: &str, thread_id: Option<&str>) -> Result<RemoteTurn, TurnError>;
}

/// Thin wrapper around `POST {api_base}/api/chat`.
pub struct RemoteTurnClient {
    api_base: String,
    http: HttpClient,
}

impl RemoteTurnClient {
    pub fn new(api_base: impl Into<String>) -> anyhow::Result<Self> {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Ok(Self {
            api_base,
            http: HttpClient::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .context("building chat HTTP client")?,
        })
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/api/chat", self.api_base)
    }
}

impl TurnTransport for RemoteTurnClient {
    fn send(&self, message: &str, thread_id: Option<&str>) -> Result<RemoteTurn, TurnError> {
        let response = self
            .http
            .post(self.chat_endpoint())
            .json(&ChatRequest { message, thread_id })
            .send()
            .map_err(|err| TurnError::Network(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| TurnError::Network(err.to_string()))?;
        if !status.is_success() {
            return Err(TurnError::Http {
                status: status.as_u16(),
                message: error_message_from_body(status.as_u16(), &body),
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|err| TurnError::Decode(err.to_string()))?;
        Ok(parsed.into())
    }
}

/// Error payloads carry `{error}` where the backend managed to produce one;
/// anything else collapses to a generic status line.
fn error_message_from_body(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| {
            payload
                .get("error")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP error {status}"))
}

#[derive(Debug, Clone, Deserialize)]
struct ListingEntry {
    #[serde(rename = "type")]
    entry_type: String,
    name: String,
    path: String,
}

fn first_image_entry(entries: &[ListingEntry]) -> Option<&ListingEntry> {
    entries.iter().find(|entry| {
        entry.entry_type == "file" && has_image_extension(&entry.name)
    })
}

fn has_image_extension(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .any(|extension| lowered.ends_with(extension))
}

/// Dynamic-mode resolver: asks a directory-listing API for the keyword's
/// category and picks the first image file it reports. Every failure along
/// the way is a miss, never an error; the caller falls back to the remote
/// assistant.
pub struct ListingResolver {
    content_api_base: String,
    asset_base: String,
    http: HttpClient,
}

impl ListingResolver {
    pub fn new(
        content_api_base: impl Into<String>,
        asset_base: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            content_api_base: content_api_base.into().trim_end_matches('/').to_string(),
            asset_base: asset_base.into().trim_end_matches('/').to_string(),
            http: HttpClient::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .context("building listing HTTP client")?,
        })
    }

    fn listing_endpoint(&self, keyword: &str) -> String {
        format!("{}/{}", self.content_api_base, slug(keyword))
    }
}

impl ResolveImage for ListingResolver {
    fn resolve(&self, keyword: &str) -> Option<ImageAttachment> {
        let response = self.http.get(self.listing_endpoint(keyword)).send().ok()?;
        if !response.status().is_success() {
            return None;
        }
        let entries: Vec<ListingEntry> = response.json().ok()?;
        let entry = first_image_entry(&entries)?;
        let display_name = title_case(keyword);
        Some(ImageAttachment {
            url: format!("{}/{}", self.asset_base, entry.path),
            alt_text: display_name.clone(),
            display_name,
            source_name: Some(entry.name.clone()),
        })
    }
}

fn title_case(keyword: &str) -> String {
    keyword
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Orchestrates one full request/response cycle per user action:
/// validation, optimistic local append, dispatch to the interceptor or the
/// remote transport, error normalization, and the transition back to idle.
pub struct TurnController {
    log: ConversationLog,
    state: TurnState,
    thread_id: Option<String>,
    interceptor: Interceptor,
    transport: Box<dyn TurnTransport>,
    events: EventWriter,
}

impl TurnController {
    pub fn new(
        interceptor: Interceptor,
        transport: Box<dyn TurnTransport>,
        events: EventWriter,
    ) -> Self {
        Self {
            log: ConversationLog::new(),
            state: TurnState::Idle,
            thread_id: None,
            interceptor,
            transport,
            events,
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.log.last()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Runs one turn. Empty input and submissions made while a turn is
    /// outstanding are dropped silently, not queued. Every exit path ends
    /// back in `Idle`.
    pub fn submit(&mut self, raw_input: &str) {
        let input = raw_input.trim();
        if input.is_empty() || self.state != TurnState::Idle {
            return;
        }

        self.state = TurnState::Awaiting;
        self.log.append(Message::user(input));
        self.emit(TurnEvent::UserMessage {
            content: input.to_string(),
        });

        if let Some(message) = self.interceptor.intercept(input) {
            self.emit(TurnEvent::TurnIntercepted {
                content: message.content.clone(),
                image_url: message.attachment.as_ref().map(|a| a.url.clone()),
            });
            self.log.append(message);
            self.state = TurnState::Idle;
            return;
        }

        match self.transport.send(input, self.thread_id.as_deref()) {
            Ok(turn) => {
                // The returned identity replaces the stored one
                // unconditionally; there is no staleness check.
                self.thread_id = Some(turn.thread_id.clone());
                self.emit(TurnEvent::RemoteTurn {
                    thread_id: turn.thread_id.clone(),
                    has_attachment: turn.attachment.is_some(),
                });
                let message = match turn.attachment {
                    Some(attachment) => {
                        Message::assistant_with_attachment(turn.assistant_text, attachment)
                    }
                    None => Message::assistant(turn.assistant_text),
                };
                self.log.append(message);
            }
            Err(err) => {
                self.emit(TurnEvent::TurnError {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                });
                self.log.append(Message::assistant(format!("Error: {err}")));
            }
        }
        self.state = TurnState::Idle;
    }

    // Transcript write failures must not break the turn.
    fn emit(&self, event: TurnEvent) {
        let _ = self.events.emit(&event);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use lisa_contracts::catalog::{CatalogResolver, PartCatalog};
    use lisa_contracts::chat::{Interceptor, Role, TurnState};
    use lisa_contracts::events::EventWriter;

    use super::{
        error_message_from_body, first_image_entry, has_image_extension, ChatResponse,
        ListingEntry, RemoteTurn, TurnController, TurnError, TurnTransport,
    };

    type Calls = Rc<RefCell<Vec<(String, Option<String>)>>>;

    struct RecordingTransport {
        calls: Calls,
        replies: RefCell<VecDeque<Result<RemoteTurn, TurnError>>>,
    }

    impl TurnTransport for RecordingTransport {
        fn send(&self, message: &str, thread_id: Option<&str>) -> Result<RemoteTurn, TurnError> {
            self.calls
                .borrow_mut()
                .push((message.to_string(), thread_id.map(str::to_string)));
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(TurnError::Network("no scripted reply".to_string())))
        }
    }

    fn remote_turn(text: &str, thread_id: &str) -> RemoteTurn {
        RemoteTurn {
            assistant_text: text.to_string(),
            thread_id: thread_id.to_string(),
            attachment: None,
        }
    }

    fn static_interceptor() -> Interceptor {
        let catalog = PartCatalog::new(None);
        let keywords: Vec<String> = catalog.keywords().map(str::to_string).collect();
        Interceptor::new(
            keywords,
            Box::new(CatalogResolver::new(catalog, "https://assets.example")),
        )
    }

    fn controller(
        replies: Vec<Result<RemoteTurn, TurnError>>,
    ) -> (TurnController, Calls, tempfile::TempDir) {
        let temp = tempfile::tempdir().expect("tempdir");
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));
        let transport = RecordingTransport {
            calls: Rc::clone(&calls),
            replies: RefCell::new(replies.into_iter().collect()),
        };
        let events = EventWriter::new(temp.path().join("events.jsonl"), "session-test");
        let controller = TurnController::new(static_interceptor(), Box::new(transport), events);
        (controller, calls, temp)
    }

    #[test]
    fn hello_goes_to_remote_with_null_thread_id() {
        let (mut controller, calls, _temp) = controller(vec![Ok(remote_turn("hi there", "t-1"))]);
        controller.submit("hello");

        assert_eq!(
            calls.borrow().as_slice(),
            &[("hello".to_string(), None)]
        );
        let messages = controller.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "hi there");
        assert_eq!(controller.state(), TurnState::Idle);
    }

    #[test]
    fn intercepted_turn_never_touches_the_transport() {
        let (mut controller, calls, _temp) = controller(vec![]);
        controller.submit("show me the event recorder");

        assert!(calls.borrow().is_empty());
        let messages = controller.messages();
        assert_eq!(messages.len(), 2);
        let attachment = messages[1].attachment.as_ref().expect("attachment");
        assert_eq!(attachment.display_name, "Event Recorder");
        assert_eq!(controller.state(), TurnState::Idle);
        assert_eq!(controller.thread_id(), None);
    }

    #[test]
    fn thread_id_follows_the_most_recent_successful_remote_turn() {
        let (mut controller, calls, _temp) = controller(vec![
            Ok(remote_turn("first", "t-1")),
            Ok(remote_turn("second", "t-2")),
        ]);
        assert_eq!(controller.thread_id(), None);

        controller.submit("hello");
        assert_eq!(controller.thread_id(), Some("t-1"));

        // A locally-intercepted turn neither consumes nor mutates the
        // thread identity.
        controller.submit("show me the caboose");
        assert_eq!(controller.thread_id(), Some("t-1"));

        controller.submit("and how does it work?");
        assert_eq!(controller.thread_id(), Some("t-2"));

        let calls = calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, None);
        assert_eq!(calls[1].1.as_deref(), Some("t-1"));
    }

    #[test]
    fn http_failure_becomes_a_visible_error_turn() {
        let (mut controller, _calls, _temp) = controller(vec![Err(TurnError::Http {
            status: 500,
            message: "overloaded".to_string(),
        })]);
        controller.submit("hello");

        let last = controller.last_message().expect("error turn");
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Error: overloaded");
        assert_eq!(controller.state(), TurnState::Idle);
        assert_eq!(controller.thread_id(), None);
    }

    #[test]
    fn network_and_decode_failures_also_end_back_in_idle() {
        let (mut controller, _calls, _temp) = controller(vec![
            Err(TurnError::Network("connection refused".to_string())),
            Err(TurnError::Decode("expected value at line 1".to_string())),
        ]);

        controller.submit("first");
        assert_eq!(
            controller.last_message().map(|m| m.content.as_str()),
            Some("Error: connection refused")
        );
        assert_eq!(controller.state(), TurnState::Idle);

        controller.submit("second");
        assert_eq!(
            controller.last_message().map(|m| m.content.as_str()),
            Some("Error: expected value at line 1")
        );
        assert_eq!(controller.state(), TurnState::Idle);
        // User message appended optimistically even when the remote call
        // failed: user, error, user, error.
        assert_eq!(controller.messages().len(), 4);
        assert_eq!(controller.messages()[2].role, Role::User);
    }

    #[test]
    fn empty_and_whitespace_input_is_a_no_op() {
        let (mut controller, calls, _temp) = controller(vec![]);
        controller.submit("");
        controller.submit("   \t ");

        assert!(controller.messages().is_empty());
        assert!(calls.borrow().is_empty());
        assert_eq!(controller.state(), TurnState::Idle);
    }

    #[test]
    fn submit_while_awaiting_is_dropped_not_queued() {
        let (mut controller, calls, _temp) =
            controller(vec![Ok(remote_turn("reply to a", "t-1"))]);

        controller.state = TurnState::Awaiting;
        controller.submit("b");
        assert!(controller.messages().is_empty());
        assert!(calls.borrow().is_empty());
        assert_eq!(controller.state(), TurnState::Awaiting);

        // Once the outstanding turn has resolved, submission works again;
        // "b" was never queued.
        controller.state = TurnState::Idle;
        controller.submit("a");
        let contents: Vec<&str> = controller
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["a", "reply to a"]);
    }

    #[test]
    fn successful_remote_turn_can_carry_a_server_resolved_attachment() {
        let response: ChatResponse = serde_json::from_str(
            r#"{
                "message": "Here is the coupler.",
                "threadId": "t-9",
                "isTrainPart": true,
                "trainPart": {
                    "name": "knuckle_coupler",
                    "displayName": "Knuckle Coupler",
                    "imageUrl": "https://assets.example/coupler/side.jpg",
                    "view": "side"
                }
            }"#,
        )
        .expect("decodes");
        let turn: RemoteTurn = response.into();

        let (mut controller, _calls, _temp) = controller(vec![Ok(turn)]);
        controller.submit("what holds the cars together?");

        let last = controller.last_message().expect("assistant turn");
        let attachment = last.attachment.as_ref().expect("attachment");
        assert_eq!(attachment.display_name, "Knuckle Coupler");
        assert_eq!(attachment.source_name.as_deref(), Some("knuckle_coupler"));
        assert_eq!(controller.thread_id(), Some("t-9"));
    }

    #[test]
    fn chat_response_decodes_without_optional_fields() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"message": "hi", "threadId": "t-1"}"#).expect("decodes");
        assert!(!response.is_train_part);
        assert!(response.train_part.is_none());
    }

    #[test]
    fn error_body_decoding_falls_back_to_generic_status_line() {
        assert_eq!(
            error_message_from_body(500, r#"{"error": "overloaded"}"#),
            "overloaded"
        );
        assert_eq!(
            error_message_from_body(500, "<html>Internal Server Error</html>"),
            "HTTP error 500"
        );
        assert_eq!(error_message_from_body(502, r#"{"error": ""}"#), "HTTP error 502");
    }

    #[test]
    fn listing_selection_takes_first_image_file() {
        let entries = vec![
            ListingEntry {
                entry_type: "dir".to_string(),
                name: "archive".to_string(),
                path: "caboose/archive".to_string(),
            },
            ListingEntry {
                entry_type: "file".to_string(),
                name: "notes.txt".to_string(),
                path: "caboose/notes.txt".to_string(),
            },
            ListingEntry {
                entry_type: "file".to_string(),
                name: "Rear.JPG".to_string(),
                path: "caboose/Rear.JPG".to_string(),
            },
            ListingEntry {
                entry_type: "file".to_string(),
                name: "side.png".to_string(),
                path: "caboose/side.png".to_string(),
            },
        ];
        let entry = first_image_entry(&entries).expect("match");
        assert_eq!(entry.name, "Rear.JPG");

        assert!(first_image_entry(&[]).is_none());
    }

    #[test]
    fn transcript_records_typed_events_for_each_turn() -> anyhow::Result<()> {
        let (mut controller, _calls, temp) = controller(vec![Err(TurnError::Http {
            status: 500,
            message: "overloaded".to_string(),
        })]);

        controller.submit("show me the event recorder");
        controller.submit("hello");

        let content = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        let types: Vec<&str> = lines
            .iter()
            .map(|line| line["type"].as_str().unwrap_or(""))
            .collect();
        assert_eq!(
            types,
            vec!["user_message", "turn_intercepted", "user_message", "turn_error"]
        );
        assert_eq!(
            lines[1]["image_url"],
            "https://assets.example/event-recorder/front.jpg"
        );
        assert_eq!(lines[3]["kind"], "http");
        assert_eq!(lines[3]["message"], "overloaded");
        assert!(lines.iter().all(|line| line["session_id"] == "session-test"));
        Ok(())
    }

    #[test]
    fn clients_construct_with_their_bounded_timeout() -> anyhow::Result<()> {
        super::RemoteTurnClient::new("https://chat.example/")?;
        super::ListingResolver::new("https://api.example/contents", "https://assets.example")?;
        Ok(())
    }

    #[test]
    fn image_extension_matching_is_case_insensitive() {
        assert!(has_image_extension("front.jpg"));
        assert!(has_image_extension("front.JPEG"));
        assert!(has_image_extension("front.Gif"));
        assert!(!has_image_extension("front.svg"));
        assert!(!has_image_extension("jpg"));
    }
}
