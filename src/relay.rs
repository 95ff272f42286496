use std::net::TcpStream;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

use crate::error::{Result, TaisoError};
use crate::landmark::LandmarkFrame;
use crate::score::ScoreReport;

/// First frame sent on a fresh control connection, binding it to a user.
pub const HANDSHAKE_PREFIX: &str = "__USERID__:";
/// Voice-side signal telling the client to start an exercise session.
pub const GO_RECORD: &str = "__GO_RECORD__";
/// Outbound signal that a fresh voice clip is ready for transcription.
pub const AUDIO_TRIGGER: &str = "onsei";

const TRIGGER_WORDS: [&str; 10] = [
    "体操したい",
    "対象したい",
    "体操する",
    "対象する",
    "ラジオ体操したい",
    "ラジオ対象したい",
    "ラジオ体操する",
    "ラジオ対象する",
    "やってみる",
    "やってみたい",
];

const READ_TIMEOUT_MS: u64 = 100;

pub fn handshake(user_id: &str) -> String {
    format!("{HANDSHAKE_PREFIX}{user_id}")
}

/// Typed text that should launch an exercise session directly, matched
/// against the trigger vocabulary (including common mistranscriptions).
pub fn is_exercise_trigger(text: &str) -> bool {
    TRIGGER_WORDS.iter().any(|w| text.contains(w))
}

/// Assistant text is broken after sentence-final punctuation so it wraps
/// into readable lines.
pub fn format_assistant_text(text: &str) -> String {
    text.replace('。', "。\n").replace('？', "？\n")
}

/// A control-channel frame, decoded from the voice relay's text protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Start an exercise session now (voice trigger).
    GoRecord,
    /// Up to three video urls, space separated.
    MediaUrls(Vec<String>),
    /// Up to three video titles, space separated.
    MediaNames(Vec<String>),
    /// Echo of the user's own transcribed speech.
    UserEcho(String),
    /// Assistant reply text.
    Assistant(String),
}

impl InboundMessage {
    /// Decode one raw frame. Unknown frames yield None and are dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == GO_RECORD {
            return Some(InboundMessage::GoRecord);
        }
        if raw.contains(".mp4") {
            let fields: Vec<String> = raw.split(' ').take(3).map(str::to_string).collect();
            if raw.contains("file:") {
                return Some(InboundMessage::MediaUrls(fields));
            }
            return Some(InboundMessage::MediaNames(fields));
        }
        match raw.chars().next() {
            Some('0') => Some(InboundMessage::UserEcho(raw[1..].to_string())),
            Some('1') => Some(InboundMessage::Assistant(raw[1..].to_string())),
            _ => None,
        }
    }
}

/// What the scoring server did with a submitted recording.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// Server graded the session elsewhere; open this location verbatim.
    Redirect(String),
    /// Inline report.
    Report(ScoreReport),
}

#[derive(Deserialize)]
struct ChatReply {
    reply: String,
}

/// Blocking HTTP client for the coach server. Redirects are surfaced to
/// the caller rather than followed.
pub struct ChatClient {
    http: Client,
    base: Url,
    user_id: String,
}

impl ChatClient {
    pub fn new(base: &str, user_id: &str) -> Result<Self> {
        let base = Url::parse(base)?;
        let http = Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(ChatClient {
            http,
            base,
            user_id: user_id.to_string(),
        })
    }

    /// Ask the coach a question, returning its reply text.
    pub fn chat(&self, message: &str) -> Result<String> {
        let url = self.base.join("chat_api")?;
        let body = json!({ "message": message, "user_id": self.user_id });
        let reply: ChatReply = self
            .http
            .post(url)
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(reply.reply)
    }

    /// Submit a recorded session for remote grading.
    pub fn submit_recording(&self, frames: &[LandmarkFrame]) -> Result<ScoreOutcome> {
        let url = self.base.join("score_landmarks")?;
        let response = self.http.post(url).json(&frames_payload(frames)).send()?;

        let status = response.status();
        if status.is_redirection() {
            // a redirect with no usable Location cannot be followed
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(TaisoError::ScoreResponse {
                    status: status.as_u16(),
                })?;
            return Ok(ScoreOutcome::Redirect(location.to_string()));
        }
        if status.is_success() {
            let report: ScoreReport = response.json()?;
            return Ok(ScoreOutcome::Report(report));
        }
        Err(TaisoError::ScoreResponse {
            status: status.as_u16(),
        })
    }
}

/// Request body for a recording submission: one row of 33 `[x, y, z,
/// visibility]` quadruples per frame.
pub fn frames_payload(frames: &[LandmarkFrame]) -> serde_json::Value {
    let rows: Vec<Vec<[f64; 4]>> = frames.iter().map(LandmarkFrame::to_wire).collect();
    json!({ "frames": rows })
}

/// Persistent WebSocket link to the voice relay. A background thread owns
/// the socket and interleaves inbound reads with an outbound queue; decoded
/// frames land on the given channel.
pub struct ControlChannel {
    outbound: mpsc::Sender<String>,
}

impl ControlChannel {
    pub fn connect(
        url: &str,
        user_id: &str,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Result<Self> {
        let url = Url::parse(url)?;
        let (mut socket, _response) = tungstenite::connect(url.as_str())?;

        // short read timeout so the outbound queue drains between frames
        if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
            if let Err(e) = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS))) {
                warn!("control channel read timeout not set: {e}");
            }
        }

        socket.send(Message::Text(handshake(user_id)))?;

        let (outbound, queue) = mpsc::channel::<String>();
        thread::spawn(move || run_socket(socket, inbound, queue));
        Ok(ControlChannel { outbound })
    }

    /// Queue a text frame for the relay. Lost frames after a disconnect
    /// are dropped silently; the read side reports the failure.
    pub fn send(&self, text: &str) {
        let _ = self.outbound.send(text.to_string());
    }

    pub fn send_audio_trigger(&self) {
        self.send(AUDIO_TRIGGER);
    }
}

fn run_socket(
    mut socket: WebSocket<MaybeTlsStream<TcpStream>>,
    inbound: mpsc::Sender<InboundMessage>,
    queue: mpsc::Receiver<String>,
) {
    'link: loop {
        match socket.read() {
            Ok(Message::Text(text)) => match InboundMessage::parse(&text) {
                Some(message) => {
                    if inbound.send(message).is_err() {
                        break 'link;
                    }
                }
                None => debug!("unrecognized control frame: {text}"),
            },
            Ok(Message::Close(_)) => break 'link,
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("control channel closed: {e}");
                break 'link;
            }
        }

        while let Ok(text) = queue.try_recv() {
            if let Err(e) = socket.send(Message::Text(text)) {
                warn!("control channel send failed: {e}");
                break 'link;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark::POINT_COUNT;

    #[test]
    fn go_record_is_exact_match() {
        assert_eq!(InboundMessage::parse("__GO_RECORD__"), Some(InboundMessage::GoRecord));
        assert_eq!(InboundMessage::parse("__GO_RECORD__ "), None);
    }

    #[test]
    fn media_urls_need_both_markers() {
        let msg = InboundMessage::parse("file:a.mp4 file:b.mp4 file:c.mp4").unwrap();
        assert_eq!(
            msg,
            InboundMessage::MediaUrls(vec![
                "file:a.mp4".into(),
                "file:b.mp4".into(),
                "file:c.mp4".into()
            ])
        );
    }

    #[test]
    fn media_names_lack_the_file_marker() {
        let msg = InboundMessage::parse("ラジオ体操.mp4 第二.mp4 みんなの.mp4").unwrap();
        assert!(matches!(msg, InboundMessage::MediaNames(ref names) if names.len() == 3));
    }

    #[test]
    fn speaker_prefix_selects_echo_or_assistant() {
        assert_eq!(
            InboundMessage::parse("0体操したい"),
            Some(InboundMessage::UserEcho("体操したい".into()))
        );
        assert_eq!(
            InboundMessage::parse("1いい調子ですね。続けましょう？"),
            Some(InboundMessage::Assistant("いい調子ですね。続けましょう？".into()))
        );
    }

    #[test]
    fn unknown_frames_are_dropped() {
        assert_eq!(InboundMessage::parse(""), None);
        assert_eq!(InboundMessage::parse("2何か"), None);
        assert_eq!(InboundMessage::parse("ping"), None);
    }

    #[test]
    fn assistant_text_wraps_after_sentence_ends() {
        assert_eq!(
            format_assistant_text("こんにちは。元気ですか？はい。"),
            "こんにちは。\n元気ですか？\nはい。\n"
        );
    }

    #[test]
    fn trigger_vocabulary_matches_substrings() {
        assert!(is_exercise_trigger("今日はラジオ体操したい気分"));
        assert!(is_exercise_trigger("対象する"));
        assert!(is_exercise_trigger("やってみたい！"));
        assert!(!is_exercise_trigger("こんにちは"));
    }

    #[test]
    fn handshake_carries_the_user_id() {
        assert_eq!(handshake("alice"), "__USERID__:alice");
    }

    #[test]
    fn payload_is_rows_of_quadruples() {
        let frames = vec![LandmarkFrame::uniform(0.5, 0.25, 0.9); 2];
        let payload = frames_payload(&frames);
        let rows = payload["frames"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_array().unwrap().len(), POINT_COUNT);
        assert_eq!(rows[0][0][0], 0.5);
        assert_eq!(rows[0][0][3], 0.9);
    }

    /// One-shot loopback HTTP server: consumes a single request, then
    /// writes `response` verbatim and closes.
    fn spawn_http_responder(response: String) -> (String, thread::JoinHandle<()>) {
        use std::io::{BufRead, BufReader, Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let lower = line.to_ascii_lowercase();
                if let Some(rest) = lower.strip_prefix("content-length:") {
                    content_length = rest.trim().parse().unwrap();
                }
                if line == "\r\n" {
                    break;
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();
            reader.get_mut().write_all(response.as_bytes()).unwrap();
        });
        (base, handle)
    }

    #[test]
    fn redirect_scoring_response_carries_the_location_verbatim() {
        let target = "http://127.0.0.1:9/result_feedback?user=tester";
        let (base, server) = spawn_http_responder(format!(
            "HTTP/1.1 302 Found\r\nLocation: {target}\r\nContent-Length: 0\r\n\r\n"
        ));

        let client = ChatClient::new(&base, "tester").unwrap();
        let frames = vec![LandmarkFrame::uniform(0.5, 0.5, 0.9)];
        let outcome = client.submit_recording(&frames).unwrap();
        assert_eq!(outcome, ScoreOutcome::Redirect(target.to_string()));

        server.join().unwrap();
    }

    #[test]
    fn redirect_without_location_is_a_scoring_error() {
        let (base, server) =
            spawn_http_responder("HTTP/1.1 302 Found\r\nContent-Length: 0\r\n\r\n".to_string());

        let client = ChatClient::new(&base, "tester").unwrap();
        let frames = vec![LandmarkFrame::uniform(0.5, 0.5, 0.9)];
        let err = client.submit_recording(&frames).unwrap_err();
        assert!(matches!(err, TaisoError::ScoreResponse { status: 302 }));

        server.join().unwrap();
    }

    #[test]
    fn control_channel_round_trip_over_loopback() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();

            let hello = ws.read().unwrap();
            assert_eq!(hello.to_text().unwrap(), "__USERID__:tester");

            ws.send(Message::Text("__GO_RECORD__".into())).unwrap();

            // wait for the queued outbound audio trigger
            loop {
                match ws.read().unwrap() {
                    Message::Text(text) => {
                        assert_eq!(text, AUDIO_TRIGGER);
                        break;
                    }
                    _ => continue,
                }
            }
        });

        let (tx, rx) = mpsc::channel();
        let channel = ControlChannel::connect(&format!("ws://{addr}"), "tester", tx).unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            InboundMessage::GoRecord
        );
        channel.send_audio_trigger();

        server.join().unwrap();
    }
}
