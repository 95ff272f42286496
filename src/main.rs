mod ui;

use std::error::Error;
use std::io::{self, stdin};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::Local;
use clap::{error::ErrorKind, CommandFactory, Parser};
use crossterm::{
    event::{KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use rand::rngs::ThreadRng;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use tracing::warn;

use taiso::advice::{self, GameRecommendation};
use taiso::app_dirs;
use taiso::config::{Config, ConfigStore, FileConfigStore};
use taiso::game::BalloonCatch;
use taiso::handoff::{TriggerHandoff, LINK_CLICK_TRIGGER, VOICE_TRIGGER};
use taiso::history::{self, ComparisonRow, HistoryDb};
use taiso::landmark::{dump_landmarks_csv_to_path, LandmarkFrame};
use taiso::relay::{
    format_assistant_text, is_exercise_trigger, ChatClient, ControlChannel, InboundMessage,
    ScoreOutcome,
};
use taiso::runtime::{spawn_frame_feed, spawn_input_reader, TaisoEvent};
use taiso::score::{score_session, ReferenceProfile, ScoreReport};
use taiso::sequencer::{Phase, Sequencer};
use taiso::steps::Routine;
use taiso::TICK_RATE_MS;

/// pose-gated radio calisthenics coach for the terminal
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "A terminal front end for guided radio calisthenics: a pose-gated countdown starts a timed exercise routine, the recorded landmarks are graded against a reference, and results come back with advice, history deltas, and a recommended follow-up mini-game."
)]
pub struct Cli {
    /// user id for chat, the voice relay handshake, and score history
    #[clap(short = 'u', long)]
    user: Option<String>,

    /// coach server base url (chat and remote scoring)
    #[clap(short = 's', long)]
    server: Option<String>,

    /// voice relay websocket url
    #[clap(long)]
    control_url: Option<String>,

    /// grade locally even when a server is configured
    #[clap(long)]
    offline: bool,

    /// custom routine json (defaults to the embedded standard routine)
    #[clap(long)]
    routine: Option<PathBuf>,

    /// reference profile json for local grading
    #[clap(long)]
    reference: Option<PathBuf>,

    /// landmark feed: a json lines file or a fifo the detector writes into
    #[clap(short = 'f', long)]
    feed: Option<PathBuf>,

    /// replay a recorded feed at this frame rate instead of full speed
    #[clap(long)]
    replay_fps: Option<f64>,

    /// jump straight into the balloon-catch game
    #[clap(long)]
    game: bool,

    /// write each session's landmarks to this csv file
    #[clap(long)]
    dump: Option<PathBuf>,
}

impl Cli {
    /// Command line flags override the stored configuration.
    fn apply(&self, mut config: Config) -> Config {
        if let Some(user) = &self.user {
            config.user_id = user.clone();
        }
        if self.server.is_some() {
            config.server_url = self.server.clone();
        }
        if self.control_url.is_some() {
            config.control_url = self.control_url.clone();
        }
        if self.offline {
            config.offline = true;
        }
        if self.routine.is_some() {
            config.routine_path = self.routine.clone();
        }
        if self.reference.is_some() {
            config.reference_path = self.reference.clone();
        }
        if self.replay_fps.is_some() {
            config.detector_fps = self.replay_fps;
        }
        config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Chat,
    Session,
    Results,
    Game,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub from_user: bool,
    pub text: String,
}

/// Everything the results screen needs, assembled once when a report
/// arrives.
#[derive(Debug)]
pub struct ResultsView {
    pub report: ScoreReport,
    /// (step label, advice sentence) for the weakest exercises.
    pub advice: Vec<(String, String)>,
    pub comparison: Vec<ComparisonRow>,
    pub weak_parts: Vec<String>,
    pub game: GameRecommendation,
    /// Mean session scores, oldest first, for the history chart.
    pub history: Vec<f64>,
    pub finished_at: chrono::DateTime<Local>,
}

#[derive(Debug)]
pub struct App {
    pub cli: Option<Cli>,
    pub state: AppState,
    pub config: Config,
    pub sequencer: Sequencer,
    pub game: BalloonCatch<ThreadRng>,
    pub chat_lines: Vec<ChatLine>,
    pub chat_input: String,
    pub chat_busy: bool,
    pub status: Option<String>,
    pub submitting: bool,
    pub results: Option<ResultsView>,
    pub media_urls: Vec<String>,
    pub media_names: Vec<String>,
    /// Everything the user said in chat, fed into the game recommendation.
    pub chat_tags: Vec<String>,
    pub history: Option<HistoryDb>,
    pub session_id: Option<String>,
    pub handoff_path: PathBuf,
    pub session_log_path: Option<PathBuf>,
    pub dump_path: Option<PathBuf>,
}

impl App {
    pub fn new(cli: Option<Cli>, config: Config, routine: Routine, history: Option<HistoryDb>) -> Self {
        let dump_path = cli.as_ref().and_then(|c| c.dump.clone());
        Self {
            cli,
            state: AppState::Chat,
            config,
            sequencer: Sequencer::new(routine),
            game: BalloonCatch::new(rand::thread_rng()),
            chat_lines: Vec::new(),
            chat_input: String::new(),
            chat_busy: false,
            status: None,
            submitting: false,
            results: None,
            media_urls: Vec::new(),
            media_names: Vec::new(),
            chat_tags: Vec::new(),
            history,
            session_id: None,
            handoff_path: TriggerHandoff::default_path(),
            session_log_path: app_dirs::session_log_path(),
            dump_path,
        }
    }

    pub fn push_user_line(&mut self, text: &str) {
        self.chat_lines.push(ChatLine {
            from_user: true,
            text: text.to_string(),
        });
    }

    pub fn push_coach_line(&mut self, text: &str) {
        self.chat_lines.push(ChatLine {
            from_user: false,
            text: text.to_string(),
        });
    }

    /// Record what launched the session and hand control to the sequencer.
    pub fn start_session(&mut self, trigger: &str) {
        let mut handoff = TriggerHandoff::now(trigger);
        handoff.media_urls = self.media_urls.clone();
        handoff.media_names = self.media_names.clone();
        if let Err(e) = handoff.save(&self.handoff_path) {
            warn!("trigger handoff not saved: {e}");
        }

        self.sequencer = Sequencer::new(self.sequencer.routine.clone());
        self.session_id = Some(Local::now().format("%Y%m%d%H%M%S%.3f").to_string());
        self.submitting = false;
        self.status = None;
        self.state = AppState::Session;
    }

    pub fn start_game(&mut self) {
        self.game = BalloonCatch::new(rand::thread_rng());
        self.state = AppState::Game;
    }

    fn submit_chat_input(&mut self, server: &Option<mpsc::Sender<ServerRequest>>) {
        let text = self.chat_input.trim().to_string();
        if text.is_empty() {
            return;
        }
        self.chat_input.clear();
        self.push_user_line(&text);
        self.chat_tags.push(text.clone());

        if is_exercise_trigger(&text) {
            self.start_session(&text);
            return;
        }
        match server {
            Some(server) if !self.chat_busy => {
                if server.send(ServerRequest::Chat(text)).is_ok() {
                    self.chat_busy = true;
                } else {
                    self.status = Some("サーバーに接続できませんでした".into());
                }
            }
            Some(_) => {}
            None => self.status = Some("サーバー未設定のためチャットは利用できません".into()),
        }
    }

    /// Dispatch a recorded session for grading, locally or to the server.
    fn begin_scoring(
        &mut self,
        frames: Vec<LandmarkFrame>,
        server: &Option<mpsc::Sender<ServerRequest>>,
        tx: &mpsc::Sender<TaisoEvent>,
    ) {
        self.submitting = true;
        self.status = Some("採点しています…".into());

        if let Some(path) = &self.dump_path {
            if let Err(e) = dump_landmarks_csv_to_path(&frames, path) {
                warn!("landmark dump failed: {e}");
            }
        }

        let offline = self.config.offline || self.config.server_url.is_none();
        if offline {
            match &self.config.reference_path {
                Some(reference) => spawn_local_scoring(
                    frames,
                    self.sequencer.routine.clone(),
                    reference.clone(),
                    tx.clone(),
                ),
                None => {
                    self.status = Some("お手本プロファイル未設定のため採点できません".into());
                    self.submitting = false;
                    self.state = AppState::Chat;
                }
            }
        } else if let Some(server) = server {
            if server.send(ServerRequest::Score(frames)).is_err() {
                self.status = Some("サーバーに接続できませんでした".into());
                self.submitting = false;
                self.state = AppState::Chat;
            }
        }
    }

    fn on_control(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::GoRecord => self.start_session(VOICE_TRIGGER),
            InboundMessage::MediaUrls(urls) => self.media_urls = urls,
            InboundMessage::MediaNames(names) => self.media_names = names,
            InboundMessage::UserEcho(text) => {
                self.push_user_line(&text);
                self.chat_tags.push(text.clone());
                if is_exercise_trigger(&text) {
                    self.start_session(&text);
                }
            }
            InboundMessage::Assistant(text) => {
                self.push_coach_line(&format_assistant_text(&text));
            }
        }
    }

    fn on_score(&mut self, outcome: Result<ScoreOutcome, String>) {
        self.submitting = false;
        match outcome {
            Ok(ScoreOutcome::Redirect(location)) => {
                let handoff = TriggerHandoff::now(LINK_CLICK_TRIGGER);
                if let Err(e) = handoff.save(&self.handoff_path) {
                    warn!("trigger handoff not saved: {e}");
                }
                if webbrowser::open(&location).is_ok() {
                    self.status = Some("結果ページをブラウザで開きました".into());
                } else {
                    self.status = Some(format!("結果ページ: {location}"));
                }
                self.state = AppState::Chat;
            }
            Ok(ScoreOutcome::Report(report)) => self.finish_with_report(report),
            Err(e) => {
                self.status = Some(format!("採点に失敗しました: {e}"));
                self.state = AppState::Chat;
            }
        }
    }

    /// Persist the graded session and assemble the results screen.
    fn finish_with_report(&mut self, report: ScoreReport) {
        let finished_at = Local::now();
        let started_at = self.sequencer.started_at.unwrap_or(finished_at);
        let session_id = self
            .session_id
            .clone()
            .unwrap_or_else(|| started_at.format("%Y%m%d%H%M%S").to_string());

        let mut comparison = Vec::new();
        let mut history_scores = Vec::new();
        if let Some(db) = &mut self.history {
            if let Err(e) = db.record_session(&self.config.user_id, &session_id, started_at, &report)
            {
                warn!("score history not recorded: {e}");
            }
            comparison = db
                .comparison(&self.config.user_id, &session_id)
                .unwrap_or_default();
            history_scores = db
                .recent_overall(&self.config.user_id, 20)
                .unwrap_or_default();
        }
        if let Some(path) = &self.session_log_path {
            if let Err(e) = history::append_session_log(
                path,
                &self.config.user_id,
                &session_id,
                started_at,
                report.overall,
            ) {
                warn!("session log not appended: {e}");
            }
        }

        let mut rng = rand::thread_rng();
        let advice_lines: Vec<(String, String)> = advice::lowest_exercises(&report)
            .iter()
            .map(|e| {
                (
                    self.sequencer.routine.label(&e.exercise).to_string(),
                    advice::exercise_advice(&report, &e.exercise, &mut rng),
                )
            })
            .collect();
        let weak_parts = advice::weak_parts(&report);
        let game = advice::recommend_game(&self.chat_tags, &report, &weak_parts);

        self.results = Some(ResultsView {
            advice: advice_lines,
            comparison,
            weak_parts,
            game,
            history: history_scores,
            finished_at,
            report,
        });
        self.submitting = false;
        self.status = None;
        self.state = AppState::Results;
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    init_logging();

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let config = cli.apply(FileConfigStore::new().load());
    let routine = match &config.routine_path {
        Some(path) => Routine::from_file(path)?,
        None => Routine::standard(),
    };
    let history = match HistoryDb::new() {
        Ok(db) => Some(db),
        Err(e) => {
            warn!("history db unavailable: {e}");
            None
        }
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let straight_to_game = cli.game;
    let mut app = App::new(Some(cli), config, routine, history);
    if straight_to_game {
        app.state = AppState::Game;
    }
    let res = start_tui(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

/// Log to a file in the state directory; the terminal belongs to the TUI.
fn init_logging() {
    let Some(path) = app_dirs::log_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Arc::new(file))
        .with_ansi(false)
        .try_init();
}

fn start_tui<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<(), Box<dyn Error>> {
    let feed = app.cli.as_ref().and_then(|c| c.feed.clone());
    let (tx, events, control) = get_taiso_events(&app.config, feed);

    let server = app
        .config
        .server_url
        .clone()
        .map(|base| spawn_server_worker(base, app.config.user_id.clone(), tx.clone()));

    loop {
        terminal.draw(|f| f.render_widget(&*app, f.area()))?;

        match events.recv()? {
            TaisoEvent::Tick => match app.state {
                AppState::Session => {
                    app.sequencer.advance_ms(TICK_RATE_MS);
                    if app.sequencer.phase() == Phase::Scoring && !app.submitting {
                        if let Some(frames) = app.sequencer.take_recording() {
                            app.begin_scoring(frames, &server, &tx);
                        }
                    }
                }
                AppState::Game => app.game.advance_ms(TICK_RATE_MS),
                _ => {}
            },
            TaisoEvent::Resize => {}
            TaisoEvent::Frame(frame) => match app.state {
                AppState::Session => app.sequencer.on_frame(frame),
                AppState::Game => app.game.observe_hand(&frame),
                _ => {}
            },
            TaisoEvent::Control(message) => app.on_control(message),
            TaisoEvent::ChatReply(reply) => {
                app.chat_busy = false;
                match reply {
                    Ok(text) => app.push_coach_line(&format_assistant_text(&text)),
                    Err(e) => app.status = Some(format!("チャットに失敗しました: {e}")),
                }
            }
            TaisoEvent::Score(outcome) => app.on_score(outcome),
            TaisoEvent::Key(key) => {
                if handle_key(app, key, &server, control.as_ref()) {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Returns true when the app should quit.
fn handle_key(
    app: &mut App,
    key: KeyEvent,
    server: &Option<mpsc::Sender<ServerRequest>>,
    control: Option<&ControlChannel>,
) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match app.state {
        AppState::Chat => match key.code {
            KeyCode::Esc => return true,
            KeyCode::Enter => app.submit_chat_input(server),
            KeyCode::Backspace => {
                app.chat_input.pop();
            }
            KeyCode::Tab => {
                if let Some(control) = control {
                    control.send_audio_trigger();
                    app.status = Some("音声を送信しました".into());
                }
            }
            KeyCode::Char('g') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                app.start_game()
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                app.chat_input.push(c)
            }
            _ => {}
        },
        AppState::Session => {
            if key.code == KeyCode::Esc {
                match app.sequencer.phase() {
                    Phase::Running => app.sequencer.stop(),
                    Phase::Scoring => {}
                    _ => app.state = AppState::Chat,
                }
            }
        }
        AppState::Results => match key.code {
            KeyCode::Char('r') => app.start_session("retry"),
            KeyCode::Char('g') => app.start_game(),
            KeyCode::Esc => app.state = AppState::Chat,
            _ => {}
        },
        AppState::Game => match key.code {
            KeyCode::Char('r') => app.game.retry(),
            KeyCode::Esc => {
                app.state = if app.results.is_some() {
                    AppState::Results
                } else {
                    AppState::Chat
                };
            }
            _ => {}
        },
    }
    false
}

enum ServerRequest {
    Chat(String),
    Score(Vec<LandmarkFrame>),
}

/// One channel carries every event: ticks, keys, detector frames, and
/// decoded relay messages.
fn get_taiso_events(
    config: &Config,
    feed: Option<PathBuf>,
) -> (
    mpsc::Sender<TaisoEvent>,
    mpsc::Receiver<TaisoEvent>,
    Option<ControlChannel>,
) {
    let (tx, rx) = mpsc::channel();

    let tick_tx = tx.clone();
    thread::spawn(move || loop {
        if tick_tx.send(TaisoEvent::Tick).is_err() {
            break;
        }
        thread::sleep(Duration::from_millis(TICK_RATE_MS));
    });

    spawn_input_reader(tx.clone());

    if let Some(path) = feed {
        spawn_frame_feed(path, config.detector_fps, tx.clone());
    }

    let control = config.control_url.as_ref().and_then(|url| {
        let (ctrl_tx, ctrl_rx) = mpsc::channel();
        match ControlChannel::connect(url, &config.user_id, ctrl_tx) {
            Ok(channel) => {
                let fwd = tx.clone();
                thread::spawn(move || {
                    while let Ok(message) = ctrl_rx.recv() {
                        if fwd.send(TaisoEvent::Control(message)).is_err() {
                            break;
                        }
                    }
                });
                Some(channel)
            }
            Err(e) => {
                warn!("voice relay connect failed: {e}");
                None
            }
        }
    });

    (tx, rx, control)
}

/// One worker thread owns the HTTP client; chat and scoring requests are
/// serialized through it and answered on the event channel.
fn spawn_server_worker(
    base: String,
    user_id: String,
    tx: mpsc::Sender<TaisoEvent>,
) -> mpsc::Sender<ServerRequest> {
    let (req_tx, req_rx) = mpsc::channel::<ServerRequest>();
    thread::spawn(move || {
        let client = match ChatClient::new(&base, &user_id) {
            Ok(client) => client,
            Err(e) => {
                warn!("coach server client not created: {e}");
                return;
            }
        };
        while let Ok(request) = req_rx.recv() {
            let event = match request {
                ServerRequest::Chat(message) => {
                    TaisoEvent::ChatReply(client.chat(&message).map_err(|e| e.to_string()))
                }
                ServerRequest::Score(frames) => TaisoEvent::Score(
                    client.submit_recording(&frames).map_err(|e| e.to_string()),
                ),
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    });
    req_tx
}

fn spawn_local_scoring(
    frames: Vec<LandmarkFrame>,
    routine: Routine,
    reference: PathBuf,
    tx: mpsc::Sender<TaisoEvent>,
) {
    thread::spawn(move || {
        let result = ReferenceProfile::load(&reference)
            .and_then(|profile| score_session(&frames, &routine, &profile))
            .map(ScoreOutcome::Report)
            .map_err(|e| e.to_string());
        let _ = tx.send(TaisoEvent::Score(result));
    });
}

#[cfg(test)]
pub fn test_app() -> App {
    let mut app = App::new(None, Config::default(), Routine::standard(), None);
    app.session_log_path = None;
    app
}
