//! Interactive menu: fetch proxies, find and show the fastest one, exit

use crate::proxy::{ConnectionReport, ProxyManager, ValidationEvent, WorkingSet};
use crate::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Cell, Gauge, List, ListItem, ListState, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;

const MENU_ITEMS: [&str; 3] = ["Fetch new proxies", "Connect to fastest proxy", "Exit"];

/// Messages from background work to the UI loop
#[derive(Debug)]
enum TaskEvent {
    Fetched(std::result::Result<usize, String>),
    Progress(ValidationEvent),
    Validated(WorkingSet),
    Connected(ConnectionReport),
    /// The task is over; `Err` holds the reason when it panicked or was
    /// cancelled
    Done(std::result::Result<(), String>),
}

/// Background task number, so events of an older task can be told apart
type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Menu,
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Busy {
    Idle,
    Fetching,
    Validating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Info,
    Success,
    Error,
}

/// Menu application state
pub struct App {
    manager: Arc<ProxyManager>,
    min_working: usize,
    max_tests: Option<usize>,
    screen: Screen,
    busy: Busy,
    menu_state: ListState,
    table_state: TableState,
    /// Candidates the current validation will examine
    total: usize,
    /// Finished probes of the current validation
    checked: usize,
    good_count: usize,
    working: WorkingSet,
    report: Option<ConnectionReport>,
    status_message: String,
    tone: Tone,
    should_quit: bool,
    /// Latest background task; events from any other are dropped
    task_id: TaskId,
    events_tx: UnboundedSender<(TaskId, TaskEvent)>,
    events_rx: UnboundedReceiver<(TaskId, TaskEvent)>,
}

impl App {
    pub fn new(manager: Arc<ProxyManager>, min_working: usize, max_tests: Option<usize>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut menu_state = ListState::default();
        menu_state.select(Some(0));

        Self {
            manager,
            min_working,
            max_tests,
            screen: Screen::Menu,
            busy: Busy::Idle,
            menu_state,
            table_state: TableState::default(),
            total: 0,
            checked: 0,
            good_count: 0,
            working: Vec::new(),
            report: None,
            status_message: "Choose an option with 1-3 or the arrow keys and Enter.".to_string(),
            tone: Tone::Info,
            should_quit: false,
            task_id: 0,
            events_tx,
            events_rx,
        }
    }

    /// Run the menu until the user exits
    pub async fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal).await;

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key);
                    }
                }
            }

            while let Ok((task_id, task_event)) = self.events_rx.try_recv() {
                self.handle_task_event(task_id, task_event);
            }

            if self.should_quit {
                break;
            }
        }

        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        match self.screen {
            Screen::Menu => self.handle_menu_key(key.code),
            Screen::Results => match key.code {
                KeyCode::Esc | KeyCode::Enter | KeyCode::Backspace => {
                    self.screen = Screen::Menu;
                }
                KeyCode::Char('q') => self.should_quit = true,
                KeyCode::Down => self.move_table_selection(1),
                KeyCode::Up => self.move_table_selection(-1),
                _ => {}
            },
        }
    }

    fn handle_menu_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Char('3') => self.should_quit = true,
            KeyCode::Char('1') => self.select_menu_item(0),
            KeyCode::Char('2') => self.select_menu_item(1),
            KeyCode::Down => {
                let i = self.menu_state.selected().map_or(0, |i| (i + 1) % MENU_ITEMS.len());
                self.menu_state.select(Some(i));
            }
            KeyCode::Up => {
                let i = self
                    .menu_state
                    .selected()
                    .map_or(0, |i| (i + MENU_ITEMS.len() - 1) % MENU_ITEMS.len());
                self.menu_state.select(Some(i));
            }
            KeyCode::Enter => self.select_menu_item(self.menu_state.selected().unwrap_or(0)),
            KeyCode::Char(_) => self.set_status(Tone::Error, "Invalid choice. Please enter 1, 2, or 3."),
            _ => {}
        }
    }

    fn select_menu_item(&mut self, index: usize) {
        self.menu_state.select(Some(index));
        match index {
            0 => self.start_fetch(),
            1 => self.start_validation(),
            _ => self.should_quit = true,
        }
    }

    /// Run `task` in the background under a fresh id
    ///
    /// The task reports through the sender it is given. A `Done` event
    /// follows in every case, so `busy` is always released.
    fn spawn_task<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(UnboundedSender<TaskEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.task_id += 1;
        let task_id = self.task_id;
        let events_tx = self.events_tx.clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(task(tx));
        tokio::spawn(async move {
            let forward = async {
                while let Some(task_event) = rx.recv().await {
                    let _ = events_tx.send((task_id, task_event));
                }
            };
            let (outcome, ()) = tokio::join!(handle, forward);
            let _ = events_tx.send((task_id, TaskEvent::Done(outcome.map_err(|e| e.to_string()))));
        });
    }

    fn start_fetch(&mut self) {
        if self.busy != Busy::Idle {
            self.set_status(Tone::Info, "Still working, please wait...");
            return;
        }
        self.busy = Busy::Fetching;
        self.set_status(Tone::Info, "Fetching proxies...");

        let manager = Arc::clone(&self.manager);
        self.spawn_task(|tx| async move {
            let result = manager.fetch_proxies().await.map_err(|e| e.to_string());
            let _ = tx.send(TaskEvent::Fetched(result));
        });
    }

    fn start_validation(&mut self) {
        if self.busy != Busy::Idle {
            self.set_status(Tone::Info, "Still working, please wait...");
            return;
        }
        self.busy = Busy::Validating;
        self.total = 0;
        self.checked = 0;
        self.good_count = 0;
        self.working.clear();
        self.report = None;
        self.set_status(Tone::Info, "Finding fastest proxy...");

        let manager = Arc::clone(&self.manager);
        let (min_working, max_tests) = (self.min_working, self.max_tests);
        self.spawn_task(|tx| async move {
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
            let forward = {
                let tx = tx.clone();
                async move {
                    while let Some(progress) = progress_rx.recv().await {
                        let _ = tx.send(TaskEvent::Progress(progress));
                    }
                }
            };
            let (working, ()) = tokio::join!(
                manager.find_working_proxies_with_progress(min_working, max_tests, Some(progress_tx)),
                forward
            );

            let fastest = working.first().cloned();
            let _ = tx.send(TaskEvent::Validated(working));
            if let Some(fastest) = fastest {
                let report = manager.connection_report(&fastest).await;
                let _ = tx.send(TaskEvent::Connected(report));
            }
        });
    }

    fn handle_task_event(&mut self, task_id: TaskId, task_event: TaskEvent) {
        if task_id != self.task_id {
            return;
        }

        match task_event {
            TaskEvent::Fetched(Ok(count)) => {
                if count == 0 {
                    self.set_status(Tone::Error, "No proxies could be fetched, keeping the previous list");
                } else {
                    self.set_status(Tone::Success, &format!("Successfully fetched {} proxies", count));
                }
            }
            TaskEvent::Fetched(Err(e)) => {
                self.set_status(Tone::Error, &format!("An error occurred: {}", e));
            }
            TaskEvent::Progress(ValidationEvent::Started { planned, .. }) => self.total = planned,
            TaskEvent::Progress(ValidationEvent::Probed(record)) => {
                self.checked += 1;
                if record.is_working {
                    self.good_count += 1;
                }
                self.status_message = format!(
                    "Testing proxies... {}/{} | Working: {}",
                    self.checked, self.total, self.good_count
                );
            }
            // Early stop or the deadline can end the pass short of the plan
            TaskEvent::Progress(ValidationEvent::Finished { .. }) => self.total = self.checked,
            TaskEvent::Validated(working) => {
                self.report = None;
                if working.is_empty() {
                    self.set_status(Tone::Error, "No working proxies found");
                } else {
                    self.set_status(
                        Tone::Success,
                        &format!("Found {} working proxies, looking up locations...", working.len()),
                    );
                    self.working = working;
                    self.table_state.select(Some(0));
                    self.screen = Screen::Results;
                }
            }
            TaskEvent::Connected(report) => {
                self.set_status(
                    Tone::Success,
                    &format!("Fastest proxy: {} | Press Enter to continue", report.proxy),
                );
                self.report = Some(report);
            }
            TaskEvent::Done(outcome) => {
                self.busy = Busy::Idle;
                if let Err(e) = outcome {
                    self.set_status(Tone::Error, &format!("An error occurred: {}", e));
                }
            }
        }
    }

    fn move_table_selection(&mut self, step: isize) {
        if self.working.is_empty() {
            return;
        }
        let len = self.working.len() as isize;
        let current = self.table_state.selected().unwrap_or(0) as isize;
        self.table_state.select(Some((current + step).rem_euclid(len) as usize));
    }

    fn set_status(&mut self, tone: Tone, message: &str) {
        self.tone = tone;
        self.status_message = message.to_string();
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(4), // Banner
                Constraint::Min(0),    // Menu or results
                Constraint::Length(3), // Status bar
            ])
            .split(f.size());

        let banner = Paragraph::new(vec![
            Line::from("LegendsVPN"),
            Line::from("Your Proxy Management Tool"),
        ])
        .style(Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
        f.render_widget(banner, chunks[0]);

        match self.screen {
            Screen::Menu => self.render_menu(f, chunks[1]),
            Screen::Results => self.render_results(f, chunks[1]),
        }

        let color = match self.tone {
            Tone::Info => Color::Yellow,
            Tone::Success => Color::Green,
            Tone::Error => Color::Red,
        };
        let status = Paragraph::new(self.status_message.clone())
            .style(Style::default().fg(color))
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[2]);
    }

    fn render_menu(&mut self, f: &mut Frame, area: Rect) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(area);

        let items: Vec<ListItem> = MENU_ITEMS
            .iter()
            .enumerate()
            .map(|(i, item)| ListItem::new(format!("[{}] {}", i + 1, item)))
            .collect();
        let menu = List::new(items)
            .block(Block::default().borders(Borders::ALL).title("Menu"))
            .style(Style::default().fg(Color::Cyan))
            .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
            .highlight_symbol(">> ");
        f.render_stateful_widget(menu, columns[0], &mut self.menu_state);

        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(3)])
            .split(columns[1]);

        let store = self.manager.store();
        let last_fetched = store
            .last_modified()
            .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let info = Paragraph::new(vec![
            Line::from(format!("Proxy file:   {}", store.path().display())),
            Line::from(format!("Last fetched: {}", last_fetched)),
            Line::from(format!("Sources:      {}", self.manager.sources().len())),
            Line::from(format!("Min working:  {}", self.min_working)),
        ])
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Proxy list"));
        f.render_widget(info, right[0]);

        let percent = if self.total > 0 {
            (self.checked.min(self.total) as f64 / self.total as f64 * 100.0) as u16
        } else {
            0
        };
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .percent(percent)
            .label(format!("{}/{} ({}%)", self.checked, self.total, percent));
        f.render_widget(gauge, right[1]);
    }

    fn render_results(&mut self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(5)])
            .split(area);

        let rows: Vec<Row> = self
            .working
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let status = if i == 0 {
                    Cell::from("Fastest").style(Style::default().fg(Color::Green))
                } else {
                    Cell::from("")
                };
                Row::new(vec![
                    Cell::from(record.candidate.to_string()),
                    Cell::from(format!("{:.0}ms", record.latency_ms)),
                    status,
                ])
            })
            .collect();
        let table = Table::new(rows)
            .header(
                Row::new(vec!["Proxy", "Speed (ms)", "Status"])
                    .style(Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD)),
            )
            .block(Block::default().borders(Borders::ALL).title("Speed Test Results"))
            .widths(&[
                Constraint::Percentage(50),
                Constraint::Percentage(25),
                Constraint::Percentage(25),
            ])
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol(">> ");
        f.render_stateful_widget(table, chunks[0], &mut self.table_state);

        let block = Block::default().borders(Borders::ALL).title("Connection");
        match &self.report {
            Some(report) => {
                let row = Row::new(vec![
                    Cell::from("Connected").style(Style::default().fg(Color::Green)),
                    Cell::from(report.original.short_display()),
                    Cell::from(report.via_proxy.short_display()),
                ]);
                let table = Table::new(vec![row])
                    .header(
                        Row::new(vec!["Status", "Original Location", "Proxy Location"])
                            .style(Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD)),
                    )
                    .block(block)
                    .widths(&[
                        Constraint::Percentage(20),
                        Constraint::Percentage(40),
                        Constraint::Percentage(40),
                    ]);
                f.render_widget(table, chunks[1]);
            }
            None => {
                let waiting = Paragraph::new("Looking up locations...")
                    .style(Style::default().fg(Color::Yellow))
                    .block(block);
                f.render_widget(waiting, chunks[1]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Candidate, GeoInfo, ProxyRecord};
    use crate::AppConfig;

    fn app(dir: &std::path::Path) -> App {
        let config = AppConfig::new().with_data_dir(dir).with_sources(Vec::new());
        App::new(Arc::new(ProxyManager::new(config).unwrap()), 3, None)
    }

    fn working(proxies: &[&str]) -> WorkingSet {
        proxies
            .iter()
            .map(|p| ProxyRecord::working(Candidate::new(p).unwrap(), 20.0))
            .collect()
    }

    fn report(proxy: &str) -> ConnectionReport {
        ConnectionReport {
            proxy: Candidate::new(proxy).unwrap(),
            latency_ms: 20.0,
            original: GeoInfo::default(),
            via_proxy: GeoInfo {
                city: Some("Lisbon".to_string()),
                country: Some("Portugal".to_string()),
                ..GeoInfo::default()
            },
        }
    }

    fn press(app: &mut App, code: KeyCode) {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE));
    }

    /// Feed the real events of the latest task until it is done
    async fn drain_until_done(app: &mut App) {
        loop {
            let (task_id, task_event) = app.events_rx.recv().await.unwrap();
            let done = matches!(task_event, TaskEvent::Done(_)) && task_id == app.task_id;
            app.handle_task_event(task_id, task_event);
            if done {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_search_stays_busy_until_locations_arrive() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());

        app.start_validation();
        let task_id = app.task_id;
        app.handle_task_event(task_id, TaskEvent::Validated(working(&["1.1.1.1:80"])));
        assert_eq!(app.busy, Busy::Validating);
        assert!(app.report.is_none());

        press(&mut app, KeyCode::Enter);
        assert_eq!(app.screen, Screen::Menu);
        press(&mut app, KeyCode::Char('2'));
        assert_eq!(app.task_id, task_id);
        assert_eq!(app.status_message, "Still working, please wait...");

        app.handle_task_event(task_id, TaskEvent::Connected(report("1.1.1.1:80")));
        assert_eq!(app.report.as_ref().map(|r| r.proxy.as_str()), Some("1.1.1.1:80"));
        app.handle_task_event(task_id, TaskEvent::Done(Ok(())));
        assert_eq!(app.busy, Busy::Idle);
        assert_eq!(app.tone, Tone::Success);
    }

    #[tokio::test]
    async fn test_events_of_an_earlier_search_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());

        app.start_validation();
        let first = app.task_id;
        app.handle_task_event(first, TaskEvent::Validated(working(&["1.1.1.1:80"])));
        app.handle_task_event(first, TaskEvent::Done(Ok(())));
        press(&mut app, KeyCode::Enter);
        press(&mut app, KeyCode::Char('2'));
        let second = app.task_id;
        assert_ne!(first, second);

        app.handle_task_event(first, TaskEvent::Connected(report("1.1.1.1:80")));
        app.handle_task_event(second, TaskEvent::Validated(working(&["9.9.9.9:80"])));

        assert!(app.report.is_none());
        assert_eq!(app.working[0].candidate.as_str(), "9.9.9.9:80");
        assert!(!app.status_message.contains("1.1.1.1"));
        assert_eq!(app.busy, Busy::Validating);
    }

    #[tokio::test]
    async fn test_new_working_set_clears_previous_connection() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());

        app.start_validation();
        let task_id = app.task_id;
        app.handle_task_event(task_id, TaskEvent::Connected(report("1.1.1.1:80")));
        app.handle_task_event(task_id, TaskEvent::Validated(working(&["9.9.9.9:80"])));

        assert!(app.report.is_none());
    }

    #[tokio::test]
    async fn test_panicking_task_releases_busy() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        app.busy = Busy::Fetching;

        app.spawn_task(|_tx| async { panic!("connection pool poisoned") });
        let (task_id, task_event) = app.events_rx.recv().await.unwrap();
        assert!(matches!(task_event, TaskEvent::Done(Err(_))));
        app.handle_task_event(task_id, task_event);

        assert_eq!(app.busy, Busy::Idle);
        assert_eq!(app.tone, Tone::Error);
        assert!(app.status_message.starts_with("An error occurred: "));

        press(&mut app, KeyCode::Char('2'));
        assert_eq!(app.busy, Busy::Validating);
    }

    #[tokio::test]
    async fn test_fetch_without_sources_keeps_menu_usable() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());

        press(&mut app, KeyCode::Char('1'));
        assert_eq!(app.busy, Busy::Fetching);
        drain_until_done(&mut app).await;

        assert_eq!(app.busy, Busy::Idle);
        assert_eq!(app.tone, Tone::Error);
        assert_eq!(app.status_message, "No proxies could be fetched, keeping the previous list");
    }

    #[tokio::test]
    async fn test_search_without_proxy_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());

        press(&mut app, KeyCode::Char('2'));
        drain_until_done(&mut app).await;

        assert_eq!(app.busy, Busy::Idle);
        assert_eq!(app.screen, Screen::Menu);
        assert_eq!(app.status_message, "No working proxies found");
    }

    #[tokio::test]
    async fn test_gauge_completes_when_pass_ends_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());

        app.start_validation();
        let task_id = app.task_id;
        let progress = |event| TaskEvent::Progress(event);
        app.handle_task_event(task_id, progress(ValidationEvent::Started { total: 8, planned: 5 }));
        assert_eq!(app.total, 5);

        for proxy in ["1.1.1.1:80", "2.2.2.2:80"] {
            let record = ProxyRecord::working(Candidate::new(proxy).unwrap(), 10.0);
            app.handle_task_event(task_id, progress(ValidationEvent::Probed(record)));
        }
        assert_eq!(app.status_message, "Testing proxies... 2/5 | Working: 2");

        app.handle_task_event(task_id, progress(ValidationEvent::Finished { tested: 2, working: 2 }));
        assert_eq!((app.checked, app.total), (2, 2));
    }
}
