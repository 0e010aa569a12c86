use std::error::Error;
use std::io::stdout;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use crossbeam_channel::unbounded;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap};

use crate::control::api;
use crate::device::BindingStatus;
use crate::RelayStatus;

const TICK_RATE: Duration = Duration::from_millis(100);
const CHANNEL_NAMES: [&str; 2] = ["Left", "Right"];

#[derive(Default)]
struct AppState {
    status: Option<RelayStatus>,
    selected: usize,
    mode: Mode,
    message: Option<String>,
    last_update: Option<Instant>,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    VolumeInput,
}

struct VolumeEditor {
    buffer: String,
}

/// Run the ratatui-based developer console.
pub fn run() -> Result<(), Box<dyn Error>> {
    setup_terminal()?;

    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let (status_tx, status_rx) = unbounded();
    std::thread::spawn(move || {
        loop {
            let status = api::get_status();
            if status_tx.send(status).is_err() {
                break;
            }
            std::thread::sleep(TICK_RATE);
        }
    });

    let mut app = AppState::default();
    let mut volume_editor: Option<VolumeEditor> = None;

    loop {
        terminal.draw(|frame| draw(frame, &app, volume_editor.as_ref()))?;

        if let Some(status) = try_recv_latest(&status_rx) {
            app.status = status;
            app.last_update = Some(Instant::now());
            app.selected = app.selected.min(CHANNEL_NAMES.len() - 1);
        }

        if event::poll(Duration::from_millis(10))? {
            match event::read()? {
                CEvent::Key(key) => {
                    if handle_key(&mut app, &mut volume_editor, key)? {
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    restore_terminal()?;
    Ok(())
}

fn setup_terminal() -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    Ok(())
}

fn restore_terminal() -> Result<(), Box<dyn Error>> {
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    Ok(())
}

fn try_recv_latest<T>(rx: &Receiver<T>) -> Option<T> {
    let mut last = None;
    while let Ok(value) = rx.try_recv() {
        last = Some(value);
    }
    last
}

fn handle_key(
    app: &mut AppState,
    volume_editor: &mut Option<VolumeEditor>,
    key: KeyEvent,
) -> Result<bool, Box<dyn Error>> {
    match app.mode {
        Mode::Normal => match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Up => {
                if app.selected > 0 {
                    app.selected -= 1;
                }
            }
            KeyCode::Down => {
                if app.selected + 1 < CHANNEL_NAMES.len() {
                    app.selected += 1;
                }
            }
            KeyCode::Char('m') => {
                if let Some(status) = &app.status {
                    let new_state = !status.mute;
                    if api::set_mute(new_state) {
                        app.message = Some(format!(
                            "Output {}",
                            if new_state { "muted" } else { "unmuted" }
                        ));
                    }
                }
            }
            KeyCode::Char('r') => {
                if api::rebind() {
                    app.message = Some("Rebinding output device".to_string());
                }
            }
            KeyCode::Char('g') => {
                if let Some(status) = &app.status {
                    let current = if app.selected == 0 {
                        status.volume_l_db
                    } else {
                        status.volume_r_db
                    };
                    volume_editor.replace(VolumeEditor {
                        buffer: format!("{current:.1}"),
                    });
                    app.mode = Mode::VolumeInput;
                }
            }
            _ => {}
        },
        Mode::VolumeInput => match key.code {
            KeyCode::Esc => {
                volume_editor.take();
                app.mode = Mode::Normal;
            }
            KeyCode::Enter => {
                if let Some(editor) = volume_editor.take() {
                    if let Ok(value) = editor.buffer.trim().parse::<f32>() {
                        if api::set_channel_volume_db(app.selected, value) {
                            app.message = Some(format!(
                                "Set {} volume to {:.1} dB",
                                CHANNEL_NAMES[app.selected], value
                            ));
                        }
                    }
                }
                app.mode = Mode::Normal;
            }
            KeyCode::Backspace => {
                if let Some(editor) = volume_editor.as_mut() {
                    editor.buffer.pop();
                }
            }
            KeyCode::Char(c) => {
                if let Some(editor) = volume_editor.as_mut() {
                    if c.is_ascii_digit() || matches!(c, '.' | '-' | '+') {
                        editor.buffer.push(c);
                    }
                }
            }
            _ => {}
        },
    }
    Ok(false)
}

fn binding_line(status: &RelayStatus) -> String {
    match &status.binding {
        BindingStatus::Unbound => "Output: none (silent)".to_string(),
        BindingStatus::Resolving => "Output: resolving...".to_string(),
        BindingStatus::Bound {
            name,
            buffer_frames,
            sample_rate,
            started,
            ..
        } => format!(
            "Output: {} @ {} Hz, {} frames{}",
            name,
            sample_rate,
            buffer_frames,
            if *started { "" } else { " (stopped)" }
        ),
    }
}

fn draw(frame: &mut ratatui::Frame<'_>, app: &AppState, volume_editor: Option<&VolumeEditor>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(6),
            Constraint::Length(3),
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], app);
    draw_channels(frame, chunks[1], app);
    draw_footer(frame, chunks[2], app);

    if let Some(editor) = volume_editor {
        let area = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(3)])
            .split(frame.size())[1];

        let block = Block::default()
            .title("Set Volume (dB) — Enter to apply, Esc to cancel")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow));

        let paragraph = Paragraph::new(editor.buffer.clone())
            .block(block)
            .wrap(Wrap { trim: false });

        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }
}

fn draw_header(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default()
        .title("Relay Device Console")
        .borders(Borders::ALL);

    let content = if let Some(status) = &app.status {
        let stats = format!(
            "Sample Rate: {} Hz    Latency: {:.2} ms    IO Clients: {}    Overruns: {}    Drift: {:.1} ppm",
            status.sample_rate,
            status.latency_ms,
            status.io_running,
            status.overruns,
            status.drift_ppm,
        );
        Paragraph::new(vec![Line::from(stats), Line::from(binding_line(status))])
    } else {
        Paragraph::new(Line::from(vec![Span::styled(
            "No active driver",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )]))
    };

    frame.render_widget(content.block(block), area);
}

fn draw_channels(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default().title("Output Channels").borders(Borders::ALL);

    if let Some(status) = &app.status {
        let header = Row::new(vec![
            Cell::from(""),
            Cell::from("Channel"),
            Cell::from("Volume (dB)"),
            Cell::from("Muted"),
            Cell::from("Controls"),
        ])
        .style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );

        let volumes_db = [status.volume_l_db, status.volume_r_db];
        let rows = CHANNEL_NAMES.iter().enumerate().map(|(idx, name)| {
            let indicator = if idx == app.selected { ">" } else { "" };
            let mut row = Row::new(vec![
                Cell::from(indicator.to_string()),
                Cell::from((*name).to_string()),
                Cell::from(format!("{:.1}", volumes_db[idx])),
                Cell::from(if status.mute { "Yes" } else { "No" }),
                Cell::from(if status.controls_exposed { "On" } else { "Off" }),
            ]);
            if idx == app.selected {
                row = row.style(Style::default().fg(Color::Yellow));
            }
            row
        });

        let table = Table::new(
            rows,
            [
                Constraint::Length(2),
                Constraint::Length(10),
                Constraint::Length(12),
                Constraint::Length(8),
                Constraint::Length(10),
            ],
        )
        .header(header)
        .block(block)
        .column_spacing(2);

        frame.render_widget(table, area);
    } else {
        frame.render_widget(Paragraph::new("").block(block), area);
    }
}

fn draw_footer(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let info = "Up/Down: Select  •  g: Set volume  •  m: Toggle mute  •  r: Rebind  •  q: Quit";
    let mut lines = vec![Line::from(info)];
    if let Some(message) = &app.message {
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Green),
        )));
    }
    if let Some(updated) = app.last_update {
        let ago = updated.elapsed().as_secs_f32();
        lines.push(Line::from(Span::styled(
            format!("Last update {ago:.1}s ago"),
            Style::default().fg(Color::DarkGray),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}
