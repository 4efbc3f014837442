//! Full-screen `ratatui` front-end: avatar pane with the speaking glow, the
//! status line, a wave indicator while listening, and the key bindings that
//! drive the controller.

use crate::app::VoicePhase;
use crate::log_debug;
use crate::App;
use anyhow::Result;
use crossterm::event;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
    Terminal,
};
use std::io;
use std::time::{Duration, Instant};
use unicode_width::UnicodeWidthChar;
use unicode_width::UnicodeWidthStr;

const WAVE_FRAMES: &[&str] = &["▁▂▃▄▅▄▃▂", "▂▃▄▅▄▃▂▁", "▃▄▅▄▃▂▁▂", "▄▅▄▃▂▁▂▃"];
const WAVE_FRAME_INTERVAL_MS: u128 = 150;

/// Restores the terminal even when the drawing loop errors or panics.
struct TerminalRestoreGuard;

impl Drop for TerminalRestoreGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

/// Configure the terminal, run the drawing loop, and tear everything down.
pub fn run_app(app: &mut App) -> Result<()> {
    enable_raw_mode()?;
    let _guard = TerminalRestoreGuard;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = app_loop(&mut terminal, app);

    app.shutdown();
    result
}

/// Core event/render loop.
fn app_loop(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    let started = Instant::now();
    terminal.draw(|frame| draw(frame, app, started.elapsed()))?;

    loop {
        app.poll_capture_job();
        app.poll_reply_job();
        app.poll_narration();

        let busy = app.has_active_jobs() || app.phase() == VoicePhase::Speaking;
        let poll_duration = if busy {
            Duration::from_millis(50)
        } else {
            Duration::from_millis(100)
        };

        // Animated indicators need continuous redraws while anything is active.
        let mut should_draw = busy;
        let mut should_quit = false;

        if event::poll(poll_duration)? {
            match event::read()? {
                Event::Key(key) => {
                    should_quit = handle_key_event(app, key);
                    should_draw = true;
                }
                Event::Resize(_, _) => {
                    should_draw = true;
                }
                _ => {}
            }
        }

        if should_draw {
            terminal.draw(|frame| draw(frame, app, started.elapsed()))?;
        }

        if should_quit {
            break;
        }
    }
    Ok(())
}

/// Interpret keystrokes into controller actions. Returns true to quit.
fn handle_key_event(app: &mut App, key: KeyEvent) -> bool {
    log_debug(&format!(
        "Key event: {:?} with modifiers: {:?}",
        key.code, key.modifiers
    ));

    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match key.code {
        KeyCode::Enter => app.start_voice_capture(),
        KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.start_voice_capture();
        }
        KeyCode::Char('s') => app.stop_voice(),
        KeyCode::Esc | KeyCode::Char('q') => return true,
        _ => {}
    }

    false
}

/// Render the avatar, status, wave, and help regions.
fn draw(frame: &mut ratatui::Frame<'_>, app: &App, elapsed: Duration) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5),
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let border_color = Color::Rgb(120, 170, 255);
    let dim_border = Color::Rgb(70, 95, 130);
    let glow_color = Color::Rgb(255, 220, 100);
    let text_color = Color::Rgb(210, 205, 200);
    let help_color = Color::Rgb(150, 150, 150);

    // Avatar pane; the glow mirrors the original widget's speaking halo.
    let avatar_style = if app.glow() {
        Style::default().fg(glow_color).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(dim_border)
    };
    let avatar = Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled("◉  Albamen", avatar_style)),
        Line::from(Span::styled(
            app.phase().label(),
            Style::default().fg(help_color),
        )),
    ])
    .alignment(Alignment::Center)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(if app.glow() { glow_color } else { border_color })),
    );
    frame.render_widget(avatar, chunks[0]);

    // Status pane. Long replies are clipped to the pane width; ratatui's text
    // wrapping is avoided on purpose (it panics on some wide-character input).
    let inner_width = usize::from(chunks[1].width.saturating_sub(2));
    let status = clip_to_width(app.status_text(), inner_width);
    let status_block = Paragraph::new(status)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(border_color))
                .title(Span::styled(
                    " Durum ",
                    Style::default().fg(text_color).add_modifier(Modifier::BOLD),
                )),
        )
        .style(Style::default().fg(text_color));
    frame.render_widget(status_block, chunks[1]);

    // Wave indicator: only animates while listening.
    let wave_text = if app.listening() {
        wave_frame(elapsed)
    } else {
        ""
    };
    let wave_block = Paragraph::new(wave_text)
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(dim_border)),
        )
        .style(Style::default().fg(border_color));
    frame.render_widget(wave_block, chunks[2]);

    let help = Line::from(vec![
        Span::styled(" Enter ", Style::default().fg(glow_color)),
        Span::styled("konuş  ", Style::default().fg(help_color)),
        Span::styled("s ", Style::default().fg(glow_color)),
        Span::styled("durdur  ", Style::default().fg(help_color)),
        Span::styled("q ", Style::default().fg(glow_color)),
        Span::styled("çıkış", Style::default().fg(help_color)),
    ]);
    frame.render_widget(Paragraph::new(help), chunks[3]);
}

/// Current wave animation frame for the elapsed run time.
fn wave_frame(elapsed: Duration) -> &'static str {
    let index = (elapsed.as_millis() / WAVE_FRAME_INTERVAL_MS) as usize % WAVE_FRAMES.len();
    WAVE_FRAMES[index]
}

/// Cut `text` to at most `max_cols` terminal columns, appending an ellipsis
/// when something was dropped.
fn clip_to_width(text: &str, max_cols: usize) -> String {
    if UnicodeWidthStr::width(text) <= max_cols {
        return text.to_string();
    }

    let budget = max_cols.saturating_sub(1);
    let mut used = 0usize;
    let mut clipped = String::new();
    for ch in text.chars() {
        let width = ch.width().unwrap_or(0);
        if used + width > budget {
            break;
        }
        clipped.push(ch);
        used += width;
    }
    clipped.push('…');
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{STATUS_LISTENING, STATUS_STOPPED};
    use crate::config::AppConfig;
    use crate::identity::IdentityStore;
    use clap::Parser;
    use std::sync::Arc;

    fn test_app() -> App {
        let unique = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("albamen_ui_{unique}.json"));
        let store = Arc::new(IdentityStore::open(path));
        let config = AppConfig::parse_from(["test-app"]);
        App::with_parts(config, store, None, None)
    }

    #[test]
    fn stop_key_sets_stopped_status() {
        let mut app = test_app();
        let quit = handle_key_event(&mut app, KeyEvent::new(KeyCode::Char('s'), KeyModifiers::empty()));
        assert!(!quit);
        assert_eq!(app.status_text(), STATUS_STOPPED);
    }

    #[test]
    fn quit_keys_exit_the_loop() {
        let mut app = test_app();
        assert!(handle_key_event(
            &mut app,
            KeyEvent::new(KeyCode::Char('q'), KeyModifiers::empty())
        ));
        assert!(handle_key_event(
            &mut app,
            KeyEvent::new(KeyCode::Esc, KeyModifiers::empty())
        ));
        assert!(handle_key_event(
            &mut app,
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)
        ));
    }

    #[test]
    fn trigger_without_capability_does_not_start_listening() {
        let mut app = test_app();
        handle_key_event(&mut app, KeyEvent::new(KeyCode::Enter, KeyModifiers::empty()));
        assert_ne!(app.status_text(), STATUS_LISTENING);
        assert!(!app.listening());
    }

    #[test]
    fn wave_frames_cycle_over_time() {
        let first = wave_frame(Duration::from_millis(0));
        let second = wave_frame(Duration::from_millis(150));
        assert_ne!(first, second);
        // Wraps around after the full cycle.
        let wrapped = wave_frame(Duration::from_millis(150 * WAVE_FRAMES.len() as u64));
        assert_eq!(first, wrapped);
    }

    #[test]
    fn clip_to_width_keeps_short_text_intact() {
        assert_eq!(clip_to_width("merhaba", 20), "merhaba");
    }

    #[test]
    fn clip_to_width_appends_ellipsis() {
        let clipped = clip_to_width("uzun bir cevap metni", 8);
        assert!(clipped.ends_with('…'));
        assert!(UnicodeWidthStr::width(clipped.as_str()) <= 8);
    }
}
