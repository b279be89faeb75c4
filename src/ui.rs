use crate::{
    client::{
        GridView,
        TileCard,
    },
    model::TileState,
    retry::PurchasePhase,
    tile_state::{
        PurchaseAffordance,
        TileMode,
    },
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        Event,
        EventStream,
        KeyCode,
        KeyEvent,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use futures::StreamExt;
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;
use unicode_width::{
    UnicodeWidthChar,
    UnicodeWidthStr,
};

pub const GRID_COLUMNS: usize = 3;
const CELL_HEIGHT: u16 = 8;

pub type InputEventReceiver = EventStream;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    Redraw,
    RequestLock { index: usize, message: String },
    EditDraft { index: usize, message: String },
    Purchase { index: usize },
    DismissErrors,
}

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    selected: usize,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

impl UiState {
    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Index and buffer of the open message editor, if any.
    pub fn editing(&self) -> Option<(usize, &str)> {
        match &self.mode {
            Mode::Editing { index, buffer } => Some((*index, buffer.as_str())),
            Mode::Normal => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    Editing {
        index: usize,
        buffer: String,
    },
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    // Create a single persistent Terminal to preserve buffers across draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, view: &GridView) -> Result<()> {
    clamp_selection(state, view);
    if let Some(mut term) = state.terminal.take() {
        let res = term.draw(|f| ui(f, state, view)).map(|_| ());
        state.terminal = Some(term);
        res?;
    }
    Ok(())
}

pub fn input_event_stream() -> InputEventReceiver {
    EventStream::new()
}

pub async fn next_raw_event(input: &mut InputEventReceiver) -> Result<Event> {
    match input.next().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input stream closed")),
    }
}

fn clamp_selection(state: &mut UiState, view: &GridView) {
    state.selected = state.selected.min(view.tiles.len().saturating_sub(1));
}

/// Turns a raw terminal event into an intent, updating selection and editor
/// state along the way.
pub fn interpret_event(
    state: &mut UiState,
    view: &GridView,
    event: Event,
) -> Option<UserEvent> {
    let key = match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => key,
        Event::Resize(..) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(UserEvent::Quit);
    }
    clamp_selection(state, view);
    match &mut state.mode {
        Mode::Editing { index, buffer } => {
            let index = *index;
            match key.code {
                KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                KeyCode::Enter => commit_editor(state, view, index),
                KeyCode::Backspace => {
                    buffer.pop();
                    Some(UserEvent::Redraw)
                }
                KeyCode::Char(c) => {
                    buffer.push(c);
                    Some(UserEvent::Redraw)
                }
                _ => None,
            }
        }
        Mode::Normal => interpret_normal(state, view, key),
    }
}

fn interpret_normal(state: &mut UiState, view: &GridView, key: KeyEvent) -> Option<UserEvent> {
    let len = view.tiles.len();
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(UserEvent::Quit),
        KeyCode::Left | KeyCode::Char('h') => {
            state.selected = state.selected.saturating_sub(1);
            Some(UserEvent::Redraw)
        }
        KeyCode::Right | KeyCode::Char('l') => {
            if state.selected + 1 < len {
                state.selected += 1;
            }
            Some(UserEvent::Redraw)
        }
        KeyCode::Up | KeyCode::Char('k') => {
            state.selected = state.selected.saturating_sub(GRID_COLUMNS);
            Some(UserEvent::Redraw)
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if state.selected + GRID_COLUMNS < len {
                state.selected += GRID_COLUMNS;
            }
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('e') | KeyCode::Enter => {
            let card = view.tiles.get(state.selected)?;
            let editable = match card.state {
                TileState::Open => !card.lock_pending,
                // A held tile with a draft is in payment; its message is fixed.
                TileState::LockedByCurrentUser => matches!(card.mode, TileMode::Editable { .. }),
                TileState::LockedByOther | TileState::Purchased => false,
            };
            if !editable {
                return None;
            }
            state.mode = Mode::Editing {
                index: card.index,
                buffer: card.draft.clone(),
            };
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('p') => {
            let card = view.tiles.get(state.selected)?;
            Some(UserEvent::Purchase { index: card.index })
        }
        KeyCode::Char('x') => Some(UserEvent::DismissErrors),
        _ => None,
    }
}

fn commit_editor(state: &mut UiState, view: &GridView, index: usize) -> Option<UserEvent> {
    let Mode::Editing { buffer, .. } = &state.mode else {
        return None;
    };
    let Some(card) = view.tiles.get(index) else {
        state.mode = Mode::Normal;
        return Some(UserEvent::Redraw);
    };
    let event = match card.state {
        // Locking needs a message; keep the editor open until there is one.
        TileState::Open if buffer.is_empty() => return None,
        TileState::Open => UserEvent::RequestLock {
            index,
            message: buffer.clone(),
        },
        TileState::LockedByCurrentUser => UserEvent::EditDraft {
            index,
            message: buffer.clone(),
        },
        TileState::LockedByOther | TileState::Purchased => UserEvent::Redraw,
    };
    state.mode = Mode::Normal;
    Some(event)
}

fn ui(f: &mut Frame, state: &UiState, view: &GridView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(CELL_HEIGHT),
            Constraint::Length(3 + view.errors.len().min(5) as u16),
            Constraint::Length(3),
        ])
        .split(f.area());
    draw_top(f, chunks[0], view);
    draw_grid(f, chunks[1], state, view);
    draw_status(f, chunks[2], view);
    draw_help(f, chunks[3], state);
}

fn draw_top(f: &mut Frame, area: Rect, view: &GridView) {
    let text = format!("{}    {}", balance_line(view.balance), price_line(view.price));
    let widget = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Tile market"));
    f.render_widget(widget, area);
}

pub fn balance_line(balance: Option<f64>) -> String {
    match balance {
        Some(balance) => format!("Balance: {balance} deposited"),
        None => "Balance: -".to_string(),
    }
}

fn price_line(price: Option<f64>) -> String {
    match price {
        Some(price) => format!("Price: {price}"),
        None => "Price: -".to_string(),
    }
}

fn draw_grid(f: &mut Frame, area: Rect, state: &UiState, view: &GridView) {
    if view.tiles.is_empty() {
        let empty = Paragraph::new(Line::styled(
            "No tiles yet",
            Style::default().fg(Color::DarkGray),
        ))
        .block(Block::default().borders(Borders::ALL));
        f.render_widget(empty, area);
        return;
    }
    let visible_rows = usize::from((area.height / CELL_HEIGHT).max(1));
    let selected_row = state.selected / GRID_COLUMNS;
    let first_row = selected_row.saturating_sub(visible_rows - 1);
    let col_w = area.width / GRID_COLUMNS as u16;

    for (i, card) in view
        .tiles
        .iter()
        .enumerate()
        .skip(first_row * GRID_COLUMNS)
        .take(visible_rows * GRID_COLUMNS)
    {
        let row = (i / GRID_COLUMNS - first_row) as u16;
        let col = (i % GRID_COLUMNS) as u16;
        let rect = Rect::new(
            area.x + col * col_w,
            area.y + row * CELL_HEIGHT,
            col_w,
            CELL_HEIGHT.min(area.height.saturating_sub(row * CELL_HEIGHT)),
        );
        draw_cell(f, rect, state, card, i == state.selected);
    }
}

fn draw_cell(f: &mut Frame, rect: Rect, state: &UiState, card: &TileCard, selected: bool) {
    let inner_width = usize::from(rect.width.saturating_sub(2));
    let lines: Vec<Line> = cell_lines(state, card)
        .into_iter()
        .map(|(text, style)| Line::styled(truncate(&text, inner_width), style))
        .collect();
    let title = format!("#{} {}", card.index, card.state_label);
    let (border_style, title_style) = if selected {
        (
            Style::default().fg(Color::Yellow),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        (state_style(card.state), Style::default())
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(Span::styled(title, title_style));
    f.render_widget(&block, rect);
    let inner = block.inner(rect);
    f.render_widget(Paragraph::new(lines), inner);
}

fn state_style(state: TileState) -> Style {
    match state {
        TileState::Open => Style::default().fg(Color::Green),
        TileState::LockedByCurrentUser => Style::default().fg(Color::Cyan),
        TileState::LockedByOther => Style::default().fg(Color::Red),
        TileState::Purchased => Style::default().fg(Color::Magenta),
    }
}

fn cell_lines(state: &UiState, card: &TileCard) -> Vec<(String, Style)> {
    let plain = Style::default();
    let dim = Style::default().fg(Color::DarkGray);
    let mut lines = vec![(card.address.clone(), dim)];
    let editing = state
        .editing()
        .filter(|(index, _)| *index == card.index)
        .map(|(_, buffer)| buffer);

    match &card.mode {
        TileMode::Editable { lock_enabled } => {
            match editing {
                Some(buffer) => lines.push((
                    format!("> {buffer}_"),
                    Style::default().fg(Color::Yellow),
                )),
                None if card.draft.is_empty() => {
                    lines.push(("Type a message [e]".to_string(), dim))
                }
                None => lines.push((format!("Draft: {}", card.draft), plain)),
            }
            if card.lock_pending {
                lines.push(("Locking...".to_string(), dim));
            } else if card.state == TileState::Open && (*lock_enabled || editing.is_some()) {
                lines.push(("[Enter] lock".to_string(), plain));
            }
            if let Some(affordance) = card.affordance {
                lines.push((affordance.label().to_string(), affordance_style(affordance)));
            }
        }
        TileMode::Payment { .. } => {
            match editing {
                Some(buffer) => lines.push((
                    format!("> {buffer}_"),
                    Style::default().fg(Color::Yellow),
                )),
                None => lines.push((format!("Message: {}", card.draft), plain)),
            }
            if let Some(url) = &card.qr_url {
                lines.push((format!("Pay: {url}"), plain));
            }
            if let Some(countdown) = &card.countdown {
                lines.push((format!("Expires in {countdown}"), plain));
            }
            let purchase = match card.purchase_phase {
                Some(PurchasePhase::InFlight) => Some(("Purchasing...".to_string(), dim)),
                Some(PurchasePhase::Sent) => {
                    Some(("Purchase sent, confirming".to_string(), dim))
                }
                _ => card
                    .affordance
                    .map(|affordance| (affordance.label().to_string(), affordance_style(affordance))),
            };
            lines.extend(purchase);
        }
        TileMode::LockedByOther { .. } => {
            lines.push(("Someone is purchasing this tile".to_string(), plain));
            if let Some(countdown) = &card.countdown {
                lines.push((format!("Available in {countdown}"), dim));
            }
        }
        TileMode::Purchased { message, .. } => {
            lines.push((message.clone(), Style::default().add_modifier(Modifier::BOLD)));
            if let Some(countdown) = &card.countdown {
                lines.push((format!("Expires in {countdown}"), dim));
            }
        }
    }
    lines
}

fn affordance_style(affordance: PurchaseAffordance) -> Style {
    match affordance {
        PurchaseAffordance::Ready => Style::default().fg(Color::Green),
        PurchaseAffordance::MessageEmpty | PurchaseAffordance::InsufficientFunds => {
            Style::default().fg(Color::Red)
        }
    }
}

fn draw_status(f: &mut Frame, area: Rect, view: &GridView) {
    let mut lines = vec![Line::from(if view.status.trim().is_empty() {
        "Ready".to_string()
    } else {
        view.status.clone()
    })];
    for e in view.errors.iter().rev().take(5).rev() {
        lines.push(Line::styled(e.clone(), Style::default().fg(Color::Red)));
    }
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect, state: &UiState) {
    let text = match state.mode {
        Mode::Normal => {
            "←/→/↑/↓ select | e edit | p purchase | x clear errors | q/Esc quit"
        }
        Mode::Editing { .. } => "type message | Enter commit | Esc cancel",
    };
    let help = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

/// Cuts `text` to at most `width` terminal columns, marking the cut with `…`.
pub fn truncate(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}
