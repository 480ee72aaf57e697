//! Terminal adapter for the viewer: kitty graphics output for page bitmaps,
//! plain-text rendering of markup fragments, and the modal key/mouse to
//! command mapping.

use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind},
    terminal::{Clear, ClearType},
};
use png::{BitDepth, ColorType, Encoder};
use termdoc_core::{Command, MarkupFragment, RenderImage};

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits the image as PNG over the kitty graphics protocol and
    /// places it across the requested cell area.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        tracing::trace!(
            width = image.width,
            height = image.height,
            payload = encoded.len(),
            "transmitting frame"
        );
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    if more { 1 } else { 0 }
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", if more { 1 } else { 0 })?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// Flattens a markup fragment into display lines wrapped to `width` columns.
/// Reflowable content has no scalable layout primitive, so this is the whole
/// of its terminal presentation.
pub fn markup_lines(fragment: &MarkupFragment, width: usize) -> Vec<String> {
    let text = flatten_markup(&fragment.html);
    let width = width.max(10);
    let mut lines: Vec<String> = Vec::new();
    for paragraph in text.split('\n') {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            if lines.last().map(|line| !line.is_empty()).unwrap_or(false) {
                lines.push(String::new());
            }
            continue;
        }
        for line in textwrap::wrap(paragraph, width) {
            lines.push(line.into_owned());
        }
    }
    while lines.last().map(String::is_empty).unwrap_or(false) {
        lines.pop();
    }
    lines
}

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "table",
    "section", "article", "blockquote", "hr",
];
const SKIP_TAGS: &[&str] = &["head", "style", "script", "title"];

fn flatten_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut tag = String::new();
    let mut in_tag = false;
    let mut skip_until: Option<String> = None;

    for ch in html.chars() {
        if in_tag {
            if ch != '>' {
                tag.push(ch);
                continue;
            }
            in_tag = false;
            let raw = tag.trim();
            let closing = raw.starts_with('/');
            let name: String = raw
                .trim_start_matches('/')
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase();
            if let Some(waiting) = &skip_until {
                if closing && name == *waiting {
                    skip_until = None;
                }
            } else if !closing && !raw.ends_with('/') && SKIP_TAGS.contains(&name.as_str()) {
                skip_until = Some(name);
            } else if BLOCK_TAGS.contains(&name.as_str()) {
                out.push('\n');
            }
            continue;
        }
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            _ if skip_until.is_some() => {}
            _ => out.push(ch),
        }
    }

    decode_entities(&out)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    BeginSearch,
    SearchInputChanged { query: String },
    SearchSubmit { query: String },
    SearchCancel,
    BeginGoto,
    GotoInputChanged { input: String },
    GotoSubmit { input: String },
    GotoCancel,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Search,
    Goto,
}

/// Translates crossterm events into viewer commands. Modal: `/` collects a
/// search query, `:` collects a goto-page string. The goto buffer is passed
/// to the core verbatim, including non-numeric text, so rejection happens in
/// one place.
#[derive(Debug, Default)]
pub struct EventMapper {
    mode: InputMode,
    buffer: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.mode = mode;
            self.buffer.clear();
        }
    }

    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::Normal => None,
            InputMode::Search => Some(format!("/{}", self.buffer)),
            InputMode::Goto => Some(format!(":{}", self.buffer)),
        }
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::Search => self.map_event_line(event, LineMode::Search),
            InputMode::Goto => self.map_event_line(event, LineMode::Goto),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char('j'), KeyModifiers::NONE)
                | (KeyCode::Down, KeyModifiers::NONE)
                | (KeyCode::PageDown, _) => UiEvent::Command(Command::NextPage),
                (KeyCode::Char('k'), KeyModifiers::NONE)
                | (KeyCode::Up, KeyModifiers::NONE)
                | (KeyCode::PageUp, _) => UiEvent::Command(Command::PrevPage),
                (KeyCode::Char('+'), _) | (KeyCode::Char('='), _) => {
                    UiEvent::Command(Command::ZoomIn)
                }
                (KeyCode::Char('-'), _) => UiEvent::Command(Command::ZoomOut),
                (KeyCode::Char('/'), KeyModifiers::NONE) => {
                    self.set_mode(InputMode::Search);
                    UiEvent::BeginSearch
                }
                (KeyCode::Char(':'), _) | (KeyCode::Char('g'), KeyModifiers::NONE) => {
                    self.set_mode(InputMode::Goto);
                    UiEvent::BeginGoto
                }
                (KeyCode::Char('n'), KeyModifiers::NONE) => UiEvent::Command(Command::NextMatch),
                (KeyCode::Char('N'), modifiers)
                    if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT =>
                {
                    UiEvent::Command(Command::PrevMatch)
                }
                (KeyCode::Char('f'), KeyModifiers::NONE) => {
                    UiEvent::Command(Command::ToggleFullscreen)
                }
                (KeyCode::Esc, _) => UiEvent::Command(Command::ExitFullscreen),
                (KeyCode::Char('q'), _) => UiEvent::Quit,
                _ => UiEvent::None,
            },
            Event::Mouse(MouseEvent {
                kind, modifiers, ..
            }) => match kind {
                MouseEventKind::ScrollUp if modifiers.contains(KeyModifiers::CONTROL) => {
                    UiEvent::Command(Command::ZoomIn)
                }
                MouseEventKind::ScrollDown if modifiers.contains(KeyModifiers::CONTROL) => {
                    UiEvent::Command(Command::ZoomOut)
                }
                MouseEventKind::ScrollUp => UiEvent::Command(Command::PrevPage),
                MouseEventKind::ScrollDown => UiEvent::Command(Command::NextPage),
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn map_event_line(&mut self, event: Event, line_mode: LineMode) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };
        match (code, modifiers) {
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                match line_mode {
                    LineMode::Search => UiEvent::SearchCancel,
                    LineMode::Goto => UiEvent::GotoCancel,
                }
            }
            (KeyCode::Enter, _) => {
                let submitted = self.buffer.clone();
                self.set_mode(InputMode::Normal);
                match line_mode {
                    LineMode::Search => UiEvent::SearchSubmit { query: submitted },
                    LineMode::Goto => UiEvent::GotoSubmit { input: submitted },
                }
            }
            (KeyCode::Backspace, _) => {
                self.buffer.pop();
                self.changed(line_mode)
            }
            (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                self.buffer.push(c);
                self.changed(line_mode)
            }
            _ => UiEvent::None,
        }
    }

    fn changed(&self, line_mode: LineMode) -> UiEvent {
        match line_mode {
            LineMode::Search => UiEvent::SearchInputChanged {
                query: self.buffer.clone(),
            },
            LineMode::Goto => UiEvent::GotoInputChanged {
                input: self.buffer.clone(),
            },
        }
    }
}

#[derive(Clone, Copy)]
enum LineMode {
    Search,
    Goto,
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}
