use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use termdoc_core::{Command, RenderImage, RenderOutput, SearchHighlights, ViewerState};
use termdoc_render::DocumentLibrary;
use termdoc_tty::{markup_lines, write_status_line, DrawParams, EventMapper, KittyRenderer, UiEvent};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "termdoc",
    version,
    about = "kitty-native PDF and EPUB viewer for the terminal"
)]
struct Args {
    /// 1-based page to open the document on
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Path to a .pdf or .epub file
    file: PathBuf,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "termdoc", "termdoc")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let provider = DocumentLibrary::new()?;
    let mut viewer = ViewerState::new();
    viewer
        .open_with(&provider, &args.file)
        .await
        .with_context(|| format!("failed to open {:?}", args.file))?;

    let mut notification = None;
    if let Some(page) = args.page {
        if let Err(err) = viewer.goto_page(&page.to_string()) {
            notification = Some(err.to_string());
        }
    }

    let _raw = RawModeGuard::new()?;
    let mut renderer = KittyRenderer::new(io::stdout());
    let mut mapper = EventMapper::new();
    let mut dirty = true;

    loop {
        if dirty {
            redraw(
                &mut renderer,
                &viewer,
                mapper.pending_input().as_deref(),
                notification.as_deref(),
            )?;
            dirty = false;
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let ui_event = mapper.map_event(event::read()?);

        let action = match ui_event {
            UiEvent::Command(command) => apply(&mut viewer, command, &mut notification),
            UiEvent::SearchSubmit { query } => {
                apply(&mut viewer, Command::Search { query }, &mut notification)
            }
            UiEvent::GotoSubmit { input } => {
                apply(&mut viewer, Command::GotoPage { input }, &mut notification)
            }
            UiEvent::BeginSearch
            | UiEvent::BeginGoto
            | UiEvent::SearchInputChanged { .. }
            | UiEvent::GotoInputChanged { .. }
            | UiEvent::SearchCancel
            | UiEvent::GotoCancel => {
                notification = None;
                LoopAction::ContinueRedraw
            }
            UiEvent::Quit => LoopAction::Quit,
            UiEvent::None => LoopAction::Continue,
        };

        match action {
            LoopAction::ContinueRedraw => dirty = true,
            LoopAction::Continue => {}
            LoopAction::Quit => break,
        }
    }

    renderer.clear_all()?;
    Ok(())
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

/// Every viewer error is non-fatal: it becomes a status-line notification
/// and the prior state stays on screen. Errors always force a redraw so the
/// notification surfaces, and because a no-match search clears the overlays.
fn apply(
    viewer: &mut ViewerState,
    command: Command,
    notification: &mut Option<String>,
) -> LoopAction {
    match viewer.apply(command) {
        Ok(redraw_needed) => {
            *notification = None;
            if redraw_needed {
                LoopAction::ContinueRedraw
            } else {
                LoopAction::Continue
            }
        }
        Err(err) => {
            tracing::info!(%err, "operation rejected");
            *notification = Some(err.to_string());
            LoopAction::ContinueRedraw
        }
    }
}

fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    viewer: &ViewerState,
    pending_input: Option<&str>,
    notification: Option<&str>,
) -> Result<()> {
    let window = terminal::window_size()?;
    let total_cols = u32::from(window.columns).max(1);
    let total_rows = u32::from(window.rows).max(1);
    let pixel_width = u32::from(window.width);
    let pixel_height = u32::from(window.height);

    // Fullscreen hands the status row to the content.
    let status_rows = if viewer.is_fullscreen() { 0 } else { 1 };
    let content_rows = total_rows.saturating_sub(status_rows).max(1);

    renderer.clear_all()?;

    match viewer.render_current()? {
        Some(RenderOutput::Page {
            mut image,
            highlights,
        }) => {
            apply_search_highlights(&mut image, &highlights);

            let margin_cols = total_cols.min(2);
            let margin_rows = content_rows.min(2);
            let available_cols = total_cols.saturating_sub(margin_cols).max(1);
            let available_rows = content_rows.saturating_sub(margin_rows).max(1);

            let (draw_cols, draw_rows) = fit_to_cells(
                &image,
                available_cols,
                available_rows,
                total_cols,
                total_rows,
                pixel_width,
                pixel_height,
            );
            let start_col = (total_cols.saturating_sub(draw_cols)) / 2;
            let start_row = (content_rows.saturating_sub(draw_rows)) / 2;

            {
                let writer = renderer.writer();
                crossterm::execute!(writer, cursor::MoveTo(start_col as u16, start_row as u16))?;
            }
            renderer.draw(&image, DrawParams::clamped(draw_cols, draw_rows))?;
        }
        Some(RenderOutput::Markup { fragment }) => {
            let text_width = total_cols.saturating_sub(4).max(10) as usize;
            let lines = markup_lines(&fragment, text_width);
            let writer = renderer.writer();
            for (row, line) in lines.iter().take(content_rows as usize).enumerate() {
                crossterm::execute!(
                    writer,
                    cursor::MoveTo(2, row as u16),
                    crossterm::style::Print(line)
                )?;
            }
        }
        None => {}
    }

    let status = status_text(viewer, pending_input, notification);
    if let Some(status) = status {
        if !viewer.is_fullscreen() || notification.is_some() || pending_input.is_some() {
            draw_status_line(renderer, &status, total_rows)?;
        }
    }

    Ok(())
}

fn status_text(
    viewer: &ViewerState,
    pending_input: Option<&str>,
    notification: Option<&str>,
) -> Option<String> {
    if let Some(notification) = notification {
        return Some(notification.to_string());
    }

    let document = viewer.document()?;
    let info = document.info();
    let name = info
        .metadata
        .title
        .clone()
        .or_else(|| {
            info.path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.to_string())
        })
        .unwrap_or_else(|| "<unknown>".to_string());

    let zoom_percent = viewer.zoom_scale() * 100.0;
    let mut status = format!(
        "{} | page {}/{} | {:.0}%",
        name,
        viewer.current_page() + 1,
        viewer.page_count(),
        zoom_percent
    );

    if let Some(summary) = viewer.search_summary() {
        status.push_str(&format!(
            " | /{} ({}/{})",
            summary.query,
            summary.current_index + 1,
            summary.total
        ));
    }

    if let Some(pending) = pending_input.filter(|s| !s.is_empty()) {
        status.push_str(" | ");
        status.push_str(pending);
    }

    Some(status)
}

fn draw_status_line(
    renderer: &mut KittyRenderer<io::Stdout>,
    status: &str,
    total_rows: u32,
) -> Result<()> {
    let status_row = total_rows.saturating_sub(1);
    let writer = renderer.writer();
    crossterm::execute!(
        writer,
        cursor::MoveTo(0, status_row as u16),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(writer, status)?;
    Ok(())
}

/// Chooses the cell area the bitmap occupies, preserving its aspect ratio.
/// Uses the terminal's pixel geometry when it reports one, otherwise falls
/// back to an aspect estimate over the cell grid.
fn fit_to_cells(
    image: &RenderImage,
    available_cols: u32,
    available_rows: u32,
    total_cols: u32,
    total_rows: u32,
    pixel_width: u32,
    pixel_height: u32,
) -> (u32, u32) {
    let mut draw_cols = available_cols.max(1);
    let mut draw_rows = available_rows.max(1);

    if image.width == 0 || image.height == 0 {
        return (draw_cols, draw_rows);
    }

    if pixel_width > 0 && pixel_height > 0 {
        let cell_width = pixel_width as f32 / total_cols as f32;
        let cell_height = pixel_height as f32 / total_rows as f32;
        if cell_width > 0.0 && cell_height > 0.0 {
            let cols = (image.width as f32 / cell_width).round().max(1.0);
            let rows = (image.height as f32 / cell_height).round().max(1.0);
            draw_cols = (cols as u32).min(available_cols);
            draw_rows = (rows as u32).min(available_rows);
        }
    } else {
        let ratio = image.width as f32 / image.height as f32;
        if ratio.is_finite() && ratio > 0.0 {
            let mut cols = available_cols as f32;
            let mut rows = (cols / ratio / 2.0).round().max(1.0);
            if rows > available_rows as f32 {
                rows = available_rows as f32;
                cols = (rows * ratio * 2.0).round().max(1.0);
            }
            draw_cols = (cols as u32).min(available_cols);
            draw_rows = (rows as u32).min(available_rows);
        }
    }

    (draw_cols.max(1), draw_rows.max(1))
}

#[derive(Clone, Copy)]
struct PixelRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

/// Blends highlight rectangles over the rendered page, with the current
/// match drawn stronger than the rest.
fn apply_search_highlights(image: &mut RenderImage, highlights: &SearchHighlights) {
    if image.width == 0 || image.height == 0 || highlights.is_empty() {
        return;
    }

    for rect in &highlights.others {
        if let Some(rect) = to_pixel_rect(*rect, image.width, image.height) {
            fill_rect(image, rect, [255, 200, 0], 0.2);
        }
    }
    for rect in &highlights.current {
        if let Some(rect) = to_pixel_rect(*rect, image.width, image.height) {
            fill_rect(image, rect, [255, 235, 0], 0.35);
        }
    }
}

fn to_pixel_rect(
    rect: termdoc_core::NormalizedRect,
    width: u32,
    height: u32,
) -> Option<PixelRect> {
    let width_f = width as f32;
    let height_f = height as f32;

    let x0 = ((rect.left * width_f).floor() as i64).clamp(0, width as i64) as u32;
    let x1 = ((rect.right * width_f).ceil() as i64).clamp(0, width as i64) as u32;
    let y0 = ((rect.top * height_f).floor() as i64).clamp(0, height as i64) as u32;
    let y1 = ((rect.bottom * height_f).ceil() as i64).clamp(0, height as i64) as u32;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(PixelRect { x0, y0, x1, y1 })
}

fn fill_rect(image: &mut RenderImage, rect: PixelRect, color: [u8; 3], alpha: f32) {
    let width = image.width as usize;
    let x1 = rect.x1.min(image.width);
    let y1 = rect.y1.min(image.height);

    for y in rect.y0..y1 {
        let row_start = (y as usize) * width * 4;
        for x in rect.x0..x1 {
            let idx = row_start + (x as usize) * 4;
            blend_pixel(&mut image.pixels[idx..idx + 4], color, alpha);
        }
    }
}

fn blend_pixel(pixel: &mut [u8], color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for channel in 0..3 {
        pixel[channel] = ((pixel[channel] as f32 * inv) + (color[channel] as f32 * alpha))
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "termdoc.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // File only: stdout belongs to the kitty protocol stream.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
