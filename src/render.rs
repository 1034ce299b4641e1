//! Display sinks for streamed explanations.
//!
//! A [`DisplaySink`] owns displays that are created once and then replaced in place with
//! each new version of the explanation.  [`TerminalDisplay`] redraws on a terminal, and
//! [`CapturedDisplay`] records every update in memory.

use std::io::{self, Stderr, Stdout, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossterm::terminal::{self, ClearType};
use crossterm::{cursor, queue};
use unicode_width::UnicodeWidthChar;

use crate::transform::COSMETIC_MARKERS;

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for dim text (used for informational messages).
const ANSI_DIM: &str = "\x1b[2m";

/// Width assumed when the terminal cannot be queried.
const FALLBACK_WIDTH: usize = 80;

/// Distance between tab stops.
const TAB_WIDTH: usize = 8;

/// Identity of one display created by a [`DisplaySink`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DisplayHandle(u64);

impl DisplayHandle {
    /// Creates a handle with the given id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The handle's id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A target that shows markdown and replaces it in place.
pub trait DisplaySink: Send {
    /// Create a new display showing `initial` and return its handle.
    fn create_display(&mut self, initial: &str) -> DisplayHandle;

    /// Replace what the display identified by `handle` shows with `content`.
    fn update_display(&mut self, handle: DisplayHandle, content: &str);

    /// Called once after the last update of a display that completed normally.
    fn finish_display(&mut self, handle: DisplayHandle) {
        _ = handle;
    }

    /// Returns true if the explanation feeding this sink should stop.
    fn should_interrupt(&self) -> bool {
        false
    }
}

/// How a [`TerminalDisplay`] brings the screen up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Move the cursor back over text that changed and redraw it.
    Rewrite { width: Option<u16> },
    /// Never move the cursor; hold back text that may still change.
    Append,
}

/// Terminal display that updates the explanation in place.
///
/// Updates that only add text are written as-is.  When an update changes text already on
/// screen, which happens when a code fence is removed once its last backtick arrives, the
/// cursor is moved back to where the old and new text diverge, the rest of the screen is
/// cleared, and the new tail is written.
///
/// Output that is not a terminal cannot be rewritten, so in that case the display holds
/// back any trailing text that could still turn into a removed marker and writes it once it
/// is settled or the display finishes.
pub struct TerminalDisplay<W: Write + Send = Stdout> {
    out: W,
    err: Stderr,
    mode: Mode,
    use_color: bool,
    next_id: u64,
    active: Option<DisplayHandle>,
    shown: String,
    latest: String,
    interrupted: Option<Arc<AtomicBool>>,
}

impl TerminalDisplay<Stdout> {
    /// Creates a display on stdout, rewriting in place if stdout is a terminal.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a display on stdout with the specified color setting.
    ///
    /// Disabling color also disables in-place rewriting.
    pub fn with_color(use_color: bool) -> Self {
        let rewrite = use_color && io::IsTerminal::is_terminal(&io::stdout());
        let mode = if rewrite {
            Mode::Rewrite { width: None }
        } else {
            Mode::Append
        };
        Self::build(io::stdout(), mode, use_color)
    }
}

impl Default for TerminalDisplay<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> TerminalDisplay<W> {
    /// Creates a display that rewrites in place on `out`, assuming lines wrap at `width`.
    pub fn rewriting(out: W, width: u16) -> Self {
        Self::build(
            out,
            Mode::Rewrite {
                width: Some(width),
            },
            true,
        )
    }

    /// Creates a display that only appends to `out`.
    pub fn appending(out: W) -> Self {
        Self::build(out, Mode::Append, false)
    }

    fn build(out: W, mode: Mode, use_color: bool) -> Self {
        Self {
            out,
            err: io::stderr(),
            mode,
            use_color,
            next_id: 0,
            active: None,
            shown: String::new(),
            latest: String::new(),
            interrupted: None,
        }
    }

    /// Attaches an interrupt flag to the display.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(interrupted);
        self
    }

    /// Returns the writer the display draws on.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Print an error message on stderr.
    pub fn print_error(&mut self, error: &str) {
        let _ = if self.use_color {
            writeln!(self.err, "\n{ANSI_RED}Error: {error}{ANSI_RESET}")
        } else {
            writeln!(self.err, "\nError: {error}")
        };
    }

    /// Print an informational message on stderr.
    pub fn print_info(&mut self, info: &str) {
        let _ = if self.use_color {
            writeln!(self.err, "{ANSI_DIM}{info}{ANSI_RESET}")
        } else {
            writeln!(self.err, "{info}")
        };
    }

    /// Note on stderr that the explanation was interrupted.
    pub fn print_interrupted(&mut self) {
        let _ = writeln!(self.err, "\n[interrupted]");
    }

    fn width(&self) -> usize {
        let width = match self.mode {
            Mode::Rewrite { width: Some(width) } => Some(width),
            _ => terminal::size().ok().map(|(width, _)| width),
        };
        width
            .map(usize::from)
            .filter(|width| *width > 0)
            .unwrap_or(FALLBACK_WIDTH)
    }

    fn rewrite(&mut self, content: &str) -> io::Result<()> {
        let prefix = common_prefix(&self.shown, content);
        if prefix < self.shown.len() {
            let width = self.width();
            let (end_row, _) = cursor_position(&self.shown, width);
            let (row, col) = cursor_position(&self.shown[..prefix], width);
            let (row, col) = if col >= width { (row + 1, 0) } else { (row, col) };
            let up = end_row.saturating_sub(row);
            if up > 0 {
                queue!(self.out, cursor::MoveUp(up as u16))?;
            }
            queue!(
                self.out,
                cursor::MoveToColumn(col as u16),
                terminal::Clear(ClearType::FromCursorDown)
            )?;
        }
        self.out.write_all(content[prefix..].as_bytes())?;
        self.out.flush()?;
        self.shown.clear();
        self.shown.push_str(content);
        Ok(())
    }

    fn append(&mut self, content: &str) -> io::Result<()> {
        self.latest.clear();
        self.latest.push_str(content);
        let settled = content.len() - unsettled_suffix(content);
        let prefix = common_prefix(&self.shown, content);
        if prefix < self.shown.len() {
            // Text already written changed; it cannot be taken back.
            tracing::debug!(
                written = self.shown.len(),
                kept = prefix,
                "display diverged from written output"
            );
            self.shown.truncate(prefix);
        }
        if settled > self.shown.len() {
            self.out
                .write_all(content[self.shown.len()..settled].as_bytes())?;
            self.out.flush()?;
            self.shown.push_str(&content[self.shown.len()..settled]);
        }
        Ok(())
    }
}

impl<W: Write + Send> DisplaySink for TerminalDisplay<W> {
    fn create_display(&mut self, initial: &str) -> DisplayHandle {
        let handle = DisplayHandle::new(self.next_id);
        self.next_id += 1;
        if self.active.is_some() && !self.shown.ends_with('\n') && !self.shown.is_empty() {
            let _ = writeln!(self.out);
        }
        self.active = Some(handle);
        self.shown.clear();
        self.latest.clear();
        self.update_display(handle, initial);
        handle
    }

    fn update_display(&mut self, handle: DisplayHandle, content: &str) {
        if self.active != Some(handle) {
            tracing::debug!(handle = handle.id(), "update for an inactive display ignored");
            return;
        }
        let result = match self.mode {
            Mode::Rewrite { .. } => self.rewrite(content),
            Mode::Append => self.append(content),
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "failed to update display");
        }
    }

    fn finish_display(&mut self, handle: DisplayHandle) {
        if self.active != Some(handle) {
            return;
        }
        self.active = None;
        if self.mode == Mode::Append {
            let latest = std::mem::take(&mut self.latest);
            let _ = self.append(&latest);
            let written = self.shown.len();
            let _ = self.out.write_all(latest[written..].as_bytes());
        }
        let _ = self.out.write_all(b"\n");
        let _ = self.out.flush();
        self.shown.clear();
    }

    fn should_interrupt(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Length in bytes of the longest common prefix of `a` and `b`, on a char boundary.
fn common_prefix(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, x), y)| x != y)
        .map(|((idx, _), _)| idx)
        .unwrap_or_else(|| a.len().min(b.len()))
}

/// Where the cursor ends up after writing `text` from column zero, as (row, column).
///
/// Columns are measured in display cells: wide characters take two, tabs advance to the
/// next tab stop, and zero-width characters take none.  A column equal to `width` means
/// the line is full and the next character wraps.
fn cursor_position(text: &str, width: usize) -> (usize, usize) {
    let mut row = 0;
    let mut col = 0;
    for ch in text.chars() {
        if ch == '\n' {
            row += 1;
            col = 0;
            continue;
        }
        if ch == '\t' {
            // Tabs stop at the right margin instead of wrapping.
            col = (col + TAB_WIDTH - col % TAB_WIDTH).min(width.max(col));
            continue;
        }
        let cells = UnicodeWidthChar::width(ch).unwrap_or(0);
        if cells == 0 {
            continue;
        }
        if col + cells > width {
            row += 1;
            col = 0;
        }
        col += cells;
    }
    (row, col)
}

/// Length of the trailing text that could still become part of a removed marker.
fn unsettled_suffix(content: &str) -> usize {
    let backticks = content.len() - content.trim_end_matches('`').len();
    let partial = COSMETIC_MARKERS
        .iter()
        .flat_map(|marker| (1..marker.len()).map(move |n| &marker[..n]))
        .filter(|partial| content.ends_with(partial))
        .map(|partial| partial.len())
        .max()
        .unwrap_or(0);
    backticks.max(partial)
}

/// A sink that records every display and update in memory.
#[derive(Debug, Default)]
pub struct CapturedDisplay {
    created: Vec<String>,
    updates: Vec<(DisplayHandle, String)>,
    finished: Vec<DisplayHandle>,
    interrupt_after: Option<usize>,
}

impl CapturedDisplay {
    /// Creates an empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the explainer to stop once `updates` updates have been recorded.
    pub fn interrupt_after(mut self, updates: usize) -> Self {
        self.interrupt_after = Some(updates);
        self
    }

    /// Initial content of every display created, in order.
    pub fn created(&self) -> &[String] {
        &self.created
    }

    /// Every update, in order.
    pub fn updates(&self) -> &[(DisplayHandle, String)] {
        &self.updates
    }

    /// The content of every update, in order.
    pub fn contents(&self) -> Vec<&str> {
        self.updates.iter().map(|(_, c)| c.as_str()).collect()
    }

    /// What the most recent display currently shows.
    pub fn current(&self) -> Option<&str> {
        match self.updates.last() {
            Some((_, content)) => Some(content),
            None => self.created.last().map(String::as_str),
        }
    }

    /// Displays that were finished.
    pub fn finished(&self) -> &[DisplayHandle] {
        &self.finished
    }
}

impl DisplaySink for CapturedDisplay {
    fn create_display(&mut self, initial: &str) -> DisplayHandle {
        let handle = DisplayHandle::new(self.created.len() as u64);
        self.created.push(initial.to_string());
        handle
    }

    fn update_display(&mut self, handle: DisplayHandle, content: &str) {
        self.updates.push((handle, content.to_string()));
    }

    fn finish_display(&mut self, handle: DisplayHandle) {
        self.finished.push(handle);
    }

    fn should_interrupt(&self) -> bool {
        self.interrupt_after
            .is_some_and(|limit| self.updates.len() >= limit)
    }
}
