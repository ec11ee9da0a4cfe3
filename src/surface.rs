//! Display surface the fake console appends to.
//!
//! Blocks are append-only: each console call renders once and is never
//! rewritten. Expand/collapse is presentation state kept beside the
//! markup and applied when the surface is rendered. Making arrows
//! interactive happens in a debounced wiring pass so a burst of log calls
//! costs one pass.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

/// Delay between the last append and the wiring pass
pub const WIRING_DELAY: Duration = Duration::from_millis(100);

const ARROW: &str = r#"<span class="collapsible-arrow">+</span>"#;
const OPEN_ARROW: &str = r#"<span class="collapsible-arrow">-</span>"#;
const BLOCK: &str = r#"<div class="collapsible">"#;
const OPEN_BLOCK: &str = r#"<div class="collapsible open">"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

impl ConsoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
        }
    }

    /// Map a console method name; anything unknown logs at `Log`.
    pub fn from_method(method: &str) -> Self {
        match method {
            "warn" => ConsoleLevel::Warn,
            "error" => ConsoleLevel::Error,
            _ => ConsoleLevel::Log,
        }
    }
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBlock {
    pub level: ConsoleLevel,
    /// Formatted arguments joined by tabs
    pub markup: String,
}

impl OutputBlock {
    pub fn to_html(&self) -> String {
        format!(r#"<div class="console-{}">{}</div>"#, self.level, self.markup)
    }
}

/// Timer that is pushed back every time it is re-armed.
#[derive(Debug, Clone, Default)]
pub struct Debounce {
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + WIRING_DELAY);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` once, when the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutputSurface {
    blocks: Vec<OutputBlock>,
    wiring: Debounce,
    /// Arrows made interactive so far, counted in document order
    wired_arrows: usize,
    open: BTreeSet<usize>,
}

impl OutputSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one console call. `parts` are the already formatted arguments.
    pub fn append(&mut self, level: ConsoleLevel, parts: &[String], now: Instant) {
        self.blocks.push(OutputBlock {
            level,
            markup: parts.join("\t"),
        });
        self.wiring.arm(now);
    }

    pub fn blocks(&self) -> &[OutputBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// When the pending wiring pass is due, if any
    pub fn wiring_deadline(&self) -> Option<Instant> {
        self.wiring.deadline()
    }

    /// Run the wiring pass if its delay has elapsed. Returns whether it ran.
    pub fn wire_pending(&mut self, now: Instant) -> bool {
        if !self.wiring.fire(now) {
            return false;
        }
        self.wired_arrows = self.arrow_count();
        tracing::trace!(arrows = self.wired_arrows, "wired collapsible arrows");
        true
    }

    /// Total arrows in the rendered blocks
    pub fn arrow_count(&self) -> usize {
        self.blocks.iter().map(|block| block.markup.matches(ARROW).count()).sum()
    }

    pub fn wired_arrows(&self) -> usize {
        self.wired_arrows
    }

    /// Toggle the `arrow`-th collapsible (document order). Arrows not yet
    /// wired ignore clicks. Returns the new open state.
    pub fn toggle(&mut self, arrow: usize) -> Option<bool> {
        if arrow >= self.wired_arrows {
            return None;
        }
        if self.open.remove(&arrow) {
            Some(false)
        } else {
            self.open.insert(arrow);
            Some(true)
        }
    }

    pub fn is_open(&self, arrow: usize) -> bool {
        self.open.contains(&arrow)
    }

    /// Markup of all blocks with expand/collapse state applied.
    pub fn render(&self) -> String {
        let html: String = self.blocks.iter().map(OutputBlock::to_html).collect();
        if self.open.is_empty() {
            return html;
        }
        apply_open_state(&html, &self.open)
    }

    /// Drop all output, as a page reload would.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Every collapsible block opens with `<div class="collapsible">` and its
/// arrow is the first arrow after that; both appear in the same order.
fn apply_open_state(html: &str, open: &BTreeSet<usize>) -> String {
    let mut out = String::with_capacity(html.len() + open.len() * 8);
    let mut rest = html;
    let mut index = 0;

    while let Some(at) = rest.find(BLOCK) {
        out.push_str(&rest[..at]);
        rest = &rest[at + BLOCK.len()..];
        if !open.contains(&index) {
            out.push_str(BLOCK);
            index += 1;
            continue;
        }
        out.push_str(OPEN_BLOCK);
        if let Some(arrow_at) = rest.find(ARROW) {
            // the arrow belongs to this block unless another block starts first
            let nested_at = rest.find(BLOCK).unwrap_or(usize::MAX);
            if arrow_at < nested_at {
                out.push_str(&rest[..arrow_at]);
                out.push_str(OPEN_ARROW);
                rest = &rest[arrow_at + ARROW.len()..];
            }
        }
        index += 1;
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collapsible(body: &str) -> String {
        format!(r#"{}{}{}</div>"#, BLOCK, ARROW, body)
    }

    #[test]
    fn test_append_joins_arguments() {
        let mut surface = OutputSurface::new();
        let now = Instant::now();

        surface.append(ConsoleLevel::Log, &["a".to_string(), "b".to_string()], now);
        surface.append(ConsoleLevel::Warn, &["careful".to_string()], now);

        assert_eq!(
            surface.render(),
            "<div class=\"console-log\">a\tb</div><div class=\"console-warn\">careful</div>"
        );
        assert_eq!(surface.blocks()[1].level, ConsoleLevel::Warn);
    }

    #[test]
    fn test_wiring_is_debounced() {
        let mut surface = OutputSurface::new();
        let start = Instant::now();

        surface.append(ConsoleLevel::Log, &[collapsible("one")], start);
        surface.append(ConsoleLevel::Log, &[collapsible("two")], start + Duration::from_millis(60));

        // re-armed by the second append
        assert!(!surface.wire_pending(start + Duration::from_millis(120)));
        assert_eq!(surface.toggle(0), None);

        assert!(surface.wire_pending(start + Duration::from_millis(160)));
        assert_eq!(surface.wired_arrows(), 2);
        assert!(!surface.wire_pending(start + Duration::from_millis(500)));
    }

    #[test]
    fn test_toggle_changes_presentation_only() {
        let mut surface = OutputSurface::new();
        let start = Instant::now();
        let nested = collapsible(&collapsible("inner"));
        surface.append(ConsoleLevel::Log, &[nested.clone()], start);
        surface.wire_pending(start + WIRING_DELAY);

        assert_eq!(surface.toggle(1), Some(true));
        let rendered = surface.render();
        assert_eq!(
            rendered,
            format!(
                r#"<div class="console-log">{}{}{}{}inner</div></div></div>"#,
                BLOCK, ARROW, OPEN_BLOCK, OPEN_ARROW
            )
        );
        assert_eq!(surface.blocks()[0].markup, nested);

        assert_eq!(surface.toggle(1), Some(false));
        assert_eq!(surface.render(), format!(r#"<div class="console-log">{}</div>"#, nested));
    }

    #[test]
    fn test_later_blocks_need_another_wiring_pass() {
        let mut surface = OutputSurface::new();
        let start = Instant::now();
        surface.append(ConsoleLevel::Log, &[collapsible("first")], start);
        surface.wire_pending(start + WIRING_DELAY);

        let later = start + Duration::from_secs(1);
        surface.append(ConsoleLevel::Error, &[collapsible("second")], later);

        assert_eq!(surface.toggle(1), None);
        assert_eq!(surface.wiring_deadline(), Some(later + WIRING_DELAY));
        surface.wire_pending(later + WIRING_DELAY);
        assert_eq!(surface.toggle(1), Some(true));
        assert!(surface.is_open(1));
    }

    #[test]
    fn test_level_names() {
        assert_eq!(ConsoleLevel::from_method("warn"), ConsoleLevel::Warn);
        assert_eq!(ConsoleLevel::from_method("error"), ConsoleLevel::Error);
        assert_eq!(ConsoleLevel::from_method("info"), ConsoleLevel::Log);
        assert_eq!(ConsoleLevel::Error.to_string(), "error");
    }
}
