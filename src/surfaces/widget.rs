//! In-page widget surface: one status line per change

use std::io::Write;

use crate::{client::TimerView, error::SurfaceError, utils::format_countdown};

/// Text rendering of the widget
pub fn widget_line(view: &TimerView) -> String {
    if view.completed {
        return format!("[done] {} - time for a break", label(view));
    }
    if view.task_title.is_empty() && view.subtask_title.is_empty() && view.time_left_ms == 0 {
        return "[idle] no focus timer".to_string();
    }
    let marker = if view.is_running { "[run] " } else { "[hold]" };
    format!("{} {} {}", marker, format_countdown(view.time_left_ms), label(view))
}

fn label(view: &TimerView) -> String {
    match (view.task_title.is_empty(), view.subtask_title.is_empty()) {
        (false, false) => format!("{} / {}", view.task_title, view.subtask_title),
        (false, true) => view.task_title.clone(),
        (true, false) => view.subtask_title.clone(),
        (true, true) => String::new(),
    }
}

/// Widget that writes a line whenever the visible text changes
pub struct WidgetSurface {
    out: Box<dyn Write + Send>,
    last_line: Option<String>,
}

impl WidgetSurface {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out, last_line: None }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl super::Surface for WidgetSurface {
    fn name(&self) -> &'static str {
        "widget"
    }

    fn render(&mut self, view: &TimerView) -> Result<(), SurfaceError> {
        let line = widget_line(view);
        if self.last_line.as_deref() == Some(line.as_str()) {
            return Ok(());
        }
        writeln!(self.out, "{}", line)
            .and_then(|_| self.out.flush())
            .map_err(|e| SurfaceError::Media(format!("widget write failed: {}", e)))?;
        self.last_line = Some(line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surfaces::Surface;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn view(ms: u64, running: bool) -> TimerView {
        TimerView {
            time_left_ms: ms,
            is_running: running,
            task_title: "Write report".into(),
            subtask_title: "Outline".into(),
            completed: false,
        }
    }

    #[test]
    fn lines_reflect_state() {
        assert_eq!(widget_line(&TimerView::default()), "[idle] no focus timer");
        assert_eq!(
            widget_line(&view(90_000, true)),
            "[run]  01:30 Write report / Outline"
        );
        assert_eq!(
            widget_line(&view(90_000, false)),
            "[hold] 01:30 Write report / Outline"
        );
        let done = TimerView {
            completed: true,
            ..view(0, false)
        };
        assert_eq!(widget_line(&done), "[done] Write report / Outline - time for a break");
    }

    #[test]
    fn only_changes_are_written() {
        let buf = SharedBuf::default();
        let mut widget = WidgetSurface::new(Box::new(buf.clone()));
        widget.render(&view(90_000, true)).unwrap();
        widget.render(&view(89_950, true)).unwrap();
        widget.render(&view(89_000, true)).unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
