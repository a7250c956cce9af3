use log::{debug, error, info};

use crate::ProgressEvent;

/// Output port for diagnostics and progress. The engine never prints
/// directly; the surrounding application decides how lines are rendered.
pub trait UiSink: Send + Sync {
    fn write_line(&self, msg: &str);
    fn write_error(&self, msg: &str);
    fn write_debug(&self, category: &str, msg: &str);
    fn update_progress(&self, state: &str, percent: f64);
    fn on_progress_event(&self, _event: &ProgressEvent) {}
}

/// Default sink that forwards everything to the `log` facade.
pub struct LogSink;

impl UiSink for LogSink {
    fn write_line(&self, msg: &str) {
        info!("{msg}");
    }

    fn write_error(&self, msg: &str) {
        error!("{msg}");
    }

    fn write_debug(&self, category: &str, msg: &str) {
        debug!("[{category}] {msg}");
    }

    fn update_progress(&self, state: &str, percent: f64) {
        debug!("{state}: {percent:.1}%");
    }
}
