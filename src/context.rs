use std::sync::Arc;

use cdn::CdnClient;
use session::SessionPort;
use stores::AccountSettingsStore;
use types::{DownloadOptions, LogSink, UiSink};

/// Everything a download run needs, injected explicitly. There are no
/// process-wide statics; shared mutable state (account settings, installed
/// maps) travels through here behind its own locks.
#[derive(Clone)]
pub struct CoreContext {
    pub options: DownloadOptions,
    pub session: Arc<dyn SessionPort>,
    pub cdn: Arc<dyn CdnClient>,
    pub ui: Arc<dyn UiSink>,
    pub settings: Arc<AccountSettingsStore>,
}

impl CoreContext {
    pub fn new(
        options: DownloadOptions,
        session: Arc<dyn SessionPort>,
        cdn: Arc<dyn CdnClient>,
        settings: Arc<AccountSettingsStore>,
    ) -> Self {
        Self {
            options,
            session,
            cdn,
            ui: Arc::new(LogSink),
            settings,
        }
    }

    pub fn with_ui(mut self, ui: Arc<dyn UiSink>) -> Self {
        self.ui = ui;
        self
    }
}
