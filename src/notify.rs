//! In-page toast announcements for speed changes.

use std::sync::Arc;

use tracing::warn;

use adrush_core_types::Notification;
use page_adapter::PagePort;

/// Shows speedup/restore toasts. Presentation failures are logged and
/// swallowed; a missing toast must never stall the control loop.
pub struct NotificationPresenter {
    page: Arc<dyn PagePort>,
}

impl NotificationPresenter {
    pub fn new(page: Arc<dyn PagePort>) -> Self {
        Self { page }
    }

    pub async fn speedup(&self, ad_speed: f64) {
        self.show(Notification::speedup(ad_speed)).await;
    }

    pub async fn restore(&self) {
        self.show(Notification::restore()).await;
    }

    async fn show(&self, note: Notification) {
        if let Err(err) = self.page.show_notification(&note).await {
            warn!(target: "notify", ?err, message = %note.message, "failed to show toast");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adrush_core_types::NotificationKind;
    use page_adapter::SimulatedPage;

    #[tokio::test]
    async fn presents_both_kinds() {
        let page = Arc::new(SimulatedPage::new());
        let presenter = NotificationPresenter::new(page.clone());

        presenter.speedup(16.0).await;
        presenter.restore().await;

        let notes = page.notifications();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].kind, NotificationKind::Speedup);
        assert!(notes[0].message.contains("16"));
        assert_eq!(notes[1].kind, NotificationKind::Restore);
    }

    #[tokio::test]
    async fn page_failure_is_swallowed() {
        let page = Arc::new(SimulatedPage::new());
        page.set_broken(true);
        let presenter = NotificationPresenter::new(page.clone());
        presenter.speedup(16.0).await;
        assert!(page.notifications().is_empty());
    }
}
