//! Control envelope dispatch.
//!
//! The request shape mirrors the popup messages of the browser-extension
//! era: an `action` discriminator plus camelCase fields, answered with the
//! matching camelCase reply.

use tracing::warn;

use adrush_core_types::{ControlRequest, ControlResponse};

use crate::supervisor::MonitorSupervisor;

pub async fn dispatch(supervisor: &MonitorSupervisor, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::ToggleExtension { enabled } => {
            match supervisor.set_enabled(enabled).await {
                Ok(reply) => ControlResponse::Toggle(reply),
                Err(err) => {
                    warn!(target: "control", ?err, "toggle failed");
                    ControlResponse::error(err.to_string())
                }
            }
        }
        ControlRequest::GetStatus => match supervisor.status().await {
            Ok(status) => ControlResponse::Status(status),
            Err(err) => {
                warn!(target: "control", ?err, "status read failed");
                ControlResponse::error(err.to_string())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use page_adapter::SimulatedPage;
    use serde_json::json;

    use super::*;
    use crate::config::AppConfig;

    async fn running_supervisor() -> MonitorSupervisor {
        let page = Arc::new(SimulatedPage::new());
        let supervisor = MonitorSupervisor::new(AppConfig::default(), page);
        supervisor.start().await;
        supervisor
    }

    #[tokio::test]
    async fn toggle_round_trips_the_wire_format() {
        let supervisor = running_supervisor().await;

        let request: ControlRequest =
            serde_json::from_value(json!({ "action": "toggleExtension", "enabled": false }))
                .unwrap();
        let response = dispatch(&supervisor, request).await;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({ "success": true, "enabled": false }));

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn status_reports_the_toggle() {
        let supervisor = running_supervisor().await;

        dispatch(
            &supervisor,
            ControlRequest::ToggleExtension { enabled: false },
        )
        .await;
        let response = dispatch(&supervisor, ControlRequest::GetStatus).await;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["enabled"], json!(false));
        assert_eq!(value["adDetected"], json!(false));
        assert_eq!(value["maxSupportedSpeed"], json!(16.0));

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn stopped_monitor_answers_with_an_error() {
        let supervisor = running_supervisor().await;
        supervisor.stop().await;

        let response = dispatch(&supervisor, ControlRequest::GetStatus).await;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], json!(false));
        assert!(value["error"].is_string());
    }
}
