use serde::{Deserialize, Serialize};

use crate::fragment::SourceApp;

/// Per-workspace connector sync status.
///
/// In production these flags come from the workspace's connector records;
/// the config section provides the values for single-tenant deployments
/// and tests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub gmail_synced: bool,
    #[serde(default)]
    pub google_drive_synced: bool,
    #[serde(default)]
    pub google_calendar_synced: bool,
    #[serde(default)]
    pub google_workspace_synced: bool,
    #[serde(default)]
    pub slack_connected: bool,
}

impl ConnectorConfig {
    /// Whether the connector backing the given app has finished syncing.
    ///
    /// Apps without a connector flag (knowledge base, attachments, agents)
    /// are always available.
    pub fn is_synced(&self, app: SourceApp) -> bool {
        match app {
            SourceApp::Gmail => self.gmail_synced,
            SourceApp::GoogleDrive => self.google_drive_synced,
            SourceApp::GoogleCalendar => self.google_calendar_synced,
            SourceApp::GoogleWorkspace => self.google_workspace_synced,
            SourceApp::Slack => self.slack_connected,
            _ => true,
        }
    }
}
