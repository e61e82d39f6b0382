//! Notifications for subscribers (UI layers, loggers)

use chatdeck_tabs::CheckpointType;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TabCreated {
        tab_id: String,
    },
    TabSwitched {
        from: Option<String>,
        to: String,
    },
    TabClosed {
        tab_id: String,
    },
    TabDeleted {
        tab_id: String,
    },
    MessageAdded {
        tab_id: String,
        message_id: String,
    },
    CheckpointCreated {
        tab_id: String,
        checkpoint_id: String,
        checkpoint_type: CheckpointType,
    },
    CheckpointRestored {
        tab_id: String,
        checkpoint_id: String,
    },
    TabsSuspended {
        tab_ids: Vec<String>,
    },
    TabsEvicted {
        tab_ids: Vec<String>,
    },
}
