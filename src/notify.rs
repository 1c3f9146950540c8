use crate::model::Run;
use crate::status::StatusClass;
use notify_rust::{Notification, Urgency};

/// Blocking D-Bus call on Linux; run it from a blocking context.
pub fn send_desktop(run: &Run) {
    let (summary, icon, urgency) = match run.state.class() {
        StatusClass::Success => ("Pipeline passed", "dialog-information", Urgency::Normal),
        StatusClass::Failure => ("Pipeline failed", "dialog-error", Urgency::Critical),
        _ => ("Pipeline finished", "dialog-information", Urgency::Normal),
    };

    let body = match run.state.class() {
        StatusClass::Success | StatusClass::Failure => run.display_title(),
        _ => format!("{} ({})", run.display_title(), run.state.label()),
    };

    if let Err(e) = Notification::new()
        .summary(summary)
        .body(&body)
        .icon(icon)
        .urgency(urgency)
        .show()
    {
        tracing::debug!(error = %e, "desktop notification failed");
    }
}
