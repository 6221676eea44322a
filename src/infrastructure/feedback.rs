//! Operator feedback for a headless rig: cues and status lines go to the log,
//! and optionally to a listener such as a front end.

use crate::domain::models::{MessageSeverity, StatusMessage};
use crate::domain::ports::Feedback;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Default)]
pub struct TracingFeedback {
    listener: Option<mpsc::UnboundedSender<StatusMessage>>,
}

impl TracingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(listener: mpsc::UnboundedSender<StatusMessage>) -> Self {
        Self {
            listener: Some(listener),
        }
    }

    fn forward(&mut self, message: StatusMessage) {
        if let Some(listener) = &self.listener {
            if listener.send(message).is_err() {
                // Listener went away
                self.listener = None;
            }
        }
    }
}

impl Feedback for TracingFeedback {
    fn play_start_cue(&mut self) {
        info!(cue = "start", "\u{266a} capture starting");
    }

    fn play_complete_cue(&mut self) {
        info!(cue = "complete", "\u{266a} capture complete");
    }

    fn status(&mut self, message: StatusMessage) {
        match message.severity {
            MessageSeverity::Info | MessageSeverity::Success => info!("{}", message.message),
            MessageSeverity::Warning => warn!("{}", message.message),
            MessageSeverity::Error => error!("{}", message.message),
        }
        self.forward(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reaches_listener() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut feedback = TracingFeedback::with_listener(tx);

        feedback.status(StatusMessage::new("Turntable connected", MessageSeverity::Success));

        let message = rx.try_recv().expect("status forwarded");
        assert_eq!(message.message, "Turntable connected");
        assert_eq!(message.severity, MessageSeverity::Success);
    }

    #[test]
    fn test_dropped_listener_is_forgotten() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut feedback = TracingFeedback::with_listener(tx);
        drop(rx);

        feedback.status(StatusMessage::new("ignored", MessageSeverity::Info));
        assert!(feedback.listener.is_none());
    }
}
