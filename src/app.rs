//! Controller wiring: one task owns the turntable client and the sequencer,
//! and every input reaches them through a single queue.

use crate::domain::models::{
    ConnectionState, MessageSeverity, RigCommand, RigEvent, RunOutcome, StatusMessage, TimerKind,
};
use crate::domain::sequencer::CaptureSequencer;
use crate::domain::settings::SettingsService;
use crate::infrastructure::turntable::TurntableClient;
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct RigController {
    turntable: TurntableClient,
    sequencer: CaptureSequencer,
    settings: Option<SettingsService>,
}

impl RigController {
    pub fn new(turntable: TurntableClient, sequencer: CaptureSequencer) -> Self {
        Self {
            turntable,
            sequencer,
            settings: None,
        }
    }

    /// Persist operator choices (lens, bracket mode, gyro gate) through `settings`
    pub fn with_settings(mut self, settings: SettingsService) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn turntable(&self) -> &TurntableClient {
        &self.turntable
    }

    pub fn sequencer(&self) -> &CaptureSequencer {
        &self.sequencer
    }

    pub fn settings(&self) -> Option<&SettingsService> {
        self.settings.as_ref()
    }

    /// Route one queued event. Breaks on shutdown.
    pub fn handle(&mut self, event: RigEvent) -> ControlFlow<()> {
        match event {
            RigEvent::Command(command) => self.handle_command(command),
            RigEvent::Transport(event) => {
                if let Some(event) = self.turntable.handle_transport_event(event) {
                    self.sequencer
                        .on_turntable_event(event, &mut self.turntable);
                }
            }
            RigEvent::Camera(event) => self.sequencer.on_camera_event(event, &mut self.turntable),
            RigEvent::Timer(timer) => match timer {
                TimerKind::FirstShot { .. } => self.sequencer.on_timer(timer),
                TimerKind::ResetRemainder { .. } => self.turntable.on_timer(timer),
            },
            RigEvent::Shutdown => {
                info!("Controller shutting down");
                self.sequencer.stop_capture();
                if self.turntable.disconnect().is_some() {
                    debug!("Turntable released on shutdown");
                }
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_command(&mut self, command: RigCommand) {
        debug!("Command: {:?}", command);
        match command {
            RigCommand::Connect => {
                if let Err(e) = self.turntable.connect() {
                    self.warn_operator(format!("Connect failed: {}", e), MessageSeverity::Error);
                }
            }
            RigCommand::Disconnect => {
                if let Some(event) = self.turntable.disconnect() {
                    self.sequencer
                        .on_turntable_event(event, &mut self.turntable);
                }
            }
            RigCommand::StartCapture => self.sequencer.start_capture(&mut self.turntable),
            RigCommand::StopCapture => self.sequencer.stop_capture(),
            RigCommand::ResetToZero => {
                if self.sequencer.is_running() {
                    self.warn_operator(
                        "Cannot reset while capturing".to_string(),
                        MessageSeverity::Warning,
                    );
                } else if let Err(e) = self.turntable.reset_to_zero() {
                    self.warn_operator(format!("Reset failed: {}", e), MessageSeverity::Error);
                }
            }
            RigCommand::SetLens(lens) => match self.sequencer.set_lens(lens) {
                Ok(()) => self.persist(|s| s.update_lens(lens)),
                Err(e) => self.warn_operator(format!("Lens not changed: {}", e), MessageSeverity::Warning),
            },
            RigCommand::SetBracketMode(mode) => match self.sequencer.set_bracket_mode(mode) {
                Ok(mode) => self.persist(|s| s.update_bracket_mode(mode.value())),
                Err(e) => self.warn_operator(e.to_string(), MessageSeverity::Warning),
            },
            RigCommand::SetUseGyro(enabled) => {
                self.sequencer.set_use_gyro(enabled);
                self.persist(|s| s.update_use_gyro(enabled));
            }
        }
    }

    fn persist(&mut self, update: impl FnOnce(&mut SettingsService) -> anyhow::Result<()>) {
        if let Some(settings) = self.settings.as_mut() {
            if let Err(e) = update(settings) {
                warn!("Failed to save settings: {}", e);
            }
        }
    }

    fn warn_operator(&mut self, message: String, severity: MessageSeverity) {
        self.sequencer.report(StatusMessage::new(message, severity));
    }
}

/// Event loop around a [`RigController`]
pub struct RigApp {
    controller: RigController,
    rx: mpsc::UnboundedReceiver<RigEvent>,
    tx: mpsc::UnboundedSender<RigEvent>,
}

impl RigApp {
    pub fn new(
        controller: RigController,
        tx: mpsc::UnboundedSender<RigEvent>,
        rx: mpsc::UnboundedReceiver<RigEvent>,
    ) -> Self {
        Self { controller, rx, tx }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<RigEvent> {
        self.tx.clone()
    }

    pub fn controller(&self) -> &RigController {
        &self.controller
    }

    pub fn into_controller(self) -> RigController {
        self.controller
    }

    /// Process events until shutdown
    pub async fn run(&mut self) {
        while let Some(event) = self.rx.recv().await {
            if self.controller.handle(event).is_break() {
                break;
            }
        }
    }

    /// Connect, capture one revolution and report how the run ended
    pub async fn run_single_revolution(&mut self) -> anyhow::Result<RunOutcome> {
        self.controller.handle(RigEvent::Command(RigCommand::Connect));
        let mut started = false;

        while let Some(event) = self.rx.recv().await {
            if self.controller.handle(event).is_break() {
                anyhow::bail!("Shut down before the revolution finished");
            }

            let state = self.controller.turntable().connection_state();
            if !started {
                match state {
                    ConnectionState::Ready => {
                        self.controller
                            .handle(RigEvent::Command(RigCommand::StartCapture));
                        started = true;
                    }
                    ConnectionState::Disconnected => {
                        anyhow::bail!("Could not connect to the turntable");
                    }
                    _ => {}
                }
                continue;
            }

            if !self.controller.sequencer().is_running() {
                return self
                    .controller
                    .sequencer()
                    .last_outcome()
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("Capture run did not start"));
            }
        }

        anyhow::bail!("Event queue closed")
    }
}
