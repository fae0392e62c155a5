//! Control timeline: takes command lines from the control surface, reads whatever the
//! vision worker published last, fires due pick cycle steps and publishes a status line.
//! It never waits for a frame.

use crate::computer_vision::pipeline::VisionPhase;
use crate::computer_vision::worker::{VisionRequest, VisionSnapshot};
use crate::control::ControlCommand;
use crate::hardware_link::HardwareLink;
use crate::latest::Latest;
use crate::orchestrator::{Orchestrator, Trigger};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Session<L: HardwareLink> {
    orchestrator: Orchestrator<L>,
    vision: Latest<VisionSnapshot>,
    vision_requests: Sender<VisionRequest>,
    lines: Receiver<String>,
    status: Latest<String>,
    message: String,
}

impl<L: HardwareLink> Session<L> {
    pub fn new(
        orchestrator: Orchestrator<L>,
        vision: Latest<VisionSnapshot>,
        vision_requests: Sender<VisionRequest>,
        lines: Receiver<String>,
    ) -> Self {
        Session {
            orchestrator,
            vision,
            vision_requests,
            lines,
            status: Latest::new(),
            message: String::new(),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator<L> {
        &self.orchestrator
    }

    /// Slot the status line is published to.
    pub fn status(&self) -> Latest<String> {
        self.status.clone()
    }

    /// Last diagnostic shown to the operator.
    pub fn message(&self) -> &str {
        &self.message
    }

    fn trigger(&mut self, trigger: Trigger, now: Instant) -> bool {
        match self.orchestrator.trigger(trigger, now) {
            Ok(()) => {
                self.message = format!("{} sent", self.orchestrator.trigger_label(trigger));
                true
            }
            Err(e) => {
                tracing::warn!("{}", e);
                self.message = e.to_string();
                false
            }
        }
    }

    /// Parse and run one line. Bad input only changes the message.
    pub fn handle_line(&mut self, line: &str, now: Instant) -> Flow {
        match line.parse::<ControlCommand>() {
            Ok(command) => self.execute(command, now),
            Err(e) => {
                tracing::warn!("Rejected input {:?}: {}", line, e);
                self.message = e.to_string();
                Flow::Continue
            }
        }
    }

    pub fn execute(&mut self, command: ControlCommand, now: Instant) -> Flow {
        match command {
            ControlCommand::Home => {
                self.trigger(Trigger::Home, now);
            }
            ControlCommand::Shutdown => {
                self.trigger(Trigger::Shutdown, now);
            }
            ControlCommand::Reset => {
                self.trigger(Trigger::Reset, now);
            }
            ControlCommand::InitializeVision => {
                if self.trigger(Trigger::InitializeVision, now) && self.vision_requests.send(VisionRequest::Initialize).is_err() {
                    tracing::warn!("Vision worker is not running");
                    self.message = "Vision worker is not running".to_string();
                }
            }
            ControlCommand::OpenGripper => {
                self.orchestrator.open_gripper();
                self.message = "Gripper opened".to_string();
            }
            ControlCommand::CloseGripper => {
                self.orchestrator.close_gripper();
                self.message = "Gripper closed".to_string();
            }
            ControlCommand::MoveTo(target) => {
                let plan = self.orchestrator.move_to(now, target);
                self.message = format!(
                    "Moving to ({:.1}, {:.1}, {:.1}), {:.2} s, error {:.2} mm",
                    target.x, target.y, target.z, plan.duration.as_secs_f64(), plan.solution.position_error
                );
            }
            ControlCommand::DetectAndMove => {
                let (phase, object) = match self.vision.get() {
                    Some(snapshot) => (snapshot.report.phase, snapshot.report.object),
                    None => (VisionPhase::Idle, None),
                };
                match self.orchestrator.detect_and_move(now, phase, object) {
                    Ok(plan) => {
                        self.message = format!("Picking at ({:.1}, {:.1})", plan.target.x, plan.target.y);
                    }
                    Err(e) => {
                        tracing::warn!("Detect and move refused: {}", e);
                        self.message = e.to_string();
                    }
                }
            }
            ControlCommand::Status => {
                tracing::info!("{}", self.compose_status());
            }
            ControlCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    pub fn compose_status(&self) -> String {
        let snapshot = self.vision.get();
        let vision = match snapshot.as_ref().map(|s| s.report.phase) {
            None => "Vision: no frames".to_string(),
            Some(VisionPhase::Idle) => "Vision: not initialized".to_string(),
            Some(VisionPhase::Calibrating { collected, required, frames_left }) => {
                format!("Vision: calibrating {}/{} ({} frames left)", collected, required, frames_left)
            }
            Some(VisionPhase::Tracking) => "Vision: tracking".to_string(),
        };
        let object = snapshot
            .and_then(|s| s.report.object)
            .map(|p| p.to_string())
            .unwrap_or_else(|| "No object".to_string());
        let mut status = format!("{} | {} | Arm: {:?}", vision, object, self.orchestrator.state());
        if !self.message.is_empty() {
            status.push_str(" | ");
            status.push_str(&self.message);
        }
        status
    }

    /// Fire due steps and publish the status.
    pub fn step(&mut self, now: Instant) {
        for plan in self.orchestrator.tick(now) {
            self.message = format!(
                "Moving to ({:.1}, {:.1}, {:.1}), {:.2} s",
                plan.target.x, plan.target.y, plan.target.z, plan.duration.as_secs_f64()
            );
        }
        self.status.publish(self.compose_status());
    }

    /// Run until `quit` or until the control surface goes away. Waits at most `poll`
    /// between two steps, less when a cycle step is due earlier.
    pub fn run(&mut self, poll: Duration) {
        loop {
            let now = Instant::now();
            self.step(now);
            let wait = self
                .orchestrator
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(now).min(poll))
                .unwrap_or(poll);
            match self.lines.recv_timeout(wait) {
                Ok(line) => {
                    if self.handle_line(&line, Instant::now()) == Flow::Quit {
                        break;
                    }
                    for line in self.lines.try_iter().collect::<Vec<_>>() {
                        if self.handle_line(&line, Instant::now()) == Flow::Quit {
                            return;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::info!("Control session ended");
    }
}
