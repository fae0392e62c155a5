//! Pick-and-place sequencing.
//!
//! The cycle is `Idle → Localizing → ApproachingObject → Gripping → Lifting →
//! MovingToDrop → Releasing → Idle`. Leaving `Idle` takes an explicit request, every
//! later step fires when the duration predicted for the move just sent has elapsed.
//! Nothing is ever confirmed by the arm: the controller does not answer, so a step is
//! considered done once its predicted time is over.
//!
//! All methods take the current instant; the orchestrator owns no clock and no thread.
//! The control loop calls [`Orchestrator::tick`] regularly to fire due steps.

use crate::computer_vision::pipeline::VisionPhase;
use crate::computer_vision::tracker::WorkCellPosition;
use crate::config::{CellConfig, PickPlaceConfig};
use crate::config_error::ConfigError;
use crate::hardware_link::{dispatch_angles, ArmCommand, HardwareLink};
use crate::inverse::{IkSolution, IkSolver};
use crate::kinematic_traits::{Joints, JOINTS_AT_ZERO};
use crate::scheduler::Scheduler;
use crate::timing::MotionTimer;
use crate::utils::format_joints;
use crate::z_compensation::ZCompensation;
use nalgebra::Vector3;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleState {
    Idle,
    Localizing,
    ApproachingObject,
    Gripping,
    Lifting,
    MovingToDrop,
    Releasing,
}

/// Commands that are disabled for a while once used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Home,
    Shutdown,
    Reset,
    InitializeVision,
}

impl Trigger {
    fn command(&self) -> Option<ArmCommand> {
        match self {
            Trigger::Home => Some(ArmCommand::Home),
            Trigger::Shutdown => Some(ArmCommand::Shutdown),
            Trigger::Reset => Some(ArmCommand::ResetJoints),
            Trigger::InitializeVision => None,
        }
    }
}

/// A request refused because its precondition does not hold. Nothing changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GuardError {
    VisionNotTracking,
    NoObservation,
    CycleInProgress(CycleState),
    CoolingDown(Trigger),
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardError::VisionNotTracking => write!(f, "Vision is not tracking yet, initialize it first"),
            GuardError::NoObservation => write!(f, "No object detected"),
            GuardError::CycleInProgress(state) => write!(f, "Pick cycle in progress ({:?})", state),
            GuardError::CoolingDown(trigger) => write!(f, "{:?} is cooling down", trigger),
        }
    }
}

impl std::error::Error for GuardError {}

/// A move that was sent to the arm.
#[derive(Debug, Clone, Copy)]
pub struct MotionPlan {
    /// Requested position, before height compensation.
    pub target: Vector3<f64>,
    /// Position the solver was asked for.
    pub goal: Vector3<f64>,
    pub solution: IkSolution,
    /// Joints before the move.
    pub previous: Joints,
    /// Degrees as sent.
    pub dispatch: [f64; 6],
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Event {
    CloseGripper,
    Lift,
    MoveToDrop,
    Release,
}

pub struct Orchestrator<L: HardwareLink> {
    solver: IkSolver,
    timer: MotionTimer,
    z_compensation: ZCompensation,
    pick_place: PickPlaceConfig,
    link: L,
    previous: Joints,
    state: CycleState,
    scheduler: Scheduler<Event>,
    /// Object position the running cycle picks at.
    pick_at: Option<WorkCellPosition>,
    /// When the last move is predicted to be over.
    busy_until: Option<Instant>,
    cooldowns: HashMap<Trigger, Instant>,
    vision_initialized: bool,
}

impl<L: HardwareLink> Orchestrator<L> {
    pub fn new(config: &CellConfig, link: L) -> Result<Self, ConfigError> {
        Ok(Orchestrator {
            solver: config.solver(),
            timer: config.timer(),
            z_compensation: config.z_compensation()?,
            pick_place: config.pick_place.clone(),
            link,
            previous: JOINTS_AT_ZERO,
            state: CycleState::Idle,
            scheduler: Scheduler::new(),
            pick_at: None,
            busy_until: None,
            cooldowns: HashMap::new(),
            vision_initialized: false,
        })
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Joints the next solve continues from.
    pub fn previous_joints(&self) -> Joints {
        self.previous
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Earliest instant [`Orchestrator::tick`] has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let cooldown = self.cooldowns.values().min().copied();
        match (self.scheduler.next_due(), cooldown) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_enabled(&self, trigger: Trigger, now: Instant) -> bool {
        self.cooldowns.get(&trigger).map(|until| now >= *until).unwrap_or(true)
    }

    /// Time left until the trigger is enabled again.
    pub fn cooldown_left(&self, trigger: Trigger, now: Instant) -> Duration {
        self.cooldowns.get(&trigger).map(|until| until.saturating_duration_since(now)).unwrap_or_default()
    }

    pub fn trigger_label(&self, trigger: Trigger) -> &'static str {
        match trigger {
            Trigger::Home => "Home",
            Trigger::Shutdown => "Shutdown",
            Trigger::Reset => "Reset Joints",
            Trigger::InitializeVision if self.vision_initialized => "Re-Initialize Vision",
            Trigger::InitializeVision => "Initialize Vision",
        }
    }

    fn send(&mut self, command: ArmCommand) {
        if let Err(e) = self.link.send(&command) {
            tracing::warn!("Command {} not delivered: {:#}", command, e);
        }
    }

    /// Drop any pending cycle step and return to idle.
    fn abandon_cycle(&mut self, reason: &str) {
        self.scheduler.supersede();
        if self.state != CycleState::Idle {
            tracing::info!("Pick cycle abandoned in {:?}: {}", self.state, reason);
        }
        self.state = CycleState::Idle;
        self.pick_at = None;
    }

    /// Solve, send and time a move to `target`. The height is compensated unless
    /// `compensate` is off.
    fn dispatch_move(&mut self, now: Instant, target: Vector3<f64>, restricted: bool, compensate: bool) -> MotionPlan {
        let z = if compensate { self.z_compensation.compensate(target.x, target.z) } else { target.z };
        let goal = Vector3::new(target.x, target.y, z);
        let solution = self.solver.solve(&goal, &self.previous, restricted);

        let dispatch = dispatch_angles(&solution.joints);
        let duration = self.timer.estimate_between(&dispatch_angles(&self.previous), &dispatch);
        self.send(ArmCommand::Move(dispatch));
        tracing::info!(
            "Move to ({:.1}, {:.1}, {:.1}): {} in {:.2} s",
            goal.x, goal.y, goal.z, format_joints(&solution.joints), duration.as_secs_f64()
        );

        let previous = std::mem::replace(&mut self.previous, solution.joints);
        self.busy_until = Some(now + duration);
        MotionPlan { target, goal, solution, previous, dispatch, duration }
    }

    /// Manual move to a position. Supersedes a running pick cycle.
    pub fn move_to(&mut self, now: Instant, target: Vector3<f64>) -> MotionPlan {
        self.abandon_cycle("manual move");
        self.dispatch_move(now, target, true, true)
    }

    pub fn open_gripper(&mut self) {
        self.send(ArmCommand::OpenGripper);
    }

    pub fn close_gripper(&mut self) {
        self.send(ArmCommand::CloseGripper);
    }

    /// Start a pick cycle on the object the vision currently reports.
    pub fn detect_and_move(
        &mut self,
        now: Instant,
        phase: VisionPhase,
        object: Option<WorkCellPosition>,
    ) -> Result<MotionPlan, GuardError> {
        if self.state != CycleState::Idle {
            return Err(GuardError::CycleInProgress(self.state));
        }
        if phase != VisionPhase::Tracking {
            return Err(GuardError::VisionNotTracking);
        }
        let object = object.ok_or(GuardError::NoObservation)?;

        self.scheduler.supersede();
        self.state = CycleState::Localizing;
        tracing::info!("Object detected at {}", object);
        self.pick_at = Some(object);

        let target = Vector3::new(object.x, object.y, self.pick_place.grip_height);
        let plan = self.dispatch_move(now, target, true, true);
        self.state = CycleState::ApproachingObject;
        self.scheduler.schedule(now, plan.duration, Event::CloseGripper);
        Ok(plan)
    }

    /// Homing, shutdown or reset. The continuity pose returns to zero once the
    /// cooldown is over, when the arm is back at its zero position.
    pub fn trigger(&mut self, trigger: Trigger, now: Instant) -> Result<(), GuardError> {
        if !self.is_enabled(trigger, now) {
            return Err(GuardError::CoolingDown(trigger));
        }
        self.cooldowns.insert(trigger, now + self.pick_place.cooldown);
        match trigger.command() {
            Some(command) => {
                self.abandon_cycle("arm command");
                self.send(command);
            }
            None => {
                self.vision_initialized = true;
            }
        }
        tracing::info!("{:?} triggered, disabled for {:?}", trigger, self.pick_place.cooldown);
        Ok(())
    }

    /// Fire what is due at `now`. Returns the moves sent.
    pub fn tick(&mut self, now: Instant) -> Vec<MotionPlan> {
        let expired: Vec<Trigger> = self
            .cooldowns
            .iter()
            .filter(|(_, until)| now >= **until)
            .map(|(trigger, _)| *trigger)
            .collect();
        for trigger in expired {
            self.cooldowns.remove(&trigger);
            if trigger.command().is_some() {
                self.previous = JOINTS_AT_ZERO;
                tracing::info!("{:?} cooldown over, continuing from the zero pose", trigger);
            }
        }

        let mut plans = Vec::new();
        for event in self.scheduler.due(now) {
            if let Some(plan) = self.handle(event, now) {
                plans.push(plan);
            }
        }
        plans
    }

    fn handle(&mut self, event: Event, now: Instant) -> Option<MotionPlan> {
        let expected = match event {
            Event::CloseGripper => CycleState::ApproachingObject,
            Event::Lift => CycleState::Gripping,
            Event::MoveToDrop => CycleState::Lifting,
            Event::Release => CycleState::MovingToDrop,
        };
        if self.state != expected {
            tracing::debug!("{:?} ignored in {:?}", event, self.state);
            return None;
        }
        if let Some(until) = self.busy_until {
            if now < until {
                self.scheduler.schedule(now, until - now, event);
                return None;
            }
        }
        let settle = self.pick_place.gripper_settle;
        match event {
            Event::CloseGripper => {
                self.send(ArmCommand::CloseGripper);
                self.state = CycleState::Gripping;
                self.scheduler.schedule(now, settle, Event::Lift);
                None
            }
            Event::Lift => {
                let object = self.pick_at?;
                let target = Vector3::new(object.x, object.y, self.pick_place.lift_height);
                let plan = self.dispatch_move(now, target, true, true);
                self.state = CycleState::Lifting;
                self.scheduler.schedule(now, plan.duration + settle, Event::MoveToDrop);
                Some(plan)
            }
            Event::MoveToDrop => {
                let plan = self.dispatch_move(now, self.pick_place.drop_zone, false, false);
                self.state = CycleState::MovingToDrop;
                self.scheduler.schedule(now, plan.duration + settle, Event::Release);
                Some(plan)
            }
            Event::Release => {
                self.state = CycleState::Releasing;
                self.send(ArmCommand::OpenGripper);
                self.state = CycleState::Idle;
                self.pick_at = None;
                tracing::info!("Pick cycle complete");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware_link::RecordingLink;

    fn orchestrator() -> (Orchestrator<RecordingLink>, RecordingLink) {
        let link = RecordingLink::new();
        (Orchestrator::new(&CellConfig::default(), link.clone()).unwrap(), link)
    }

    const OBJECT: WorkCellPosition = WorkCellPosition { x: 220.0, y: -90.0 };

    #[test]
    fn test_guards_leave_state_unchanged() {
        let (mut orchestrator, link) = orchestrator();
        let now = Instant::now();
        let phase = VisionPhase::Calibrating { collected: 3, required: 150, frames_left: 10 };
        assert_eq!(orchestrator.detect_and_move(now, phase, Some(OBJECT)).unwrap_err(), GuardError::VisionNotTracking);
        assert_eq!(orchestrator.detect_and_move(now, VisionPhase::Tracking, None).unwrap_err(), GuardError::NoObservation);
        assert_eq!(orchestrator.state(), CycleState::Idle);
        assert!(link.lines().is_empty());
    }

    #[test]
    fn test_full_cycle() {
        let (mut orchestrator, link) = orchestrator();
        let start = Instant::now();
        let approach = orchestrator.detect_and_move(start, VisionPhase::Tracking, Some(OBJECT)).unwrap();
        assert_eq!(orchestrator.state(), CycleState::ApproachingObject);
        assert_eq!(approach.target, Vector3::new(220.0, -90.0, 36.0));
        assert!(approach.goal.z > approach.target.z);
        assert_eq!(orchestrator.previous_joints(), approach.solution.joints);
        assert_eq!(
            orchestrator.detect_and_move(start, VisionPhase::Tracking, Some(OBJECT)).unwrap_err(),
            GuardError::CycleInProgress(CycleState::ApproachingObject)
        );

        // Nothing happens before the predicted duration.
        let t1 = start + approach.duration;
        assert!(orchestrator.tick(t1 - Duration::from_millis(1)).is_empty());
        assert_eq!(orchestrator.state(), CycleState::ApproachingObject);

        orchestrator.tick(t1);
        assert_eq!(orchestrator.state(), CycleState::Gripping);
        assert_eq!(link.lines().last().unwrap(), "CLOSE");

        let t_lift = t1 + Duration::from_millis(500);
        let lift = orchestrator.tick(t_lift);
        assert_eq!(lift.len(), 1);
        assert_eq!(lift[0].target, Vector3::new(220.0, -90.0, 100.0));
        assert_eq!(orchestrator.state(), CycleState::Lifting);

        let t_drop = t_lift + lift[0].duration + Duration::from_millis(500);
        let drop = orchestrator.tick(t_drop);
        assert_eq!(drop.len(), 1);
        assert_eq!(drop[0].goal, Vector3::new(215.0, -240.0, 100.0));
        assert_eq!(orchestrator.state(), CycleState::MovingToDrop);

        orchestrator.tick(t_drop + drop[0].duration + Duration::from_millis(500));
        assert_eq!(orchestrator.state(), CycleState::Idle);

        let lines = link.lines();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with('M'));
        assert_eq!(lines[1], "CLOSE");
        assert!(lines[2].starts_with('M'));
        assert!(lines[3].starts_with('M'));
        assert_eq!(lines[4], "OPEN");
    }

    #[test]
    fn test_manual_move_supersedes_cycle() {
        let (mut orchestrator, link) = orchestrator();
        let start = Instant::now();
        let approach = orchestrator.detect_and_move(start, VisionPhase::Tracking, Some(OBJECT)).unwrap();
        let manual = orchestrator.move_to(start + Duration::from_millis(10), Vector3::new(200.0, -100.0, 40.0));
        assert_eq!(orchestrator.state(), CycleState::Idle);
        assert_eq!(manual.previous, approach.solution.joints);

        // The close gripper step of the abandoned cycle never fires.
        orchestrator.tick(start + approach.duration + Duration::from_secs(30));
        assert!(!link.lines().contains(&"CLOSE".to_string()));
        assert_eq!(orchestrator.state(), CycleState::Idle);
    }

    #[test]
    fn test_cooldown_and_zero_pose() {
        let (mut orchestrator, link) = orchestrator();
        let start = Instant::now();
        orchestrator.move_to(start, Vector3::new(200.0, -100.0, 40.0));
        assert_ne!(orchestrator.previous_joints(), JOINTS_AT_ZERO);

        orchestrator.trigger(Trigger::Home, start).unwrap();
        assert_eq!(link.lines().last().unwrap(), "H");
        assert_eq!(
            orchestrator.trigger(Trigger::Home, start + Duration::from_secs(1)),
            Err(GuardError::CoolingDown(Trigger::Home))
        );
        assert!(orchestrator.is_enabled(Trigger::Reset, start));
        assert_eq!(orchestrator.cooldown_left(Trigger::Home, start + Duration::from_secs(2)), Duration::from_secs(3));

        orchestrator.tick(start + Duration::from_secs(4));
        assert_ne!(orchestrator.previous_joints(), JOINTS_AT_ZERO);
        orchestrator.tick(start + Duration::from_secs(5));
        assert_eq!(orchestrator.previous_joints(), JOINTS_AT_ZERO);
        assert!(orchestrator.trigger(Trigger::Home, start + Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_initialize_vision_label() {
        let (mut orchestrator, link) = orchestrator();
        let now = Instant::now();
        assert_eq!(orchestrator.trigger_label(Trigger::InitializeVision), "Initialize Vision");
        orchestrator.trigger(Trigger::InitializeVision, now).unwrap();
        assert_eq!(orchestrator.trigger_label(Trigger::InitializeVision), "Re-Initialize Vision");
        assert!(!orchestrator.is_enabled(Trigger::InitializeVision, now));
        assert!(link.lines().is_empty());
    }

    #[test]
    fn test_gripper_commands() {
        let (mut orchestrator, link) = orchestrator();
        orchestrator.open_gripper();
        orchestrator.close_gripper();
        assert_eq!(link.lines(), vec!["OPEN", "CLOSE"]);
    }
}
