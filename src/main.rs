use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nalgebra::Vector3;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use rs_pick_cell::computer_vision::pipeline::{VisionPhase, VisionPipeline};
#[cfg(feature = "camera")]
use rs_pick_cell::computer_vision::camera::CameraSource;
use rs_pick_cell::computer_vision::source::{FrameSource, ImageDirectory};
use rs_pick_cell::computer_vision::worker::VisionWorker;
use rs_pick_cell::config::CellConfig;
use rs_pick_cell::control::parse_coordinates;
use rs_pick_cell::hardware_link::{dispatch_angles, ArmCommand, HardwareLink, LogLink};
use rs_pick_cell::kinematic_traits::{Kinematics, JOINTS_AT_ZERO};
use rs_pick_cell::orchestrator::Orchestrator;
use rs_pick_cell::session::Session;
use rs_pick_cell::utils::{as_radians, dump_joints, dump_pose};

#[derive(Parser, Debug)]
#[command(author, version, name = "pick-cell", about = "Desktop arm pick-and-place cell")]
struct CommandLineArguments {
    /// Cell configuration (YAML). Defaults to the desktop arm.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Solve the inverse kinematics for a position and print the move command.
    Solve {
        #[arg(allow_hyphen_values = true)]
        x: String,
        #[arg(allow_hyphen_values = true)]
        y: String,
        #[arg(allow_hyphen_values = true)]
        z: String,
        /// Do not pull the gripper to point down.
        #[arg(long)]
        unrestricted: bool,
        /// Use the height compensation of the cell.
        #[arg(long)]
        compensate: bool,
        /// Joint angles (degrees) to continue from, comma separated.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        previous: Option<Vec<f64>>,
    },
    /// Predict how long a move takes, from per-joint angles in degrees.
    Timing {
        #[arg(num_args = 6, allow_hyphen_values = true)]
        angles: Vec<f64>,
    },
    /// Calibrate and print the corners found.
    Calibrate {
        #[command(flatten)]
        input: FrameInput,
        /// Give up after this many frames.
        #[arg(long, default_value_t = 2000)]
        max_frames: usize,
    },
    /// Run the cell: vision worker plus the control session reading commands from stdin.
    Run {
        #[command(flatten)]
        input: FrameInput,
        /// Log the commands instead of sending them to the controller.
        #[arg(long)]
        dry_run: bool,
    },
}

/// Where the vision worker gets its frames.
#[derive(Args, Debug)]
struct FrameInput {
    /// Directory of recorded frames, replayed in name order.
    #[arg(required_unless_present = "camera")]
    frames: Option<PathBuf>,
    /// Capture from /dev/video<CAMERA> instead.
    #[arg(long, conflicts_with = "frames")]
    camera: Option<u32>,
    /// Requested capture width.
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Requested capture height.
    #[arg(long, default_value_t = 480)]
    height: u32,
}

impl FrameInput {
    fn source(self) -> Result<Box<dyn FrameSource>> {
        match (self.frames, self.camera) {
            (Some(frames), _) => Ok(Box::new(ImageDirectory::new(frames))),
            #[cfg(feature = "camera")]
            (None, Some(index)) => Ok(Box::new(CameraSource::new(index, self.width, self.height))),
            #[cfg(not(feature = "camera"))]
            (None, Some(index)) => bail!(
                "Built without camera support, cannot capture {}x{} from /dev/video{}",
                self.width, self.height, index
            ),
            (None, None) => bail!("Either a frame directory or --camera is needed"),
        }
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<CellConfig> {
    match path {
        None => Ok(CellConfig::default()),
        #[cfg(feature = "allow_filesystem")]
        Some(path) => CellConfig::from_yaml_file(path)
            .with_context(|| format!("Cannot load cell configuration {}", path.display())),
        #[cfg(not(feature = "allow_filesystem"))]
        Some(_) => bail!("Built without allow_filesystem, configuration files are not supported"),
    }
}

/// Six finite joint angles, degrees.
fn joint_degrees(values: Vec<f64>) -> Result<[f64; 6]> {
    let degrees: [f64; 6] = match values.try_into() {
        Ok(degrees) => degrees,
        Err(v) => bail!("6 angles expected, got {}", v.len()),
    };
    if let Some(i) = degrees.iter().position(|a| !a.is_finite()) {
        bail!("J{} angle must be finite", i + 1);
    }
    Ok(degrees)
}

fn solve(config: &CellConfig, target: Vector3<f64>, restricted: bool, compensate: bool, previous: Option<Vec<f64>>) -> Result<()> {
    let previous = match previous {
        None => JOINTS_AT_ZERO,
        Some(values) => as_radians(joint_degrees(values).context("Invalid --previous")?),
    };
    let mut goal = target;
    if compensate {
        goal.z = config.z_compensation()?.compensate(target.x, target.z);
    }

    let solver = config.solver();
    let solution = solver.solve(&goal, &previous, restricted);
    println!("Joints (degrees):");
    dump_joints(&solution.joints);
    println!("Pose:");
    dump_pose(&solver.robot.forward(&solution.joints));
    println!(
        "Position error {:.4} mm, approach off by {:.3}°, {} iterations{}",
        solution.position_error,
        solution.approach_error.to_degrees(),
        solution.iterations,
        if solution.converged { "" } else { " (not converged)" }
    );

    let dispatch = dispatch_angles(&solution.joints);
    let duration = config.timer().estimate_between(&dispatch_angles(&previous), &dispatch);
    print!("{}", ArmCommand::Move(dispatch).to_line());
    println!("Predicted duration {:.3} s", duration.as_secs_f64());
    Ok(())
}

fn timing(config: &CellConfig, angles: Vec<f64>) -> Result<()> {
    let angles = joint_degrees(angles)?;
    let timer = config.timer();
    for (i, angle) in angles.iter().enumerate() {
        println!("J{}: {:8.3} s for {:.2}°", i + 1, timer.joint_time(i, *angle), angle);
    }
    println!("Total with margin: {:.3} s", timer.estimate_duration(&angles));
    Ok(())
}

fn calibrate(config: &CellConfig, input: FrameInput, max_frames: usize) -> Result<()> {
    let mut source = input.source()?;
    source.open()?;
    let mut pipeline = VisionPipeline::new(&config.vision);
    pipeline.initialize();
    for _ in 0..max_frames {
        let report = pipeline.process(&source.read()?);
        if report.phase == VisionPhase::Tracking {
            break;
        }
    }
    let (Some(calibration), Some(map)) = (pipeline.calibration(), pipeline.perspective()) else {
        bail!("No stable corners after {} frames", max_frames);
    };
    for (i, corner) in calibration.corners.iter().enumerate() {
        match map.map(corner) {
            Some(cell) => println!("Corner {}: ({:.1}, {:.1}) px -> ({:.2}, {:.2}) mm", i + 1, corner.x, corner.y, cell.x, cell.y),
            None => println!("Corner {}: ({:.1}, {:.1}) px", i + 1, corner.x, corner.y),
        }
    }
    Ok(())
}

fn open_link(config: &CellConfig, dry_run: bool) -> Box<dyn HardwareLink> {
    if dry_run {
        return Box::new(LogLink);
    }
    #[cfg(feature = "serial")]
    {
        Box::new(rs_pick_cell::hardware_link::SerialLink::new(&config.link.port, config.link.baud_rate))
    }
    #[cfg(not(feature = "serial"))]
    {
        tracing::warn!("Built without serial support, {} is not used", config.link.port);
        Box::new(LogLink)
    }
}

fn run(config: &CellConfig, input: FrameInput, dry_run: bool) -> Result<()> {
    let mut worker = VisionWorker::spawn(input.source()?, &config.vision);
    let orchestrator = Orchestrator::new(config, open_link(config, dry_run))?;

    let (lines, receiver) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if lines.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        })
        .context("Cannot start the input reader")?;

    println!("Commands: init, detect, move X Y Z, open, close, home, reset, shutdown, status, quit");
    let mut session = Session::new(orchestrator, worker.snapshots(), worker.requests(), receiver);
    session.run(Duration::from_millis(50));
    worker.stop();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rs_pick_cell=info".parse()?),
        )
        .init();

    let args = CommandLineArguments::parse();
    let config = load_config(&args.config)?;

    match args.command {
        Command::Solve { x, y, z, unrestricted, compensate, previous } => {
            let target = parse_coordinates(&x, &y, &z)?;
            solve(&config, target, !unrestricted, compensate, previous)
        }
        Command::Timing { angles } => timing(&config, angles),
        Command::Calibrate { input, max_frames } => calibrate(&config, input, max_frames),
        Command::Run { input, dry_run } => run(&config, input, dry_run),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_rejects_non_finite_coordinates() {
        for bad in ["NaN", "inf", "-inf"] {
            let args = CommandLineArguments::try_parse_from(["pick-cell", "solve", "200", bad, "40"]).unwrap();
            let Command::Solve { x, y, z, .. } = args.command else {
                panic!("not a solve command");
            };
            assert!(parse_coordinates(&x, &y, &z).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_joint_angles_must_be_finite() {
        assert_eq!(joint_degrees(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(joint_degrees(vec![0.0, 0.0, f64::NAN, 0.0, 0.0, 0.0]).is_err());
        assert!(joint_degrees(vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_frames_or_camera() {
        let args = CommandLineArguments::try_parse_from(["pick-cell", "run", "recorded", "--dry-run"]).unwrap();
        let Command::Run { input, dry_run } = args.command else {
            panic!("not a run command");
        };
        assert!(dry_run);
        assert_eq!(input.frames, Some(PathBuf::from("recorded")));
        assert!(input.source().is_ok());

        assert!(CommandLineArguments::try_parse_from(["pick-cell", "calibrate"]).is_err());
        assert!(CommandLineArguments::try_parse_from(["pick-cell", "run", "recorded", "--camera", "0"]).is_err());
    }
}
