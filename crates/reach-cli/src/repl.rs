//! REPL – interactive shell over a connected robot.
//!
//! Supported slash-commands:
//!   /help                     – show this list
//!   /state                    – print the latest robot state
//!   /move x y theta           – drive to an absolute pose
//!   /moveby dx dy dtheta      – drive relative to the current pose
//!   /arm <joint> <value>      – move one arm joint, others held
//!   /gripper open|close
//!   /mode navigation|manipulation
//!   /stop                     – pre-empt whatever is running
//!   /run <task> [args]        – run a named task
//!   /tasks                    – list registered tasks
//!   /map                      – map statistics and known objects
//!   /save <file>              – write a map snapshot
//!   /quit | /exit

use std::path::PathBuf;

use colored::Colorize;
use reach_runtime::TaskEngine;
use reach_types::{ARM_JOINT_NAMES, ControlMode, Pose2, ReachError, RobotState, joint_index};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Handle;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    State,
    MoveTo(Pose2),
    MoveBy(Pose2),
    Arm { joint: usize, value: f32 },
    Gripper { open: bool },
    Mode(ControlMode),
    Stop,
    Run { task: String, args: Vec<String> },
    Tasks,
    Map,
    Save(PathBuf),
    Quit,
}

/// Parse one input line. Errors are user-facing messages.
pub fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let mut words = line.split_whitespace();
    let head = words.next().ok_or("empty command")?;
    let rest: Vec<&str> = words.collect();

    let cmd = match head {
        "/help" => ReplCommand::Help,
        "/state" => ReplCommand::State,
        "/move" => ReplCommand::MoveTo(pose_args(&rest)?),
        "/moveby" => ReplCommand::MoveBy(pose_args(&rest)?),
        "/arm" => {
            let [name, value] = rest[..] else {
                return Err("usage: /arm <joint> <value>".into());
            };
            let joint = joint_index(name)
                .ok_or_else(|| format!("unknown joint '{name}' (one of {})", ARM_JOINT_NAMES.join(", ")))?;
            let value = value.parse().map_err(|_| format!("'{value}' is not a number"))?;
            ReplCommand::Arm { joint, value }
        }
        "/gripper" => match rest[..] {
            ["open"] => ReplCommand::Gripper { open: true },
            ["close"] => ReplCommand::Gripper { open: false },
            _ => return Err("usage: /gripper open|close".into()),
        },
        "/mode" => match rest[..] {
            ["navigation" | "nav"] => ReplCommand::Mode(ControlMode::Navigation),
            ["manipulation" | "manip"] => ReplCommand::Mode(ControlMode::Manipulation),
            _ => return Err("usage: /mode navigation|manipulation".into()),
        },
        "/stop" => ReplCommand::Stop,
        "/run" => {
            let (task, args) = rest.split_first().ok_or("usage: /run <task> [args]")?;
            ReplCommand::Run { task: task.to_string(), args: args.iter().map(|a| a.to_string()).collect() }
        }
        "/tasks" => ReplCommand::Tasks,
        "/map" => ReplCommand::Map,
        "/save" => match rest[..] {
            [path] => ReplCommand::Save(PathBuf::from(path)),
            _ => return Err("usage: /save <file>".into()),
        },
        "/quit" | "/exit" => ReplCommand::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(cmd)
}

fn pose_args(rest: &[&str]) -> Result<Pose2, String> {
    let nums = rest
        .iter()
        .map(|w| w.parse::<f32>().map_err(|_| format!("'{w}' is not a number")))
        .collect::<Result<Vec<_>, _>>()?;
    match nums[..] {
        [x, y] => Ok(Pose2::new(x, y, 0.0)),
        [x, y, theta] => Ok(Pose2::new(x, y, theta)),
        _ => Err("expected x y [theta]".into()),
    }
}

/// Entry point for the interactive REPL. Blocks the calling thread; async
/// work is driven on `rt`.
pub fn run(rt: &Handle, engine: &TaskEngine) {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("{}: {e}", "Terminal error".red());
            return;
        }
    };

    loop {
        let line = match editor.readline(&format!("{} ", "reach>".bold().cyan())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {e}", "Read error".red());
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let cmd = match parse_command(line) {
            Ok(cmd) => cmd,
            Err(msg) => {
                println!("{} {}. Type {} for available commands.", "✗".red(), msg.yellow(), "/help".bold());
                continue;
            }
        };
        if cmd == ReplCommand::Quit {
            println!("{}", "Goodbye.".green());
            break;
        }
        if let Err(e) = rt.block_on(execute(engine, cmd)) {
            println!("{}: {e}", "Error".red());
        }
    }
}

async fn execute(engine: &TaskEngine, cmd: ReplCommand) -> Result<(), ReachError> {
    let client = engine.client();
    match cmd {
        ReplCommand::Help => print_help(),
        ReplCommand::State => match client.get_state() {
            Some(state) => print_state(&state),
            None => println!("  {}", "no state received yet".yellow()),
        },
        ReplCommand::MoveTo(pose) => print_state(&client.move_to(pose).await?),
        ReplCommand::MoveBy(delta) => print_state(&client.move_by(delta).await?),
        ReplCommand::Arm { joint, value } => {
            let mut joints = client
                .get_state()
                .map(|s| s.joint_positions)
                .ok_or_else(|| ReachError::LinkDown("no state received yet".into()))?;
            if joints.len() <= joint {
                joints.resize(ARM_JOINT_NAMES.len(), 0.0);
            }
            joints[joint] = value;
            print_state(&client.move_arm(joints).await?);
        }
        ReplCommand::Gripper { open: true } => print_state(&client.open_gripper().await?),
        ReplCommand::Gripper { open: false } => print_state(&client.close_gripper().await?),
        ReplCommand::Mode(mode) => print_state(&client.set_mode(mode).await?),
        ReplCommand::Stop => {
            client.stop().await?;
            println!("  {}", "✓ stopped".green());
        }
        ReplCommand::Run { task, args } => {
            let report = engine.launch(&task, &args).await?;
            if report.succeeded() {
                print!("{}", report.to_string().green());
            } else {
                print!("{}", report.to_string().red());
            }
        }
        ReplCommand::Tasks => {
            for name in engine.registry().names() {
                println!("  {}", name.bold());
            }
        }
        ReplCommand::Map => {
            let map = engine.map().read();
            let stats = map.stats();
            println!(
                "  {} cells ({} occupied, {} free), {} instances",
                stats.cells, stats.occupied, stats.free, stats.instances
            );
            for inst in map.instances() {
                let c = inst.extent.centre();
                println!("    #{} {} at ({:.2}, {:.2}, {:.2})", inst.id, inst.category.bold(), c.x, c.y, c.z);
            }
        }
        ReplCommand::Save(path) => {
            let snapshot = engine.map().snapshot();
            snapshot.save(&path)?;
            println!("  {} {} cells to {}", "✓ saved".green(), snapshot.len(), path.display());
        }
        ReplCommand::Quit => {}
    }
    Ok(())
}

fn print_help() {
    println!();
    println!("{}", "reach commands".bold().underline());
    println!("  {}            – latest robot state", "/state".bold().cyan());
    println!("  {}   – drive to an absolute pose", "/move x y [theta]".bold().cyan());
    println!("  {} – drive relative to the robot", "/moveby dx dy [dth]".bold().cyan());
    println!("  {}    – move one arm joint ({})", "/arm joint value".bold().cyan(), ARM_JOINT_NAMES.join(", "));
    println!("  {}  – open or close the gripper", "/gripper open|close".bold().cyan());
    println!("  {}       – navigation or manipulation posture", "/mode <mode>".bold().cyan());
    println!("  {}             – stop immediately", "/stop".bold().cyan());
    println!("  {}  – run a task (see /tasks)", "/run task [args]".bold().cyan());
    println!("  {}      – map statistics, {} – write a snapshot", "/map".bold().cyan(), "/save file".bold().cyan());
    println!("  {}      – exit the shell", "/quit  /exit".bold().cyan());
    println!();
}

pub fn print_state(state: &RobotState) {
    let p = state.base_pose;
    println!(
        "  pose ({:.2}, {:.2}, {:.2} rad)  mode {}  battery {}%",
        p.x, p.y, p.theta, state.control_mode, state.battery_percent
    );
    let joints: Vec<String> = ARM_JOINT_NAMES
        .iter()
        .zip(&state.joint_positions)
        .map(|(name, v)| format!("{name}={v:.2}"))
        .collect();
    println!("  joints {}", joints.join(" "));
    let grip = if state.gripper.holding { "holding".green() } else { "empty".normal() };
    println!("  gripper {:.2} ({grip})  seq {}  at_goal {}", state.gripper.position, state.last_executed_seq, state.at_goal);
    if !state.faults.is_empty() {
        println!("  {} {}", "faults:".red().bold(), state.faults.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_motion_commands() -> Result<(), String> {
        assert_eq!(parse_command("/move 1 2 0.5")?, ReplCommand::MoveTo(Pose2::new(1.0, 2.0, 0.5)));
        assert_eq!(parse_command("/moveby 0.5 0")?, ReplCommand::MoveBy(Pose2::new(0.5, 0.0, 0.0)));
        assert_eq!(parse_command("/arm Lift 0.7")?, ReplCommand::Arm { joint: 0, value: 0.7 });
        assert_eq!(parse_command("/gripper close")?, ReplCommand::Gripper { open: false });
        assert_eq!(parse_command("/mode manip")?, ReplCommand::Mode(ControlMode::Manipulation));
        Ok(())
    }

    #[test]
    fn run_keeps_task_arguments() -> Result<(), String> {
        assert_eq!(
            parse_command("/run pickup cup")?,
            ReplCommand::Run { task: "pickup".into(), args: vec!["cup".into()] }
        );
        assert_eq!(parse_command("/run explore")?, ReplCommand::Run { task: "explore".into(), args: vec![] });
        Ok(())
    }

    #[test]
    fn bad_input_reports_why() {
        assert!(parse_command("/move 1").is_err());
        assert!(parse_command("/move one two").is_err());
        assert!(parse_command("/arm elbow 1").is_err_and(|e| e.contains("unknown joint")));
        assert!(parse_command("/gripper half").is_err());
        assert!(parse_command("/run").is_err());
        assert!(parse_command("/dance").is_err_and(|e| e.contains("/dance")));
    }
}
