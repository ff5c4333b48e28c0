use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::MissedTickBehavior;

use crate::config::Settings;
use crate::controller::{Controller, ControllerBuilder, ControllerError, ControllerState};
use crate::device::SimulatedDevice;
use crate::executor::Registry;
use crate::logging::LogLevel;
use crate::parser::parse_module;
use crate::parser::semantic_validator::validate_module;
use crate::program::ScriptProgram;

#[derive(Parser)]
#[command(name = "synchro")]
#[command(about = "Synchro - A synchronous reactive engine for robot control programs", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program against the simulated device and print its command log
    Run {
        /// Module files; the first one is the main module (default: program.modules)
        files: Vec<PathBuf>,

        /// Module holding the entry activity
        #[arg(long)]
        main: Option<String>,

        /// Number of clock ticks to run (default: 100)
        #[arg(long, default_value = "100")]
        ticks: u64,

        /// Key press at a given tick, as TICK:KEY (repeatable)
        #[arg(long = "key")]
        keys: Vec<KeyEvent>,

        /// Drive the clock in real time and read keys from stdin
        #[arg(long)]
        realtime: bool,
    },

    /// Parse, validate and link modules, printing diagnostics
    Check {
        /// Module files; the first one is the main module
        files: Vec<PathBuf>,

        /// Module holding the entry activity
        #[arg(long)]
        main: Option<String>,
    },

    /// Dump a module's syntax tree as JSON
    Ast {
        /// Module file
        file: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

/// A scripted key press
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub tick: u64,
    pub key: String,
}

impl FromStr for KeyEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tick, key) = s
            .split_once(':')
            .ok_or_else(|| format!("expected TICK:KEY, got '{}'", s))?;
        let tick = tick
            .trim()
            .parse()
            .map_err(|_| format!("invalid tick '{}'", tick))?;
        if key.is_empty() {
            return Err("key must not be empty".to_string());
        }
        Ok(KeyEvent {
            tick,
            key: key.to_string(),
        })
    }
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load configuration before any command so config errors show first
    let settings = Settings::builder().config_path(cli.config.as_ref()).build()?;
    init_tracing(&settings.logging.filter);

    match cli.command {
        Commands::Run {
            files,
            main,
            ticks,
            keys,
            realtime,
        } => {
            let files = module_files(files, &settings)?;
            let mut config = settings.controller_config();
            if main.is_some() {
                config.main_module = main;
            }

            let program = ScriptProgram::from_files(&files)?;
            let frequency = config.tick_frequency.round().max(1.0) as u32;
            let device = SimulatedDevice::new(settings.device.selector, frequency)
                .with_latency(settings.device.latency_ticks);
            let controller = ControllerBuilder::new(program)
                .config(config)
                .device(device.clone())
                .log_sink(|level: LogLevel, message: &str| println!("[{}] {}", level, message))
                .build();

            let state = if realtime {
                println!("Reading keys from stdin, one per line (Ctrl-C to stop)");
                let stdin = tokio::io::BufReader::new(tokio::io::stdin());
                tokio::select! {
                    state = drive_realtime(controller.clone(), stdin, None) => state?,
                    _ = tokio::signal::ctrl_c() => {
                        controller.stop();
                        controller.state()
                    }
                }
            } else {
                let state = simulate(&controller, ticks, &keys)?;
                if state.is_running() {
                    controller.stop();
                }
                controller.state()
            };

            println!("\nCommands:");
            for issued in device.issued() {
                println!("  {:>6}  {}", issued.clock, serde_json::to_string(&issued.command)?);
            }
            println!("\nClock: {}", controller.clock());
            println!("State: {}", serde_json::to_string(&state)?);

            if let ControllerState::Failed { error } = state {
                bail!("program failed: {}", error);
            }
        }

        Commands::Check { files, main } => {
            let files = module_files(files, &settings)?;
            let mut modules = Vec::new();
            let mut errors = 0;

            for path in &files {
                let source = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let module = match parse_module(&source, &module_name(path)) {
                    Ok(module) => module,
                    Err(e) => {
                        println!("{}: {}", path.display(), e);
                        errors += 1;
                        continue;
                    }
                };
                for diagnostic in validate_module(&module, &source) {
                    if diagnostic.is_error() {
                        errors += 1;
                    }
                    println!("{}: {}", path.display(), diagnostic);
                }
                modules.push(module);
            }

            if errors > 0 {
                bail!("{} error(s) found", errors);
            }

            let main = main
                .or(settings.program.main_module.clone())
                .or_else(|| modules.first().map(|m| m.name.clone()))
                .context("no modules to check")?;
            let registry = Registry::link(modules, &main, &settings.program.entry)?;
            println!(
                "✓ {} module(s), {} activities, entry {}.{}",
                files.len(),
                registry.len(),
                main,
                settings.program.entry
            );
        }

        Commands::Ast { file } => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let module = parse_module(&source, &module_name(&file))?;
            println!("{}", serde_json::to_string_pretty(&module)?);
        }

        Commands::Config => {
            print!("{}", settings.to_toml()?);
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured filter
fn init_tracing(filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn module_files(files: Vec<PathBuf>, settings: &Settings) -> Result<Vec<PathBuf>> {
    if !files.is_empty() {
        return Ok(files);
    }
    if settings.program.modules.is_empty() {
        bail!("no module files given and program.modules is not configured");
    }
    Ok(settings.program.modules.clone())
}

fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string())
}

/* ===================== Drivers ===================== */

/// Start the program and tick it `ticks` times, pressing scripted keys
///
/// A key scripted for tick 0 is visible to the start reaction. Stops early
/// once the program terminates.
pub fn simulate(
    controller: &Controller,
    ticks: u64,
    keys: &[KeyEvent],
) -> Result<ControllerState, ControllerError> {
    let input = controller.input();
    let press = |tick: u64| {
        if let Some(event) = keys.iter().find(|k| k.tick == tick) {
            input.press(event.key.clone());
        }
    };

    press(0);
    controller.start()?;
    for tick in 1..=ticks {
        if !controller.state().is_running() {
            break;
        }
        press(tick);
        controller.tick()?;
    }
    Ok(controller.state())
}

/// Tick at the configured frequency and trigger a reaction per input line
///
/// Runs until the program terminates or, with `limit`, until that many clock
/// ticks have passed; a program still running then is stopped.
pub async fn drive_realtime<R>(
    controller: Controller,
    reader: R,
    limit: Option<u64>,
) -> Result<ControllerState>
where
    R: AsyncBufRead + Unpin,
{
    controller.config().validate()?;
    let period = Duration::from_secs_f64(1.0 / controller.config().tick_frequency);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    interval.tick().await;

    controller.start()?;
    let mut lines = reader.lines();
    let mut input_open = true;

    while controller.state().is_running() {
        tokio::select! {
            _ = interval.tick() => {
                controller.tick()?;
                if limit.is_some_and(|n| controller.clock() >= n) {
                    break;
                }
            }
            line = lines.next_line(), if input_open => {
                match line? {
                    Some(line) => {
                        let key = line.trim();
                        if key.is_empty() {
                            continue;
                        }
                        controller.input().press(key);
                        controller.trigger()?;
                    }
                    None => input_open = false,
                }
            }
        }
    }

    if controller.state().is_running() {
        controller.stop();
    }
    tracing::debug!(clock = controller.clock(), "realtime driver finished");
    Ok(controller.state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerConfig;
    use crate::device::{Color, Command, DeviceSelector};
    use crate::executor::Val;
    use crate::logging::MemoryLog;

    fn controller(source: &str, tick_frequency: f64) -> (Controller, SimulatedDevice, MemoryLog) {
        let device = SimulatedDevice::new(DeviceSelector::Simulated, tick_frequency as u32);
        let log = MemoryLog::new();
        let controller = ControllerBuilder::new(ScriptProgram::new().with_source("main", source))
            .config(ControllerConfig {
                tick_frequency,
                ..ControllerConfig::default()
            })
            .device(device.clone())
            .log_sink(log.clone())
            .build();
        (controller, device, log)
    }

    #[test]
    fn test_key_event_parsing() {
        assert_eq!(
            "12:q".parse::<KeyEvent>().unwrap(),
            KeyEvent {
                tick: 12,
                key: "q".to_string()
            }
        );
        assert!("q".parse::<KeyEvent>().is_err());
        assert!("x:q".parse::<KeyEvent>().is_err());
        assert!("3:".parse::<KeyEvent>().is_err());
    }

    #[test]
    fn test_cli_arguments() {
        let cli = Cli::parse_from([
            "synchro", "run", "a.syncs", "b.syncs", "--ticks", "30", "--key", "5:q", "--key",
            "0:w", "--config", "robot.toml",
        ]);
        assert_eq!(cli.config.as_deref(), Some("robot.toml"));
        let Commands::Run {
            files, ticks, keys, realtime, ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(files.len(), 2);
        assert_eq!(ticks, 30);
        assert_eq!(keys[1].tick, 0);
        assert!(!realtime);
    }

    #[test]
    fn test_simulate_presses_scripted_keys() {
        let (controller, device, log) = controller(
            r#"
activity Main() {
    defer { run SetMainLED("black") }
    run SetMainLED("red")
    when (input.key == "q") abort {
        nowAndEvery (input.pressed) { log.info("key " + input.key) }
    }
}
"#,
            10.0,
        );
        let keys = vec![
            KeyEvent { tick: 0, key: "w".into() },
            KeyEvent { tick: 4, key: "q".into() },
        ];
        let state = simulate(&controller, 20, &keys).unwrap();
        assert_eq!(state, ControllerState::Finished { result: Val::Null });
        assert_eq!(controller.clock(), 4);
        assert_eq!(log.messages(), vec!["key w"]);
        assert_eq!(device.main_led(), Color::BLACK);
    }

    /* ===================== Demo programs ===================== */

    fn demo(name: &str) -> (Controller, SimulatedDevice, MemoryLog) {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("demos")
            .join(format!("{}.syncs", name));
        let device = SimulatedDevice::new(DeviceSelector::Simulated, 10);
        let log = MemoryLog::new();
        let controller = ControllerBuilder::new(ScriptProgram::from_files(&[path]).unwrap())
            .device(device.clone())
            .log_sink(log.clone())
            .build();
        (controller, device, log)
    }

    fn key(tick: u64, key: &str) -> KeyEvent {
        KeyEvent {
            tick,
            key: key.to_string(),
        }
    }

    #[test]
    fn test_demo_blink() {
        let (controller, device, log) = demo("blink");
        let state = simulate(&controller, 25, &[]).unwrap();
        assert!(state.is_running());
        assert_eq!(log.messages(), vec!["Blinks the main LED red once per second until stopped."]);
        assert_eq!(device.main_led(), Color::new(255, 0, 0));
        controller.stop();
        assert_eq!(device.main_led(), Color::BLACK);
        assert_eq!(device.issued().len(), 4);
    }

    #[test]
    fn test_demo_abort_on_key() {
        let (controller, device, log) = demo("abort_on_key");
        let state = simulate(&controller, 100, &[key(25, "q")]).unwrap();
        assert_eq!(state, ControllerState::Finished { result: Val::Null });
        assert_eq!(log.messages().last().map(String::as_str), Some("stopped at 25"));
        assert!(!device.is_rolling());
        assert_eq!(device.main_led(), Color::BLACK);
        assert!(device.issued().iter().all(|c| c.clock <= 25));
    }

    #[test]
    fn test_demo_manual_drive() {
        let (controller, device, log) = demo("manual_drive");
        let keys = [key(1, "w"), key(2, "w"), key(3, "d"), key(5, "q")];
        let state = simulate(&controller, 10, &keys).unwrap();
        assert_eq!(state, ControllerState::Finished { result: Val::Null });
        assert_eq!(log.messages().last().map(String::as_str), Some("bye"));

        let rolls: Vec<_> = device
            .issued()
            .into_iter()
            .filter_map(|c| match c.command {
                Command::Roll { speed, heading, .. } => Some((c.clock, speed, heading)),
                _ => None,
            })
            .collect();
        assert_eq!(rolls, vec![(0, 0, 0), (1, 50, 0), (2, 100, 0), (3, 100, 90)]);
        assert_eq!(device.commands().last(), Some(&Command::StopRoll));
        assert!(!device.is_rolling());
    }

    #[test]
    fn test_demo_sensor_square() {
        let (controller, device, log) = demo("sensor_square");
        let state = simulate(&controller, 100, &[]).unwrap();
        assert_eq!(state, ControllerState::Finished { result: Val::Null });
        assert!(log.messages().last().unwrap().starts_with("square done at "));

        let headings: Vec<_> = device
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::Roll { heading, .. } => Some(heading),
                _ => None,
            })
            .collect();
        assert_eq!(headings, vec![0, 90, 180, 270]);
        let (x, y) = device.position();
        assert!(x.abs() < 0.25 && y.abs() < 0.25, "ended at ({}, {})", x, y);
        assert!(!device.is_streaming());
    }

    #[tokio::test]
    async fn test_realtime_triggers_on_input_lines() {
        let (controller, _, log) = controller(
            r#"
activity Main() {
    await (input.key == "a" && !clock.tick)
    log.info("got a")
}
"#,
            100.0,
        );
        let reader = tokio::io::BufReader::new(&b"\na\n"[..]);
        let state = drive_realtime(controller.clone(), reader, None).await.unwrap();
        assert_eq!(state, ControllerState::Finished { result: Val::Null });
        assert_eq!(log.messages(), vec!["got a"]);
    }

    #[tokio::test]
    async fn test_realtime_stops_at_limit() {
        let (controller, _, log) = controller(
            "activity Main() { defer { log.info(\"cleanup\") }\n halt }",
            100.0,
        );
        let reader = tokio::io::BufReader::new(tokio::io::empty());
        let state = drive_realtime(controller.clone(), reader, Some(3)).await.unwrap();
        assert_eq!(state, ControllerState::Stopped);
        assert_eq!(controller.clock(), 3);
        assert_eq!(log.messages(), vec!["cleanup"]);
    }

    #[tokio::test]
    async fn test_realtime_rejects_zero_tick_frequency() {
        let controller = ControllerBuilder::new(
            ScriptProgram::new().with_source("main", "activity Main() { halt }"),
        )
        .config(ControllerConfig {
            tick_frequency: 0.0,
            ..ControllerConfig::default()
        })
        .log_sink(MemoryLog::new())
        .build();
        let reader = tokio::io::BufReader::new(tokio::io::empty());
        let error = drive_realtime(controller.clone(), reader, Some(3))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("tick frequency"));
        assert_eq!(controller.state(), ControllerState::Idle);
    }
}
