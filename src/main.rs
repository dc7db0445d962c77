mod repl;

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dbgp_config::{load_default, Config, FeatureConfig};
use dbgp_platform::{ensure_dir, DefaultPaths, PlatformPaths};
use dbgp_proto::{
    Breakpoint, BreakpointState, ConnectOptions, DbgpError, Listener, Property, SessionEvent,
    SessionHandle, SessionOptions,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::repl::ReplCommand;

type Input = Lines<BufReader<Stdin>>;

/// What to do once a session loop returns.
enum Flow {
    NextSession,
    Quit,
}

fn init_logging(paths: &DefaultPaths, config: &Config) -> Result<()> {
    let log_path = config.log.file.clone().unwrap_or_else(|| paths.log_file());
    if let Some(dir) = log_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        ensure_dir(dir)?;
    }
    let log_file = std::fs::File::create(&log_path)
        .with_context(|| format!("cannot create log file {}", log_path.display()))?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.as_str()));

    // stdout is the prompt, so logs go to a file.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

async fn run(port: Option<u16>) -> Result<()> {
    let paths = DefaultPaths::new().context("failed to detect platform paths")?;
    let project_dir = env::current_dir().ok();
    let (config, config_error) = match load_default(project_dir.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    init_logging(&paths, &config)?;
    if let Some(e) = config_error {
        error!(error = %e, "config load failed, using defaults");
        eprintln!("dbgp: config load failed, using defaults: {e}");
    }

    let mut listen = config.listen.clone();
    if let Some(port) = port {
        listen.port = port;
    }
    let options = ConnectOptions {
        session: SessionOptions {
            break_on_first_line: config.session.break_on_first_line,
        },
        command_timeout: Duration::from_secs(config.session.command_timeout_secs),
        continuation_timeout: config.session.continuation_timeout(),
    };
    let listener = Listener::bind(listen.addr(), options)
        .await
        .with_context(|| format!("cannot listen on {}", listen.addr()))?;
    println!(
        "waiting for engines on {} (ide key {})",
        listener.local_addr()?,
        config.session.ide_key
    );

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            line = input.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                match repl::parse(&line) {
                    Ok(Some(ReplCommand::Quit)) => return Ok(()),
                    Ok(Some(ReplCommand::Help)) => println!("{}", repl::HELP),
                    Ok(None) => {}
                    _ => println!("no engine connected yet"),
                }
                continue;
            }
        };
        let (handle, events, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        println!("engine connected from {peer}");

        match drive_session(&handle, events, &mut input, &config.features).await? {
            Flow::NextSession => println!("session closed, waiting for the next engine"),
            Flow::Quit => return Ok(()),
        }
    }
}

async fn drive_session(
    handle: &SessionHandle,
    mut events: UnboundedReceiver<SessionEvent>,
    input: &mut Input,
    features: &FeatureConfig,
) -> Result<Flow> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                None | Some(SessionEvent::Closed) => return Ok(Flow::NextSession),
                Some(event) => on_event(handle, event, features).await,
            },
            line = input.next_line() => {
                let Some(line) = line? else {
                    handle.close().await;
                    return Ok(Flow::Quit);
                };
                match repl::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(ReplCommand::Quit)) => {
                        if !handle.is_closed().await {
                            if let Err(e) = handle.detach().await {
                                warn!(error = %e, "detach failed");
                            }
                        }
                        handle.close().await;
                        return Ok(Flow::Quit);
                    }
                    Ok(Some(command)) if command.is_continuation() => {
                        // Replies arrive only once the script stops again.
                        let handle = handle.clone();
                        tokio::spawn(async move {
                            match execute(&handle, command).await {
                                Ok(()) | Err(DbgpError::SessionClosed) => {}
                                Err(e) => println!("error: {e}"),
                            }
                        });
                    }
                    Ok(Some(command)) => {
                        if let Err(e) = execute(handle, command).await {
                            println!("error: {e}");
                        }
                    }
                    Err(e) => println!("{e}"),
                }
            }
        }
    }
}

async fn on_event(handle: &SessionHandle, event: SessionEvent, features: &FeatureConfig) {
    match event {
        SessionEvent::Ready(identity) => {
            println!(
                "{} {} debugging {} ({}, app {})",
                identity.engine.name,
                identity.engine.version,
                identity.file_uri,
                identity.language,
                identity.app_id
            );
            for (name, value) in features.pairs() {
                if let Err(e) = handle.feature_set(name, value).await {
                    warn!(error = %e, feature = name, "feature not applied");
                    println!("feature {name} not applied: {e}");
                }
            }
        }
        SessionEvent::StatusChanged(status) => println!("[{status}]"),
        SessionEvent::Break => match handle.stack_get(Some(0)).await {
            Ok(frames) => {
                if let Some(frame) = frames.first() {
                    println!("at {} {}:{}", frame.location, frame.filename, frame.lineno);
                }
            }
            Err(e) => debug!(error = %e, "could not read the current frame"),
        },
        SessionEvent::Error(e) => println!("engine error: {e}"),
        SessionEvent::Unhandled(name) => debug!(element = %name, "ignored engine message"),
        _ => {}
    }
}

async fn execute(handle: &SessionHandle, command: ReplCommand) -> Result<(), DbgpError> {
    match command {
        ReplCommand::Run => {
            handle.run().await?;
        }
        ReplCommand::StepInto => {
            handle.step_into().await?;
        }
        ReplCommand::StepOver => {
            handle.step_over().await?;
        }
        ReplCommand::StepOut => {
            handle.step_out().await?;
        }
        ReplCommand::Stop => {
            handle.stop().await?;
        }
        ReplCommand::Detach => handle.detach().await?,
        ReplCommand::Status => println!("{}", handle.status().await?),
        ReplCommand::Stack => {
            for frame in handle.stack_get(None).await? {
                println!(
                    "#{} {} {}:{}",
                    frame.level, frame.location, frame.filename, frame.lineno
                );
            }
        }
        ReplCommand::Context { depth, context } => {
            for property in handle.context_get(depth, context).await? {
                print_property(&property, 0);
            }
        }
        ReplCommand::Props { fullname, context } => {
            for property in handle.child_properties(&fullname, context).await? {
                print_property(&property, 0);
            }
        }
        ReplCommand::Eval(expression) => match handle.eval(&expression).await? {
            Some(property) => print_property(&property, 0),
            None => println!("(no value)"),
        },
        ReplCommand::Set { fullname, value } => {
            let property = handle.property_set(&fullname, &value, None, None).await?;
            print_property(&property, 0);
        }
        ReplCommand::Source { file, begin, end } => {
            let text = handle.source(&file, begin, end).await?;
            let first = begin.unwrap_or(1);
            for (offset, line) in text.lines().enumerate() {
                println!("{:>5} {line}", first as usize + offset);
            }
        }
        ReplCommand::Break {
            file,
            line,
            condition,
        } => {
            let breakpoint = match condition {
                Some(condition) => Breakpoint::conditional(file, line, condition),
                None => Breakpoint::line(file, line),
            };
            let id = handle.breakpoint_set(&breakpoint).await?;
            println!("breakpoint {id} set");
        }
        ReplCommand::Enable(id) => {
            handle
                .breakpoint_update(&id, Some(BreakpointState::Enabled), None, None, None)
                .await?
        }
        ReplCommand::Disable(id) => {
            handle
                .breakpoint_update(&id, Some(BreakpointState::Disabled), None, None, None)
                .await?
        }
        ReplCommand::Delete(id) => handle.breakpoint_remove(&id).await?,
        ReplCommand::Breaks => {
            for bp in handle.breakpoint_list().await? {
                let kind = bp.kind.map(|k| k.as_str()).unwrap_or("?");
                let location = match (&bp.filename, bp.lineno) {
                    (Some(file), Some(line)) => format!("{file}:{line}"),
                    _ => bp
                        .function
                        .or(bp.exception)
                        .or(bp.expression)
                        .unwrap_or_default(),
                };
                println!(
                    "{} {kind} {} {location} (hits {})",
                    bp.id,
                    bp.state.as_str(),
                    bp.hit_count
                );
            }
        }
        ReplCommand::Feature { name, value: None } => {
            println!("{name} = {}", handle.feature_get(&name).await?)
        }
        ReplCommand::Feature {
            name,
            value: Some(value),
        } => handle.feature_set(&name, value.as_str()).await?,
        ReplCommand::Help => println!("{}", repl::HELP),
        ReplCommand::Quit => {}
    }
    Ok(())
}

fn print_property(property: &Property, indent: usize) {
    let pad = " ".repeat(indent);
    let type_name = match &property.classname {
        Some(class) => format!("{} {class}", property.type_name),
        None => property.type_name.clone(),
    };
    if property.has_children {
        println!(
            "{pad}{} ({type_name}) [{}]",
            property.name, property.num_children
        );
    } else {
        println!("{pad}{} ({type_name}) = {}", property.name, property.value);
    }
    for child in &property.children {
        print_property(child, indent + 2);
    }
}

#[tokio::main]
async fn main() {
    let port = match env::args().nth(1).map(|p| p.parse::<u16>()) {
        None => None,
        Some(Ok(port)) => Some(port),
        Some(Err(e)) => {
            eprintln!("usage: dbgp [port] ({e})");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(port).await {
        eprintln!("dbgp: {:#}", e);
        std::process::exit(1);
    }
    info!("exiting");
}
