//! Parsing of the interactive command line.

use thiserror::Error;

pub const HELP: &str = "\
commands:
  run | r                      continue to the next breakpoint
  step | s                     step into
  next | n                     step over
  out | o                      step out
  stop                         end the script
  detach                       let the script run on without the debugger
  status                       ask the engine for its status
  stack | bt                   show the call stack
  ctx [depth] [context]        show the variables of a context
  props <fullname> [context]   expand a property
  eval <expr>                  evaluate an expression
  set <fullname> <value>       assign to a property
  source <file> [begin] [end]  show source lines
  break <file> <line> [cond]   set a line breakpoint
  enable <id> | disable <id>   toggle a breakpoint
  delete <id>                  remove a breakpoint
  breaks                       list breakpoints
  feature <name> [value]       read or set an engine feature
  help                         this text
  quit | q                     detach and exit";

/// A command typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Run,
    StepInto,
    StepOver,
    StepOut,
    Stop,
    Detach,
    Status,
    Stack,
    Context {
        depth: Option<u32>,
        context: Option<u32>,
    },
    Props {
        fullname: String,
        context: Option<u32>,
    },
    Eval(String),
    Set {
        fullname: String,
        value: String,
    },
    Source {
        file: String,
        begin: Option<u32>,
        end: Option<u32>,
    },
    Break {
        file: String,
        line: u32,
        condition: Option<String>,
    },
    Enable(String),
    Disable(String),
    Delete(String),
    Breaks,
    Feature {
        name: String,
        value: Option<String>,
    },
    Help,
    Quit,
}

impl ReplCommand {
    /// Commands that resume the script and answer only once it stops again.
    pub fn is_continuation(&self) -> bool {
        matches!(
            self,
            ReplCommand::Run
                | ReplCommand::StepInto
                | ReplCommand::StepOver
                | ReplCommand::StepOut
                | ReplCommand::Stop
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("not a number: '{0}'")]
    Number(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ReplCommand>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match word {
        "run" | "r" | "c" => ReplCommand::Run,
        "step" | "s" => ReplCommand::StepInto,
        "next" | "n" => ReplCommand::StepOver,
        "out" | "o" => ReplCommand::StepOut,
        "stop" => ReplCommand::Stop,
        "detach" => ReplCommand::Detach,
        "status" => ReplCommand::Status,
        "stack" | "bt" => ReplCommand::Stack,
        "ctx" => ReplCommand::Context {
            depth: number_at(&args, 0)?,
            context: number_at(&args, 1)?,
        },
        "props" => match args.as_slice() {
            [fullname] | [fullname, _] => ReplCommand::Props {
                fullname: fullname.to_string(),
                context: number_at(&args, 1)?,
            },
            _ => return Err(ParseError::Usage("props <fullname> [context]")),
        },
        "eval" | "p" if !rest.is_empty() => ReplCommand::Eval(rest.to_string()),
        "eval" | "p" => return Err(ParseError::Usage("eval <expr>")),
        "set" => match rest.split_once(char::is_whitespace) {
            Some((fullname, value)) if !value.trim().is_empty() => ReplCommand::Set {
                fullname: fullname.to_string(),
                value: value.trim().to_string(),
            },
            _ => return Err(ParseError::Usage("set <fullname> <value>")),
        },
        "source" => match args.first() {
            Some(file) => ReplCommand::Source {
                file: file_uri(file),
                begin: number_at(&args, 1)?,
                end: number_at(&args, 2)?,
            },
            None => return Err(ParseError::Usage("source <file> [begin] [end]")),
        },
        "break" | "b" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            let (Some(file), Some(line)) = (parts.next(), parts.next()) else {
                return Err(ParseError::Usage("break <file> <line> [condition]"));
            };
            ReplCommand::Break {
                file: file_uri(file),
                line: number(line)?,
                condition: parts
                    .next()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string),
            }
        }
        "enable" => ReplCommand::Enable(one_id(&args, "enable <id>")?),
        "disable" => ReplCommand::Disable(one_id(&args, "disable <id>")?),
        "delete" | "d" => ReplCommand::Delete(one_id(&args, "delete <id>")?),
        "breaks" => ReplCommand::Breaks,
        "feature" => match args.as_slice() {
            [name] => ReplCommand::Feature {
                name: name.to_string(),
                value: None,
            },
            [name, value] => ReplCommand::Feature {
                name: name.to_string(),
                value: Some(value.to_string()),
            },
            _ => return Err(ParseError::Usage("feature <name> [value]")),
        },
        "help" | "h" | "?" => ReplCommand::Help,
        "quit" | "q" | "exit" => ReplCommand::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Turn a local path into a `file://` URI; URIs pass through.
pub fn file_uri(path: &str) -> String {
    if path.contains("://") {
        return path.to_string();
    }
    let absolute = std::path::Path::new(path);
    let absolute = if absolute.is_absolute() {
        absolute.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(absolute))
            .unwrap_or_else(|_| absolute.to_path_buf())
    };
    format!("file://{}", absolute.display())
}

fn number(text: &str) -> Result<u32, ParseError> {
    text.parse().map_err(|_| ParseError::Number(text.to_string()))
}

fn number_at(args: &[&str], index: usize) -> Result<Option<u32>, ParseError> {
    args.get(index).map(|a| number(a)).transpose()
}

fn one_id(args: &[&str], usage: &'static str) -> Result<String, ParseError> {
    match args {
        [id] => Ok(id.to_string()),
        _ => Err(ParseError::Usage(usage)),
    }
}
