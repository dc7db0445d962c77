//! DBGP command serialization.
//!
//! Commands travel from the client to the engine as a single line:
//! `<name> -i <transaction id> [-<flag> <value>]... [-- <base64 data>]`
//! followed by a NUL byte.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::DbgpError;
use crate::frame::NUL;

/// Value of a single command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// A string; quoted on the wire unless it is a bare token.
    Str(String),
    /// An integer, always rendered bare.
    Int(i64),
    /// No value. The argument is left out of the command line.
    Absent,
}

impl ArgValue {
    /// Whether this argument should be written at all.
    pub fn is_present(&self) -> bool {
        !matches!(self, ArgValue::Absent)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Str(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Str(value)
    }
}

impl From<&String> for ArgValue {
    fn from(value: &String) -> Self {
        ArgValue::Str(value.clone())
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

macro_rules! int_arg {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ArgValue {
                fn from(value: $ty) -> Self {
                    ArgValue::Int(i64::from(value))
                }
            }
        )*
    };
}

int_arg!(i8, i16, i32, i64, u8, u16, u32);

impl From<usize> for ArgValue {
    fn from(value: usize) -> Self {
        ArgValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ArgValue::Absent, Into::into)
    }
}

/// An outbound command, before serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// Transaction id. Required; zero is valid.
    pub seq: Option<u32>,
    /// Command name, e.g. `property_get`.
    pub name: String,
    /// Arguments in the order they are written.
    pub args: Vec<(String, ArgValue)>,
    /// Optional data, sent base64-encoded after `--`.
    pub payload: Option<String>,
}

impl Command {
    /// Start building a command with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the transaction id.
    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Append an argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    /// Attach a data payload.
    pub fn payload(mut self, data: impl Into<String>) -> Self {
        self.payload = Some(data.into());
        self
    }

    /// Check the command for fields the engine could not parse.
    pub fn validate(&self) -> Result<(), DbgpError> {
        if self.seq.is_none() {
            return Err(DbgpError::Validation(
                "missing required field 'seq'".into(),
            ));
        }
        if self.name.is_empty() {
            return Err(DbgpError::Validation(
                "missing required field 'command'".into(),
            ));
        }
        if !is_bare_token(&self.name) {
            return Err(DbgpError::Validation(format!(
                "invalid command name '{}'",
                self.name
            )));
        }
        for (key, _) in &self.args {
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(DbgpError::Validation(format!(
                    "invalid argument key '{key}'"
                )));
            }
            if key == "i" {
                return Err(DbgpError::Validation(
                    "argument key 'i' is reserved for the transaction id".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Serialize a command into its wire form, terminator included.
pub fn write_command(command: &Command) -> Result<Vec<u8>, DbgpError> {
    command.validate()?;
    let seq = command.seq.unwrap_or_default();

    let mut line = format!("{} -i {}", command.name, seq);
    for (key, value) in &command.args {
        match value {
            ArgValue::Absent => continue,
            ArgValue::Int(n) => {
                line.push_str(&format!(" -{key} {n}"));
            }
            ArgValue::Str(s) => {
                line.push_str(&format!(" -{key} "));
                push_string(&mut line, s);
            }
        }
    }
    if let Some(data) = &command.payload {
        line.push_str(" -- ");
        line.push_str(&STANDARD.encode(data.as_bytes()));
    }

    let mut bytes = line.into_bytes();
    bytes.push(NUL);
    Ok(bytes)
}

/// Characters allowed in an unquoted argument value.
fn is_bare_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | ','))
}

fn push_string(line: &mut String, value: &str) {
    if is_bare_token(value) {
        line.push_str(value);
        return;
    }
    line.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            line.push('\\');
        }
        line.push(c);
    }
    line.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(command: Command) -> String {
        String::from_utf8(write_command(&command).unwrap()).unwrap()
    }

    #[test]
    fn command_without_data() {
        let cmd = Command::new("property_get").seq(100).arg("n", "$foo");
        assert_eq!(wire(cmd), "property_get -i 100 -n \"$foo\"\0");
    }

    #[test]
    fn command_with_data() {
        let cmd = Command::new("property_set")
            .seq(100)
            .arg("n", "$foo")
            .arg("l", 10)
            .payload("xxxxxxxxxx");
        assert_eq!(
            wire(cmd),
            "property_set -i 100 -n \"$foo\" -l 10 -- eHh4eHh4eHh4eA==\0"
        );
    }

    #[test]
    fn command_seq_zero_is_accepted() {
        let cmd = Command::new("status").seq(0);
        assert_eq!(wire(cmd), "status -i 0\0");
    }

    #[test]
    fn command_skips_absent_argument() {
        let cmd = Command::new("property_set")
            .seq(100)
            .arg("l", 10)
            .arg("o", ArgValue::Absent);
        assert_eq!(wire(cmd), "property_set -i 100 -l 10\0");
    }

    #[test]
    fn command_keeps_zero_argument() {
        let cmd = Command::new("property_set")
            .seq(100)
            .arg("l", 10)
            .arg("o", 0);
        assert_eq!(wire(cmd), "property_set -i 100 -l 10 -o 0\0");
    }

    #[test]
    fn command_keeps_empty_string_argument() {
        let cmd = Command::new("eval").seq(3).arg("p", "");
        assert_eq!(wire(cmd), "eval -i 3 -p \"\"\0");
    }

    #[test]
    fn command_option_none_is_absent() {
        let depth: Option<u32> = None;
        let cmd = Command::new("context_get").seq(1).arg("d", depth).arg("c", Some(0u32));
        assert_eq!(wire(cmd), "context_get -i 1 -c 0\0");
    }

    #[test]
    fn command_escapes_quotes() {
        let cmd = Command::new("property_get").seq(100).arg("n", "$x[\"a b\"]");
        assert_eq!(wire(cmd), "property_get -i 100 -n \"$x[\\\"a b\\\"]\"\0");
    }

    #[test]
    fn command_escapes_backslashes() {
        let cmd = Command::new("breakpoint_set")
            .seq(4)
            .arg("f", "file:///C:\\src\\a.php");
        assert_eq!(
            wire(cmd),
            "breakpoint_set -i 4 -f \"file:///C:\\\\src\\\\a.php\"\0"
        );
    }

    #[test]
    fn command_bare_tokens_unquoted() {
        let cmd = Command::new("breakpoint_set")
            .seq(5)
            .arg("t", "line")
            .arg("f", "file:///var/www/index.php")
            .arg("n", 12)
            .arg("s", "enabled");
        assert_eq!(
            wire(cmd),
            "breakpoint_set -i 5 -t line -f file:///var/www/index.php -n 12 -s enabled\0"
        );
    }

    #[test]
    fn command_bool_argument_renders_as_digit() {
        let cmd = Command::new("breakpoint_set").seq(6).arg("r", true);
        assert_eq!(wire(cmd), "breakpoint_set -i 6 -r 1\0");
    }

    #[test]
    fn command_missing_seq_fails() {
        let cmd = Command::new("property_set")
            .arg("n", "$foo")
            .arg("l", 10)
            .payload("xxxxxxxxxx");
        let err = write_command(&cmd).unwrap_err();
        assert!(matches!(err, DbgpError::Validation(_)));
        assert!(err.to_string().contains("seq"), "got: {err}");
    }

    #[test]
    fn command_missing_name_fails() {
        let cmd = Command::new("").seq(100).arg("n", "$foo");
        let err = write_command(&cmd).unwrap_err();
        assert!(matches!(err, DbgpError::Validation(_)));
        assert!(err.to_string().contains("command"), "got: {err}");
    }

    #[test]
    fn command_invalid_argument_key_fails() {
        let cmd = Command::new("foo").seq(100).arg("not valid!", 10);
        let err = write_command(&cmd).unwrap_err();
        assert!(matches!(err, DbgpError::Validation(_)));
        let msg = err.to_string();
        assert!(msg.contains("argument key"), "got: {msg}");
        assert!(msg.contains("not valid!"), "got: {msg}");
    }

    #[test]
    fn command_reserved_key_fails() {
        let cmd = Command::new("status").seq(1).arg("i", 2);
        assert!(matches!(
            write_command(&cmd),
            Err(DbgpError::Validation(_))
        ));
    }

    #[test]
    fn command_payload_is_utf8_base64() {
        let cmd = Command::new("eval").seq(9).payload("echo 'é';");
        let line = wire(cmd);
        let encoded = line
            .trim_end_matches('\0')
            .rsplit("-- ")
            .next()
            .unwrap()
            .to_string();
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "echo 'é';");
    }
}
