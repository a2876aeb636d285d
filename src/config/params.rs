//! Command-line parameters declared by modules.
//!
//! A [`Param`] ties a CLI flag to a settings key, so `--port 7070` and
//! `rpc.port = 7070` in the configuration file name the same value.

use clap::parser::ValueSource;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use toml::Value;

use crate::config::settings::Settings;

/// Default value (and value type) of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl ParamValue {
    /// Settings representation of the value.
    pub fn to_value(&self) -> Value {
        match self {
            ParamValue::Bool(b) => Value::Boolean(*b),
            ParamValue::Int(i) => Value::Integer(*i),
            ParamValue::Str(s) => Value::String(s.clone()),
            ParamValue::List(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

/// Parameter descriptor exposed by a module.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Long flag name, without the leading dashes.
    pub name: String,
    /// Help text.
    pub usage: String,
    /// Dotted settings key the flag overrides.
    pub flag_key: String,
    pub default: ParamValue,
    pub short: Option<char>,
}

impl Param {
    pub fn new(name: &str, usage: &str, flag_key: &str, default: ParamValue) -> Self {
        Self {
            name: name.to_string(),
            usage: usage.to_string(),
            flag_key: flag_key.to_string(),
            default,
            short: None,
        }
    }

    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.name.clone())
            .long(self.name.clone())
            .help(self.usage.clone());
        if let Some(short) = self.short {
            arg = arg.short(short);
        }
        match &self.default {
            ParamValue::Bool(false) => arg.action(ArgAction::SetTrue),
            ParamValue::Bool(true) => arg
                .action(ArgAction::Set)
                .value_parser(value_parser!(bool))
                .default_value("true"),
            ParamValue::Int(i) => arg
                .action(ArgAction::Set)
                .value_parser(value_parser!(i64))
                .default_value(i.to_string()),
            ParamValue::Str(s) if s.is_empty() => arg.action(ArgAction::Set),
            ParamValue::Str(s) => arg.action(ArgAction::Set).default_value(s.clone()),
            ParamValue::List(_) => arg.action(ArgAction::Append),
        }
    }
}

/// Register `params` as arguments of `cmd`.
pub fn setup_command_params(cmd: Command, params: &[Param]) -> Command {
    params.iter().fold(cmd, |cmd, param| cmd.arg(param.to_arg()))
}

/// Register every parameter's default in `settings`, and copy the values
/// actually given on the command line into the override layer.
pub fn bind_flags(matches: &ArgMatches, params: &[Param], settings: &mut Settings) {
    for param in params {
        settings.set_default(&param.flag_key, param.default.to_value());
        if matches.value_source(&param.name) != Some(ValueSource::CommandLine) {
            continue;
        }
        let value = match &param.default {
            ParamValue::Bool(_) => matches
                .try_get_one::<bool>(&param.name)
                .ok()
                .flatten()
                .map(|b| Value::Boolean(*b)),
            ParamValue::Int(_) => matches
                .try_get_one::<i64>(&param.name)
                .ok()
                .flatten()
                .map(|i| Value::Integer(*i)),
            ParamValue::Str(_) => matches
                .try_get_one::<String>(&param.name)
                .ok()
                .flatten()
                .map(|s| Value::String(s.clone())),
            ParamValue::List(_) => matches
                .try_get_many::<String>(&param.name)
                .ok()
                .flatten()
                .map(|items| Value::Array(items.cloned().map(Value::String).collect())),
        };
        if let Some(value) = value {
            tracing::debug!(flag = %param.name, key = %param.flag_key, "flag override");
            settings.set(&param.flag_key, value);
        }
    }
}
