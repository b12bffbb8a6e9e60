//! The `pipeweave` binary. Builds a `clap::Command` dynamically from the
//! merged extension schema (rather than `#[derive(Parser)]`, which can't
//! express a flag set only known after loading extensions), wires it to
//! [`pipeweave_config`], and drives [`pipeweave_core::run`].
//!
//! Grounded on `shipper-cli/src/main.rs`'s `main` → `print_*`/`process::exit`
//! shape, adapted for a schema-bound rather than fixed flag set.

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command};
use tracing_subscriber::EnvFilter;

use pipeweave_schema::{LeafType, Schema, TypeTag};

const BASE_SCHEMA: &str = include_str!("base_schema.yaml");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.get(1).map(String::as_str) == Some(pipeweave_process::INTERNAL_RUNNER_SUBCOMMAND) {
        std::process::exit(run_internal_runner(&args));
    }

    std::process::exit(run_cli(&args));
}

/// Handles the hidden `--internal-run-runner <lib> <runner> <payload> <result>`
/// re-exec entry point a [`pipeweave_process::Supervisor`] spawns.
fn run_internal_runner(args: &[String]) -> i32 {
    let [_, _subcommand, library, runner, payload, result] = args else {
        eprintln!("internal runner invocation expects exactly 4 arguments");
        return 1;
    };
    let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let library_path = PathBuf::from(library);
    let payload_path = PathBuf::from(payload);
    let result_path = PathBuf::from(result);
    match pipeweave_process::run_internal_runner(&library_path, runner, &payload_path, &result_path, &root) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("runner {runner} failed: {err:#}");
            1
        }
    }
}

fn run_cli(args: &[String]) -> i32 {
    init_logging();

    let bootstrap = bootstrap_command();
    let bootstrap_matches = bootstrap.clone().ignore_errors(true).get_matches_from(args.iter().cloned());
    let modules_dir = bootstrap_matches
        .get_one::<String>("modules-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("modules"));
    let schema_path = bootstrap_matches.get_one::<String>("schema").map(PathBuf::from);
    let config_path = bootstrap_matches.get_one::<String>("config").map(PathBuf::from);

    let schema = match build_merged_schema(&modules_dir, schema_path.as_deref()) {
        Ok(schema) => schema,
        Err(err) => {
            tracing::error!(error = %err, "failed to load schema");
            return 1;
        }
    };

    let flags = match schema.flags() {
        Ok(flags) => flags,
        Err(err) => {
            tracing::error!(error = %err, "invalid schema");
            return 1;
        }
    };

    let mut command = bootstrap_command();
    for flag in &flags {
        command = command.arg(flag_to_arg(flag));
    }

    let matches = command.get_matches_from(args.iter().cloned());

    let mut builder = pipeweave_config::ConfigBuilder::new(&schema).validate(false);
    if let Some(path) = &config_path {
        builder = match builder.with_file(path) {
            Ok(b) => b,
            Err(err) => {
                tracing::error!(error = %err, "failed to read config file");
                return 1;
            }
        };
    }
    for flag in &flags {
        if matches.value_source(&flag.flag_name) != Some(clap::parser::ValueSource::CommandLine) {
            continue;
        }
        match flag_override_value(&matches, flag) {
            Ok(Some(value)) => builder = builder.with_override(&flag.key_path, value),
            Ok(None) => {}
            Err(err) => {
                tracing::error!(error = %err, leaf = flag.flag_name, "invalid flag value");
                return 1;
            }
        }
    }

    let unvalidated = match builder.build() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to assemble configuration");
            return 1;
        }
    };

    let failures = validate_every_leaf(&flags, &unvalidated);
    if !failures.is_empty() {
        for failure in &failures {
            tracing::error!("Invalid configuration: {failure}");
        }
        return 1;
    }
    let config = unvalidated;

    let samples = match config.get_path("samples_file").and_then(|v| v.as_str()) {
        Some(path) => match pipeweave_types::Samples::from_file(path) {
            Ok(samples) => samples,
            Err(err) => {
                tracing::error!(error = %err, "failed to load samples file");
                return 1;
            }
        },
        None => pipeweave_types::Samples::new(Vec::new()),
    };

    let outdir = config
        .get_path("outdir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("results"));
    let use_cache = config.get_path("use_cache").and_then(|v| v.as_bool()).unwrap_or(true);

    let current_exe = match std::env::current_exe() {
        Ok(path) => path,
        Err(err) => {
            tracing::error!(error = %err, "failed to resolve current executable");
            return 1;
        }
    };

    let options = pipeweave_core::RunOptions {
        modules_dir,
        outdir,
        current_exe,
        use_cache,
    };

    match pipeweave_core::run(&config, samples, &options) {
        Ok(summary) => {
            tracing::info!(
                complete = summary.complete.len(),
                partial = summary.partial.len(),
                failed = summary.failed.len(),
                "execution complete"
            );
            if summary.cancelled {
                130
            } else {
                0
            }
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "Unhandled exception");
            1
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// The fixed args every invocation understands regardless of the merged
/// schema: `--config` (eager file load), and the two inputs needed to
/// discover that schema in the first place.
fn bootstrap_command() -> Command {
    Command::new("pipeweave")
        .about("Runs a modular sample pipeline assembled from extensions discovered at startup")
        .disable_help_flag(false)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Path to a YAML config file; individual flags override its values"),
        )
        .arg(
            Arg::new("modules-dir")
                .long("modules-dir")
                .value_name("PATH")
                .default_value("modules")
                .help("Directory to discover extension shared libraries in"),
        )
        .arg(
            Arg::new("schema")
                .long("schema")
                .value_name("PATH")
                .help("Path to the user-supplied schema.yaml, merged over the base schema"),
        )
}

fn build_merged_schema(modules_dir: &std::path::Path, schema_path: Option<&std::path::Path>) -> anyhow::Result<Schema> {
    let mut schema = Schema::from_yaml_str(BASE_SCHEMA)?;

    if let Some(path) = schema_path {
        if path.exists() {
            schema = schema.merge(&Schema::from_file(path)?);
        }
    }

    let sources = pipeweave_registry::Loader::discover(modules_dir).unwrap_or_default();
    for source in sources {
        let Some(module_schema_path) = &source.schema_path else {
            continue;
        };
        match Schema::from_file(module_schema_path) {
            Ok(module_schema) => schema = schema.merge(&module_schema),
            Err(err) => tracing::debug!(extension = %source.name, error = %err, "skipping unreadable module schema"),
        }
    }

    Ok(schema)
}

fn flag_to_arg(flag: &pipeweave_schema::Flag) -> Arg {
    let mut arg = Arg::new(flag.flag_name.clone())
        .long(flag.flag_name.replace('_', "-"))
        .help(flag.description.clone());

    if flag.secret {
        arg = arg.hide_default_value(true);
    }

    match &flag.typetag {
        LeafType::Tag(TypeTag::Bool) => {
            arg = arg.action(ArgAction::SetTrue);
        }
        LeafType::Tag(TypeTag::Array) => {
            arg = arg.action(ArgAction::Append);
        }
        LeafType::Tag(TypeTag::Mapping) => {
            arg = arg
                .action(ArgAction::Append)
                .value_name("KEY=VALUE ...")
                .long_help("Space-separated key=value pairs; repeat the flag to add more entries");
        }
        LeafType::Enum(choices) => {
            let values: Vec<clap::builder::PossibleValue> =
                choices.iter().cloned().map(clap::builder::PossibleValue::new).collect();
            arg = arg
                .value_parser(clap::builder::PossibleValuesParser::new(values))
                .value_name("VALUE");
        }
        _ => {
            arg = arg.value_name("VALUE");
        }
    }

    if !flag.secret && !flag.typetag.is_multi_valued() && !flag.typetag.is_bool() {
        if let Some(default) = &flag.default {
            let rendered = match default {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            };
            if let Some(s) = rendered {
                arg = arg.default_value(s);
            }
        }
    }

    arg
}

fn flag_override_value(matches: &clap::ArgMatches, flag: &pipeweave_schema::Flag) -> anyhow::Result<Option<serde_json::Value>> {
    use serde_json::Value;

    let value = match &flag.typetag {
        LeafType::Tag(TypeTag::Bool) => Value::Bool(matches.get_flag(&flag.flag_name)),
        LeafType::Tag(TypeTag::Array) => {
            let items: Vec<Value> = matches
                .get_many::<String>(&flag.flag_name)
                .into_iter()
                .flatten()
                .map(|s| Value::String(s.clone()))
                .collect();
            Value::Array(items)
        }
        LeafType::Tag(TypeTag::Mapping) => {
            let strings: Vec<String> = matches
                .get_many::<String>(&flag.flag_name)
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            let map = pipeweave_config::parse_mapping(&strings)?;
            Value::Object(map)
        }
        LeafType::Tag(TypeTag::Integer) => {
            let Some(raw) = matches.get_one::<String>(&flag.flag_name) else {
                return Ok(None);
            };
            Value::Number(raw.parse::<i64>()?.into())
        }
        LeafType::Tag(TypeTag::Number) => {
            let Some(raw) = matches.get_one::<String>(&flag.flag_name) else {
                return Ok(None);
            };
            let n = serde_json::Number::from_f64(raw.parse::<f64>()?)
                .ok_or_else(|| anyhow::anyhow!("{raw} is not a finite number"))?;
            Value::Number(n)
        }
        _ => {
            let Some(raw) = matches.get_one::<String>(&flag.flag_name) else {
                return Ok(None);
            };
            Value::String(raw.clone())
        }
    };

    Ok(Some(value))
}

/// Re-checks every schema leaf against the unvalidated config and reports
/// every failure, instead of the first one `ConfigBuilder::build` would
/// stop at — mirrors validating with `validate=False` and iterating every
/// schema error to report them all rather than bailing at the first.
fn validate_every_leaf(flags: &[pipeweave_schema::Flag], config: &pipeweave_config::Config) -> Vec<String> {
    let mut failures = Vec::new();
    for flag in flags {
        let Some(value) = config.get_path(flag.key_path.clone()) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let ok = match &flag.typetag {
            LeafType::Enum(choices) => value.as_str().map(|s| choices.iter().any(|c| c == s)).unwrap_or(false),
            LeafType::Tag(TypeTag::Bool) => value.is_boolean(),
            LeafType::Tag(TypeTag::Integer) => value.is_i64() || value.is_u64(),
            LeafType::Tag(TypeTag::Number) => value.is_number(),
            LeafType::Tag(TypeTag::String) | LeafType::Tag(TypeTag::Path) => value.is_string(),
            LeafType::Tag(TypeTag::Array) => value.is_array(),
            LeafType::Tag(TypeTag::Mapping) => value.is_object(),
        };
        if !ok {
            failures.push(format!("{} must be {:?}, got {value}", flag.flag_name, flag.typetag));
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_command_defaults_modules_dir() {
        let matches = bootstrap_command()
            .ignore_errors(true)
            .get_matches_from(["pipeweave"]);
        assert_eq!(matches.get_one::<String>("modules-dir").map(String::as_str), Some("modules"));
    }

    #[test]
    fn flag_to_arg_hides_default_for_secrets() {
        let flag = pipeweave_schema::Flag {
            flag_name: "token".into(),
            key_path: vec!["token".into()],
            default: Some(serde_json::json!("shh")),
            description: String::new(),
            secret: true,
            typetag: LeafType::Tag(TypeTag::String),
        };
        let arg = flag_to_arg(&flag);
        assert!(arg.get_default_values().is_empty());
    }

    #[test]
    fn flag_override_value_parses_mapping_flags() {
        let flag = pipeweave_schema::Flag {
            flag_name: "extra".into(),
            key_path: vec!["extra".into()],
            default: None,
            description: String::new(),
            secret: false,
            typetag: LeafType::Tag(TypeTag::Mapping),
        };
        let arg = flag_to_arg(&flag);
        let command = Command::new("t").arg(arg);
        let matches = command.get_matches_from(["t", "--extra", "a=1 b=2"]);
        let value = flag_override_value(&matches, &flag).unwrap().unwrap();
        assert_eq!(value, serde_json::json!({"a": "1", "b": "2"}));
    }

    #[test]
    fn validate_every_leaf_reports_all_type_mismatches() {
        let flags = vec![
            pipeweave_schema::Flag {
                flag_name: "count".into(),
                key_path: vec!["count".into()],
                default: None,
                description: String::new(),
                secret: false,
                typetag: LeafType::Tag(TypeTag::Integer),
            },
            pipeweave_schema::Flag {
                flag_name: "flag".into(),
                key_path: vec!["flag".into()],
                default: None,
                description: String::new(),
                secret: false,
                typetag: LeafType::Tag(TypeTag::Bool),
            },
        ];
        let schema = Schema::default();
        let config = pipeweave_config::ConfigBuilder::new(&schema)
            .validate(false)
            .with_override(&["count".to_string()], serde_json::json!("not-a-number"))
            .with_override(&["flag".to_string()], serde_json::json!("not-a-bool"))
            .build()
            .unwrap();
        let failures = validate_every_leaf(&flags, &config);
        assert_eq!(failures.len(), 2);
    }
}
