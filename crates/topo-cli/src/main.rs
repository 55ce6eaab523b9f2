//! `topo` - parse and resolve topology expressions from the command line

mod config;
mod topology_file;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use config::CliConfig;
use serde_json::json;
use std::path::PathBuf;
use topo_core::{EntityGraph, ExecutionRuntime, Interrupt, Resolved};
use topo_dsl::ParseError;
use topology_file::TopologyFile;

fn cli() -> Command {
    Command::new("topo")
        .version(topo_core::VERSION)
        .about("Parse and resolve deferred topology expressions")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("parse")
                .about("Parse an expression and print its canonical form")
                .arg(
                    Arg::new("expression")
                        .required(true)
                        .help("Expression text, without the $brooklyn: prefix"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the syntax tree as JSON"),
                ),
        )
        .subcommand(
            Command::new("resolve")
                .about("Resolve an expression against a topology description")
                .arg(
                    Arg::new("topology")
                        .long("topology")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("YAML topology description"),
                )
                .arg(
                    Arg::new("from")
                        .long("from")
                        .help("Plan id of the context entity (default: first application)"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML config file"),
                )
                .arg(Arg::new("expression").required(true).help("Expression text")),
        )
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let config_path = matches
        .subcommand_matches("resolve")
        .and_then(|args| args.get_one::<PathBuf>("config"));
    let config = CliConfig::load(config_path.map(PathBuf::as_path))?;
    config::init_tracing(&config.log_filter);

    match matches.subcommand() {
        Some(("parse", args)) => parse_command(args),
        Some(("resolve", args)) => resolve_command(args, config),
        _ => anyhow::bail!("no command given, see --help"),
    }
}

fn expression(args: &ArgMatches) -> anyhow::Result<&str> {
    args.get_one::<String>("expression")
        .map(String::as_str)
        .context("missing expression")
}

fn parse_or_exit(text: &str) -> topo_dsl::Expr {
    match topo_dsl::parse(text) {
        Ok(expr) => expr,
        Err(err) => {
            eprintln!("{}", render_parse_error(text, &err));
            std::process::exit(1);
        }
    }
}

/// Error message with the expression and a caret under the offset
fn render_parse_error(text: &str, err: &ParseError) -> String {
    format!("error: {err}\n  {text}\n  {}^", " ".repeat(err.offset()))
}

fn parse_command(args: &ArgMatches) -> anyhow::Result<()> {
    let text = expression(args)?;
    let expr = parse_or_exit(text);
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&expr)?);
    } else {
        println!("{expr}");
    }
    Ok(())
}

fn resolve_command(args: &ArgMatches, config: CliConfig) -> anyhow::Result<()> {
    let text = expression(args)?;
    let expr = parse_or_exit(text);
    let topology_path = args
        .get_one::<PathBuf>("topology")
        .context("missing --topology")?;

    let plan_id_key = config.resolver.plan_id_key.clone();
    let loaded = TopologyFile::from_path(topology_path)?.build(&plan_id_key)?;
    let topology = loaded.topology;

    let from = match args.get_one::<String>("from") {
        Some(plan_id) => topology
            .find_by_plan_id(&plan_id_key, plan_id)
            .into_iter()
            .next()
            .with_context(|| format!("no entity with plan id '{plan_id}'"))?,
        None => topology
            .applications()
            .first()
            .copied()
            .context("topology has no application")?,
    };

    let value = loaded
        .interpreter
        .with_source(text)
        .interpret(&expr)?;

    let runtime = ExecutionRuntime::new(config.resolver).context("cannot start runtime")?;
    let interrupt = Interrupt::current();
    runtime.handle().spawn({
        let interrupt = interrupt.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.interrupt();
            }
        }
    });

    tracing::info!(entity = %from, expression = text, "Resolving");
    let ctx = runtime.context(topology.clone()).with_entity(from);
    let resolved = value.get_in(&ctx)?;

    let output = match resolved {
        Resolved::Entity(id) => json!({
            "entity": id.to_string(),
            "name": topology.display_name(id),
        }),
        other => other.into_json(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
