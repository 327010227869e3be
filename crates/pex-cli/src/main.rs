use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use pex_cli::{init_tracing, load_config, resolve, run_simulation, ResolveOptions, SimulatorConfig};
use std::path::PathBuf;

fn cli() -> Command {
    Command::new("pex")
        .version(pex_cli::VERSION)
        .about("Page experimentation engine")
        .subcommand_required(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Log filter when RUST_LOG is unset"),
        )
        .subcommand(
            Command::new("resolve")
                .about("Resolve the experiments of a page stored on disk")
                .arg(
                    Arg::new("site")
                        .long("site")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Site root directory"),
                )
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .help("Page path, loaded from <site>/<path>.page.json"),
                )
                .arg(
                    Arg::new("query")
                        .long("query")
                        .help("Query string, e.g. experiment=foo/challenger-1"),
                )
                .arg(
                    Arg::new("store")
                        .long("store")
                        .value_parser(value_parser!(PathBuf))
                        .help("Visitor store file kept between runs"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Engine configuration (TOML)"),
                )
                .arg(
                    Arg::new("grant-consent")
                        .long("grant-consent")
                        .action(ArgAction::SetTrue)
                        .help("Record visitor consent before resolving"),
                )
                .arg(
                    Arg::new("audience")
                        .long("audience")
                        .action(ArgAction::Append)
                        .help("Audience the visitor belongs to (repeatable)"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for variant draws"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Draw first-time visitors and compare the observed split")
                .arg(
                    Arg::new("variants")
                        .long("variants")
                        .default_value("2")
                        .value_parser(value_parser!(usize))
                        .help("Number of challengers besides control"),
                )
                .arg(
                    Arg::new("split")
                        .long("split")
                        .action(ArgAction::Append)
                        .help("Challenger percentage, in order (repeatable)"),
                )
                .arg(
                    Arg::new("visitors")
                        .long("visitors")
                        .default_value("10000")
                        .value_parser(value_parser!(u64))
                        .help("Number of visitors to draw"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let level = matches
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    init_tracing(level);

    match matches.subcommand() {
        Some(("resolve", args)) => {
            let site = args
                .get_one::<PathBuf>("site")
                .context("--site is required")?;
            let path = args
                .get_one::<String>("path")
                .context("--path is required")?;
            let mut options = ResolveOptions::new(site.clone(), path.clone());
            options.query = args.get_one::<String>("query").cloned();
            options.store = args.get_one::<PathBuf>("store").cloned();
            if let Some(config) = args.get_one::<PathBuf>("config") {
                options.config = load_config(config)?;
            }
            options.grant_consent = args.get_flag("grant-consent");
            options.audiences = args
                .get_many::<String>("audience")
                .map(|names| names.cloned().collect())
                .unwrap_or_default();
            options.seed = args.get_one::<u64>("seed").copied();

            let output = resolve(&options).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Some(("simulate", args)) => {
            let config = SimulatorConfig {
                challengers: args.get_one::<usize>("variants").copied().unwrap_or(2),
                splits: args
                    .get_many::<String>("split")
                    .map(|s| s.cloned().collect())
                    .unwrap_or_default(),
                visitors: args.get_one::<u64>("visitors").copied().unwrap_or(10_000),
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
            };
            let report = run_simulation(&config)?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.generate_text());
            }
        }
        Some((other, _)) => anyhow::bail!("unknown command {other}"),
        None => anyhow::bail!("a command is required"),
    }
    Ok(())
}
