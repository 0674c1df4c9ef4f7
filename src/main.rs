use std::fs;
use std::io;
use std::path::Path;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mdbook::preprocess::{CmdPreprocessor, Preprocessor};
use mdbook_liverun::{LiveRun, LiveRunConfig};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

fn make_app() -> Command {
    let input = Arg::new("input")
        .required(true)
        .help("Markdown document to read");
    let config = Arg::new("config")
        .long("config")
        .short('c')
        .help("TOML file with the same keys as [preprocessor.liverun]");

    Command::new("mdbook-liverun")
        .about("A mdbook preprocessor that makes javascript samples runnable")
        .subcommand(
            Command::new("supports")
                .arg(Arg::new("renderer").required(true))
                .about("Check whether a renderer is supported by this preprocessor"),
        )
        .subcommand(
            Command::new("render")
                .about("Render a markdown document into a standalone HTML page")
                .arg(input.clone())
                .arg(config.clone())
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .help("Where to write the page, stdout by default"),
                )
                .arg(
                    Arg::new("capture")
                        .long("capture")
                        .action(ArgAction::SetTrue)
                        .help("Run the samples and bake their output into the page"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Run the samples of a markdown document and print their result regions")
                .arg(input)
                .arg(config)
                .arg(
                    Arg::new("sample")
                        .long("sample")
                        .short('s')
                        .value_parser(value_parser!(usize))
                        .help("Only run the sample with this index"),
                ),
        )
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let matches = make_app().get_matches();
    let result = match matches.subcommand() {
        Some(("supports", sub_args)) => handle_supports(sub_args),
        Some(("render", sub_args)) => handle_render(sub_args),
        Some(("run", sub_args)) => handle_run(sub_args),
        _ => handle_preprocessing(),
    };

    if let Err(e) = result {
        error!("{e:?}");
        process::exit(1);
    }
}

fn handle_preprocessing() -> Result<()> {
    let (ctx, book) = CmdPreprocessor::parse_input(io::stdin())
        .with_context(|| "Could not parse the book given by mdbook")?;

    if ctx.mdbook_version != mdbook::MDBOOK_VERSION {
        warn!(
            "mdbook-liverun was built against mdbook {}, called from mdbook {}",
            mdbook::MDBOOK_VERSION,
            ctx.mdbook_version
        );
    }

    let processed_book = LiveRun::default().run(&ctx, book)?;
    serde_json::to_writer(io::stdout(), &processed_book)?;
    Ok(())
}

fn handle_supports(sub_args: &ArgMatches) -> Result<()> {
    let renderer = sub_args
        .get_one::<String>("renderer")
        .with_context(|| "Missing renderer")?;

    // Signal whether the renderer is supported by exiting with 1 or 0.
    if LiveRun::default().supports_renderer(renderer) {
        process::exit(0);
    }
    process::exit(1);
}

fn load_config(sub_args: &ArgMatches) -> Result<LiveRunConfig> {
    match sub_args.get_one::<String>("config") {
        None => Ok(LiveRunConfig::default()),
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Could not read config file {path}"))?;
            toml::from_str(&content).with_context(|| format!("Invalid config file {path}"))
        }
    }
}

fn read_input(sub_args: &ArgMatches) -> Result<(String, String)> {
    let input = sub_args
        .get_one::<String>("input")
        .with_context(|| "Missing input document")?;
    let content =
        fs::read_to_string(input).with_context(|| format!("Could not read {input}"))?;
    let title = Path::new(input)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.clone());
    Ok((content, title))
}

fn handle_render(sub_args: &ArgMatches) -> Result<()> {
    let mut config = load_config(sub_args)?;
    if sub_args.get_flag("capture") {
        config.capture = Some(true);
    }
    let (content, title) = read_input(sub_args)?;
    let html = config.create_preprocessor().render_page(&content, &title);

    match sub_args.get_one::<String>("output") {
        Some(output) => {
            fs::write(output, html).with_context(|| format!("Could not write {output}"))?
        }
        None => print!("{html}"),
    }
    Ok(())
}

fn handle_run(sub_args: &ArgMatches) -> Result<()> {
    let mut config = load_config(sub_args)?;
    config.capture = Some(false);
    let (content, _) = read_input(sub_args)?;
    let preprocessor = config.create_preprocessor();
    let mut page = preprocessor.page(&content);

    let indices: Vec<usize> = match sub_args.get_one::<usize>("sample") {
        Some(&index) => match page.block(index) {
            Some(block) if block.is_executable() => vec![index],
            Some(_) => bail!("Sample {index} is marked as not runnable"),
            None => bail!("There is no sample {index}"),
        },
        None => page
            .blocks()
            .filter(|block| block.is_executable())
            .map(|block| block.index())
            .collect(),
    };

    for index in indices {
        page.execute(index, &preprocessor);
        println!("[sample {index}]");
        for line in page.regions().lines(index).unwrap_or_default() {
            println!("{line}");
        }
    }
    Ok(())
}
