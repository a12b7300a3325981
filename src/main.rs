//! Binary entry point for the hostkit CLI.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use hostkit::access::Capability;
use hostkit::{
    AccessError, AccessFactory, ConfigError, Discovery, DiscoveryError, HostkitConfig, Instance,
    InstanceStore, StoreError, TerminalPrompter,
};

mod cli;

use cli::{Cli, Command, DetectCommand, ExecCommand, LocalizeCommand, PhpCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("instance store error: {0}")]
    Store(#[from] StoreError),
    #[error("access error: {0}")]
    Access(#[from] AccessError),
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("{transport} access for {instance} cannot execute commands")]
    NoShell {
        instance: String,
        transport: &'static str,
    },
    #[error("remote command terminated without an exit status")]
    MissingExitCode,
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error("failed to write output: {0}")]
    Output(String),
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let mut config = HostkitConfig::load_without_cli_args()?;
    if let Some(path) = cli.instances_file {
        config.instances_file = path;
    }
    let store = InstanceStore::new(config.instances_path());

    match cli.command {
        Command::List => list_instances(&store),
        Command::Detect(args) => detect(&AccessFactory::new(config, store)?, &args),
        Command::Exec(args) => exec(&AccessFactory::new(config, store)?, &args),
        Command::Php(args) => run_php(&AccessFactory::new(config, store)?, &args),
        Command::Localize(args) => localize(&AccessFactory::new(config, store)?, &args),
    }
}

fn list_instances(store: &InstanceStore) -> Result<i32, CliError> {
    let mut stdout = io::stdout();
    for instance in store.list()? {
        writeln!(stdout, "{}", describe(&instance)).map_err(output_error)?;
    }
    Ok(0)
}

fn describe(instance: &Instance) -> String {
    let location = instance.host.as_deref().unwrap_or("-");
    format!("{}\t{}\t{location}", instance.name, instance.access_type)
}

fn detect(factory: &AccessFactory, args: &DetectCommand) -> Result<i32, CliError> {
    let mut prompter = TerminalPrompter;
    let instance = factory.store().get(&args.instance)?;
    let mut access = factory.open(instance, &mut prompter)?;
    Discovery::new(access.as_mut())?.detect_all(&mut prompter)?;
    factory.store().save(access.instance())?;

    let rendered = render_facts(&access.instance().facts, args.json)?;
    write!(io::stdout(), "{rendered}").map_err(output_error)?;
    Ok(0)
}

fn render_facts(facts: &BTreeMap<String, String>, json: bool) -> Result<String, CliError> {
    if json {
        let mut text = serde_json::to_string_pretty(facts).map_err(|err| CliError::Output(err.to_string()))?;
        text.push('\n');
        return Ok(text);
    }
    Ok(facts
        .iter()
        .map(|(key, value)| format!("{key}: {value}\n"))
        .collect())
}

fn exec(factory: &AccessFactory, args: &ExecCommand) -> Result<i32, CliError> {
    validate_command_args(&args.command)?;
    let Some((program, rest)) = args.command.split_first() else {
        return Err(CliError::InvalidCommand(String::from("no command given")));
    };
    let mut prompter = TerminalPrompter;
    let instance = factory.store().get(&args.instance)?;
    let mut access = factory.open(instance, &mut prompter)?;
    let name = access.instance().name.clone();
    let transport = access.transport();
    let shell = access.shell().ok_or(CliError::NoShell {
        instance: name,
        transport,
    })?;

    let mut command = shell.create_command(program, rest, None);
    shell.run_command(&mut command)?;
    io::stdout()
        .write_all(&command.stdout_bytes())
        .map_err(output_error)?;
    io::stderr()
        .write_all(command.stderr_string().as_bytes())
        .map_err(output_error)?;

    command.exit_status().ok_or(CliError::MissingExitCode)
}

fn run_php(factory: &AccessFactory, args: &PhpCommand) -> Result<i32, CliError> {
    let mut prompter = TerminalPrompter;
    let instance = factory.store().get(&args.instance)?;
    let mut access = factory.open_for(instance, Capability::Scripting, &mut prompter)?;
    match access.run_php(Utf8Path::new(&args.script), &args.args) {
        Ok(output) => {
            write!(io::stdout(), "{output}").map_err(output_error)?;
            Ok(0)
        }
        Err(AccessError::Execution {
            status: Some(code),
            stderr,
            ..
        }) => {
            write!(io::stderr(), "{stderr}").map_err(output_error)?;
            Ok(code)
        }
        Err(other) => Err(other.into()),
    }
}

fn localize(factory: &AccessFactory, args: &LocalizeCommand) -> Result<i32, CliError> {
    let mut prompter = TerminalPrompter;
    let instance = factory.store().get(&args.instance)?;
    let mut access = factory.open_for(instance, Capability::FileTransfer, &mut prompter)?;
    access.localize_folder(&args.remote, Utf8Path::new(&args.local))?;
    Ok(0)
}

fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    for arg in args {
        if arg
            .chars()
            .any(|ch| matches!(ch, '\n' | '\r' | '\u{0000}'..='\u{001F}' | '\u{007F}'))
        {
            return Err(CliError::InvalidCommand(String::from(concat!(
                "command arguments must not contain control characters (ASCII ",
                "0x00-0x1F or 0x7F, e.g. newline, carriage return, tab, NUL)"
            ))));
        }
    }
    Ok(())
}

fn output_error(err: io::Error) -> CliError {
    CliError::Output(err.to_string())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
