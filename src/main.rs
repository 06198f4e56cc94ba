use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use lifeboat::config::load_config_file;
use lifeboat::logging::level_override;
use lifeboat::{
    create_sample_config, default_config, dump_config, find_config_path, format_size,
    init_logging, Backup, BackupContext, BackupOptions, Config, Index, LifeboatError,
    ProgressConfig, ProgressReporter, RetentionManager,
};
use std::path::{Path, PathBuf};
use std::process;
use tracing::warn;

fn main() {
    let result = run();
    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(error) => {
            eprintln!("Error: {error}");

            let suggestions = error.suggestions();
            if !suggestions.is_empty() {
                eprintln!("\nSuggestions:");
                for suggestion in suggestions {
                    eprintln!("  - {suggestion}");
                }
            }

            process::exit(error.exit_code());
        }
    }
}

fn cli() -> Command {
    Command::new("lifeboat")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Point-in-time backups of application deployments and configuration folders")
        .long_about(
            "lifeboat archives every deployment and configured folder into a dated\n\
             backup directory, keeps an index of all backups and expires old ones.\n\
             Example: lifeboat backup --checkpoint --note \"before upgrade\"",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Configuration file (default: ./lifeboat.ini)")
                .value_name("FILE")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Show debug output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Suppress all output except errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .global(true),
        )
        .subcommand(
            Command::new("backup")
                .about("Create a new backup")
                .arg(
                    Arg::new("note")
                        .short('m')
                        .long("note")
                        .help("Note stored with the backup")
                        .value_name("TEXT"),
                )
                .arg(
                    Arg::new("checkpoint")
                        .long("checkpoint")
                        .help("Create a checkpoint that never expires")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("dry-run")
                        .short('n')
                        .long("dry-run")
                        .help("Show what would be backed up without doing it")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("unit")
                        .short('u')
                        .long("unit")
                        .help("Only back up this unit (repeatable)")
                        .value_name("NAME")
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List backups, newest first")
                .arg(
                    Arg::new("limit")
                        .short('l')
                        .long("limit")
                        .help("Show at most N backups")
                        .value_name("N")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("checkpoints")
                        .long("checkpoints")
                        .help("Only show checkpoints")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the entries as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("restore")
                .about("Extract a backup into a target directory")
                .arg(
                    Arg::new("id")
                        .help("Backup id, or 'latest'")
                        .required(true)
                        .value_name("ID"),
                )
                .arg(
                    Arg::new("target")
                        .help("Directory to restore into")
                        .required(true)
                        .value_name("TARGET"),
                ),
        )
        .subcommand(
            Command::new("checkpoint")
                .about("Mark an existing backup as a checkpoint")
                .arg(Arg::new("id").required(true).value_name("ID"))
                .arg(
                    Arg::new("note")
                        .short('m')
                        .long("note")
                        .value_name("TEXT"),
                ),
        )
        .subcommand(
            Command::new("cleanup")
                .about("Delete expired backups (dry run unless --force)")
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .help("Actually delete")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a backup regardless of retention or checkpoint status")
                .arg(Arg::new("id").required(true).value_name("ID")),
        )
        .subcommand(
            Command::new("extend")
                .about("Push a backup's expiry date further out")
                .arg(Arg::new("id").required(true).value_name("ID"))
                .arg(
                    Arg::new("days")
                        .required(true)
                        .value_name("DAYS")
                        .value_parser(value_parser!(i64)),
                ),
        )
        .subcommand(Command::new("units").about("Show every backup unit and its size"))
        .subcommand(
            Command::new("config")
                .about("Show, validate or generate configuration")
                .arg(
                    Arg::new("sample")
                        .long("sample")
                        .help("Print an annotated sample configuration")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("validate"),
                )
                .arg(
                    Arg::new("validate")
                        .long("validate")
                        .help("Validate the configuration and exit")
                        .action(ArgAction::SetTrue),
                ),
        )
}

fn run() -> Result<i32, LifeboatError> {
    let matches = cli().get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    if let Some(("config", sub)) = matches.subcommand() {
        if sub.get_flag("sample") {
            print!("{}", create_sample_config());
            return Ok(0);
        }
    }

    let explicit = matches.get_one::<String>("config").map(PathBuf::from);
    let config_path = find_config_path(explicit.as_deref())?;
    let config = match &config_path {
        Some(path) => load_config_file(path)?,
        None => default_config(),
    };

    let level = level_override(verbose, quiet).unwrap_or(config.logging.level.as_str());
    init_logging(level, config.logging.path.as_deref())?;

    let context = BackupContext::new();
    setup_signal_handler(&context);

    match matches.subcommand() {
        Some(("backup", sub)) => cmd_backup(config, context, sub, quiet),
        Some(("list", sub)) => cmd_list(&config, sub),
        Some(("restore", sub)) => cmd_restore(config, context, sub, quiet),
        Some(("checkpoint", sub)) => {
            let id = required(sub, "id")?;
            let note = sub.get_one::<String>("note").map(String::as_str).unwrap_or("");
            Backup::with_context(config, context)?.mark_checkpoint(id, note)?;
            if !quiet {
                println!("Marked {id} as checkpoint");
            }
            Ok(0)
        }
        Some(("cleanup", sub)) => cmd_cleanup(&config, sub.get_flag("force"), quiet),
        Some(("delete", sub)) => {
            let id = required(sub, "id")?;
            RetentionManager::new(&config).force_delete(id)?;
            if !quiet {
                println!("Deleted backup {id}");
            }
            Ok(0)
        }
        Some(("extend", sub)) => {
            let id = required(sub, "id")?;
            let days = sub.get_one::<i64>("days").copied().unwrap_or(0);
            let delete_after = RetentionManager::new(&config).extend_retention(id, days)?;
            if !quiet {
                println!("Backup {id} now expires after {delete_after}");
            }
            Ok(0)
        }
        Some(("units", _)) => cmd_units(config, context),
        Some(("config", sub)) => cmd_config(&config, config_path.as_deref(), sub),
        _ => Err(LifeboatError::validation(
            "No command specified. Use --help for usage information.",
        )),
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str, LifeboatError> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| LifeboatError::validation(format!("missing argument <{name}>")))
}

fn cmd_backup(
    config: Config,
    context: BackupContext,
    matches: &ArgMatches,
    quiet: bool,
) -> Result<i32, LifeboatError> {
    config.ensure_valid()?;

    let options = BackupOptions {
        note: matches.get_one::<String>("note").cloned().unwrap_or_default(),
        checkpoint: matches.get_flag("checkpoint"),
        dry_run: matches.get_flag("dry-run"),
        selected_units: matches
            .get_many::<String>("unit")
            .map(|units| units.cloned().collect())
            .unwrap_or_default(),
    };

    let backup = Backup::with_context(config, context)?;
    let mut reporter = ProgressReporter::new(ProgressConfig::auto_detect(quiet));
    let result = backup.run(&options, &mut |phase, current, total, message| {
        reporter.update(phase, current, total, message)
    })?;
    reporter.finish();

    if !quiet {
        if result.dry_run {
            for unit in &result.planned_units {
                println!("Would back up: {unit}");
            }
        }
        println!("{}", result.summary());
    }
    for error in &result.errors {
        eprintln!("  ! {error}");
    }

    Ok(if result.success { 0 } else { 1 })
}

fn cmd_list(config: &Config, matches: &ArgMatches) -> Result<i32, LifeboatError> {
    let mut index = Index::load(&config.index_path())?;
    index.sort();

    let limit = matches.get_one::<usize>("limit").copied().unwrap_or(usize::MAX);
    let entries: Vec<_> = index
        .backups
        .into_iter()
        .filter(|e| !matches.get_flag("checkpoints") || e.checkpoint)
        .take(limit)
        .collect();

    if matches.get_flag("json") {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "backups": entries }))?
        );
        return Ok(0);
    }

    if entries.is_empty() {
        println!("No backups found in {}", config.backup_path.display());
        return Ok(0);
    }

    println!(
        "{:<26} {:<17} {:>10}  {:<12} NOTE",
        "ID", "DATE", "SIZE", "EXPIRES"
    );
    for entry in &entries {
        let expires = if entry.checkpoint {
            "checkpoint"
        } else if entry.delete_after.is_empty() {
            "never"
        } else {
            entry.delete_after.as_str()
        };
        println!(
            "{:<26} {:<17} {:>10}  {:<12} {}",
            entry.id,
            entry.date.format("%Y-%m-%d %H:%M"),
            entry.size,
            expires,
            entry.note
        );
    }

    let stats = RetentionManager::new(config).backup_stats()?;
    println!();
    println!(
        "{} backups ({} regular, {} checkpoints, {} expired), {} total",
        stats.total,
        stats.regular,
        stats.checkpoints,
        stats.expired,
        format_size(stats.total_size)
    );
    Ok(0)
}

fn cmd_restore(
    config: Config,
    context: BackupContext,
    matches: &ArgMatches,
    quiet: bool,
) -> Result<i32, LifeboatError> {
    let id = required(matches, "id")?;
    let target = Path::new(required(matches, "target")?);

    let backup = Backup::with_context(config, context)?;
    let mut reporter = ProgressReporter::new(ProgressConfig::auto_detect(quiet));
    let result = backup.restore(id, target, &mut |phase, current, total, message| {
        reporter.update(phase, current, total, message)
    })?;
    reporter.finish();

    if !quiet {
        println!(
            "Restored backup {} ({} archives) to {}",
            result.id,
            result.archives.len(),
            result.target.display()
        );
    }
    Ok(0)
}

fn cmd_cleanup(config: &Config, force: bool, quiet: bool) -> Result<i32, LifeboatError> {
    let result = RetentionManager::new(config).cleanup(!force)?;

    if !quiet {
        let verb = if result.dry_run { "Would delete" } else { "Deleted" };
        for id in &result.deleted_ids {
            println!("{verb}: {id}");
        }
        println!(
            "{verb} {} backup(s), {} freed, {} kept",
            result.backups_deleted,
            format_size(result.space_freed),
            result.backups_kept
        );
        if result.dry_run && result.backups_deleted > 0 {
            println!("Run with --force to delete");
        }
    }
    for warning in &result.warnings {
        eprintln!("  ! {warning}");
    }
    Ok(0)
}

fn cmd_units(config: Config, context: BackupContext) -> Result<i32, LifeboatError> {
    let backup = Backup::with_context(config, context)?;
    for info in backup.available_units()? {
        let status = if info.exists {
            format_size(info.size)
        } else if info.unit.required {
            "MISSING".to_string()
        } else {
            "missing (optional)".to_string()
        };
        println!(
            "{:<24} {:<10} {:>18}  {}",
            info.unit.name,
            info.unit.kind.as_str(),
            status,
            info.unit.path.display()
        );
    }
    Ok(0)
}

fn cmd_config(
    config: &Config,
    source: Option<&Path>,
    matches: &ArgMatches,
) -> Result<i32, LifeboatError> {
    if matches.get_flag("validate") {
        let result = config.validate();
        print!("{result}");
        return Ok(if result.valid { 0 } else { 2 });
    }

    dump_config(config, source);
    Ok(0)
}

fn setup_signal_handler(context: &BackupContext) {
    let context = context.clone();
    let installed = ctrlc::set_handler(move || {
        let error = LifeboatError::Interrupted;
        context.set_interrupted(true);
        eprintln!("{}", interrupt_notice(&error));
        context.cleanup_active_operations();
        process::exit(error.exit_code());
    });

    if let Err(e) = installed {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }
}

fn interrupt_notice(error: &LifeboatError) -> String {
    format!("\n{error}. Cleaning up...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_routes_through_error() {
        let error = LifeboatError::Interrupted;
        assert_eq!(
            interrupt_notice(&error),
            "\nOperation interrupted by user. Cleaning up..."
        );
        assert_eq!(error.exit_code(), 130);
    }

    #[test]
    fn test_cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn test_parse_backup_flags() {
        let matches = cli()
            .try_get_matches_from([
                "lifeboat", "backup", "--checkpoint", "-m", "before upgrade", "-u", "shop", "-u",
                "conf",
            ])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "backup");
        assert!(sub.get_flag("checkpoint"));
        assert!(!sub.get_flag("dry-run"));
        assert_eq!(sub.get_one::<String>("note").unwrap(), "before upgrade");
        let units: Vec<&String> = sub.get_many::<String>("unit").unwrap().collect();
        assert_eq!(units, vec!["shop", "conf"]);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let matches = cli()
            .try_get_matches_from(["lifeboat", "list", "--verbose", "-c", "custom.ini", "--limit", "3"])
            .unwrap();
        assert!(matches.get_flag("verbose"));
        assert_eq!(matches.get_one::<String>("config").unwrap(), "custom.ini");
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(sub.get_one::<usize>("limit"), Some(&3));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(cli()
            .try_get_matches_from(["lifeboat", "-q", "-v", "units"])
            .is_err());
    }

    #[test]
    fn test_restore_requires_target() {
        assert!(cli()
            .try_get_matches_from(["lifeboat", "restore", "latest"])
            .is_err());
        assert!(cli()
            .try_get_matches_from(["lifeboat", "restore", "latest", "/tmp/out"])
            .is_ok());
    }

    #[test]
    fn test_extend_parses_days() {
        let matches = cli()
            .try_get_matches_from(["lifeboat", "extend", "backup-20250101-120000", "14"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(sub.get_one::<i64>("days"), Some(&14));
        assert!(cli()
            .try_get_matches_from(["lifeboat", "extend", "backup-1", "soon"])
            .is_err());
    }
}
