use std::{error::Error, path::PathBuf, sync::Arc};

use tracing_subscriber::EnvFilter;

use backupg::{
    cli::{Cli, Commands, parse_args},
    config::load_config,
    daemon::{self, BackupDaemon, PidFile},
    logs::{Journal, tail_journal},
    signals,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    match args.command {
        Commands::Start {
            config,
            daemonize,
            once,
            pid_file,
        } => {
            let config = load_config(&config)?;

            if daemonize {
                daemon::daemonize()?;
            }

            let pid_path = pid_file
                .map(PathBuf::from)
                .unwrap_or_else(PidFile::default_path);
            let _pid_file = PidFile::acquire(pid_path)?;

            let journal = Arc::new(Journal::open(config.log_file.as_ref())?);
            let daemon = BackupDaemon::new(config, Arc::clone(&journal));
            signals::install(
                journal,
                Arc::clone(daemon.active()),
                daemon.mount().clone(),
            )?;

            if once {
                daemon.run_once();
            } else {
                daemon.run();
            }
        }
        Commands::Stop { pid_file } => {
            let pid_path = pid_file
                .map(PathBuf::from)
                .unwrap_or_else(PidFile::default_path);
            daemon::stop_running_instance(&pid_path)?;
        }
        Commands::Logs { config, lines } => {
            let config = load_config(&config)?;
            tail_journal(config.log_file.as_ref(), lines)?;
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
