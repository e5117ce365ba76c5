use catalog_sync_lib::{
    cli::{parse_args, Command},
    commands::{run_daemon, run_sync_once},
};

#[tokio::main]
async fn main() {
    let cli = parse_args();
    let exit_code = match cli.command {
        Command::Sync(args) => run_sync_once(args, cli.db_path, &cli.log_level).await,
        Command::Daemon(args) => run_daemon(args, cli.db_path, &cli.log_level).await,
    };
    std::process::exit(exit_code);
}
