// src/main.rs

use flowtk::{cli, logging, report_exit, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("flowtk error: {err:?}");
        std::process::exit(flowtk::EXIT_CONFIG);
    }
    std::process::exit(report_exit(run(args).await));
}
