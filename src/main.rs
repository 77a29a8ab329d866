// src/main.rs

use codeact::{cli, logging, run};

#[tokio::main]
async fn main() {
    // Exit explicitly: the runtime would otherwise wait on the blocking
    // stdin reader before shutting down.
    let code = match run_main().await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("codeact error: {err:?}");
            1
        }
    };
    std::process::exit(code);
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
