use clap::Parser;
use pgswing::CliArgs;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    pgswing::init_tracing();

    match pgswing::run::run(&args).await {
        Ok(outcome) => {
            tracing::info!(?outcome, "program terminated");
        }
        Err(error) => {
            tracing::error!(%error, "program terminated");
            std::process::exit(1);
        }
    }
}
