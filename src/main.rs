mod cli;
mod commands;
mod env_loader;
mod error;
mod graph;
mod ledger;
mod logging;

fn main() {
    env_loader::load_dotenv();
    logging::init();

    match cli::run() {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}
