use clap::Parser;

mod ai;
mod app;
mod auth;
mod cli;
mod config;
mod links;
mod models;
mod scrape;
mod semantic;
mod store;
#[cfg(test)]
mod tests;
mod web;

use app::AppFactory;
use cli::{Command, UserAction};
use config::Config;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config = Config::load()?;
    log::debug!("data directory: {}", config.base_path().display());
    let app = AppFactory::create_app(config)?;

    match args.command {
        Command::Daemon { listen } => web::start_daemon(app, listen),

        Command::User { action } => match action {
            UserAction::Add {
                email,
                verified,
                subscription,
            } => cli::handle_user_add(&app, &email, verified, &subscription),
            UserAction::Token { email } => cli::handle_user_token(&app, &email),
        },

        Command::Import {
            user,
            file,
            source,
            option,
        } => cli::handle_import(&app, &user, &file, &source, &option),
    }
}
