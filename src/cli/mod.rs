use clap::{Parser, Subcommand};

mod handlers;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API and the import worker.
    Daemon {
        /// Address to listen on, overrides `server.listen`
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Queue an export file for import
    Import {
        /// Email of the user the bookmarks belong to
        #[clap(short, long)]
        user: String,

        /// Export ZIP file
        file: std::path::PathBuf,

        #[clap(long, default_value = "pocket")]
        source: String,

        /// Which rows to import
        #[clap(long, default_value = "all", value_parser = ["all", "highlighted"])]
        option: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// Create a user and print a fresh API token.
    Add {
        #[clap(short, long)]
        email: String,

        /// Mark the email as verified
        #[clap(long, default_value = "false")]
        verified: bool,

        /// Subscription status, e.g. free, active, trialing
        #[clap(long, default_value = "free")]
        subscription: String,
    },

    /// Issue another API token for an existing user.
    Token {
        #[clap(short, long)]
        email: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_add() {
        let args = Args::parse_from([
            "bookshelf",
            "user",
            "add",
            "--email",
            "reader@example.com",
            "--verified",
            "--subscription",
            "active",
        ]);
        match args.command {
            Command::User {
                action:
                    UserAction::Add {
                        email,
                        verified,
                        subscription,
                    },
            } => {
                assert_eq!(email, "reader@example.com");
                assert!(verified);
                assert_eq!(subscription, "active");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_import_rejects_unknown_option() {
        let res = Args::try_parse_from([
            "bookshelf",
            "import",
            "--user",
            "reader@example.com",
            "export.zip",
            "--option",
            "everything",
        ]);
        assert!(res.is_err());
    }
}
