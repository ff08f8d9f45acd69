use clap::{Parser, Subcommand};

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH   (default: ./config.yaml)
  DB_PATH       (default: data/visitlog.db)
  HOST / PORT   (default: 0.0.0.0 / 5151)
  SECRET_KEY    session signing key (required)
  TIMEZONE      IANA zone for check-in times (default: UTC)
  MAIL_SERVER, MAIL_PORT, MAIL_USERNAME, MAIL_PASSWORD
  DEBUG, UPLOAD_DIR, BACKUP_DIR

`init-db` creates the schema and seeds the first admin and default courses.
"#;

/// Courses created by `init-db` when missing.
pub const DEFAULT_COURSES: [&str; 4] = [
    "Information Technology",
    "Marine Biology",
    "Home Economics and Industrial Arts",
    "Technology and Livelihood Education",
];

#[derive(Debug, Parser)]
#[command(
    name = "visitlog-server",
    version,
    about = "Library visit log server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Optional subcommand. Without one, runs the server.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server
    Serve,
    /// Create the database schema, the first admin (if none) and default courses
    InitDb {
        #[arg(long, default_value = "admin")]
        username: String,
        #[arg(long, default_value = "admin@library.local")]
        email: String,
        /// Password for the seeded admin
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "Library")]
        first_name: String,
        #[arg(long, default_value = "Administrator")]
        last_name: String,
        /// Skip seeding the default course list
        #[arg(long)]
        no_courses: bool,
    },
    /// Print the bcrypt hash of a password
    HashPassword {
        password: String,
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["visitlog-server"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn init_db_requires_password() {
        assert!(Cli::try_parse_from(["visitlog-server", "init-db"]).is_err());
        let cli =
            Cli::try_parse_from(["visitlog-server", "init-db", "--password", "pw"]).unwrap();
        match cli.command {
            Some(Command::InitDb {
                username,
                no_courses,
                ..
            }) => {
                assert_eq!(username, "admin");
                assert!(!no_courses);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
