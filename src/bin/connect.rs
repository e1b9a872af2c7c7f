use std::{env, error::Error, io, process::exit, sync::Arc};

use clap::Parser;
use rusqlite::Connection;
use tracing_subscriber::EnvFilter;

use banksync::{AesGcmCipher, AppState, SyncConfig, User, create_user, get_user_by_email};

/// Connect a user's Up Bank account and pull their accounts and recent transactions.
///
/// The user is created if no user has the email. The access token is read from
/// the `UP_TOKEN` environment variable, or prompted for if it is not set.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database. It is created if it does not exist.
    #[arg(long)]
    db_path: String,

    /// The email of the user to connect.
    #[arg(long)]
    email: String,

    /// How many days of transactions to pull.
    #[arg(long, default_value_t = 90)]
    days_back: u32,

    /// The base URL of the bank's API.
    #[arg(long)]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let token_secret =
        env::var("TOKEN_SECRET").expect("The environment variable 'TOKEN_SECRET' must be set");

    let token = match env::var("UP_TOKEN") {
        Ok(token) => token,
        Err(_) => match prompt_token()? {
            Some(token) => token,
            None => return Ok(()),
        },
    };

    let mut config = SyncConfig::default();
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }

    let conn = Connection::open(&args.db_path)?;
    let state = AppState::new(conn, Arc::new(AesGcmCipher::new(&token_secret)), config)?;
    let sync = state.sync;

    let user = sync.with_connection(|conn| get_or_create_user(&args.email, conn))?;
    println!("Connecting the bank account of {}", user.email);

    let accounts = sync.connect_bank(user.id, &token).await?;
    println!("{}", accounts.message);

    let transactions = sync.sync_transactions(user.id, args.days_back).await;
    println!("{}", transactions.message);

    if !(accounts.success && transactions.success) {
        exit(1);
    }

    Ok(())
}

fn get_or_create_user(email: &str, conn: &Connection) -> Result<User, banksync::Error> {
    match get_user_by_email(email, conn) {
        Err(banksync::Error::NotFound) => create_user(email, conn),
        result => result,
    }
}

/// Prompt for the access token, `None` if stdin was closed.
fn prompt_token() -> Result<Option<String>, io::Error> {
    loop {
        match rpassword::prompt_password("Enter your Up Bank personal access token: ") {
            Ok(token) if token.trim().is_empty() => {
                eprintln!("The token cannot be empty.");
            }
            Ok(token) => return Ok(Some(token.trim().to_owned())),
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(error) => return Err(error),
        }
    }
}
