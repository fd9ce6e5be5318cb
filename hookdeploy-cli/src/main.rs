use clap::{Parser, Subcommand};
use log::{debug, error};

/// CLI to sign and resend webhook deliveries to a hookdeploy server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Environment variable holding the shared secret
    #[arg(long, global = true, default_value = "SECRET")]
    secret_env: String,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the signature header value for a payload
    Sign {
        /// File containing the payload
        #[arg(long)]
        body: String,
    },
    /// Send a signed payload to a route, triggering its deployment
    Trigger(TriggerArgs),
}

#[derive(Parser, Debug)]
struct TriggerArgs {
    /// Server to which to send the request
    #[arg(short, long)]
    server: String,
    /// Route path, including the leading slash
    #[arg(long)]
    route: String,
    /// File containing the payload, an empty object is sent by default
    #[arg(long)]
    body: Option<String>,
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();
    let Args {
        secret_env,
        commands,
    } = Args::parse();
    if let Err(err) = run(&secret_env, commands).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(secret_env: &str, commands: Commands) -> Result<(), CliError> {
    let secret = std::env::var(secret_env)
        .map_err(|_| CliError::MissingSecret(secret_env.to_string()))?;
    match commands {
        Commands::Sign { body } => {
            let body = read_body(Some(body.as_str()))?;
            println!("{}", hookdeploy::signature(secret.as_bytes(), &body));
        }
        Commands::Trigger(TriggerArgs {
            server,
            route,
            body,
        }) => {
            let body = read_body(body.as_deref())?;
            let signature = hookdeploy::signature(secret.as_bytes(), &body);
            let url = format!("{}{}", server.trim_end_matches('/'), route);
            debug!("Sending {} bytes to {}", body.len(), url);
            let response = reqwest::Client::new()
                .post(&url)
                .header(hookdeploy::SIGNATURE_HEADER, signature)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?;
            let status = response.status();
            let text = response.text().await?;
            println!("{}: {}", status, text);
            if !status.is_success() {
                return Err(CliError::Rejected(status.as_u16()));
            }
        }
    }
    Ok(())
}

fn read_body(path: Option<&str>) -> Result<Vec<u8>, CliError> {
    match path {
        Some(path) => std::fs::read(path).map_err(|err| CliError::Body {
            path: path.to_string(),
            err,
        }),
        None => Ok(b"{}".to_vec()),
    }
}

#[derive(Debug)]
enum CliError {
    MissingSecret(String),
    Body { path: String, err: std::io::Error },
    Request(reqwest::Error),
    Rejected(u16),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::MissingSecret(var) => write!(f, "environment variable not set: {}", var),
            Self::Body { path, err } => write!(f, "could not read body ({}): {}", path, err),
            Self::Request(err) => write!(f, "request failed: {}", err),
            Self::Rejected(status) => {
                write!(f, "server rejected delivery with status {}", status)
            }
        }
    }
}

impl std::error::Error for CliError {}

impl From<reqwest::Error> for CliError {
    fn from(value: reqwest::Error) -> Self {
        Self::Request(value)
    }
}
