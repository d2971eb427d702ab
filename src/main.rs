use std::{io, path::Path, process, sync::Arc, time::Duration};

use clap::{command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, LevelFilter};

use airplus::{
    appliance::Command,
    auth::AuthClient,
    directory::DeviceDirectory,
    error::{Error, Result},
    http::Client as HttpClient,
    mqtt::MqttTransport,
    protocol::shadow::PresetMode,
    remote::Remote,
    secrets::Secrets,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// How long one-shot commands wait for the broker.
const COMMAND_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Secrets file
    ///
    /// Holds the client credentials and, after `login`, the tokens for your
    /// account. Keep this file private.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// OAuth client id of the vendor app
    ///
    /// Overrides `client_id` in the secrets file.
    #[arg(long, env = "AIRPLUS_CLIENT_ID", hide_env_values = true)]
    client_id: Option<String>,

    /// OAuth client secret of the vendor app
    ///
    /// Overrides `client_secret` in the secrets file.
    #[arg(long, env = "AIRPLUS_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    action: Action,
}

#[derive(Clone, Debug, Subcommand)]
enum Action {
    /// Sign in and pick the appliance to control
    Login,

    /// Stay connected and log state changes until interrupted
    Watch,

    /// Switch the appliance on
    On {
        /// Preset to select after switching on (auto, low, medium, high)
        #[arg(short, long)]
        mode: Option<PresetMode>,
    },

    /// Switch the appliance off
    Off,

    /// Select a fan preset (auto, low, medium, high)
    Mode { mode: PresetMode },
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("airplus", level);
    }

    logger.init();
}

/// Interactive authorization code login.
async fn login(directory: &DeviceDirectory, secrets_file: &Path) -> Result<()> {
    let pkce = AuthClient::generate_pkce();
    let url = directory.auth().authorization_url(&pkce);

    println!("Open this URL in a browser and sign in:\n\n{url}\n");
    println!("Your browser will then fail to open a com.philips.air:// link.");
    println!("Copy that link from the address bar or developer tools and paste it here:");

    let redirect = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .map_err(|e| Error::internal(e.to_string()))??;

    let code = AuthClient::code_from_redirect(&redirect)?;
    directory.auth().exchange_code(&code, pkce).await?;

    let device = directory.select_device().await?;
    info!(
        "controlling {} ({})",
        device.friendly_name.as_deref().unwrap_or("unnamed appliance"),
        device.thing_name
    );
    Secrets::update(secrets_file, |secrets| secrets.device = Some(device))?;
    info!("login saved to {}", secrets_file.display());

    Ok(())
}

/// Logs appliance and connection state until Ctrl-C.
async fn watch(remote: Remote) -> Result<()> {
    let mut state = remote.watch_state();
    let mut connection = remote.watch_connection();

    loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down gracefully");
                break;
            }

            Ok(()) = state.changed() => {
                let state = *state.borrow_and_update();
                info!("appliance is {state}");
            }

            Ok(()) = connection.changed() => {
                let connection = *connection.borrow_and_update();
                debug!("connection {connection}");
            }
        }
    }

    remote.disconnect().await;
    Ok(())
}

/// Connects, sends one command and disconnects.
async fn send(remote: Remote, command: Command) -> Result<()> {
    let result = async {
        remote.wait_until_connected(COMMAND_CONNECT_TIMEOUT).await?;
        match command {
            Command::TurnOn(mode) => remote.turn_on(mode).await,
            Command::TurnOff => remote.turn_off().await,
            Command::SetPresetMode(mode) => remote.set_preset_mode(mode).await,
        }
    }
    .await;

    let state = remote.state();
    remote.disconnect().await;

    result?;
    info!("sent {command}; appliance is {state}");
    Ok(())
}

/// Main application entry after argument parsing.
///
/// # Errors
///
/// Returns an error when credentials are missing, login fails, or a command
/// cannot be delivered.
async fn run(args: Args) -> Result<()> {
    let secrets_file = Path::new(&args.secrets_file);
    let secrets = Secrets::load_or_default(secrets_file)?;

    let config = Arc::new(secrets.config(args.client_id, args.client_secret)?);
    let http = Arc::new(HttpClient::new(&config)?);
    let store = Arc::new(secrets.credential_store());

    // The secrets file is tiny, so it is rewritten inline on the refresh path.
    let persist_to = secrets_file.to_owned();
    let auth = AuthClient::new(Arc::clone(&config), http, store).with_token_callback(
        move |tokens| {
            let result = Secrets::update(&persist_to, |secrets| {
                secrets.tokens = Some(tokens.clone());
            });
            if let Err(e) = result {
                error!("cannot save tokens to {}: {e}", persist_to.display());
            }
        },
    );
    let directory = Arc::new(DeviceDirectory::new(Arc::new(auth)));

    let command = match args.action {
        Action::Login => return login(&directory, secrets_file).await,
        Action::Watch => None,
        Action::On { mode } => Some(Command::TurnOn(mode)),
        Action::Off => Some(Command::TurnOff),
        Action::Mode { mode } => Some(Command::SetPresetMode(mode)),
    };

    let device = secrets.device.ok_or_else(|| {
        Error::failed_precondition(format!(
            "no appliance in {}; run `airplus login` first",
            secrets_file.display()
        ))
    })?;
    let remote = Remote::connect(config, device, directory, Arc::new(MqttTransport));

    match command {
        Some(command) => send(remote, command).await,
        None => watch(remote).await,
    }
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the selected action.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump the action before we do anything more. The arguments as a whole
    // may carry the client secret.
    debug!("Command {:#?} with {}", args.action, args.secrets_file);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
