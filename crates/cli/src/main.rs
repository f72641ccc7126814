use clap::{Parser, Subcommand};

use lib::gateway::model::{AuthorizedUser, Interaction, Message, User};
use lib::gateway::protocol::event;
use lib::gateway::{GatewayClient, HandlerRegistry};
use lib::http::{Headers, Url};
use lib::tls::TlsConfig;

#[derive(Parser)]
#[command(name = "tilde")]
#[command(about = "Tilde CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Connect to the gateway and log incoming events until the connection closes.
    Run {
        /// Config file path (default: TILDE_CONFIG_PATH or ~/.tilde/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Issue a GET with the raw HTTP client and print the response.
    Get {
        /// Config file path (default: TILDE_CONFIG_PATH or ~/.tilde/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        url: String,

        /// Extra request header, `Name: value` (repeatable).
        #[arg(long = "header", short = 'H', value_name = "HEADER")]
        headers: Vec<String>,
    },

    /// Post a message to a channel.
    Send {
        /// Config file path (default: TILDE_CONFIG_PATH or ~/.tilde/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        #[arg(long, value_name = "ID")]
        channel: String,

        /// Message id to reply to.
        #[arg(long, value_name = "ID")]
        reply_to: Option<String>,

        text: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("tilde {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run_gateway(config).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Get {
            config,
            url,
            headers,
        }) => {
            if let Err(e) = run_get(config, &url, &headers).await {
                log::error!("get failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Send {
            config,
            channel,
            reply_to,
            text,
        }) => {
            if let Err(e) = run_send(config, &channel, reply_to.as_deref(), &text).await {
                log::error!("send failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn require_token(config: &lib::config::Config) -> anyhow::Result<String> {
    lib::config::resolve_token(config).ok_or_else(|| {
        anyhow::anyhow!(
            "no bot token: set {} or gateway.token in the config file",
            lib::config::TOKEN_ENV
        )
    })
}

async fn run_gateway(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    let token = require_token(&config)?;
    let tls = TlsConfig::default();
    let rest = config.http.rest(tls.clone());

    let handlers = HandlerRegistry::new()
        .on_ready(|client, ready| async move {
            log::info!(
                "ready as {} in {} guild(s)",
                client.user.username,
                ready.guilds.len()
            );
        })
        .on_typed(event::MESSAGE_CREATE, |_, message: Message| async move {
            log::info!(
                "message {} in {} from {}: {}",
                message.id,
                message.channel_id,
                message.author.username,
                message.content
            );
        })
        .on_typed(event::INTERACTION_CREATE, move |_, interaction: Interaction| {
            let rest = rest.clone();
            async move {
                log::info!(
                    "interaction {} ({:?})",
                    interaction.id,
                    interaction.custom_id()
                );
                if let Err(e) = rest
                    .send_interaction_ack(&interaction.id, &interaction.token)
                    .await
                {
                    log::warn!("could not acknowledge interaction {}: {}", interaction.id, e);
                }
            }
        });

    let client = GatewayClient::new(config.gateway.factory(tls)?, token, handlers)
        .with_intents(config.gateway.intents()?)
        .with_properties(config.gateway.properties())
        .with_queue_capacity(config.gateway.handler_queue);
    client.run().await?;
    Ok(())
}

/// Raw HTTP client honouring the `http` section of the config.
fn http_client(config: &lib::config::Config) -> lib::http::HttpClient {
    config.http.client(TlsConfig::default())
}

async fn run_get(
    config_path: Option<std::path::PathBuf>,
    url: &str,
    header_args: &[String],
) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let url = Url::parse(url)?;
    let mut headers = Headers::new();
    for arg in header_args {
        let (name, value) = arg
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("header must look like `Name: value`: {}", arg))?;
        headers.append(name.trim(), value.trim());
    }

    let response = http_client(&config).get(url, headers).await?;
    println!("{} {}", response.status_code, response.reason);
    for (name, values) in response.headers.iter() {
        for value in values {
            println!("{}: {}", name, value);
        }
    }
    println!();
    println!("{}", response.text());
    Ok(())
}

async fn run_send(
    config_path: Option<std::path::PathBuf>,
    channel: &str,
    reply_to: Option<&str>,
    text: &str,
) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let user = AuthorizedUser {
        token: require_token(&config)?,
        user: User::default(),
    };
    let rest = config.http.rest(TlsConfig::default());
    let response = rest
        .send_message(&user, channel, text, reply_to, Vec::new())
        .await?;
    if !response.is_success() {
        anyhow::bail!("send returned {} {}", response.status_code, response.reason);
    }
    let sent: Option<serde_json::Value> = response.json()?;
    if let Some(id) = sent.as_ref().and_then(|m| m.get("id")).and_then(|id| id.as_str()) {
        println!("sent message {}", id);
    }
    Ok(())
}
