use anyhow::Result;
use clap::{Parser, Subcommand};
use ledgerlink_core::ca::{EnrollmentClient, EnrollmentSettings};
use ledgerlink_core::config::{Config, ConfigError};
use ledgerlink_core::gateway::Gateway;
use ledgerlink_core::identity::Identity;
use ledgerlink_core::logging::{init_logging_with_config, LogLevel};
use ledgerlink_core::profile::NetworkProfile;
use ledgerlink_core::sim::{SimNetwork, VotingChaincode};
use ledgerlink_core::voting::{VoteOutcome, VotingClient};
use ledgerlink_core::wallet::{FileWallet, Wallet};
use ledgerlink_core::{LedgerError, LedgerResult};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

/// Organisations of the in-process network: (name, MSP id, peers)
const DEMO_ORGS: [(&str, &str, usize); 2] = [("Org1", "Org1MSP", 2), ("Org2", "Org2MSP", 1)];

/// Fixed CA keys so identities enrolled by one run stay valid in the next
const DEMO_CA_SEED: [u8; 32] = *b"ledgerlink-demo-ca-seed-00000001";

#[derive(Parser, Debug)]
#[command(name = "ledgerlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error); overrides the config
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file; LEDGERLINK_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enroll, connect and run the voting flow against an in-process network
    Demo {
        /// Vote item to vote for
        #[arg(long, default_value = "1")]
        item: String,

        /// Wallet directory (defaults to the configured one)
        #[arg(long)]
        wallet: Option<PathBuf>,
    },

    /// Enroll the admin and register the application user into the wallet
    Enroll {
        #[arg(long)]
        wallet: Option<PathBuf>,
    },

    /// Inspect or edit the wallet
    Wallet {
        #[arg(long)]
        wallet: Option<PathBuf>,

        #[command(subcommand)]
        action: WalletCommand,
    },

    /// Write the effective configuration as TOML
    InitConfig { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum WalletCommand {
    /// List stored identities
    List,
    /// Delete a stored identity
    Remove { label: String },
}

fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        None => Config::from_env(),
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            Ok(config)
        }
    }
}

fn open_wallet(config: &Config, path: Option<&Path>) -> LedgerResult<Arc<dyn Wallet>> {
    let path = path.unwrap_or(config.wallet.path.as_path());
    let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
    let password = config.wallet_password()?;
    println!("Wallet path: {}", expanded);
    Ok(Arc::new(FileWallet::new(expanded, password.as_deref())?))
}

/// In-process network with the configured channel running the voting contract
fn demo_network(config: &Config) -> SimNetwork {
    let mut builder = SimNetwork::builder()
        .channel(&config.gateway.channel)
        .chaincode(&config.gateway.channel, &config.gateway.contract, VotingChaincode::new())
        .ca_seed(DEMO_CA_SEED);
    for (name, msp_id, peers) in DEMO_ORGS {
        builder = builder.organization(name, msp_id, peers);
    }
    builder.build()
}

fn demo_organization(msp_id: &str) -> LedgerResult<&'static str> {
    DEMO_ORGS
        .iter()
        .find(|(_, msp, _)| *msp == msp_id)
        .map(|(name, _, _)| *name)
        .ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "identity.msp_id {} is not an organization of the demo network",
                msp_id
            ))
            .into()
        })
}

async fn enroll(config: &Config, network: &SimNetwork, wallet: Arc<dyn Wallet>) -> LedgerResult<Identity> {
    let msp_id = &config.identity.msp_id;
    let ca = network.ca(msp_id).ok_or_else(|| {
        ConfigError::InvalidValue(format!("no certificate authority for {}", msp_id))
    })?;
    let client = EnrollmentClient::new(wallet, EnrollmentSettings::from(&config.identity));

    client.enroll_admin(ca.as_ref(), msp_id).await?;
    println!(
        "Admin identity \"{}\" is in the wallet",
        config.identity.admin_label
    );
    let user = client
        .register_and_enroll_user(
            ca.as_ref(),
            msp_id,
            &config.identity.user_id,
            &config.identity.affiliation,
        )
        .await?;
    println!("User identity \"{}\" is in the wallet", user.label);
    Ok(user)
}

fn print_items(items: Option<serde_json::Value>) {
    println!("-------Query all items-------");
    match items {
        Some(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
        ),
        None => println!("(no items)"),
    }
}

async fn vote(client: &VotingClient, item: &str) -> LedgerResult<()> {
    println!("-------Voting for item with ID {}-------", item);
    match client.vote_and_record(item).await? {
        VoteOutcome::Recorded { vote, update } => {
            println!("{}", vote.payload);
            println!("{}", update.payload);
        }
        VoteOutcome::Declined { message } => println!("{}", message),
    }
    Ok(())
}

async fn run_demo(config: &Config, item: &str, wallet_path: Option<&Path>) -> LedgerResult<()> {
    let network = demo_network(config);
    let wallet = open_wallet(config, wallet_path)?;
    let identity = enroll(config, &network, wallet).await?;

    let profile = match &config.gateway.profile {
        Some(path) => NetworkProfile::from_file(path)?,
        None => network.profile(demo_organization(&config.identity.msp_id)?)?,
    };
    let gateway = Gateway::connect(
        profile,
        identity,
        Arc::new(network.clone()),
        config.gateway_options(),
    )
    .await?;

    gateway
        .scoped(|gateway| async move {
            let channel = gateway.get_network(&config.gateway.channel).await?;
            let client = VotingClient::new(channel.get_contract(&config.gateway.contract));

            println!("{}", client.create_voter().await?);
            print_items(client.query_all_items().await?);
            vote(&client, item).await?;
            print_items(client.query_all_items().await?);
            // A second vote from the same voter is declined by the contract
            vote(&client, item).await?;
            print_items(client.query_all_items().await?);
            Ok::<_, LedgerError>(())
        })
        .await?;

    debug!(open_connections = network.open_connections(), "Demo finished");
    Ok(())
}

fn list_wallet(wallet: &dyn Wallet) -> LedgerResult<()> {
    let labels = wallet.list()?;
    if labels.is_empty() {
        println!("(wallet is empty)");
    }
    for label in labels {
        let identity = wallet.get(&label)?;
        let certificate = identity.certificate()?;
        println!(
            "{}\t{}\t{}\trole={}",
            label,
            identity.msp_id,
            certificate.body.subject,
            certificate.body.role
        );
    }
    Ok(())
}

async fn run(args: Args, config: Config) -> LedgerResult<()> {
    match args.command {
        Command::Demo { item, wallet } => run_demo(&config, &item, wallet.as_deref()).await,
        Command::Enroll { wallet } => {
            let network = demo_network(&config);
            let wallet = open_wallet(&config, wallet.as_deref())?;
            enroll(&config, &network, wallet).await.map(|_| ())
        }
        Command::Wallet { wallet, action } => {
            let wallet = open_wallet(&config, wallet.as_deref())?;
            match action {
                WalletCommand::List => list_wallet(wallet.as_ref()),
                WalletCommand::Remove { label } => {
                    wallet.remove(&label)?;
                    println!("Removed \"{}\"", label);
                    Ok(())
                }
            }
        }
        Command::InitConfig { path } => {
            config.save_to_file(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let mut log_config = config.logging.log_config()?;
    if let Some(level) = &args.log_level {
        log_config.level = level.parse::<LogLevel>()?;
    }
    if args.json_logs {
        log_config.json_format = true;
    }
    init_logging_with_config(log_config)?;
    info!(channel = %config.gateway.channel, contract = %config.gateway.contract, "LedgerLink CLI started");

    match run(args, config).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("Error ({}): {}", e.kind(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_demo_args() {
        let args = Args::try_parse_from(["ledgerlink", "--log-level", "debug", "demo", "--item", "2"])
            .unwrap();
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(matches!(args.command, Command::Demo { ref item, wallet: None } if item == "2"));
    }

    #[test]
    fn test_parse_wallet_commands() {
        let args = Args::try_parse_from(["ledgerlink", "wallet", "--wallet", "/tmp/w", "list"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Wallet { action: WalletCommand::List, .. }
        ));
        assert!(Args::try_parse_from(["ledgerlink"]).is_err());
    }

    #[test]
    fn test_demo_organization_lookup() {
        assert_eq!(demo_organization("Org2MSP").unwrap(), "Org2");
        assert!(demo_organization("Org9MSP").is_err());
    }
}
