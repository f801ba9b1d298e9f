use clap::{Args, Parser, Subcommand};
use nexum_apdu_transport_pcsc::{PcscConfig, PcscDeviceManager};
use nexum_pace::{DomainParameters, PaceAlgorithm, PaceChat, PaceConfig, PaceParameters, WirelessInitializer};
use tracing::info;

mod commands;
mod reader;

use commands::*;

#[derive(Parser)]
#[command(version, about = "Establish PACE secure channels with ICAO and eID documents")]
struct Cli {
    /// Optional reader name to use (will auto-detect if not specified)
    #[arg(short, long, global = true)]
    reader: Option<String>,

    /// Trace level output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available readers
    List,

    /// Run PACE and report the negotiated session
    Establish {
        #[command(flatten)]
        password: PasswordArgs,

        #[command(flatten)]
        pace: PaceArgs,
    },

    /// Run PACE, then send APDUs through secure messaging
    Send {
        #[command(flatten)]
        password: PasswordArgs,

        #[command(flatten)]
        pace: PaceArgs,

        /// Plain command APDUs as hex strings
        #[arg(required = true)]
        apdus: Vec<String>,
    },
}

/// Password used for PACE, exactly one must be given
#[derive(Args)]
#[group(required = true, multiple = false)]
struct PasswordArgs {
    /// Card access number
    #[arg(long)]
    can: Option<String>,

    /// PIN
    #[arg(long)]
    pin: Option<String>,

    /// PUK
    #[arg(long)]
    puk: Option<String>,

    /// Document number, date of birth and date of expiry (YYMMDD)
    #[arg(long, value_name = "DOC,DOB,DOE", value_delimiter = ',', num_args = 3)]
    mrz: Option<Vec<String>>,
}

impl PasswordArgs {
    fn initializer(&self) -> nexum_pace::Result<WirelessInitializer> {
        match (&self.can, &self.pin, &self.puk, self.mrz.as_deref()) {
            (Some(can), ..) => WirelessInitializer::can(can),
            (_, Some(pin), ..) => WirelessInitializer::pin(pin),
            (_, _, Some(puk), _) => WirelessInitializer::puk(puk),
            (_, _, _, Some([document, birth, expiry])) => {
                WirelessInitializer::mrz(document, birth, expiry)
            }
            _ => Err(nexum_pace::Error::InvalidPassword("no password given")),
        }
    }
}

/// Algorithm selection and handshake options
#[derive(Args)]
struct PaceArgs {
    /// PACE algorithm, e.g. ecdh-gm-aes-128 or ecdh-gm-3des
    #[arg(long, default_value = "ecdh-gm-aes-128", value_parser = parse_algorithm)]
    algorithm: PaceAlgorithm,

    /// Standardized domain parameter id (12 = NIST P-256, 13 = brainpoolP256r1)
    #[arg(long, default_value_t = 12)]
    parameter_id: u8,

    /// Announce the domain parameters in MSE Set AT
    #[arg(long)]
    announce_parameters: bool,

    /// Skip verification of the card's authentication token
    #[arg(long)]
    no_verify_token: bool,

    /// Request an inspection system CHAT with these rights (hex byte)
    #[arg(long, value_name = "RIGHTS")]
    inspection_system: Option<String>,
}

impl PaceArgs {
    fn parameters(&self) -> Result<PaceParameters, Box<dyn std::error::Error>> {
        let config = PaceConfig::default()
            .with_announce_domain_parameters(self.announce_parameters)
            .with_verify_chip_token(!self.no_verify_token);
        let mut parameters =
            PaceParameters::new(self.algorithm, DomainParameters::from_id(self.parameter_id))
                .with_config(config);

        if let Some(rights) = &self.inspection_system {
            let rights = u8::from_str_radix(rights.trim_start_matches("0x"), 16)?;
            parameters = parameters.with_chat(PaceChat::inspection_system(rights)?);
        }

        Ok(parameters)
    }
}

fn parse_algorithm(s: &str) -> Result<PaceAlgorithm, String> {
    s.parse().map_err(|e: nexum_pace::Error| e.to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let manager = PcscDeviceManager::new()?;

    if let Commands::List = cli.command {
        reader::list_readers(&manager)?;
        return Ok(());
    }

    let reader = match &cli.reader {
        Some(reader_name) => reader::find_reader_by_name(&manager, reader_name)?,
        None => reader::find_reader_with_card(&manager)?,
    };
    info!("Using reader: {}", reader.name());

    let transport = manager.open_reader_with_config(reader.name(), PcscConfig::secure_session())?;

    match &cli.command {
        Commands::List => unreachable!(), // Already handled above
        Commands::Establish { password, pace } => {
            establish_command(transport, &password.initializer()?, &pace.parameters()?)?
        }
        Commands::Send {
            password,
            pace,
            apdus,
        } => send_command(transport, &password.initializer()?, &pace.parameters()?, apdus)?,
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::TRACE
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
}
