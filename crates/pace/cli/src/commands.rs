use nexum_apdu_core::Command;
use nexum_apdu_transport_pcsc::PcscTransport;
use nexum_pace::{PaceParameters, PaceSecureChannel, WirelessInitializer};
use tracing::info;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn open_channel(
    transport: PcscTransport,
    initializer: &WirelessInitializer,
    parameters: &PaceParameters,
) -> Result<PaceSecureChannel<PcscTransport>, Box<dyn std::error::Error>> {
    info!(
        algorithm = %parameters.algorithm,
        password = %initializer.kind(),
        "Establishing PACE"
    );

    match PaceSecureChannel::establish(transport, initializer, parameters) {
        Ok(channel) => Ok(channel),
        Err(e) if e.is_authentication_failure() => {
            if let Some(retries) = e.retries_left() {
                eprintln!("Wrong {}, {retries} tries left", initializer.kind());
            }
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Run PACE and print the session details
pub(crate) fn establish_command(
    transport: PcscTransport,
    initializer: &WirelessInitializer,
    parameters: &PaceParameters,
) -> CommandResult {
    let channel = open_channel(transport, initializer, parameters)?;

    println!("PACE established");
    println!("  Algorithm: {}", parameters.algorithm);
    if let Some(sm) = channel.secure_messaging() {
        println!("  Cipher suite: {}", sm.keys().suite());
    }
    if let Some(car) = channel.car() {
        println!("  CAR: {}", String::from_utf8_lossy(car));
    }
    if let Some(car) = channel.previous_car() {
        println!("  Previous CAR: {}", String::from_utf8_lossy(car));
    }

    Ok(())
}

/// Run PACE, then send each APDU through the secure channel
pub(crate) fn send_command(
    transport: PcscTransport,
    initializer: &WirelessInitializer,
    parameters: &PaceParameters,
    apdus: &[String],
) -> CommandResult {
    let commands = apdus
        .iter()
        .map(|apdu| -> Result<Command, Box<dyn std::error::Error>> {
            Ok(Command::from_bytes(&hex::decode(apdu.replace(' ', ""))?)?)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut channel = open_channel(transport, initializer, parameters)?;

    for command in &commands {
        let response = channel.transmit(command)?;
        let payload = response.payload().map(hex::encode).unwrap_or_default();
        println!("{} {}", payload, response.status());
    }

    Ok(())
}
