mod cli;

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use clap::Parser;
use ed25519_dalek::VerifyingKey;

use pah_core::identity::{identity_path, SigningIdentity};
use pah_server::{Activity, Server, ServerConfig};
use pah_server::activity::IoMessage;

use crate::cli::Cli;

const APP_NAME: &str = "permuter-server";

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let identity = SigningIdentity::load_or_create(&identity_path(APP_NAME)?)?;

    if cli.print_identity {
        println!("{}", identity.fingerprint());
        return Ok(());
    }

    if !(pah_wire::envelope::MIN_PRIORITY..=pah_wire::envelope::MAX_PRIORITY).contains(&cli.min_priority) {
        anyhow::bail!(
            "--min-priority must be between {} and {}",
            pah_wire::envelope::MIN_PRIORITY,
            pah_wire::envelope::MAX_PRIORITY
        );
    }

    let authorized_client_keys = cli
        .authorized_keys
        .iter()
        .map(|b64| decode_verifying_key(b64))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let config = ServerConfig {
        bind_addr: cli.bind,
        evaluator_command: cli.evaluator_command.expect("checked by clap"),
        evaluator_args: cli.evaluator_args,
        num_evaluators: cli.num_evaluators.max(1),
        authorized_client_keys,
        min_priority: cli.min_priority,
        idle_announce_after: Duration::from_secs(cli.idle_announce_secs),
    };

    let server = Server::new(config, identity.signing_key().clone());
    let shutdown_tx = server.activity_handle();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(Activity::Shutdown);
    })?;

    let (io_tx, io_rx) = crossbeam_channel::unbounded();
    let run_handle = std::thread::spawn(move || server.run(io_tx));

    for message in io_rx {
        print_io_message(&message);
    }
    run_handle.join().expect("server thread panicked")?;

    Ok(())
}

fn print_io_message(message: &IoMessage) {
    match message {
        IoMessage::ClientConnect { nickname } => println!("client connected: {nickname}"),
        IoMessage::ClientDisconnect { nickname, reason } => match reason {
            Some(reason) => println!("client disconnected: {nickname} ({reason})"),
            None => println!("client disconnected: {nickname}"),
        },
        IoMessage::WillSleep => println!("no clients connected, waiting..."),
        IoMessage::Shutdown => println!("shutting down"),
    }
}

fn decode_verifying_key(b64: &str) -> anyhow::Result<VerifyingKey> {
    let bytes = B64.decode(b64)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("public key must be 32 bytes"))?;
    Ok(VerifyingKey::from_bytes(&arr)?)
}
