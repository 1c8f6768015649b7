//! Load-test client: connects over WebSocket, streams random inputs and
//! logs the snapshots the server sends back.

use clap::Parser;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use rand::Rng;
use shared::{decode_snapshot, InputPacket, InputSnapshot};
use std::time::Duration;
use tokio::time::{interval, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[command(author, version, about = "Test client for the tick server")]
struct Args {
    /// WebSocket URL of the server
    #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
    url: String,
    /// Inputs sent per second
    #[arg(short, long, default_value_t = 20)]
    rate: u32,
    /// How long to run, in seconds
    #[arg(short, long, default_value_t = 10)]
    duration: u64,
}

fn random_input(rng: &mut impl Rng) -> InputSnapshot {
    InputSnapshot {
        move_left: rng.gen_bool(0.3),
        move_right: rng.gen_bool(0.3),
        jump: rng.gen_bool(0.1),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (ws, _) = connect_async(args.url.as_str()).await?;
    info!("Connected to {}", args.url);
    let (mut sink, mut stream) = ws.split();

    let mut rng = rand::thread_rng();
    let mut sender = interval(Duration::from_secs_f64(1.0 / f64::from(args.rate.max(1))));
    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut sequence: u32 = 1;
    let mut snapshots = 0usize;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = sender.tick() => {
                // The server overwrites the client id with the one it assigned
                let packet = InputPacket {
                    client_id: 0,
                    sequence,
                    input: random_input(&mut rng),
                };
                sink.send(Message::Binary(packet.encode()?)).await?;
                sequence += 1;
            }
            message = stream.next() => match message {
                Some(Ok(Message::Binary(data))) => match decode_snapshot(&data) {
                    Ok(records) => {
                        snapshots += 1;
                        for record in records {
                            info!(
                                "Player {}: pos=({}, {}) last seq {}",
                                record.client_id,
                                record.position_x,
                                record.position_y,
                                record.last_received_sequence
                            );
                        }
                    }
                    Err(e) => warn!("Bad snapshot: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    warn!("Server closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }

    info!(
        "Sent {} inputs, received {} snapshots",
        sequence - 1,
        snapshots
    );
    let _ = sink.close().await;
    Ok(())
}
