use std::net::SocketAddr;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pma_heuristics::Snapshot;
use pma_kernel::TelemetryRow;
use pma_protocol::TelemetryIngest;

use crate::AppState;

/// Persist one reading and announce it; threshold crossings additionally fire
/// an anomaly event so subscribers see problems without polling.
pub(crate) async fn persist(
    state: &AppState,
    reading: &TelemetryIngest,
) -> anyhow::Result<TelemetryRow> {
    let row = state.kernel().insert_telemetry_async(reading).await?;
    state.bus().publish(
        pma_topics::TOPIC_TELEMETRY_INGESTED,
        &json!({
            "id": row.id,
            "vehicle_id": row.vehicle_id,
            "timestamp": row.timestamp,
        }),
    );
    let anomalies = pma_heuristics::evaluate(&Snapshot {
        engine_temp: row.engine_temp,
        battery_level: row.battery_level,
        brake_wear: row.brake_wear,
        tire_pressure_fl: row.tire_pressure_fl,
        tire_pressure_fr: row.tire_pressure_fr,
    });
    if !anomalies.is_empty() {
        state.bus().publish(
            pma_topics::TOPIC_TELEMETRY_ANOMALY,
            &json!({
                "vehicle_id": row.vehicle_id,
                "anomalies": anomalies,
            }),
        );
    }
    Ok(row)
}

/// Streaming counterpart of `POST /telemetry`: newline-delimited JSON readings
/// over a persistent connection, one ack line per message. A bad line answers
/// `error: …` and the connection stays open.
pub(crate) async fn run_listener(state: AppState, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    handle_conn(state, socket, peer).await;
                });
            }
            Err(err) => {
                warn!(error = %err, "ingest accept failed");
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

async fn handle_conn(state: AppState, socket: TcpStream, peer: SocketAddr) {
    let conn_id = Uuid::new_v4();
    info!(%peer, %conn_id, "ingest connection opened");
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let ack = match serde_json::from_str::<TelemetryIngest>(line) {
                    Ok(reading) => match persist(&state, &reading).await {
                        Ok(row) => format!("ok {}\n", row.vehicle_id),
                        Err(err) => format!("error: {}\n", err),
                    },
                    Err(err) => format!("error: {}\n", err),
                };
                if writer.write_all(ack.as_bytes()).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(%conn_id, error = %err, "ingest read failed");
                break;
            }
        }
    }
    debug!(%conn_id, "ingest connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, sample_telemetry};

    #[tokio::test]
    async fn persist_announces_ingest_and_anomalies() {
        let ctx = test_support::test_state().await;
        let mut rx = ctx.state.bus().subscribe();
        let mut reading = sample_telemetry("VH-EVT");
        reading.engine_temp = 110.0;
        persist(&ctx.state, &reading).await.unwrap();
        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, pma_topics::TOPIC_TELEMETRY_INGESTED);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.kind, pma_topics::TOPIC_TELEMETRY_ANOMALY);
        assert_eq!(second.payload["anomalies"][0], "High Engine Temperature: 110°C");
    }

    #[tokio::test]
    async fn tcp_lines_ack_and_survive_bad_input() {
        let ctx = test_support::test_state().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(run_listener(ctx.state.clone(), listener));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut acks = BufReader::new(read_half).lines();
        let good = serde_json::to_string(&sample_telemetry("VH-STREAM")).unwrap();

        write_half
            .write_all(format!("{}\n", good).as_bytes())
            .await
            .unwrap();
        assert_eq!(acks.next_line().await.unwrap().unwrap(), "ok VH-STREAM");

        write_half.write_all(b"{not json}\n").await.unwrap();
        let err_ack = acks.next_line().await.unwrap().unwrap();
        assert!(err_ack.starts_with("error:"), "got {err_ack:?}");

        // connection survives the bad line
        write_half
            .write_all(format!("{}\n", good).as_bytes())
            .await
            .unwrap();
        assert_eq!(acks.next_line().await.unwrap().unwrap(), "ok VH-STREAM");

        let stored = ctx
            .state
            .kernel()
            .list_telemetry_for("VH-STREAM", 10)
            .unwrap();
        assert_eq!(stored.len(), 2);
        task.abort();
    }
}
