use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

use vehicle_registry::config::load_config_from_str;
use vehicle_registry::parser::{Parser, ParserError, RESPOutput, MAX_ARRAY_LEN};
use vehicle_registry::server::{Server, SharedStore};
use vehicle_registry::store::backend::{Backend, JsonFileBackend, MemoryBackend};
use vehicle_registry::store::vehicle::Vehicle;
use vehicle_registry::store::VehicleStore;
use vehicle_registry::MAX_PENDING_BYTES;

async fn spawn_server(backend: Box<dyn Backend>) -> anyhow::Result<SocketAddr> {
    Ok(spawn_server_with_store(backend).await?.0)
}

async fn spawn_server_with_store(
    backend: Box<dyn Backend>,
) -> anyhow::Result<(SocketAddr, Arc<SharedStore>)> {
    let server = Server::with_store("127.0.0.1", 0, VehicleStore::new(backend)).await?;
    let addr = server.local_addr()?;
    let store = server.store();
    tokio::spawn(async move { server.start().await });
    Ok((addr, store))
}

fn command(parts: &[&str]) -> RESPOutput {
    RESPOutput::Array(parts.iter().map(|p| RESPOutput::bulk(*p)).collect())
}

fn vehicle_id(item: RESPOutput) -> anyhow::Result<String> {
    match item {
        RESPOutput::BulkString(json) => Ok(serde_json::from_str::<Vehicle>(&json)?.id),
        other => anyhow::bail!("expected vehicle, got {:?}", other),
    }
}

struct Client {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Client {
    async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
            buffer: BytesMut::new(),
        })
    }

    async fn send(&mut self, parts: &[&str]) -> anyhow::Result<()> {
        let mut out = BytesMut::new();
        command(parts).encode(&mut out);
        self.send_raw(&out).await
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> anyhow::Result<RESPOutput> {
        loop {
            match Parser::parse(&self.buffer) {
                Ok((frame, rest)) => {
                    let consumed = self.buffer.len() - rest.len();
                    let _ = self.buffer.split_to(consumed);
                    return Ok(frame);
                }
                Err(ParserError::IncompleteInput) => {
                    if self.stream.read_buf(&mut self.buffer).await? == 0 {
                        anyhow::bail!("connection closed");
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn call(&mut self, parts: &[&str]) -> anyhow::Result<RESPOutput> {
        self.send(parts).await?;
        self.read_reply().await
    }

    async fn vehicle(&mut self, parts: &[&str]) -> anyhow::Result<Vehicle> {
        match self.call(parts).await? {
            RESPOutput::BulkString(json) => Ok(serde_json::from_str(&json)?),
            other => anyhow::bail!("expected vehicle, got {:?}", other),
        }
    }

    async fn vehicle_ids(&mut self, parts: &[&str]) -> anyhow::Result<Vec<String>> {
        match self.call(parts).await? {
            RESPOutput::Array(items) => items.into_iter().map(vehicle_id).collect(),
            other => anyhow::bail!("expected array, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn vehicle_walkthrough_over_tcp() -> anyhow::Result<()> {
    let addr = spawn_server(Box::new(MemoryBackend::new())).await?;
    let mut client = Client::connect(addr).await?;

    assert_eq!(client.call(&["PING"]).await?, RESPOutput::SimpleString("PONG".into()));

    let v1 = client
        .vehicle(&["VEHICLE.PUT", "v1", "Civic", "2020", "1000", "500"])
        .await?;
    assert_eq!(v1.mileage, 1000);

    let v1 = client.vehicle(&["VEHICLE.ADDMILEAGE", "v1", "250"]).await?;
    assert_eq!(v1.mileage, 1250);

    let v1 = client.vehicle(&["VEHICLE.DEPRECIATE", "v1", "100"]).await?;
    assert_eq!(v1.depreciation, 600);
    assert_eq!(v1.mileage, 1250);

    assert_eq!(
        client.call(&["VEHICLE.GET", "v2"]).await?,
        RESPOutput::Error("ERR A vehicle with id=v2 not found".into())
    );

    assert_eq!(client.vehicle_ids(&["VEHICLE.FILTER", "model", "Civic"]).await?, ["v1"]);

    client
        .vehicle(&["VEHICLE.PUT", "v2", "Golf", "7", "500", "0"])
        .await?;
    assert_eq!(client.vehicle_ids(&["VEHICLE.SORT", "mileage"]).await?, ["v2", "v1"]);
    assert_eq!(client.vehicle_ids(&["VEHICLE.SORT", "model"]).await?, ["v1", "v2"]);
    assert_eq!(client.call(&["VEHICLE.COUNT"]).await?, RESPOutput::Integer(2));

    assert_eq!(client.vehicle(&["VEHICLE.GET", "v1"]).await?, v1);
    Ok(())
}

#[tokio::test]
async fn command_errors_keep_the_connection_open() -> anyhow::Result<()> {
    let addr = spawn_server(Box::new(MemoryBackend::new())).await?;
    let mut client = Client::connect(addr).await?;

    assert!(matches!(client.call(&["VEHICLE.FLY"]).await?, RESPOutput::Error(_)));
    assert!(matches!(
        client.call(&["VEHICLE.ADDMILEAGE", "v1", "ten"]).await?,
        RESPOutput::Error(_)
    ));
    assert!(matches!(client.call(&["VEHICLE.SORT", "wheels"]).await?, RESPOutput::Error(_)));

    let created = client
        .vehicle(&["VEHICLE.CREATE", "Civic", "2020", "10", "0"])
        .await?;
    assert!(Uuid::parse_str(&created.id).is_ok());
    assert_eq!(client.vehicle(&["VEHICLE.GET", created.id.as_str()]).await?, created);
    Ok(())
}

#[tokio::test]
async fn pipelined_commands_are_answered_in_order() -> anyhow::Result<()> {
    let addr = spawn_server(Box::new(MemoryBackend::new())).await?;
    let mut client = Client::connect(addr).await?;

    client.send(&["VEHICLE.PUT", "v1", "Civic", "2020", "0", "0"]).await?;
    client.send(&["VEHICLE.ADDMILEAGE", "v1", "1"]).await?;
    client.send(&["VEHICLE.ADDMILEAGE", "v1", "2"]).await?;
    client.send(&["VEHICLE.COUNT"]).await?;

    let mut mileages = Vec::new();
    for _ in 0..3 {
        match client.read_reply().await? {
            RESPOutput::BulkString(json) => {
                mileages.push(serde_json::from_str::<Vehicle>(&json)?.mileage)
            }
            other => anyhow::bail!("expected vehicle, got {:?}", other),
        }
    }
    assert_eq!(mileages, [0, 1, 3]);
    assert_eq!(client.read_reply().await?, RESPOutput::Integer(1));
    Ok(())
}

#[tokio::test]
async fn writes_survive_a_restart() -> anyhow::Result<()> {
    let dir = std::env::temp_dir().join(format!("vehicle_registry_it_{}", Uuid::new_v4()));
    let config = load_config_from_str(&format!(
        "[server]\nport = 0\n[storage]\ndir = {:?}\n",
        dir.display().to_string()
    ))?;

    {
        let server = Server::new(&config).await?;
        let addr = server.local_addr()?;
        let store = server.store();
        let handle = tokio::spawn(async move { server.start().await });

        let mut client = Client::connect(addr).await?;
        client
            .vehicle(&["VEHICLE.PUT", "v1", "Civic", "2020", "1000", "500"])
            .await?;
        client.vehicle(&["VEHICLE.ADDMILEAGE", "v1", "250"]).await?;
        assert_eq!(store.len().await, 1);
        handle.abort();
    }

    let reopened = JsonFileBackend::open(config.storage.snapshot_path()).await?;
    let vehicle = reopened.get("v1").cloned();
    assert_eq!(vehicle.map(|v| v.mileage), Some(1250));

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

#[tokio::test]
async fn malformed_frame_still_answers_earlier_commands() -> anyhow::Result<()> {
    let (addr, store) = spawn_server_with_store(Box::new(MemoryBackend::new())).await?;
    let mut client = Client::connect(addr).await?;

    let mut out = BytesMut::new();
    command(&["VEHICLE.PUT", "v1", "Civic", "2020", "1000", "500"]).encode(&mut out);
    out.extend_from_slice(b"?garbage\r\n");
    client.send_raw(&out).await?;

    match client.read_reply().await? {
        RESPOutput::BulkString(json) => {
            assert_eq!(serde_json::from_str::<Vehicle>(&json)?.id, "v1")
        }
        other => anyhow::bail!("expected vehicle, got {:?}", other),
    }
    assert!(matches!(client.read_reply().await?, RESPOutput::Error(_)));
    assert!(client.read_reply().await.is_err());
    assert_eq!(store.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn oversized_frames_close_the_connection() -> anyhow::Result<()> {
    let addr = spawn_server(Box::new(MemoryBackend::new())).await?;

    let mut client = Client::connect(addr).await?;
    client.send_raw(b"*1\r\n$9000000000000000000\r\n").await?;
    assert!(matches!(client.read_reply().await?, RESPOutput::Error(_)));
    assert!(client.read_reply().await.is_err());

    // An array whose elements are each within limits but never completes is cut off too.
    let mut client = Client::connect(addr).await?;
    let mut out = format!("*{}\r\n", MAX_ARRAY_LEN).into_bytes();
    while out.len() <= MAX_PENDING_BYTES {
        out.extend_from_slice(b"$8192\r\n");
        out.extend_from_slice(&[b'x'; 8192]);
        out.extend_from_slice(b"\r\n");
    }
    // The server may close before everything is written.
    let _ = client.send_raw(&out).await;
    let reply = client.read_reply().await;
    assert!(matches!(reply, Ok(RESPOutput::Error(_)) | Err(_)));
    Ok(())
}

#[tokio::test]
async fn nested_arrays_are_refused() -> anyhow::Result<()> {
    let addr = spawn_server(Box::new(MemoryBackend::new())).await?;
    let mut client = Client::connect(addr).await?;

    // Kept small enough to arrive in one read, so the close is not a reset.
    let mut out = b"*1\r\n".repeat(500);
    out.extend_from_slice(b"+x\r\n");
    client.send_raw(&out).await?;
    assert!(matches!(client.read_reply().await?, RESPOutput::Error(_)));

    // The server is still up for other clients.
    let mut other = Client::connect(addr).await?;
    assert_eq!(other.call(&["PING"]).await?, RESPOutput::SimpleString("PONG".into()));
    Ok(())
}
