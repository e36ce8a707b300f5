use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

pub mod config;
pub mod error;
pub mod logging;
pub mod parser;
pub mod server;
pub mod store;

use error::{Result, VehicleError};
use parser::{ParserError, RESPOutput, MAX_BULK_LEN};
use store::backend::Backend;
use store::clock::Clock;
use store::vehicle::{parse_number, NewVehicle, Vehicle, VehicleCriteria, VehicleField};
use store::VehicleStore;

use crate::parser::Parser;

/// Bytes a client may leave buffered while a frame is still incomplete.
pub const MAX_PENDING_BYTES: usize = 4 * MAX_BULK_LEN;

pub async fn handle_connection<B, C>(
    mut stream: TcpStream,
    store: &VehicleStore<B, C>,
) -> Result<()>
where
    B: Backend,
    C: Clock,
{
    let mut buffer = BytesMut::with_capacity(4096);
    let mut reply = BytesMut::new();

    loop {
        let size = stream.read_buf(&mut buffer).await?;
        if size == 0 {
            return Ok(());
        }

        let outcome = process_frames(&mut buffer, &mut reply, store).await;
        // Replies for commands already applied go out before the connection is dropped.
        if let Err(e) = &outcome {
            RESPOutput::error(e).encode(&mut reply);
        }
        if !reply.is_empty() {
            stream.write_all(&reply).await?;
            reply.clear();
        }
        outcome?;
    }
}

/// Runs every complete frame in `buffer`, appending replies to `reply`.
/// A malformed or oversized frame ends processing with an error.
async fn process_frames<B, C>(
    buffer: &mut BytesMut,
    reply: &mut BytesMut,
    store: &VehicleStore<B, C>,
) -> Result<()>
where
    B: Backend,
    C: Clock,
{
    // A single read may carry several pipelined commands, or only part of one.
    loop {
        let (frame, consumed) = match Parser::parse(&buffer[..]) {
            Ok((frame, rest)) => (frame, buffer.len() - rest.len()),
            Err(ParserError::IncompleteInput) if buffer.len() > MAX_PENDING_BYTES => {
                return Err(ParserError::TooLarge.into());
            }
            Err(ParserError::IncompleteInput) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        buffer.advance(consumed);

        let response = match Command::from_resp(frame) {
            Ok(command) => command.execute(store).await,
            Err(e) => Err(e),
        };
        let response = response.unwrap_or_else(|e| {
            warn!(error = %e, "command failed");
            RESPOutput::error(e)
        });
        response.encode(reply);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo(String),
    Create(NewVehicle),
    Put(String, NewVehicle),
    Get(String),
    AddMileage(String, u64),
    AddDepreciation(String, u64),
    Filter(VehicleCriteria),
    Sort(VehicleField),
    Count,
}

impl Command {
    pub fn from_resp(resp: RESPOutput) -> Result<Self> {
        match resp {
            RESPOutput::Array(elements) => Self::parse_command(elements),
            _ => Err(VehicleError::InvalidArguments),
        }
    }

    fn parse_command(elements: Vec<RESPOutput>) -> Result<Self> {
        let (command, args) = elements.split_first().ok_or(VehicleError::InvalidArguments)?;

        let name = text(command)?;
        match name.to_uppercase().as_str() {
            "PING" => Ok(Command::Ping),
            "ECHO" => {
                expect_args(args, 1)?;
                Ok(Command::Echo(string_arg(args, 0)?))
            }
            "VEHICLE.CREATE" => {
                expect_args(args, 4)?;
                Ok(Command::Create(new_vehicle(args)?))
            }
            "VEHICLE.PUT" => {
                expect_args(args, 5)?;
                Ok(Command::Put(string_arg(args, 0)?, new_vehicle(&args[1..])?))
            }
            "VEHICLE.GET" => {
                expect_args(args, 1)?;
                Ok(Command::Get(string_arg(args, 0)?))
            }
            "VEHICLE.ADDMILEAGE" => {
                expect_args(args, 2)?;
                Ok(Command::AddMileage(
                    string_arg(args, 0)?,
                    number_arg(args, 1, VehicleField::Mileage)?,
                ))
            }
            "VEHICLE.DEPRECIATE" => {
                expect_args(args, 2)?;
                Ok(Command::AddDepreciation(
                    string_arg(args, 0)?,
                    number_arg(args, 1, VehicleField::Depreciation)?,
                ))
            }
            "VEHICLE.FILTER" => {
                if args.len() % 2 != 0 {
                    return Err(VehicleError::InvalidArguments);
                }
                let mut criteria = VehicleCriteria::default();
                for pair in args.chunks(2) {
                    criteria = criteria.with(&text(&pair[0])?, &text(&pair[1])?)?;
                }
                Ok(Command::Filter(criteria))
            }
            "VEHICLE.SORT" => {
                expect_args(args, 1)?;
                Ok(Command::Sort(text(&args[0])?.parse()?))
            }
            "VEHICLE.COUNT" => {
                expect_args(args, 0)?;
                Ok(Command::Count)
            }
            _ => Err(VehicleError::UnknownCommand),
        }
    }

    pub async fn execute<B, C>(&self, store: &VehicleStore<B, C>) -> Result<RESPOutput>
    where
        B: Backend,
        C: Clock,
    {
        debug!(command = ?self, "executing");
        Ok(match self {
            Command::Ping => RESPOutput::SimpleString("PONG".to_string()),
            Command::Echo(s) => RESPOutput::bulk(s.as_str()),
            Command::Create(vehicle) => vehicle_reply(&store.create(vehicle.clone()).await?)?,
            Command::Put(id, vehicle) => {
                vehicle_reply(&store.put(id.as_str(), vehicle.clone()).await?)?
            }
            Command::Get(id) => vehicle_reply(&store.get(id).await?)?,
            Command::AddMileage(id, miles) => {
                vehicle_reply(&store.add_mileage(id, *miles).await?)?
            }
            Command::AddDepreciation(id, amount) => {
                vehicle_reply(&store.add_depreciation(id, *amount).await?)?
            }
            Command::Filter(criteria) => vehicles_reply(&store.filter(criteria).await)?,
            Command::Sort(field) => vehicles_reply(&store.sort_by(*field).await)?,
            Command::Count => {
                RESPOutput::Integer(i64::try_from(store.len().await).unwrap_or(i64::MAX))
            }
        })
    }
}

fn vehicle_reply(vehicle: &Vehicle) -> Result<RESPOutput> {
    Ok(RESPOutput::bulk(serde_json::to_string(vehicle)?))
}

fn vehicles_reply(vehicles: &[Vehicle]) -> Result<RESPOutput> {
    vehicles
        .iter()
        .map(vehicle_reply)
        .collect::<Result<Vec<_>>>()
        .map(RESPOutput::Array)
}

fn expect_args(args: &[RESPOutput], count: usize) -> Result<()> {
    if args.len() == count {
        Ok(())
    } else {
        Err(VehicleError::InvalidArguments)
    }
}

fn text(arg: &RESPOutput) -> Result<String> {
    match arg {
        RESPOutput::BulkString(s) | RESPOutput::SimpleString(s) => Ok(s.clone()),
        RESPOutput::Integer(i) => Ok(i.to_string()),
        _ => Err(VehicleError::InvalidArguments),
    }
}

fn string_arg(args: &[RESPOutput], index: usize) -> Result<String> {
    args.get(index)
        .ok_or(VehicleError::InvalidArguments)
        .and_then(text)
}

fn number_arg(args: &[RESPOutput], index: usize, field: VehicleField) -> Result<u64> {
    parse_number(field, &string_arg(args, index)?)
}

fn new_vehicle(args: &[RESPOutput]) -> Result<NewVehicle> {
    Ok(NewVehicle::new(
        string_arg(args, 0)?,
        string_arg(args, 1)?,
        number_arg(args, 2, VehicleField::Mileage)?,
        number_arg(args, 3, VehicleField::Depreciation)?,
    ))
}
