//! Command execution.

use crate::Commands;
use colored::Colorize;
use parley_client::{Client, LoginOutcome};
use parley_protocol::{
    Decoder, EntityGetRequest, EntityType, Packet, PacketHeader, PageDirection, Pagination,
    ProtocolError, UnknownFields,
};
use serde_json::{json, Value};
use std::error::Error;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn Error>> {
    match cmd {
        Commands::Watch | Commands::Decode { .. } => unreachable!(),

        Commands::Ping => {
            let rtt = client.ping().await?;
            Ok(format!(
                "{} ({:.2} ms)",
                "PONG".green(),
                rtt.as_secs_f64() * 1000.0
            ))
        }

        Commands::Login {
            email,
            password,
            mfa,
        } => {
            let token = match (client.login(&email, &password).await?, mfa) {
                (LoginOutcome::Token(token), _) => token,
                (LoginOutcome::MfaRequired, Some(code)) => client.submit_mfa(&code).await?,
                (LoginOutcome::MfaRequired, None) => {
                    return Ok(format!(
                        "{}: rerun with --mfa <CODE>",
                        "Second factor required".yellow()
                    ));
                }
            };
            Ok(format!("{} as {}\n{}", "Logged in".green(), email.cyan(), token))
        }

        Commands::Get {
            entity_type,
            id,
            context,
            page,
        } => {
            let mut request = EntityGetRequest::new(entity_type, id);
            if let Some(context) = context {
                let (context_type, context_id) = parse_context(&context)?;
                request = request.with_context(context_type, context_id);
            }
            if let Some(page) = page {
                request = request.with_pagination(parse_page(&page)?);
            }

            let entities = client.get_entities(vec![request]).await?;
            if entities.is_empty() {
                return Ok(format!(
                    "{} {} {}",
                    "No such".yellow(),
                    entity_type,
                    id
                ));
            }
            Ok(serde_json::to_string_pretty(&entities)?)
        }
    }
}

/// Decodes hex-encoded frames (or a bare packet with `raw`) into JSON.
pub fn decode(input: &str, raw: bool, unknown: UnknownFields) -> Result<String, Box<dyn Error>> {
    let bytes = parse_hex(input)?;

    if raw {
        return Ok(serde_json::to_string_pretty(&describe_packet(&bytes, unknown)?)?);
    }

    let mut decoder = Decoder::with_unknown_fields(unknown);
    decoder.extend(&bytes);

    let mut frames = Vec::new();
    while let Some(frame) = decoder.decode_frame()? {
        let inner = frame.unpack()?;
        frames.push(json!({
            "compressed": frame.compressed,
            "packet": describe_packet(&inner, unknown)?,
        }));
    }
    if frames.is_empty() {
        return Err(format!("incomplete frame ({} bytes)", bytes.len()).into());
    }
    if decoder.buffered() > 0 {
        tracing::warn!("{} trailing bytes do not form a frame", decoder.buffered());
    }

    let output = match frames.len() {
        1 => frames.remove(0),
        _ => Value::Array(frames),
    };
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Decodes one packet. Kinds a client only ever sends are shown with
/// their envelope and raw payload.
fn describe_packet(inner: &[u8], unknown: UnknownFields) -> Result<Value, Box<dyn Error>> {
    match Packet::decode_with(inner, unknown) {
        Ok(packet) => Ok(serde_json::to_value(&packet)?),
        Err(ProtocolError::EncodeOnly(_)) => {
            let header = PacketHeader::decode(inner)?;
            Ok(json!({
                "seq": header.seq,
                "reply_to": header.reply_to,
                "side_channel": header.side_channel,
                "body": {
                    "kind": header.packet_type.name(),
                    "payload": hex::encode(&inner[header.payload_offset..]),
                },
            }))
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_hex(input: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let digits: String = input.split_whitespace().collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);
    Ok(hex::decode(digits)?)
}

/// Parses `type:id`.
fn parse_context(arg: &str) -> Result<(EntityType, u64), Box<dyn Error>> {
    let (entity_type, id) = arg
        .split_once(':')
        .ok_or_else(|| format!("expected type:id, got {:?}", arg))?;
    Ok((entity_type.parse()?, id.parse()?))
}

/// Parses `field:direction:from:max`.
fn parse_page(arg: &str) -> Result<Pagination, Box<dyn Error>> {
    let parts: Vec<&str> = arg.split(':').collect();
    let &[field, direction, from, max_count] = parts.as_slice() else {
        return Err(format!("expected field:older|newer:from:max, got {:?}", arg).into());
    };
    let direction = match direction.to_ascii_lowercase().as_str() {
        "older" | "0" => PageDirection::Older,
        "newer" | "1" => PageDirection::Newer,
        other => return Err(format!("unknown page direction {:?}", other).into()),
    };
    Ok(Pagination {
        field: field.parse()?,
        direction,
        from: from.parse()?,
        max_count: max_count.parse()?,
    })
}
