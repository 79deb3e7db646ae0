use log::debug;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::engine::Engine;
use crate::packet::{write_frames, Packet, PacketType};
use crate::RconError;

/// Sends the password and waits for the server to accept it.
///
/// A successful authentication is answered with an empty packet followed by a packet echoing the
/// request ID. Squad answers a wrong password by closing the connection, so a clean end of stream
/// in place of the first packet means the password was rejected. A connection that breaks off in
/// the middle of a packet is a transport error instead; the server does that when it drops idle
/// connections.
pub(crate) async fn authenticate<R, W>(
    engine: &Engine,
    reader: &mut R,
    writer: &mut W,
    id: i32,
    password: &str,
    write_timeout: Duration,
) -> crate::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = Packet::new(PacketType::AUTH, id, password).encode();
    write_frames(writer, &request, write_timeout).await?;

    match Packet::read_from(reader).await {
        Ok(ack) => debug!("Auth acknowledged; id: {}, type: {}", ack.id, ack.packet_type.0),
        Err(err) if err.is_eof() => return Err(RconError::IncorrectPassword.into()),
        Err(err) => return Err(err.into()),
    }

    let response = Packet::read_from(reader).await?;
    if response.id != id {
        return Err(RconError::ProtocolMismatch {
            expected: id,
            got: response.id,
        }
        .into());
    }

    engine.set_authenticated();
    Ok(())
}
