//! The viewer handshake (spec §4.G steps 1-5): advertise driver args, read
//! the four capability-negotiation instructions plus `connect`, call the
//! driver's `join`, and link the resulting [`User`] into its session.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};

use vdp_core::codec::{self, Instruction};
use vdp_core::error::{Error, Result};
use vdp_core::session::{enforce_single_owner, Session};
use vdp_core::transport::{InstructionSink, UserTransport};
use vdp_core::user::{User, UserHandlers, UserInfo};

/// Drive one viewer's handshake to completion, returning the linked
/// [`User`] plus the still-open read half of its connection on success.
/// `owner` is `true` iff this viewer created a brand new session (the
/// first step of a `select <protocol>`, as opposed to a `select
/// $session-id` join). The caller hands the returned read half to
/// [`crate::input_loop::run`] to continue reading on the same socket.
pub async fn run<S>(
    session: &Arc<Session>,
    stream: S,
    timeout: Duration,
    owner: bool,
) -> Result<(Arc<User>, ReadHalf<S>)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let transport: Arc<dyn InstructionSink> = Arc::new(UserTransport::new(writer));

    // Step 1: advertise the driver's parameter names.
    let args = session.driver().args();
    let args_bytes = args.iter().map(|a| a.clone().into_bytes()).collect();
    transport
        .emit(&Instruction::new("args", args_bytes))
        .await?;

    // Step 2: read size / audio / video / image (optional) / connect, each
    // under its own deadline.
    let size = codec::expect(&mut reader, timeout, "size")
        .await
        .map_err(wrap_handshake)?;
    let (optimal_width, optimal_height, optimal_dpi) = parse_size(&size)?;

    let audio = codec::expect(&mut reader, timeout, "audio")
        .await
        .map_err(wrap_handshake)?;
    let video = codec::expect(&mut reader, timeout, "video")
        .await
        .map_err(wrap_handshake)?;

    // `image` is optional for backward compatibility (spec §9 Open
    // Question, resolved here): peek at the next instruction and only
    // consume it as `image` if that's what it is.
    let mut next = codec::read_instruction(&mut reader, timeout)
        .await
        .map_err(wrap_handshake)?;
    let image_mimetypes = if next.opcode == "image" {
        let mimetypes = decode_args(&next);
        next = codec::read_instruction(&mut reader, timeout)
            .await
            .map_err(wrap_handshake)?;
        mimetypes
    } else {
        UserInfo::default_image_mimetypes()
    };

    if next.opcode != "connect" {
        return Err(Error::HandshakeFailed(format!(
            "expected `connect`, got `{}`",
            next.opcode
        )));
    }
    let connect_values: Vec<String> = decode_args(&next);

    let info = UserInfo {
        optimal_width,
        optimal_height,
        optimal_dpi,
        audio_mimetypes: decode_args(&audio),
        video_mimetypes: decode_args(&video),
        image_mimetypes,
    };

    let user = Arc::new(User::new(
        Arc::downgrade(session),
        transport.clone(),
        owner,
        info,
        UserHandlers::default(),
    ));

    enforce_single_owner(session, &user).await?;

    // Step 3: announce readiness.
    transport
        .emit(&Instruction::new(
            "ready",
            vec![session.id.clone().into_bytes()],
        ))
        .await?;

    // Step 4: hand off to the driver. A nonzero/error return rejects the
    // viewer before it is ever linked into the user list.
    session
        .driver()
        .join(session, &user.id, owner, &connect_values)
        .await
        .map_err(|e| Error::DriverJoin(e.to_string()))?;

    // Step 5: link the user in.
    session.join(user.clone()).await;

    tracing::info!(
        session = %session.id,
        user = %user.id,
        owner,
        connect_argc = connect_values.len(),
        "user joined"
    );

    Ok((user, reader))
}

fn decode_args(instr: &Instruction) -> Vec<String> {
    instr
        .args
        .iter()
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect()
}

fn parse_size(instr: &Instruction) -> Result<(u32, u32, u32)> {
    if instr.args.is_empty() || instr.args.len() > 3 {
        return Err(Error::HandshakeFailed(
            "`size` expects 2 or 3 arguments".to_string(),
        ));
    }
    let parse = |i: usize| -> Result<u32> {
        instr
            .arg_str(i)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::HandshakeFailed(format!("`size` argument {i} is not a number")))
    };
    let width = parse(0)?;
    let height = parse(1)?;
    let dpi = if instr.args.len() == 3 { parse(2)? } else { 96 };
    Ok((width, height, dpi))
}

fn wrap_handshake(err: Error) -> Error {
    match err {
        Error::Timeout(_) | Error::UnexpectedOpcode { .. } | Error::Malformed(_) => {
            Error::HandshakeFailed(err.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdp_driver_null::NullDriver;

    #[tokio::test]
    async fn full_handshake_links_owner_into_session() {
        let session = Session::new(vec![], Box::new(NullDriver::new()), 800, 600);
        let (client, server) = tokio::io::duplex(4096);

        let session_clone = session.clone();
        let handshake = tokio::spawn(async move {
            run(&session_clone, server, Duration::from_secs(1), true).await
        });

        let mut client = client;
        write_raw(
            &mut client,
            b"4.size,4.1024,3.768,2.96;4.audio;4.video;7.connect;",
        )
        .await;

        // Drain the `args` instruction the server sent first.
        read_one_instruction(&mut client).await;

        let (user, _reader) = handshake.await.unwrap().unwrap();
        assert!(user.owner);
        assert_eq!(session.user_count().await, 1);

        // Server should have replied `ready $<session-id>`.
        let ready = read_one_instruction(&mut client).await;
        assert_eq!(ready.opcode, "ready");
        assert_eq!(ready.arg_str(0).unwrap(), session.id);
    }

    #[tokio::test]
    async fn missing_image_step_defaults_mimetypes() {
        let session = Session::new(vec![], Box::new(NullDriver::new()), 800, 600);
        let (client, server) = tokio::io::duplex(4096);

        let session_clone = session.clone();
        let handshake =
            tokio::spawn(async move { run(&session_clone, server, Duration::from_secs(1), true).await });

        let mut client = client;
        write_raw(&mut client, b"4.size,3.640,3.480;4.audio;4.video;7.connect;").await;
        read_one_instruction(&mut client).await; // args

        let (user, _reader) = handshake.await.unwrap().unwrap();
        assert_eq!(user.info.image_mimetypes, UserInfo::default_image_mimetypes());
    }

    #[tokio::test]
    async fn timeout_fails_handshake() {
        let session = Session::new(vec![], Box::new(NullDriver::new()), 800, 600);
        let (_client, server) = tokio::io::duplex(4096);

        let result = run(&session, server, Duration::from_millis(20), true).await;
        assert!(matches!(result, Err(Error::HandshakeFailed(_))));
        assert_eq!(session.user_count().await, 0);
    }

    async fn write_raw<W: tokio::io::AsyncWrite + Unpin>(w: &mut W, bytes: &[u8]) {
        use tokio::io::AsyncWriteExt;
        w.write_all(bytes).await.unwrap();
    }

    async fn read_one_instruction<R: tokio::io::AsyncRead + Unpin>(r: &mut R) -> Instruction {
        codec::read_instruction(r, Duration::from_secs(1)).await.unwrap()
    }
}
