//! One user's input loop (spec §4.G "Input loop per user"): read one
//! instruction at a time with a per-read timeout, dispatch it by opcode,
//! and keep going until the session stops or the user is marked inactive.

use std::sync::Arc;
use std::time::Duration;

use vdp_core::codec::{self, Instruction};
use vdp_core::driver::InputEvent;
use vdp_core::error::Error;
use vdp_core::session::Session;
use vdp_core::transport::InstructionSink;
use vdp_core::user::User;

/// Drive `user`'s input loop over `reader` (the read half produced by
/// [`crate::handshake::run`]) until the session stops, the user is marked
/// inactive, or a read times out. Runs the driver's `leave` hook and
/// unlinks the user from the session before returning.
pub async fn run<R>(session: Arc<Session>, user: Arc<User>, mut reader: R, read_timeout: Duration)
where
    R: tokio::io::AsyncRead + Unpin,
{
    loop {
        if !session.is_running() || !user.is_active() {
            break;
        }

        match codec::read_instruction(&mut reader, read_timeout).await {
            Ok(instr) => {
                user.record_received();
                dispatch(&session, &user, instr).await;
            }
            Err(Error::Timeout(_)) => {
                tracing::info!(session = %session.id, user = %user.id, "user read timed out");
                let _ = user
                    .transport
                    .emit(&Instruction::new(
                        "error",
                        vec![
                            b"Aborted. Connection timed out.".to_vec(),
                            Error::CLIENT_TIMEOUT.to_string().into_bytes(),
                        ],
                    ))
                    .await;
                user.mark_inactive();
                break;
            }
            Err(_) => {
                // Malformed instruction or a dead socket: stop this user,
                // leave everyone else unaffected (spec §7, "per-user write
                // failures mark that user inactive without affecting
                // peers" extends naturally to read failures).
                user.mark_inactive();
                break;
            }
        }
    }

    if let Some(handler) = &user.handlers.leave {
        handler();
    }
    let _ = session.driver().leave(&session, &user.id).await;
    session.leave(&user.id).await;
}

async fn dispatch(session: &Session, user: &User, instr: Instruction) {
    let result = match instr.opcode.as_str() {
        "mouse" => handle_mouse(session, user, &instr).await,
        "key" => handle_key(session, user, &instr).await,
        "size" => handle_size(session, user, &instr).await,
        "clipboard" => handle_clipboard(session, user, &instr).await,
        "pipe" => handle_pipe(user, &instr),
        "file" => handle_file(user, &instr),
        "ack" => handle_ack(user, &instr),
        "blob" => handle_blob(user, &instr),
        "end" => handle_end(user, &instr),
        "sync" => {
            if let Some(ts) = instr.arg_str(0).and_then(|s| s.parse::<i64>().ok()) {
                user.record_sync_ack(ts);
            }
            Ok(())
        }
        "disconnect" => {
            user.mark_inactive();
            Ok(())
        }
        "nop" => Ok(()),
        // An unknown opcode is silently ignored (spec §4.G).
        _ => session.driver().handle_instruction(session, &user.id, &instr).await,
    };

    if let Err(err) = result {
        tracing::debug!(session = %session.id, user = %user.id, %err, opcode = %instr.opcode, "input dispatch failed");
    }
}

async fn handle_mouse(session: &Session, user: &User, instr: &Instruction) -> vdp_core::error::Result<()> {
    let x = parse_i32(instr, 0)?;
    let y = parse_i32(instr, 1)?;
    let button_mask = parse_i32(instr, 2)? as u32;

    // A driver-installed per-user handler (spec §4.G "dispatch by opcode
    // through a fixed table to the driver's corresponding handler") takes
    // priority; falling back to the session-wide `Driver::input` seam when
    // the user carries no such override.
    if let Some(handler) = &user.handlers.mouse {
        handler(x, y, button_mask);
        return Ok(());
    }
    session
        .driver()
        .input(session, &user.id, InputEvent::Mouse { x, y, button_mask })
        .await
}

async fn handle_key(session: &Session, user: &User, instr: &Instruction) -> vdp_core::error::Result<()> {
    let keysym = parse_i32(instr, 0)?;
    let pressed = instr.arg_str(1).map(|s| s == "1").unwrap_or(false);

    if let Some(handler) = &user.handlers.key {
        handler(keysym, pressed);
        return Ok(());
    }
    session
        .driver()
        .input(session, &user.id, InputEvent::Key { keysym, pressed })
        .await
}

async fn handle_size(session: &Session, user: &User, instr: &Instruction) -> vdp_core::error::Result<()> {
    let width = parse_i32(instr, 0)?;
    let height = parse_i32(instr, 1)?;

    // Only the session's first viewer (its owner) may resize the shared
    // display (spec §4.K step 3, "resize requests from the first viewer");
    // other viewers' `size` instructions still reach their own handler, if
    // any, but never touch `pending_resize`.
    if user.owner {
        session.request_resize(width, height);
    }

    if let Some(handler) = &user.handlers.size {
        let dpi = instr.arg_str(2).and_then(|s| s.parse().ok()).unwrap_or(96);
        handler(width as u32, height as u32, dpi);
        return Ok(());
    }
    session
        .driver()
        .input(
            session,
            &user.id,
            InputEvent::Size {
                width: width as u32,
                height: height as u32,
            },
        )
        .await
}

async fn handle_clipboard(session: &Session, user: &User, instr: &Instruction) -> vdp_core::error::Result<()> {
    let data = instr.args.first().cloned().unwrap_or_default();

    if let Some(handler) = &user.handlers.clipboard {
        handler(&data);
        return Ok(());
    }
    session
        .driver()
        .input(session, &user.id, InputEvent::Clipboard(data))
        .await
}

fn handle_pipe(user: &User, instr: &Instruction) -> vdp_core::error::Result<()> {
    let stream_id = parse_i32(instr, 0)?;
    let name = instr.arg_str(instr.args.len().saturating_sub(1)).unwrap_or_default();
    if let Some(handler) = &user.handlers.pipe {
        handler(stream_id, &name);
    }
    Ok(())
}

fn handle_file(user: &User, instr: &Instruction) -> vdp_core::error::Result<()> {
    let stream_id = parse_i32(instr, 0)?;
    let name = instr.arg_str(instr.args.len().saturating_sub(1)).unwrap_or_default();
    if let Some(handler) = &user.handlers.file {
        handler(stream_id, &name);
    }
    Ok(())
}

fn handle_ack(user: &User, instr: &Instruction) -> vdp_core::error::Result<()> {
    let stream_id = parse_i32(instr, 0)?;
    let status = instr.arg_str(2).and_then(|s| s.parse().ok()).unwrap_or(0);
    if let Some(handler) = &user.handlers.ack {
        handler(stream_id, status);
    }
    Ok(())
}

fn handle_blob(user: &User, instr: &Instruction) -> vdp_core::error::Result<()> {
    let stream_id = parse_i32(instr, 0)?;
    let data = instr.args.get(1).cloned().unwrap_or_default();
    if let Some(handler) = &user.handlers.blob {
        handler(stream_id, &data);
    }
    Ok(())
}

fn handle_end(user: &User, instr: &Instruction) -> vdp_core::error::Result<()> {
    let stream_id = parse_i32(instr, 0)?;
    if let Some(handler) = &user.handlers.end {
        handler(stream_id);
    }
    Ok(())
}

fn parse_i32(instr: &Instruction, index: usize) -> vdp_core::error::Result<i32> {
    instr
        .arg_str(index)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Malformed(format!("argument {index} of `{}` is not a number", instr.opcode)))
}
