//! Per-connection request loop.
//!
//! Each accepted connection gets a dedicated thread running
//! [`Handler::handle`]: read a 10-byte header, read the bounded payload,
//! dispatch to the catalog, write the response. Framing errors and failed
//! authentication are fatal to the connection; application errors are
//! reported and the loop continues.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crate::catalog::{Catalog, CatalogError};
use crate::lens::Transform;
use crate::protocol::{
    self, decode_header, encode_header, FrameHeader, OpCode, Status, HEADER_LEN,
};
use crate::server::session::Session;
use crate::storage::LABEL_LEN;
use crate::stats::ServerStats;

/// Whether the connection survives the current frame.
enum Flow {
    Continue,
    Close,
}

/// The per-connection request processor.
pub struct Handler<'a> {
    catalog: &'a Catalog,
    stats: &'a ServerStats,
    token: [u8; LABEL_LEN],
    session: Session,
}

impl<'a> Handler<'a> {
    pub fn new(
        catalog: &'a Catalog,
        stats: &'a ServerStats,
        token: [u8; LABEL_LEN],
        session: Session,
    ) -> Self {
        Handler {
            catalog,
            stats,
            token,
            session,
        }
    }

    /// Runs the request loop until the peer disconnects, a framing error
    /// occurs, or an unauthenticated request arrives.
    pub fn handle(mut self, mut stream: TcpStream) {
        use std::sync::atomic::Ordering;

        let peer = self.session.peer();
        log::debug!("connection from {}", peer);

        // One reusable payload buffer; each frame overwrites it.
        let mut payload = Vec::new();
        let mut header_buf = [0u8; HEADER_LEN];

        loop {
            if stream.read_exact(&mut header_buf).is_err() {
                break;
            }
            let header = match decode_header(&header_buf) {
                Ok(header) => header,
                Err(err) => {
                    self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                    log::debug!("{}: frame error: {}", peer, err);
                    let _ = send_err(&mut stream, err.status());
                    break;
                }
            };

            payload.resize(header.payload_len as usize, 0);
            if stream.read_exact(&mut payload).is_err() {
                break;
            }
            self.stats.record_request(header.opcode);

            match self.dispatch(header.opcode, &payload, &mut stream) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break,
                Err(err) => {
                    log::debug!("{}: write failed: {}", peer, err);
                    break;
                }
            }
        }

        self.stats.connections_closed.fetch_add(1, Ordering::Relaxed);
        log::debug!("connection from {} closed", peer);
    }

    fn dispatch(
        &mut self,
        opcode: OpCode,
        payload: &[u8],
        stream: &mut TcpStream,
    ) -> io::Result<Flow> {
        use std::sync::atomic::Ordering;

        match opcode {
            OpCode::Disconnect => {
                self.session.disconnect();
                send_ok(stream, &[])?;
                return Ok(Flow::Close);
            }
            OpCode::Connect => {
                let Ok(client_token) = <&[u8; LABEL_LEN]>::try_from(payload) else {
                    send_err(stream, Status::InvalidPayload)?;
                    return Ok(Flow::Continue);
                };
                return if self.session.authenticate(client_token, &self.token) {
                    send_ok(stream, &[])?;
                    Ok(Flow::Continue)
                } else {
                    self.stats.auth_failures.fetch_add(1, Ordering::Relaxed);
                    send_err(stream, Status::AuthFailed)?;
                    Ok(Flow::Close)
                };
            }
            _ => {}
        }

        if !self.session.is_authenticated() {
            send_err(stream, Status::NotAuthenticated)?;
            return Ok(Flow::Close);
        }

        match opcode {
            OpCode::Ping => {
                if payload.is_empty() {
                    send_frame(stream, OpCode::Pong, &[])?;
                } else {
                    send_err(stream, Status::InvalidPayload)?;
                }
            }
            OpCode::CreateSeries => match protocol::parse_label(payload) {
                Some(label) => self.respond(stream, self.catalog.create_series(label))?,
                None => send_err(stream, Status::InvalidPayload)?,
            },
            OpCode::DropSeries => match protocol::parse_label(payload) {
                Some(label) => self.respond(stream, self.catalog.drop_series(label))?,
                None => send_err(stream, Status::InvalidPayload)?,
            },
            OpCode::Append => match protocol::parse_append(payload) {
                Some((label, ts, value)) => {
                    self.respond(stream, self.catalog.append(label, ts, value))?
                }
                None => send_err(stream, Status::InvalidPayload)?,
            },
            OpCode::QueryPoint => match protocol::parse_query(payload) {
                Some((label, ts)) => match self.catalog.query_point(label, ts) {
                    Ok(value) => send_ok(stream, &protocol::encode_query_response(value))?,
                    Err(err) => send_err(stream, status_of(err))?,
                },
                None => send_err(stream, Status::InvalidPayload)?,
            },
            OpCode::CreateLens => match protocol::parse_create_lens(payload) {
                Some((label, source, transform_name)) => {
                    match Transform::from_wire(&transform_name) {
                        Some(transform) => self.respond(
                            stream,
                            self.catalog.create_lens(label, source, transform),
                        )?,
                        None => send_err(stream, Status::InvalidPayload)?,
                    }
                }
                None => send_err(stream, Status::InvalidPayload)?,
            },
            OpCode::DropLens => match protocol::parse_label(payload) {
                Some(label) => self.respond(stream, self.catalog.drop_lens(label))?,
                None => send_err(stream, Status::InvalidPayload)?,
            },
            OpCode::QueryLens => match protocol::parse_query(payload) {
                Some((label, ts)) => match self.catalog.query_lens(label, ts) {
                    Ok(value) => send_ok(stream, &protocol::encode_query_response(value))?,
                    Err(err) => send_err(stream, status_of(err))?,
                },
                None => send_err(stream, Status::InvalidPayload)?,
            },
            OpCode::ComposeLens => match protocol::parse_compose_lens(payload) {
                Some((new, first, second)) => {
                    self.respond(stream, self.catalog.compose_lens(new, first, second))?
                }
                None => send_err(stream, Status::InvalidPayload)?,
            },
            OpCode::ListLenses => {
                if payload.is_empty() {
                    let labels = self.catalog.list_lenses();
                    send_ok(stream, &protocol::encode_label_list(&labels))?;
                } else {
                    send_err(stream, Status::InvalidPayload)?;
                }
            }
            // CONNECT and DISCONNECT were handled above; response opcodes
            // are not valid requests.
            OpCode::Connect | OpCode::Disconnect => unreachable!(),
            OpCode::Pong | OpCode::Ok | OpCode::Err => {
                send_err(stream, Status::InvalidPayload)?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Sends OK for a unit result, or the translated error status.
    fn respond(&self, stream: &mut TcpStream, result: Result<(), CatalogError>) -> io::Result<()> {
        match result {
            Ok(()) => send_ok(stream, &[]),
            Err(err) => send_err(stream, status_of(err)),
        }
    }
}

/// Maps a catalog error onto its wire status.
fn status_of(err: CatalogError) -> Status {
    match err {
        CatalogError::SeriesAlreadyExists => Status::SeriesAlreadyExists,
        CatalogError::SeriesNotFound => Status::SeriesNotFound,
        CatalogError::LensAlreadyExists => Status::LensAlreadyExists,
        CatalogError::LensNotFound => Status::LensNotFound,
        CatalogError::OutOfOrder => Status::OutOfOrder,
        CatalogError::CatalogFull | CatalogError::OutOfMemory | CatalogError::Internal => {
            Status::InternalError
        }
    }
}

fn send_frame(stream: &mut TcpStream, opcode: OpCode, payload: &[u8]) -> io::Result<()> {
    let header = encode_header(FrameHeader::new(opcode, payload.len() as u32));
    stream.write_all(&header)?;
    stream.write_all(payload)
}

fn send_ok(stream: &mut TcpStream, payload: &[u8]) -> io::Result<()> {
    send_frame(stream, OpCode::Ok, payload)
}

fn send_err(stream: &mut TcpStream, status: Status) -> io::Result<()> {
    send_frame(stream, OpCode::Err, &[status as u8])
}
