//! The Modbus TCP server: an accept loop spawning one task per
//! connection, each serving read requests from a shared [`RegisterBank`]
//! snapshot. Read-only — FC05/06/15/16 are not implemented and draw the
//! illegal-function exception.
//!
//! Grounded in the accept-loop-plus-per-connection-spawn shape used by
//! the comsrv Modbus simulator (`other_examples`), adapted to this
//! project's typed PDU/MBAP split and snapshot-based register reads.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::{
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_FUNCTION, MAX_MBAP_LENGTH,
    MODBUS_REQUEST_BUFFER_SIZE,
};
use crate::error::{SimError, SimResult};
use crate::modbus::mbap::MbapHeader;
use crate::modbus::pdu::{ReadRequest, ResponsePdu};
use crate::registers::RegisterBank;

/// Bind the configured port, falling back to the unprivileged port if
/// the primary bind fails (e.g. no CAP_NET_BIND_SERVICE for port 502).
pub async fn bind(primary_port: u16, fallback_port: u16) -> SimResult<TcpListener> {
    match TcpListener::bind(("0.0.0.0", primary_port)).await {
        Ok(listener) => Ok(listener),
        Err(source) => {
            warn!(
                primary_port,
                fallback_port,
                error = %source,
                "primary Modbus port bind failed, trying fallback"
            );
            TcpListener::bind(("0.0.0.0", fallback_port))
                .await
                .map_err(|source| SimError::Bind {
                    port: fallback_port,
                    source,
                })
        }
    }
}

/// Run the accept loop until `shutdown` is cancelled. Each accepted
/// connection is served on its own task; a per-connection error is
/// logged and closes only that connection. A connection idle for
/// longer than `idle_timeout` (no bytes read) is closed.
pub async fn serve(
    listener: TcpListener,
    registers: Arc<RegisterBank>,
    shutdown: CancellationToken,
    idle_timeout: Duration,
) {
    info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(), "Modbus TCP server listening");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Modbus server shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted Modbus connection");
                        let registers = registers.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, registers, shutdown, idle_timeout).await {
                                error!(%peer, error = %e, "Modbus connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept() failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    registers: Arc<RegisterBank>,
    shutdown: CancellationToken,
    idle_timeout: Duration,
) -> SimResult<()> {
    let mut buf = vec![0u8; MODBUS_REQUEST_BUFFER_SIZE];
    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = tokio::time::timeout(idle_timeout, stream.read(&mut buf)) => {
                match read {
                    Ok(result) => result.map_err(|source| SimError::modbus(format!("read failed: {source}")))?,
                    Err(_) => {
                        debug!(timeout_secs = idle_timeout.as_secs(), "closing idle Modbus connection");
                        return Ok(());
                    }
                }
            }
        };
        if n == 0 {
            return Ok(());
        }

        let header = match MbapHeader::parse(&buf[..n]) {
            Ok(h) => h,
            Err(e) => {
                debug!(error = %e, "dropping malformed frame");
                continue;
            }
        };
        let pdu_len = (header.length as usize).saturating_sub(1);
        let mbap_len = crate::constants::MBAP_HEADER_LEN + 1;
        if pdu_len == 0 || mbap_len + pdu_len > n || pdu_len > MAX_MBAP_LENGTH {
            debug!("dropping frame with inconsistent length field");
            continue;
        }
        let pdu_bytes = &buf[mbap_len..mbap_len + pdu_len];

        let response_pdu = match ReadRequest::parse(pdu_bytes) {
            Ok(req) => serve_read(req, &registers),
            Err(exception_code) => {
                let fc = pdu_bytes.first().copied().unwrap_or(EXCEPTION_ILLEGAL_FUNCTION);
                ResponsePdu::exception(fc, exception_code)
            }
        };

        let header_bytes = header.response_bytes(response_pdu.as_slice().len());
        stream
            .write_all(&header_bytes)
            .await
            .map_err(|source| SimError::modbus(format!("write failed: {source}")))?;
        stream
            .write_all(response_pdu.as_slice())
            .await
            .map_err(|source| SimError::modbus(format!("write failed: {source}")))?;
    }
}

/// Serve one read request from a single register-bank snapshot, so the
/// response reflects one consistent tick even for multi-register reads
/// spanning a U32/F32 value.
fn serve_read(req: ReadRequest, registers: &RegisterBank) -> ResponsePdu {
    let Some(snapshot) = registers.snapshot(req.start_address, req.quantity) else {
        return ResponsePdu::exception(req.function_code, EXCEPTION_ILLEGAL_DATA_ADDRESS);
    };

    if req.is_bit_read() {
        let bits: Vec<bool> = snapshot.iter().map(|&w| w != 0).collect();
        ResponsePdu::read_bits(req.function_code, &bits)
            .unwrap_or_else(|_| ResponsePdu::exception(req.function_code, EXCEPTION_ILLEGAL_DATA_ADDRESS))
    } else {
        ResponsePdu::read_registers(req.function_code, &snapshot)
            .unwrap_or_else(|_| ResponsePdu::exception(req.function_code, EXCEPTION_ILLEGAL_DATA_ADDRESS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::ADDR_LINE_STATE;

    #[test]
    fn serve_read_returns_registers_for_valid_range() {
        let bank = RegisterBank::new();
        bank.set_u16(ADDR_LINE_STATE, 1);
        let req = ReadRequest {
            function_code: 0x03,
            start_address: ADDR_LINE_STATE,
            quantity: 1,
        };
        let pdu = serve_read(req, &bank);
        assert_eq!(pdu.as_slice(), &[0x03, 0x02, 0x00, 0x01]);
    }

    #[test]
    fn serve_read_exceptions_on_out_of_range_address() {
        let bank = RegisterBank::new();
        let req = ReadRequest {
            function_code: 0x03,
            start_address: 9000,
            quantity: 1,
        };
        let pdu = serve_read(req, &bank);
        assert_eq!(pdu.as_slice(), &[0x83, EXCEPTION_ILLEGAL_DATA_ADDRESS]);
    }

    #[tokio::test]
    async fn bind_falls_back_when_primary_is_already_taken() {
        let blocker = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let taken_port = blocker.local_addr().unwrap().port();
        let fallback_probe = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let fallback_port = fallback_probe.local_addr().unwrap().port();
        drop(fallback_probe);

        let listener = bind(taken_port, fallback_port).await;
        assert!(listener.is_ok());
        assert_eq!(listener.unwrap().local_addr().unwrap().port(), fallback_port);
    }

    #[tokio::test]
    async fn idle_connection_is_closed_after_timeout() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registers = Arc::new(RegisterBank::new());
        let shutdown = CancellationToken::new();

        let (stream, _) = tokio::join!(
            async { listener.accept().await.unwrap().0 },
            async { TcpStream::connect(addr).await.unwrap() }
        );

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            handle_connection(stream, registers, shutdown, std::time::Duration::from_millis(50)),
        )
        .await;

        assert!(result.is_ok(), "handle_connection should return once the idle timeout elapses");
        assert!(result.unwrap().is_ok());
    }
}
