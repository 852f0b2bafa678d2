//! PROXY protocol (v1 and v2) header stripping.
//!
//! Load balancers in front of the service may prepend a PROXY header that
//! carries the real client address. When enabled, the listener consumes that
//! header before the DirectIP message starts. Connections without a header
//! pass through untouched: bytes read while probing are replayed.

use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const V1_SIGNATURE: &[u8] = b"PROXY ";
const V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];
/// Longest legal v1 line including the trailing CRLF.
const V1_MAX_LEN: usize = 107;

const V2_CMD_LOCAL: u8 = 0x0;
const V2_CMD_PROXY: u8 = 0x1;
const V2_FAMILY_TCP4: u8 = 0x11;
const V2_FAMILY_TCP6: u8 = 0x21;

/// Default bound on reading the header, independent of the message deadline.
pub const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ProxyHeaderError {
    #[error("timed out reading PROXY header")]
    Timeout,
    #[error("malformed PROXY header: {0}")]
    Malformed(String),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// What a PROXY header told us about the original connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyHeader {
    pub version: u8,
    /// Original client address; `None` for LOCAL/UNKNOWN headers.
    pub source: Option<SocketAddr>,
}

/// Consume a PROXY header from `reader` if one is present.
///
/// Returns the parsed header (if any) and a reader that yields every byte
/// after the header, including any bytes consumed while probing.
pub async fn strip_proxy_header<R>(
    mut reader: R,
    timeout: Duration,
) -> Result<(Option<ProxyHeader>, impl AsyncRead + Unpin), ProxyHeaderError>
where
    R: AsyncRead + Unpin,
{
    let (header, prefix) = tokio::time::timeout(timeout, read_header(&mut reader))
        .await
        .map_err(|_| ProxyHeaderError::Timeout)??;
    Ok((header, Cursor::new(prefix).chain(reader)))
}

async fn read_header<R>(reader: &mut R) -> Result<(Option<ProxyHeader>, Vec<u8>), ProxyHeaderError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = Vec::with_capacity(V2_SIGNATURE.len());
    loop {
        if prefix == V1_SIGNATURE {
            return Ok((Some(read_v1(reader).await?), Vec::new()));
        }
        if prefix == V2_SIGNATURE {
            return Ok((Some(read_v2(reader).await?), Vec::new()));
        }
        if !V1_SIGNATURE.starts_with(&prefix) && !V2_SIGNATURE.starts_with(&prefix) {
            return Ok((None, prefix));
        }

        let mut byte = [0u8; 1];
        if reader.read(&mut byte).await? == 0 {
            // Let the message decoder report the short stream.
            return Ok((None, prefix));
        }
        prefix.push(byte[0]);
    }
}

async fn read_v1<R>(reader: &mut R) -> Result<ProxyHeader, ProxyHeaderError>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(V1_MAX_LEN);
    loop {
        if V1_SIGNATURE.len() + line.len() >= V1_MAX_LEN {
            return Err(ProxyHeaderError::Malformed("v1 header too long".into()));
        }
        line.push(reader.read_u8().await?);
        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            break;
        }
    }

    let text = std::str::from_utf8(&line)
        .map_err(|_| ProxyHeaderError::Malformed("v1 header is not ASCII".into()))?;
    parse_v1(text)
}

fn parse_v1(text: &str) -> Result<ProxyHeader, ProxyHeaderError> {
    let fields: Vec<&str> = text.split(' ').collect();
    match fields.as_slice() {
        ["UNKNOWN", ..] => Ok(ProxyHeader {
            version: 1,
            source: None,
        }),
        [proto @ ("TCP4" | "TCP6"), src, _dst, sport, _dport] => {
            let ip: IpAddr = src
                .parse()
                .map_err(|_| ProxyHeaderError::Malformed(format!("bad source address {src:?}")))?;
            if (*proto == "TCP4") != ip.is_ipv4() {
                return Err(ProxyHeaderError::Malformed(format!(
                    "{proto} header with address {ip}"
                )));
            }
            let port: u16 = sport
                .parse()
                .map_err(|_| ProxyHeaderError::Malformed(format!("bad source port {sport:?}")))?;
            Ok(ProxyHeader {
                version: 1,
                source: Some(SocketAddr::new(ip, port)),
            })
        }
        _ => Err(ProxyHeaderError::Malformed(format!("unexpected v1 line {text:?}"))),
    }
}

async fn read_v2<R>(reader: &mut R) -> Result<ProxyHeader, ProxyHeaderError>
where
    R: AsyncRead + Unpin,
{
    let mut fixed = [0u8; 4];
    reader.read_exact(&mut fixed).await?;
    let [ver_cmd, family, len_hi, len_lo] = fixed;

    if ver_cmd >> 4 != 2 {
        return Err(ProxyHeaderError::Malformed(format!(
            "unsupported version nibble {:#x}",
            ver_cmd >> 4
        )));
    }
    let mut addresses = vec![0u8; u16::from_be_bytes([len_hi, len_lo]) as usize];
    reader.read_exact(&mut addresses).await?;

    let source = match ver_cmd & 0x0F {
        V2_CMD_LOCAL => None,
        V2_CMD_PROXY => v2_source(family, &addresses)?,
        other => {
            return Err(ProxyHeaderError::Malformed(format!("unknown command {other:#x}")));
        }
    };
    Ok(ProxyHeader { version: 2, source })
}

fn v2_source(family: u8, addresses: &[u8]) -> Result<Option<SocketAddr>, ProxyHeaderError> {
    let short = || ProxyHeaderError::Malformed(format!("address block too short for family {family:#x}"));
    match family {
        V2_FAMILY_TCP4 => {
            let a = addresses.get(..12).ok_or_else(short)?;
            let ip = Ipv4Addr::new(a[0], a[1], a[2], a[3]);
            let port = u16::from_be_bytes([a[8], a[9]]);
            Ok(Some(SocketAddr::new(IpAddr::V4(ip), port)))
        }
        V2_FAMILY_TCP6 => {
            let a = addresses.get(..36).ok_or_else(short)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&a[..16]);
            let port = u16::from_be_bytes([a[32], a[33]]);
            Ok(Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)))
        }
        _ => Ok(None),
    }
}
