// ── PIM transport ──
//
// `tcp://host[:port]` reaches a PIM behind a serial-to-network bridge;
// `serial://DEVICE[:baud]` (e.g. `serial:///dev/ttyUSB0`, `serial://COM3:9600`)
// opens the port directly. Either way the connection sees a plain duplex
// byte stream.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

use crate::error::Error;

pub const DEFAULT_TCP_PORT: u16 = 2101;
pub const DEFAULT_BAUD: u32 = 4800;

/// Where the PIM lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PimUrl {
    Tcp { host: String, port: u16 },
    Serial { path: String, baud: u32 },
}

impl PimUrl {
    /// Serial links are supervised by the port itself and need no heartbeat.
    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial { .. })
    }
}

impl FromStr for PimUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidUrl {
            url: s.to_owned(),
            reason: reason.to_owned(),
        };
        // Device names are case-sensitive and may not be valid hosts
        // (`COM3`), so serial URLs are split by hand.
        if let Some(dest) = s.strip_prefix("serial://") {
            let (path, baud) = match dest.rsplit_once(':') {
                Some((path, baud)) => (
                    path,
                    baud.parse().map_err(|_| invalid("baud rate is not a number"))?,
                ),
                None => (dest, DEFAULT_BAUD),
            };
            if path.is_empty() {
                return Err(invalid("missing device path"));
            }
            return Ok(Self::Serial {
                path: path.to_owned(),
                baud,
            });
        }

        let url = Url::parse(s).map_err(|e| invalid(&e.to_string()))?;
        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| invalid("missing host"))?;
                Ok(Self::Tcp {
                    host: host.to_owned(),
                    port: url.port().unwrap_or(DEFAULT_TCP_PORT),
                })
            }
            other => Err(invalid(&format!("unsupported scheme '{other}'"))),
        }
    }
}

impl fmt::Display for PimUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Serial { path, baud } => write!(f, "serial://{path}:{baud}"),
        }
    }
}

/// Any duplex byte stream the connection can run over.
pub trait PimStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> PimStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Open the stream described by `url`, giving up after `timeout`.
pub async fn connect(url: &PimUrl, timeout: Duration) -> Result<Box<dyn PimStream>, Error> {
    let timeout_secs = timeout.as_secs();
    tokio::time::timeout(timeout, open(url))
        .await
        .map_err(|_| Error::Timeout { timeout_secs })?
}

async fn open(url: &PimUrl) -> Result<Box<dyn PimStream>, Error> {
    match url {
        PimUrl::Tcp { host, port } => {
            debug!(host, port, "opening TCP connection");
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        PimUrl::Serial { path, baud } => open_serial(path, *baud),
    }
}

#[cfg(feature = "serial")]
fn open_serial(path: &str, baud: u32) -> Result<Box<dyn PimStream>, Error> {
    use tokio_serial::SerialPortBuilderExt;

    debug!(path, baud, "opening serial port");
    let port = tokio_serial::new(path, baud)
        .open_native_async()
        .map_err(|e| Error::Serial(e.to_string()))?;
    Ok(Box::new(port))
}

#[cfg(not(feature = "serial"))]
#[allow(clippy::unnecessary_wraps)]
fn open_serial(path: &str, _baud: u32) -> Result<Box<dyn PimStream>, Error> {
    Err(Error::Serial(format!(
        "cannot open {path}: built without the `serial` feature"
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tcp_with_and_without_port() {
        assert_eq!(
            "tcp://10.0.0.5".parse::<PimUrl>().unwrap(),
            PimUrl::Tcp {
                host: "10.0.0.5".into(),
                port: 2101
            }
        );
        assert_eq!(
            "tcp://pim.local:9000".parse::<PimUrl>().unwrap(),
            PimUrl::Tcp {
                host: "pim.local".into(),
                port: 9000
            }
        );
    }

    #[test]
    fn serial_with_and_without_baud() {
        assert_eq!(
            "serial:///dev/ttyUSB0".parse::<PimUrl>().unwrap(),
            PimUrl::Serial {
                path: "/dev/ttyUSB0".into(),
                baud: 4800
            }
        );
        let url = "serial:///dev/ttyS1:19200".parse::<PimUrl>().unwrap();
        assert_eq!(
            url,
            PimUrl::Serial {
                path: "/dev/ttyS1".into(),
                baud: 19200
            }
        );
        assert!(url.is_serial());
    }

    #[test]
    fn serial_device_names_keep_their_case() {
        assert_eq!(
            "serial://COM3".parse::<PimUrl>().unwrap(),
            PimUrl::Serial {
                path: "COM3".into(),
                baud: 4800
            }
        );
        assert_eq!(
            "serial://COM3:9600".parse::<PimUrl>().unwrap(),
            PimUrl::Serial {
                path: "COM3".into(),
                baud: 9600
            }
        );
        assert_eq!("serial://COM3".parse::<PimUrl>().unwrap().to_string(), "serial://COM3:4800");
        assert!("serial://".parse::<PimUrl>().is_err());
        assert!("serial://:9600".parse::<PimUrl>().is_err());
    }

    #[test]
    fn rejects_unknown_scheme_and_garbage() {
        assert!(matches!(
            "http://pim".parse::<PimUrl>(),
            Err(Error::InvalidUrl { .. })
        ));
        assert!("not a url".parse::<PimUrl>().is_err());
        assert!("serial:///dev/ttyS1:fast".parse::<PimUrl>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for s in ["tcp://pim.local:2101", "serial:///dev/ttyS0:4800"] {
            assert_eq!(s.parse::<PimUrl>().unwrap().to_string(), s);
        }
    }

    #[tokio::test]
    async fn connect_tcp_reaches_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = PimUrl::Tcp {
            host: "127.0.0.1".into(),
            port,
        };
        let (stream, accepted) =
            tokio::join!(connect(&url, Duration::from_secs(5)), listener.accept());
        assert!(stream.is_ok());
        assert!(accepted.is_ok());
    }
}
