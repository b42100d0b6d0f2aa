// Router session: one authenticated connection to the control API.
//
// A session is deliberately dumb: connect, log in, run one command at a
// time. Reuse, caching, and per-command deadlines live in the caller
// (wispctl-core's pool) so a wedged session can simply be dropped.

use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::Error;
use crate::transport::TransportConfig;
use crate::wire::{self, FlatRecord, Param, ReplyWord};

/// Anything a session can speak over: plain TCP or a TLS-wrapped stream.
trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// One authenticated connection to the router's control API.
pub struct RouterSession {
    stream: Box<dyn AsyncStream>,
    peer: String,
}

impl std::fmt::Debug for RouterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterSession")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl RouterSession {
    /// Open a TCP (optionally TLS-wrapped) connection to the router.
    ///
    /// Applies the transport's connect timeout to the whole dial,
    /// handshake included.
    pub async fn connect(
        host: &str,
        port: u16,
        use_tls: bool,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let peer = format!("{host}:{port}");
        debug!(%peer, use_tls, "opening router session");

        let dial = async {
            let tcp = TcpStream::connect((host, port)).await?;
            tcp.set_nodelay(true)?;

            let stream: Box<dyn AsyncStream> = if use_tls {
                let connector = transport.tls_connector()?;
                let name = TransportConfig::server_name(host)?;
                Box::new(connector.connect(name, tcp).await?)
            } else {
                Box::new(tcp)
            };
            Ok::<_, Error>(stream)
        };

        let stream = tokio::time::timeout(transport.timeout, dial)
            .await
            .map_err(|_| Error::ConnectTimeout {
                timeout_secs: transport.timeout.as_secs(),
            })??;

        Ok(Self { stream, peer })
    }

    /// Authenticate with the modern credential exchange.
    ///
    /// Devices predating it answer the bare `/login` with a challenge in
    /// `=ret=`; that handshake is not supported and surfaces as an
    /// authentication error rather than silently sending an empty digest.
    pub async fn login(&mut self, username: &str, password: &SecretString) -> Result<(), Error> {
        let reply = self
            .command(
                "/login",
                &[
                    Param::attr("name", username),
                    Param::attr("password", password.expose_secret()),
                ],
            )
            .await;

        match reply {
            Ok(records) => {
                if records.iter().any(|r| r.contains_key("ret")) {
                    return Err(Error::Authentication {
                        message: "router requested the legacy challenge handshake".into(),
                    });
                }
                debug!(peer = %self.peer, "login accepted");
                Ok(())
            }
            Err(Error::Trap { message }) => Err(Error::Authentication { message }),
            Err(e) => Err(e),
        }
    }

    /// Run one command and collect its data records.
    ///
    /// Returns the `!re` records in reply order. A `!trap` is drained up to
    /// its closing `!done` so the stream stays framed, then surfaced as
    /// [`Error::Trap`].
    pub async fn command(&mut self, path: &str, params: &[Param]) -> Result<Vec<FlatRecord>, Error> {
        let words: Vec<String> = std::iter::once(path.to_owned())
            .chain(params.iter().map(Param::word))
            .collect();
        let buf = wire::encode_sentence(words.iter().map(String::as_str));

        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;

        let mut records = Vec::new();
        let mut trap: Option<String> = None;

        loop {
            let sentence = self.read_sentence().await?;
            let Some((head, rest)) = sentence.split_first() else {
                return Err(Error::Protocol("empty reply sentence".into()));
            };

            let attrs = wire::parse_attributes(rest.iter().map(String::as_str));
            match ReplyWord::parse(head)? {
                ReplyWord::Re => records.push(attrs),
                ReplyWord::Trap => {
                    let message = attrs
                        .get("message")
                        .cloned()
                        .unwrap_or_else(|| "unspecified trap".into());
                    trap.get_or_insert(message);
                }
                ReplyWord::Fatal => {
                    let message = attrs
                        .values()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join("; ");
                    return Err(Error::Fatal { message });
                }
                ReplyWord::Done => {
                    // `!done` may itself carry attributes (e.g. `=ret=`);
                    // surface them as a trailing record.
                    if !attrs.is_empty() {
                        records.push(attrs);
                    }
                    break;
                }
            }
        }

        match trap {
            Some(message) => Err(Error::Trap { message }),
            None => Ok(records),
        }
    }

    /// The `host:port` this session is connected to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    // ── Framing ──────────────────────────────────────────────────────

    /// Read one sentence: words until the zero-length terminator.
    async fn read_sentence(&mut self) -> Result<Vec<String>, Error> {
        let mut words = Vec::new();
        loop {
            let len = self.read_length().await?;
            if len == 0 {
                if words.is_empty() {
                    // Keep-alive empty sentence between replies; skip it.
                    continue;
                }
                return Ok(words);
            }
            let mut buf = vec![0u8; len];
            self.stream.read_exact(&mut buf).await?;
            let word = String::from_utf8(buf)
                .map_err(|e| Error::Protocol(format!("non-UTF-8 word: {e}")))?;
            words.push(word);
        }
    }

    /// Read a variable-width length prefix.
    async fn read_length(&mut self) -> Result<usize, Error> {
        let first = self.stream.read_u8().await?;
        let (extra, mut value) = wire::length_prefix(first)?;
        for _ in 0..extra {
            value = (value << 8) | u32::from(self.stream.read_u8().await?);
        }
        Ok(value as usize)
    }
}
