//! Stream types for the session transport.
//!
//! [`ImapStream`] is the byte pipe to the server: either plaintext TCP or
//! TLS over TCP, with support for upgrading an established plaintext
//! connection in place (STARTTLS).

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::{Error, Result};

/// TLS protocol version selection for the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    /// Let rustls negotiate from its default version set.
    Any,
    /// Pin the handshake to TLS 1.3.
    Tls13,
    /// Pin the handshake to TLS 1.2.
    Tls12,
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Tls13 => write!(f, "TLS 1.3"),
            Self::Tls12 => write!(f, "TLS 1.2"),
        }
    }
}

/// A stream that can be either plaintext or TLS.
pub enum ImapStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl ImapStream {
    /// Wraps an established TCP connection.
    #[must_use]
    pub const fn plain(stream: TcpStream) -> Self {
        Self::Plain(stream)
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Upgrades a plaintext stream to TLS in place.
    ///
    /// `insecure` disables certificate verification; the session only sets
    /// it after the caller explicitly accepted the reported TLS errors.
    ///
    /// # Errors
    ///
    /// Fails if the stream is already encrypted, the host is not a valid
    /// DNS name, or the handshake is rejected.
    pub async fn upgrade_to_tls(
        self,
        host: &str,
        version: TlsVersion,
        insecure: bool,
    ) -> Result<Self> {
        match self {
            Self::Plain(tcp) => {
                let connector = tls_connector(version, insecure)?;
                let server_name = ServerName::try_from(host.to_string())?;
                let tls = connector.connect(server_name, tcp).await?;
                Ok(Self::Tls(Box::new(tls)))
            }
            Self::Tls(_) => Err(Error::InvalidState(
                "stream is already encrypted".to_string(),
            )),
        }
    }

    /// The negotiated TLS protocol version, if encrypted.
    #[must_use]
    pub fn tls_version(&self) -> Option<TlsVersion> {
        match self {
            Self::Plain(_) => None,
            Self::Tls(stream) => match stream.get_ref().1.protocol_version() {
                Some(rustls::ProtocolVersion::TLSv1_3) => Some(TlsVersion::Tls13),
                Some(rustls::ProtocolVersion::TLSv1_2) => Some(TlsVersion::Tls12),
                _ => None,
            },
        }
    }

    /// The negotiated cipher suite, if encrypted. A successful handshake
    /// always yields one; `None` on a TLS stream means the handshake never
    /// produced a usable cipher.
    #[must_use]
    pub fn negotiated_cipher(&self) -> Option<String> {
        match self {
            Self::Plain(_) => None,
            Self::Tls(stream) => stream
                .get_ref()
                .1
                .negotiated_cipher_suite()
                .map(|suite| format!("{:?}", suite.suite())),
        }
    }
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Connects a plaintext TCP stream.
///
/// # Errors
///
/// Fails when the TCP connection cannot be established.
pub async fn connect_plain(host: &str, port: u16) -> Result<ImapStream> {
    let tcp = TcpStream::connect((host, port)).await?;
    Ok(ImapStream::Plain(tcp))
}

/// Connects with implicit TLS (port 993 style).
///
/// # Errors
///
/// Fails when the TCP connection or the TLS handshake fails.
pub async fn connect_tls(host: &str, port: u16, version: TlsVersion) -> Result<ImapStream> {
    let tcp = TcpStream::connect((host, port)).await?;
    let connector = tls_connector(version, false)?;
    let server_name = ServerName::try_from(host.to_string())?;
    let tls = connector.connect(server_name, tcp).await?;
    Ok(ImapStream::Tls(Box::new(tls)))
}

/// Builds a TLS connector for the requested protocol version.
fn tls_connector(version: TlsVersion, insecure: bool) -> Result<TlsConnector> {
    let builder = match version {
        TlsVersion::Any => rustls::ClientConfig::builder(),
        TlsVersion::Tls13 => {
            rustls::ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        }
        TlsVersion::Tls12 => {
            rustls::ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
        }
    };

    let config = if insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
            .with_no_client_auth()
    } else {
        let root_store = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Certificate verifier that accepts anything. Used only after the caller
/// explicitly accepted the reported certificate errors.
#[derive(Debug)]
struct NoVerification(rustls::crypto::CryptoProvider);

impl NoVerification {
    fn new() -> Self {
        Self(rustls::crypto::aws_lc_rs::default_provider())
    }
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_builds_for_every_version() {
        for version in [TlsVersion::Any, TlsVersion::Tls13, TlsVersion::Tls12] {
            assert!(tls_connector(version, false).is_ok());
            assert!(tls_connector(version, true).is_ok());
        }
    }

    #[tokio::test]
    async fn test_plain_stream_reports_no_tls() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let stream = connect_plain(&addr.ip().to_string(), addr.port())
            .await
            .unwrap();
        assert!(!stream.is_tls());
        assert!(stream.tls_version().is_none());
        assert!(stream.negotiated_cipher().is_none());
        accept.await.unwrap();
    }
}
