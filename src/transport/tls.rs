//! TLS client configuration.
//!
//! Certificate policy follows two options:
//!
//! - `verify_cert = false` accepts any certificate chain. Handshake signatures
//!   are still checked, so the peer must hold the key for the certificate it
//!   presents.
//! - `verify_cert = true` validates the chain against the platform's trusted
//!   roots. With `allow_self_signed = true`, a lone leaf certificate the roots
//!   do not cover is accepted if it verifies with itself as the trust anchor:
//!   its self-signature, validity period and host name must all check out.
//!
//! The `ciphers` option restricts the cipher suites offered: `DEFAULT` or `ALL`
//! offer every suite of the provider, otherwise it is a `:`-separated list of
//! IANA suite names such as `TLS13_AES_128_GCM_SHA256`.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{
    ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider,
    WebPkiSupportedAlgorithms,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    SupportedCipherSuite,
};
use tracing::{debug, warn};

use crate::options::{ConfigError, OptionKey, Options};

/// Build the rustls configuration for the given options.
pub(crate) fn client_config(options: &Options) -> Result<Arc<ClientConfig>, ConfigError> {
    let provider = Arc::new(CryptoProvider {
        cipher_suites: select_cipher_suites(options.ciphers())?,
        ..ring::default_provider()
    });

    let verifier: Arc<dyn ServerCertVerifier> = if options.verify_cert() {
        Arc::new(PlatformVerifier::new(
            provider.clone(),
            options.allow_self_signed(),
        )?)
    } else {
        Arc::new(AcceptAnyCertificate {
            algorithms: provider.signature_verification_algorithms,
        })
    };

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|error| ConfigError::invalid(OptionKey::Ciphers, error.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Check that a cipher selection names known suites.
pub(crate) fn validate_ciphers(ciphers: &str) -> Result<(), ConfigError> {
    select_cipher_suites(ciphers).map(|_| ())
}

fn select_cipher_suites(ciphers: &str) -> Result<Vec<SupportedCipherSuite>, ConfigError> {
    let available = ring::default_provider().cipher_suites;
    let ciphers = ciphers.trim();

    if ciphers.eq_ignore_ascii_case("DEFAULT") || ciphers.eq_ignore_ascii_case("ALL") {
        return Ok(available);
    }

    let mut selected = Vec::new();
    for name in ciphers.split(':').map(str::trim).filter(|name| !name.is_empty()) {
        let suite = available
            .iter()
            .find(|suite| suite_name(suite).eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                ConfigError::invalid(OptionKey::Ciphers, format!("unknown cipher suite `{name}`"))
            })?;

        if !selected.contains(suite) {
            selected.push(*suite);
        }
    }

    if selected.is_empty() {
        return Err(ConfigError::invalid(OptionKey::Ciphers, "no cipher suites selected"));
    }
    Ok(selected)
}

fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

fn platform_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!(%error, "failed to load a platform certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "loaded platform root certificates");

    roots
}

fn unknown_issuer() -> rustls::Error {
    rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)
}

/// Accepts any certificate chain, but still requires valid handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Webpki validation against the platform's trusted roots.
///
/// With `allow_self_signed`, a lone leaf that the roots do not vouch for is
/// validated with itself as the only trust anchor, so its signature, validity
/// period and name must all hold. Without any platform roots, only such leaves
/// can verify.
#[derive(Debug)]
struct PlatformVerifier {
    webpki: Option<Arc<WebPkiServerVerifier>>,
    allow_self_signed: bool,
    provider: Arc<CryptoProvider>,
}

impl PlatformVerifier {
    fn new(provider: Arc<CryptoProvider>, allow_self_signed: bool) -> Result<Self, ConfigError> {
        let roots = platform_roots();

        let webpki = if roots.is_empty() {
            warn!("no platform root certificates, only self-signed certificates can verify");
            None
        } else {
            let verifier =
                WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                    .build()
                    .map_err(|error| {
                        ConfigError::invalid(OptionKey::VerifyCert, error.to_string())
                    })?;
            Some(verifier)
        };

        Ok(Self {
            webpki,
            allow_self_signed,
            provider,
        })
    }

    fn verify_self_signed(
        &self,
        end_entity: &CertificateDer<'_>,
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let mut anchor = RootCertStore::empty();
        anchor
            .add(end_entity.clone().into_owned())
            .map_err(|_| unknown_issuer())?;

        let verifier =
            WebPkiServerVerifier::builder_with_provider(Arc::new(anchor), self.provider.clone())
                .build()
                .map_err(|_| unknown_issuer())?;
        verifier.verify_server_cert(end_entity, &[], server_name, ocsp_response, now)?;

        debug!(server = ?server_name, "accepting self-signed certificate");
        Ok(ServerCertVerified::assertion())
    }
}

impl ServerCertVerifier for PlatformVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let outcome = match &self.webpki {
            Some(webpki) => webpki.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ),
            None => Err(unknown_issuer()),
        };

        match outcome {
            Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
                if self.allow_self_signed && intermediates.is_empty() =>
            {
                self.verify_self_signed(end_entity, server_name, ocsp_response, now)
            }
            outcome => outcome,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        let algorithms = &self.provider.signature_verification_algorithms;
        verify_tls12_signature(message, cert, dss, algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        let algorithms = &self.provider.signature_verification_algorithms;
        verify_tls13_signature(message, cert, dss, algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
