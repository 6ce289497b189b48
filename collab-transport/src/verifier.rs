//! Certificate pinning by SHA-256 hash (§4.2, `serverCertificateHashes`).
//!
//! Relays in this system are commonly reachable only behind a self-signed
//! leaf certificate, so the usual WebPKI chain validation does not apply.
//! Instead the caller supplies the expected hash of the end-entity
//! certificate and [`PinnedHashVerifier`] accepts the handshake iff the
//! presented certificate matches one of them. Signature verification itself
//! still runs normally; only chain-of-trust validation is skipped.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, Error, SignatureScheme};
use sha2::{Digest, Sha256};

/// SHA-256 digest of a DER-encoded end-entity certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateHash(pub [u8; 32]);

impl CertificateHash {
    pub fn of_der(der: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(der);
        Self(hasher.finalize().into())
    }
}

#[derive(Debug)]
pub struct PinnedHashVerifier {
    hashes: Vec<CertificateHash>,
    schemes: WebPkiSupportedAlgorithms,
}

impl PinnedHashVerifier {
    pub fn new(hashes: Vec<CertificateHash>) -> Self {
        Self {
            hashes,
            schemes: rustls::crypto::CryptoProvider::get_default()
                .expect("a process-default rustls CryptoProvider must be installed")
                .signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for PinnedHashVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let presented = CertificateHash::of_der(end_entity);
        if self.hashes.iter().any(|pinned| *pinned == presented) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(Error::General(
                "server certificate does not match any pinned hash".into(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.schemes)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.schemes)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_der_hashes_equal() {
        let der = b"not a real certificate, just bytes";
        assert_eq!(CertificateHash::of_der(der), CertificateHash::of_der(der));
    }

    #[test]
    fn different_der_hashes_differ() {
        assert_ne!(
            CertificateHash::of_der(b"one"),
            CertificateHash::of_der(b"two")
        );
    }
}
