//! Alexa request signature verification.
//!
//! Every request is signed by Alexa with the key of a certificate published on
//! S3. Verification checks the certificate URL, the certificate chain, the
//! signature over the raw body, and the request timestamp.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use rustls_pki_types::{CertificateDer, SignatureVerificationAlgorithm, UnixTime};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;
use webpki::{EndEntityCert, KeyUsage};
use x509_parser::extensions::GeneralName;
use x509_parser::pem::Pem;

use crate::alexa::SkillRequest;
use crate::http::{decode_base64, ApiGatewayRequest};
use crate::{Error, Result};

/// Host serving Alexa signing certificates.
const CERT_HOST: &str = "s3.amazonaws.com";

/// Required path prefix of the certificate URL.
const CERT_PATH_PREFIX: &str = "/echo.api/";

/// Subject alternative name the signing certificate must carry.
const CERT_SAN: &str = "echo-api.amazon.com";

/// Maximum age of a request, in seconds.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 150;

/// Signature headers of an Alexa request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureHeaders {
    pub cert_chain_url: Option<String>,
    /// Base64 RSA/SHA-1 signature
    pub signature: Option<String>,
    /// Base64 RSA/SHA-256 signature
    pub signature_256: Option<String>,
}

impl SignatureHeaders {
    pub fn from_request(request: &ApiGatewayRequest) -> Self {
        Self {
            cert_chain_url: request.header("SignatureCertChainUrl").map(String::from),
            signature: request.header("Signature").map(String::from),
            signature_256: request.header("Signature-256").map(String::from),
        }
    }
}

#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Confirm the raw body was signed by Alexa.
    async fn verify(&self, headers: &SignatureHeaders, raw_body: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignatureAlgorithm {
    Sha1,
    Sha256,
}

impl SignatureAlgorithm {
    fn ring_algorithm(self) -> &'static dyn VerificationAlgorithm {
        match self {
            SignatureAlgorithm::Sha1 => &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
            SignatureAlgorithm::Sha256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        }
    }
}

fn verification_error(message: impl Into<String>) -> Error {
    Error::Verification(message.into())
}

/// Validate the certificate chain URL.
pub fn validate_cert_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| verification_error(format!("Invalid certificate URL: {}", e)))?;

    if url.scheme() != "https" {
        return Err(verification_error("Certificate URL must use https"));
    }
    if url.host_str() != Some(CERT_HOST) {
        return Err(verification_error("Certificate URL has an unexpected host"));
    }
    // Url drops the scheme's default port, so only non-443 ports remain.
    if url.port().is_some() {
        return Err(verification_error("Certificate URL has an unexpected port"));
    }
    if !url.path().starts_with(CERT_PATH_PREFIX) {
        return Err(verification_error("Certificate URL has an unexpected path"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(verification_error("Certificate URL must not carry a query or fragment"));
    }

    Ok(url)
}

/// Reject requests older or newer than the tolerance.
pub fn check_timestamp(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    let skew = (now - timestamp).num_seconds().abs();
    if skew > TIMESTAMP_TOLERANCE_SECS {
        return Err(verification_error(format!("Request timestamp is {}s off", skew)));
    }
    Ok(())
}

/// Signature algorithms accepted on certificates in the chain.
static CHAIN_SIGNATURE_ALGS: &[&dyn SignatureVerificationAlgorithm] = &[
    webpki::ring::RSA_PKCS1_2048_8192_SHA256,
    webpki::ring::RSA_PKCS1_2048_8192_SHA384,
    webpki::ring::RSA_PKCS1_2048_8192_SHA512,
    webpki::ring::ECDSA_P256_SHA256,
    webpki::ring::ECDSA_P256_SHA384,
    webpki::ring::ECDSA_P384_SHA256,
    webpki::ring::ECDSA_P384_SHA384,
];

/// Build a path from the leaf through the intermediates to a trusted root.
///
/// Every certificate on the path must be valid at `now`.
fn verify_trust_path(chain: &[CertificateDer<'static>], now: UnixTime) -> Result<()> {
    let (leaf, intermediates) = chain
        .split_first()
        .ok_or_else(|| verification_error("Certificate chain is empty"))?;

    let leaf = EndEntityCert::try_from(leaf)
        .map_err(|e| verification_error(format!("Invalid signing certificate: {:?}", e)))?;

    leaf.verify_for_usage(
        CHAIN_SIGNATURE_ALGS,
        webpki_roots::TLS_SERVER_ROOTS,
        intermediates,
        now,
        KeyUsage::server_auth(),
        None,
        None,
    )
    .map(|_| ())
    .map_err(|e| verification_error(format!("Certificate chain is not anchored to a trusted root: {:?}", e)))
}

/// Check the PEM chain and the body signature against its leaf certificate.
fn verify_with_chain(
    chain_pem: &[u8],
    algorithm: SignatureAlgorithm,
    raw_body: &[u8],
    signature: &[u8],
) -> Result<()> {
    let pems = Pem::iter_from_buffer(chain_pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| verification_error(format!("Invalid certificate chain: {}", e)))?;

    let certs = pems
        .iter()
        .map(|pem| pem.parse_x509())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| verification_error(format!("Invalid certificate: {}", e)))?;

    let leaf = certs
        .first()
        .ok_or_else(|| verification_error("Certificate chain is empty"))?;

    let has_san = leaf
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|san| {
            san.value
                .general_names
                .iter()
                .any(|name| matches!(name, GeneralName::DNSName(dns) if *dns == CERT_SAN))
        })
        .unwrap_or(false);
    if !has_san {
        return Err(verification_error("Signing certificate is not issued to Alexa"));
    }

    let ders: Vec<CertificateDer<'static>> = pems
        .iter()
        .map(|pem| CertificateDer::from(pem.contents.clone()))
        .collect();
    verify_trust_path(&ders, UnixTime::now())?;

    let key_bytes: &[u8] = &leaf.public_key().subject_public_key.data;
    UnparsedPublicKey::new(algorithm.ring_algorithm(), key_bytes)
        .verify(raw_body, signature)
        .map_err(|_| verification_error("Signature does not match request body"))
}

/// Verifies requests against Alexa's published signing certificates.
pub struct AlexaVerifier {
    http_client: reqwest::Client,
    chains: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl AlexaVerifier {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            chains: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the certificate chain, cached per certificate path.
    async fn fetch_chain(&self, url: &Url) -> Result<Arc<Vec<u8>>> {
        {
            let chains = self.chains.read().await;
            if let Some(chain) = chains.get(url.path()) {
                return Ok(Arc::clone(chain));
            }
        }

        debug!(url = %url, "Fetching signing certificate chain");
        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| verification_error(format!("Failed to fetch certificate: {}", e)))?;

        if !response.status().is_success() {
            return Err(verification_error(format!(
                "Certificate fetch returned {}",
                response.status()
            )));
        }

        let chain = Arc::new(
            response
                .bytes()
                .await
                .map_err(|e| verification_error(format!("Failed to read certificate: {}", e)))?
                .to_vec(),
        );

        {
            let mut chains = self.chains.write().await;
            chains.insert(url.path().to_string(), Arc::clone(&chain));
        }

        Ok(chain)
    }
}

#[async_trait]
impl SignatureVerifier for AlexaVerifier {
    async fn verify(&self, headers: &SignatureHeaders, raw_body: &[u8]) -> Result<()> {
        let cert_url = headers
            .cert_chain_url
            .as_deref()
            .ok_or_else(|| verification_error("Missing SignatureCertChainUrl header"))?;
        let url = validate_cert_url(cert_url)?;

        let (algorithm, encoded) = match (&headers.signature_256, &headers.signature) {
            (Some(sig), _) => (SignatureAlgorithm::Sha256, sig),
            (None, Some(sig)) => (SignatureAlgorithm::Sha1, sig),
            (None, None) => return Err(verification_error("Missing Signature header")),
        };
        let signature = decode_base64(encoded).ok_or_else(|| verification_error("Signature is not base64"))?;

        let timestamp = SkillRequest::from_slice(raw_body)?
            .request
            .timestamp
            .ok_or_else(|| verification_error("Request has no timestamp"))?;
        check_timestamp(timestamp, Utc::now())?;

        let chain = self.fetch_chain(&url).await?;
        verify_with_chain(&chain, algorithm, raw_body, &signature).map_err(|e| {
            warn!(error = %e, "Alexa signature rejected");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_valid_cert_urls() {
        for url in [
            "https://s3.amazonaws.com/echo.api/echo-api-cert.pem",
            "https://s3.amazonaws.com:443/echo.api/echo-api-cert.pem",
            "https://s3.amazonaws.com/echo.api/../echo.api/echo-api-cert.pem",
            "HTTPS://s3.amazonaws.com/echo.api/echo-api-cert.pem",
            "https://S3.AMAZONAWS.COM/echo.api/echo-api-cert.pem",
        ] {
            assert!(validate_cert_url(url).is_ok(), "{} should be accepted", url);
        }
    }

    #[test]
    fn test_invalid_cert_urls() {
        for url in [
            "http://s3.amazonaws.com/echo.api/echo-api-cert.pem",
            "https://notamazon.com/echo.api/echo-api-cert.pem",
            "https://s3.amazonaws.com/EcHo.aPi/echo-api-cert.pem",
            "https://s3.amazonaws.com/invalid.path/echo-api-cert.pem",
            "https://s3.amazonaws.com:563/echo.api/echo-api-cert.pem",
            "not a url",
        ] {
            assert!(
                matches!(validate_cert_url(url), Err(Error::Verification(_))),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn test_cert_url_with_query_or_fragment_rejected() {
        for url in [
            "https://s3.amazonaws.com/echo.api/echo-api-cert.pem?nonce=0",
            "https://s3.amazonaws.com/echo.api/echo-api-cert.pem?",
            "https://s3.amazonaws.com/echo.api/echo-api-cert.pem#part",
        ] {
            assert!(
                matches!(validate_cert_url(url), Err(Error::Verification(_))),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn test_equivalent_cert_urls_share_cache_key() {
        let plain = validate_cert_url("https://s3.amazonaws.com/echo.api/echo-api-cert.pem").unwrap();
        let dotted = validate_cert_url("https://S3.amazonaws.com:443/echo.api/../echo.api/echo-api-cert.pem").unwrap();
        assert_eq!(plain.path(), dotted.path());
    }

    #[test]
    fn test_self_signed_chain_rejected() {
        let certified = rcgen::generate_simple_self_signed(vec![CERT_SAN.to_string()]).unwrap();
        let pem = certified.cert.pem();

        let result = verify_with_chain(pem.as_bytes(), SignatureAlgorithm::Sha256, b"{}", b"sig");
        assert!(
            matches!(&result, Err(Error::Verification(msg)) if msg.contains("trusted root")),
            "unexpected result: {:?}",
            result
        );

        let der = CertificateDer::from(certified.cert.der().to_vec());
        assert!(verify_trust_path(&[der], UnixTime::now()).is_err());
        assert!(verify_trust_path(&[], UnixTime::now()).is_err());
    }

    #[test]
    fn test_timestamp_tolerance() {
        let now = Utc::now();
        assert!(check_timestamp(now, now).is_ok());
        assert!(check_timestamp(now - Duration::seconds(150), now).is_ok());
        assert!(check_timestamp(now - Duration::seconds(151), now).is_err());
        assert!(check_timestamp(now + Duration::seconds(151), now).is_err());
    }

    #[test]
    fn test_headers_from_request() {
        let mut headers = HashMap::new();
        headers.insert("signaturecertchainurl".to_string(), "https://s3.amazonaws.com/echo.api/c.pem".to_string());
        headers.insert("Signature-256".to_string(), "c2ln".to_string());
        let request = ApiGatewayRequest {
            headers: Some(headers),
            ..Default::default()
        };

        let parsed = SignatureHeaders::from_request(&request);
        assert_eq!(parsed.cert_chain_url.as_deref(), Some("https://s3.amazonaws.com/echo.api/c.pem"));
        assert_eq!(parsed.signature_256.as_deref(), Some("c2ln"));
        assert_eq!(parsed.signature, None);
    }

    #[tokio::test]
    async fn test_missing_headers_rejected() {
        let verifier = AlexaVerifier::new(reqwest::Client::new());
        let result = verifier.verify(&SignatureHeaders::default(), b"{}").await;
        assert!(matches!(result, Err(Error::Verification(_))));

        let headers = SignatureHeaders {
            cert_chain_url: Some("https://s3.amazonaws.com/echo.api/echo-api-cert.pem".to_string()),
            ..Default::default()
        };
        let result = verifier.verify(&headers, b"{}").await;
        assert!(matches!(result, Err(Error::Verification(_))));
    }

    #[tokio::test]
    async fn test_stale_request_rejected_before_fetch() {
        let verifier = AlexaVerifier::new(reqwest::Client::new());
        let headers = SignatureHeaders {
            cert_chain_url: Some("https://s3.amazonaws.com/echo.api/echo-api-cert.pem".to_string()),
            signature: Some("c2lnbmF0dXJl".to_string()),
            signature_256: None,
        };
        let body = br#"{"request":{"type":"LaunchRequest","timestamp":"2017-01-01T00:00:00Z"}}"#;
        let result = verifier.verify(&headers, body).await;
        assert!(matches!(result, Err(Error::Verification(msg)) if msg.contains("timestamp")));
    }

    #[test]
    fn test_garbage_chain_rejected() {
        let result = verify_with_chain(b"not a pem", SignatureAlgorithm::Sha256, b"{}", b"sig");
        assert!(matches!(result, Err(Error::Verification(_))));
    }
}
