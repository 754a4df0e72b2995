use std::{fs, io, path::PathBuf};

use serde::Deserialize;

/// How the server certificate of the VTN and token authority is verified
///
/// Whatever the policy, plain `http` is never allowed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "path")]
pub enum TlsVerification {
    /// Verify against the platform's default roots
    #[default]
    SystemRoots,
    /// Verify against the certificates in a PEM bundle
    CustomCa(PathBuf),
    /// Accept any certificate
    ///
    /// Only meant for development against self-signed servers.
    Disabled,
}

/// An error raised while preparing the TLS configuration
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// The CA bundle could not be read
    #[error("unable to read CA bundle at {path}")]
    ReadCa {
        /// The configured bundle path
        path: PathBuf,
        /// The underlying I/O failure
        #[source]
        source: io::Error,
    },
    /// The CA bundle did not contain usable certificates
    #[error("CA bundle at {path} is not a valid PEM bundle")]
    InvalidCa {
        /// The configured bundle path
        path: PathBuf,
        /// The error reported while parsing
        #[source]
        source: reqwest::Error,
    },
}

impl TlsVerification {
    /// Applies this policy to a client builder
    pub fn apply(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, TlsError> {
        match self {
            Self::SystemRoots => Ok(builder),
            Self::CustomCa(path) => {
                let pem = fs::read(path).map_err(|source| TlsError::ReadCa {
                    path: path.clone(),
                    source,
                })?;
                let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|source| {
                    TlsError::InvalidCa {
                        path: path.clone(),
                        source,
                    }
                })?;
                tracing::debug!(
                    path = %path.display(),
                    certificates = certs.len(),
                    "trusting custom CA bundle"
                );
                Ok(certs
                    .into_iter()
                    .fold(builder, |b, cert| b.add_root_certificate(cert)))
            }
            Self::Disabled => {
                tracing::warn!(
                    "TLS certificate verification is disabled, do not use this outside of development"
                );
                Ok(builder.danger_accept_invalid_certs(true))
            }
        }
    }
}

/// Returns a client builder that refuses plain `http` and verifies
/// certificates according to `tls`
pub fn https_client_builder(tls: &TlsVerification) -> Result<reqwest::ClientBuilder, TlsError> {
    let builder = reqwest::Client::builder()
        .https_only(true)
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
    tls.apply(builder)
}
