//! Session configuration: language, region, sample rate, credentials.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::SessionError;

/// Target PCM sample rate sent to the service.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Minimum supported sample rate (8 kHz telephony audio).
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Maximum supported sample rate (48 kHz high-quality audio).
pub const MAX_SAMPLE_RATE: u32 = 48_000;

/// Default validity window of the presigned connection URL. The signature
/// only has to outlive the WebSocket handshake.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 15;

/// AWS regions where streaming transcription is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AwsRegion {
    /// US East (N. Virginia)
    #[default]
    #[serde(rename = "us-east-1")]
    UsEast1,
    /// US East (Ohio)
    #[serde(rename = "us-east-2")]
    UsEast2,
    /// US West (Oregon)
    #[serde(rename = "us-west-2")]
    UsWest2,
    /// Asia Pacific (Seoul)
    #[serde(rename = "ap-northeast-2")]
    ApNortheast2,
    /// Asia Pacific (Sydney)
    #[serde(rename = "ap-southeast-2")]
    ApSoutheast2,
    /// Asia Pacific (Tokyo)
    #[serde(rename = "ap-northeast-1")]
    ApNortheast1,
    /// Canada (Central)
    #[serde(rename = "ca-central-1")]
    CaCentral1,
    /// Europe (Frankfurt)
    #[serde(rename = "eu-central-1")]
    EuCentral1,
    /// Europe (Ireland)
    #[serde(rename = "eu-west-1")]
    EuWest1,
    /// Europe (London)
    #[serde(rename = "eu-west-2")]
    EuWest2,
}

impl AwsRegion {
    /// Region identifier as used in endpoints and credential scopes.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsEast1 => "us-east-1",
            Self::UsEast2 => "us-east-2",
            Self::UsWest2 => "us-west-2",
            Self::ApNortheast2 => "ap-northeast-2",
            Self::ApSoutheast2 => "ap-southeast-2",
            Self::ApNortheast1 => "ap-northeast-1",
            Self::CaCentral1 => "ca-central-1",
            Self::EuCentral1 => "eu-central-1",
            Self::EuWest1 => "eu-west-1",
            Self::EuWest2 => "eu-west-2",
        }
    }

    /// Parse from string, with fallback to the default (us-east-1).
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "us-east-1" => Self::UsEast1,
            "us-east-2" => Self::UsEast2,
            "us-west-2" => Self::UsWest2,
            "ap-northeast-2" => Self::ApNortheast2,
            "ap-southeast-2" => Self::ApSoutheast2,
            "ap-northeast-1" => Self::ApNortheast1,
            "ca-central-1" => Self::CaCentral1,
            "eu-central-1" => Self::EuCentral1,
            "eu-west-1" => Self::EuWest1,
            "eu-west-2" => Self::EuWest2,
            _ => Self::default(),
        }
    }

    /// Regional streaming endpoint authority, port included.
    pub fn endpoint(&self) -> String {
        format!("transcribestreaming.{}.amazonaws.com:8443", self.as_str())
    }
}

/// A static AWS credential pair.
///
/// Read once per `start()` to sign the connection URL and not retained by
/// the signing path. The secret is zeroized on drop and excluded from
/// `Debug` output.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// AWS access key id.
    pub access_key_id: String,
    /// AWS secret access key.
    pub secret_access_key: String,
}

impl Credentials {
    /// Build a credential pair.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    /// Whether both fields are populated.
    pub fn is_complete(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Static configuration for one streaming session.
///
/// Supplied whole by the caller; the crate does no file or environment
/// parsing of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Language identifier sent in the connection query, e.g. `en-US`.
    pub language_code: String,

    /// Region to connect and sign against.
    pub region: AwsRegion,

    /// Target PCM sample rate in Hz. Capture chunks at higher rates are
    /// downsampled; chunks below it are dropped (upsampling unsupported).
    pub sample_rate: u32,

    /// Credential pair used to presign the connection URL.
    pub credentials: Credentials,

    /// Validity window of the presigned URL in seconds.
    pub expires_in_secs: u64,

    /// Endpoint override (VPC endpoint, local test server). `scheme://`
    /// prefix optional; defaults to the regional endpoint over `wss`.
    pub endpoint: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language_code: "en-US".to_string(),
            region: AwsRegion::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            credentials: Credentials::default(),
            expires_in_secs: DEFAULT_EXPIRES_IN_SECS,
            endpoint: None,
        }
    }
}

impl SessionConfig {
    /// Validate before any connection is attempted.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.language_code.is_empty() {
            return Err(SessionError::Configuration(
                "language code must not be empty".to_string(),
            ));
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(SessionError::Configuration(format!(
                "sample rate must be between {MIN_SAMPLE_RATE} and {MAX_SAMPLE_RATE} Hz, got {}",
                self.sample_rate
            )));
        }
        if !self.credentials.is_complete() {
            return Err(SessionError::Configuration(
                "credentials must carry an access key id and a secret access key".to_string(),
            ));
        }
        if self.expires_in_secs == 0 {
            return Err(SessionError::Configuration(
                "presigned URL expiry must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    /// Scheme and authority the session connects to.
    pub(crate) fn endpoint_authority(&self) -> (String, String) {
        match &self.endpoint {
            Some(endpoint) => match endpoint.split_once("://") {
                Some((scheme, authority)) => (scheme.to_string(), authority.to_string()),
                None => ("wss".to_string(), endpoint.clone()),
            },
            None => ("wss".to_string(), self.region.endpoint()),
        }
    }

    /// Stream parameters carried in the connection query string.
    pub(crate) fn stream_query(&self) -> String {
        format!(
            "language-code={}&media-encoding=pcm&sample-rate={}",
            self.language_code, self.sample_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regional_endpoint_authority() {
        assert_eq!(
            AwsRegion::UsWest2.endpoint(),
            "transcribestreaming.us-west-2.amazonaws.com:8443"
        );
        assert_eq!(AwsRegion::from_str_or_default("eu-west-2"), AwsRegion::EuWest2);
        assert_eq!(AwsRegion::from_str_or_default("mars-north-1"), AwsRegion::UsEast1);
    }

    #[test]
    fn endpoint_override_wins() {
        let mut config = SessionConfig::default();
        assert_eq!(
            config.endpoint_authority(),
            (
                "wss".to_string(),
                "transcribestreaming.us-east-1.amazonaws.com:8443".to_string()
            )
        );

        config.endpoint = Some("ws://127.0.0.1:9944".to_string());
        assert_eq!(
            config.endpoint_authority(),
            ("ws".to_string(), "127.0.0.1:9944".to_string())
        );

        config.endpoint = Some("vpce-1234.transcribe.us-east-1.vpce.amazonaws.com".to_string());
        assert_eq!(
            config.endpoint_authority(),
            (
                "wss".to_string(),
                "vpce-1234.transcribe.us-east-1.vpce.amazonaws.com".to_string()
            )
        );
    }

    #[test]
    fn validation_rejects_bad_configs() {
        let valid = SessionConfig {
            credentials: Credentials::new("key", "secret"),
            ..Default::default()
        };
        assert!(valid.validate().is_ok());

        let mut no_language = valid.clone();
        no_language.language_code.clear();
        assert!(matches!(
            no_language.validate(),
            Err(SessionError::Configuration(_))
        ));

        let mut bad_rate = valid.clone();
        bad_rate.sample_rate = 4_000;
        assert!(matches!(
            bad_rate.validate(),
            Err(SessionError::Configuration(_))
        ));

        let no_credentials = SessionConfig::default();
        assert!(matches!(
            no_credentials.validate(),
            Err(SessionError::Configuration(_))
        ));
    }

    #[test]
    fn query_carries_the_stream_parameters() {
        let config = SessionConfig {
            credentials: Credentials::new("key", "secret"),
            ..Default::default()
        };
        assert_eq!(
            config.stream_query(),
            "language-code=en-US&media-encoding=pcm&sample-rate=44100"
        );
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let credentials = Credentials::new("AKID", "super-secret");
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
