//! Pairing URI parsing
//!
//! Format: `wc:<pairingTopic>@<version>?relay-protocol=<protocol>&symKey=<hex>[&expiryTimestamp=<secs>]`

use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use url::Url;

const SCHEME: &str = "wc";

/// A parsed pairing URI
///
/// The symmetric key is kept behind [`SecretString`] and redacted from `Debug`.
#[derive(Clone)]
pub struct PairingUri {
    pub topic: String,
    pub version: u32,
    pub relay_protocol: String,
    sym_key: SecretString,
    pub expiry_timestamp: Option<u64>,
}

impl PairingUri {
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|e| Error::InvalidArgument(format!("invalid pairing uri: {}", e)))?;

        if url.scheme() != SCHEME {
            return Err(Error::InvalidArgument(format!(
                "pairing uri must use the {} scheme, got {}",
                SCHEME,
                url.scheme()
            )));
        }

        let (topic, version) = url.path().split_once('@').ok_or_else(|| {
            Error::InvalidArgument("pairing uri is missing <topic>@<version>".to_string())
        })?;
        if topic.is_empty() {
            return Err(Error::InvalidArgument("pairing topic is empty".to_string()));
        }
        let version = version
            .parse::<u32>()
            .map_err(|_| Error::InvalidArgument(format!("invalid pairing version: {}", version)))?;

        let mut relay_protocol = None;
        let mut sym_key = None;
        let mut expiry_timestamp = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "relay-protocol" => relay_protocol = Some(value.into_owned()),
                "symKey" => sym_key = Some(value.into_owned()),
                "expiryTimestamp" => {
                    let expiry = value.parse::<u64>().map_err(|_| {
                        Error::InvalidArgument(format!("invalid expiryTimestamp: {}", value))
                    })?;
                    expiry_timestamp = Some(expiry);
                }
                _ => {}
            }
        }

        let relay_protocol = relay_protocol.ok_or_else(|| {
            Error::InvalidArgument("pairing uri is missing relay-protocol".to_string())
        })?;
        let sym_key = sym_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::InvalidArgument("pairing uri is missing symKey".to_string()))?;

        Ok(Self {
            topic: topic.to_string(),
            version,
            relay_protocol,
            sym_key: SecretString::from(sym_key),
            expiry_timestamp,
        })
    }

    /// Build a URI for a freshly generated pairing
    pub fn new(
        topic: impl Into<String>,
        relay_protocol: impl Into<String>,
        sym_key: SecretString,
    ) -> Self {
        Self {
            topic: topic.into(),
            version: 2,
            relay_protocol: relay_protocol.into(),
            sym_key,
            expiry_timestamp: None,
        }
    }

    pub fn sym_key(&self) -> &SecretString {
        &self.sym_key
    }

    /// Whether the pairing has expired at `now` (unix seconds)
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry_timestamp.is_some_and(|expiry| expiry <= now)
    }

    /// Full URI including the symmetric key
    pub fn to_uri_string(&self) -> String {
        let mut uri = format!(
            "{}:{}@{}?relay-protocol={}&symKey={}",
            SCHEME,
            self.topic,
            self.version,
            self.relay_protocol,
            self.sym_key.expose_secret()
        );
        if let Some(expiry) = self.expiry_timestamp {
            uri.push_str(&format!("&expiryTimestamp={}", expiry));
        }
        uri
    }
}

impl FromStr for PairingUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingUri")
            .field("topic", &self.topic)
            .field("version", &self.version)
            .field("relay_protocol", &self.relay_protocol)
            .field("sym_key", &"[REDACTED]")
            .field("expiry_timestamp", &self.expiry_timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "wc:7f6e504bfad60b485450578e05678ed3e8e8c4751d3c6160be17160d63ec90f9@2?relay-protocol=irn&symKey=587d5484ce2a2a6ee3ba1962fdd7e8588e06200c46823bd18fbd67def96ad303";

    #[test]
    fn parses_pairing_uri() {
        let uri = PairingUri::parse(URI).unwrap();
        assert_eq!(
            uri.topic,
            "7f6e504bfad60b485450578e05678ed3e8e8c4751d3c6160be17160d63ec90f9"
        );
        assert_eq!(uri.version, 2);
        assert_eq!(uri.relay_protocol, "irn");
        assert!(uri.sym_key().expose_secret().starts_with("587d"));
        assert!(uri.expiry_timestamp.is_none());
    }

    #[test]
    fn parses_expiry() {
        let uri: PairingUri = format!("{}&expiryTimestamp=1700000000", URI).parse().unwrap();
        assert_eq!(uri.expiry_timestamp, Some(1_700_000_000));
        assert!(uri.is_expired(1_700_000_000));
        assert!(!uri.is_expired(1_699_999_999));
    }

    #[test]
    fn rejects_wrong_scheme() {
        let err = PairingUri::parse("https://example.com").unwrap_err();
        assert!(err.to_string().contains("wc scheme"));
    }

    #[test]
    fn rejects_missing_sym_key() {
        let err = PairingUri::parse("wc:abc@2?relay-protocol=irn").unwrap_err();
        assert!(err.to_string().contains("symKey"));
    }

    #[test]
    fn rejects_missing_version() {
        assert!(PairingUri::parse("wc:abc?relay-protocol=irn&symKey=00").is_err());
    }

    #[test]
    fn debug_redacts_sym_key() {
        let uri = PairingUri::parse(URI).unwrap();
        let debug_str = format!("{:?}", uri);
        assert!(!debug_str.contains("587d5484"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn round_trips_through_string() {
        let uri = PairingUri::parse(URI).unwrap();
        assert_eq!(uri.to_uri_string(), URI);
    }
}
