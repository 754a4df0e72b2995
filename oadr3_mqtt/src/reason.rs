use std::fmt;

use rumqttc::{ConnectReturnCode, ConnectionError};

/// An MQTT reason code describing why a connection ended or was refused
///
/// Zero marks a disconnect the client asked for. Any other value is treated
/// as unexpected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReasonCode(pub u8);

impl ReasonCode {
    /// Normal disconnection
    pub const NORMAL: Self = Self(0x00);
    /// Unspecified error
    pub const UNSPECIFIED: Self = Self(0x80);
    /// Unsupported protocol version
    pub const UNSUPPORTED_PROTOCOL_VERSION: Self = Self(0x84);
    /// Client identifier not valid
    pub const CLIENT_IDENTIFIER_NOT_VALID: Self = Self(0x85);
    /// Bad user name or password
    pub const BAD_USERNAME_OR_PASSWORD: Self = Self(0x86);
    /// Not authorized
    pub const NOT_AUTHORIZED: Self = Self(0x87);
    /// Server unavailable
    pub const SERVER_UNAVAILABLE: Self = Self(0x88);

    /// Whether the connection ended at the client's request
    #[inline]
    pub fn is_normal(self) -> bool {
        self == Self::NORMAL
    }

    /// Whether the broker refused the credentials that were presented
    #[inline]
    pub fn rejects_credentials(self) -> bool {
        self == Self::BAD_USERNAME_OR_PASSWORD || self == Self::NOT_AUTHORIZED
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

impl From<ConnectReturnCode> for ReasonCode {
    fn from(code: ConnectReturnCode) -> Self {
        match code {
            ConnectReturnCode::Success => Self::NORMAL,
            ConnectReturnCode::RefusedProtocolVersion => Self::UNSUPPORTED_PROTOCOL_VERSION,
            ConnectReturnCode::BadClientId => Self::CLIENT_IDENTIFIER_NOT_VALID,
            ConnectReturnCode::ServiceUnavailable => Self::SERVER_UNAVAILABLE,
            ConnectReturnCode::BadUserNamePassword => Self::BAD_USERNAME_OR_PASSWORD,
            ConnectReturnCode::NotAuthorized => Self::NOT_AUTHORIZED,
        }
    }
}

impl From<&ConnectionError> for ReasonCode {
    fn from(err: &ConnectionError) -> Self {
        match err {
            ConnectionError::ConnectionRefused(code) => Self::from(*code),
            ConnectionError::RequestsDone => Self::NORMAL,
            _ => Self::UNSPECIFIED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_credentials_map_to_rejection_codes() {
        let bad_password =
            ReasonCode::from(&ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword));
        let not_authorized =
            ReasonCode::from(&ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized));

        assert!(bad_password.rejects_credentials());
        assert!(not_authorized.rejects_credentials());
    }

    #[test]
    fn closed_request_channel_is_a_normal_disconnect() {
        assert!(ReasonCode::from(&ConnectionError::RequestsDone).is_normal());
    }

    #[test]
    fn network_failures_are_unspecified() {
        let code = ReasonCode::from(&ConnectionError::NetworkTimeout);
        assert_eq!(code, ReasonCode::UNSPECIFIED);
        assert!(!code.is_normal());
        assert!(!code.rejects_credentials());
    }

    #[test]
    fn displays_as_hex() {
        assert_eq!(ReasonCode::NOT_AUTHORIZED.to_string(), "0x87");
        assert_eq!(ReasonCode::NORMAL.to_string(), "0x00");
    }
}
